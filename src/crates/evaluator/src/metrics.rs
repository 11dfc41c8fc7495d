//! Quantitative prompt metrics.
//!
//! The rubric evaluators anchor their LLM judgement on these counts so the
//! scoring stays consistent across sessions: word/sentence counts and
//! concrete values (clarity), I/O-pair counts (examples), XML tag /
//! constraint / list counts (rules), recent-turn references (context), and
//! technical-term counts against the problem's algorithm list
//! (problem relevance). Each group also computes a 0-100 base score.

use regex::Regex;
use serde::Serialize;
use std::sync::OnceLock;

fn xml_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"<[^>]+>").expect("valid regex"))
}

fn role_content_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)<Role>|<Content>").expect("valid regex"))
}

fn code_block_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"```[\s\S]*?```").expect("valid regex"))
}

fn word_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\b\w+\b").expect("valid regex"))
}

fn number_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\b\d+(?:\.\d+)?\b|O\([^)]+\)").expect("valid regex"))
}

fn list_item_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\s*(?:\d+[.)]|[-*+])\s").expect("valid regex"))
}

const EXAMPLE_KEYWORDS: &[&str] = &[
    "예시", "예를 들어", "예를 들면", "example", "e.g.",
];
const IO_KEYWORDS: &[&str] = &["입력", "출력", "input", "output"];
const CONSTRAINT_KEYWORDS: &[&str] = &[
    "제약",
    "제약조건",
    "제약 조건",
    "조건",
    "제한",
    "제한사항",
    "constraint",
    "limit",
    "requirement",
    "condition",
    "시간 복잡도",
    "공간 복잡도",
    "time complexity",
    "space complexity",
];
const CONTEXT_KEYWORDS: &[&str] = &[
    "이전",
    "앞서",
    "앞에서",
    "위에서",
    "지금까지",
    "방금",
    "제안해주신",
    "작성해주신",
    "말씀하신",
    "알려주신",
    "previous",
    "earlier",
    "above",
    "mentioned",
    "said",
];
const TECHNICAL_TERMS: &[&str] = &[
    "알고리즘",
    "자료구조",
    "복잡도",
    "시간복잡도",
    "공간복잡도",
    "algorithm",
    "data structure",
    "complexity",
    "dp",
    "동적계획법",
    "dynamic programming",
    "그래프",
    "트리",
    "graph",
    "tree",
    "비트마스킹",
    "bitmask",
    "bitmasking",
    "재귀",
    "recursion",
    "recursive",
    "반복문",
    "iteration",
    "iterative",
    "정렬",
    "sort",
    "sorting",
    "탐색",
    "search",
    "searching",
    "해시",
    "hash",
    "hashing",
];

/// Word count.
pub fn count_words(text: &str) -> usize {
    word_re().find_iter(text).count()
}

/// Sentence count (`.` `!` `?` boundaries).
pub fn count_sentences(text: &str) -> usize {
    text.split(['.', '!', '?'])
        .filter(|s| !s.trim().is_empty())
        .count()
}

/// Any XML tag present.
pub fn has_xml_tags(text: &str) -> bool {
    xml_re().is_match(text)
}

/// XML tag count.
pub fn count_xml_tags(text: &str) -> usize {
    xml_re().find_iter(text).count()
}

/// `<Role>` / `<Content>` tag present (system-prompt marker).
pub fn has_role_content_tags(text: &str) -> bool {
    role_content_re().is_match(text)
}

/// Fenced code block count.
pub fn count_code_blocks(text: &str) -> usize {
    code_block_re().find_iter(text).count()
}

/// Concrete numeric values or complexity notations present.
pub fn count_specific_values(text: &str) -> usize {
    number_re().find_iter(text).count()
}

/// Example / I/O-pair count: the larger of keyword mentions and I/O labels.
pub fn count_examples(text: &str) -> usize {
    let lower = text.to_lowercase();
    let keyword_hits = EXAMPLE_KEYWORDS
        .iter()
        .filter(|kw| lower.contains(&kw.to_lowercase()))
        .count();
    let io_hits = IO_KEYWORDS
        .iter()
        .filter(|kw| lower.contains(&kw.to_lowercase()))
        .count();
    keyword_hits.max(io_hits)
}

/// Constraint mention count.
pub fn count_constraints(text: &str) -> usize {
    let lower = text.to_lowercase();
    CONSTRAINT_KEYWORDS
        .iter()
        .filter(|kw| lower.contains(&kw.to_lowercase()))
        .count()
}

/// List/bullet item count.
pub fn count_list_items(text: &str) -> usize {
    text.lines()
        .filter(|line| list_item_re().is_match(line))
        .count()
}

/// Prior-turn reference count.
pub fn count_context_references(text: &str) -> usize {
    let lower = text.to_lowercase();
    CONTEXT_KEYWORDS
        .iter()
        .filter(|kw| lower.contains(&kw.to_lowercase()))
        .count()
}

/// Technical-term count, including the problem's own algorithm names.
pub fn count_technical_terms(text: &str, problem_algorithms: &[String]) -> usize {
    let lower = text.to_lowercase();
    let base = TECHNICAL_TERMS
        .iter()
        .filter(|term| lower.contains(&term.to_lowercase()))
        .count();
    let problem_hits = problem_algorithms
        .iter()
        .filter(|term| lower.contains(&term.to_lowercase()))
        .count();
    base + problem_hits
}

/// Clarity metric group.
#[derive(Debug, Clone, Serialize)]
pub struct ClarityMetrics {
    pub word_count: usize,
    pub sentence_count: usize,
    pub avg_words_per_sentence: f64,
    pub specific_value_count: usize,
    pub base_score: f64,
}

/// Examples metric group.
#[derive(Debug, Clone, Serialize)]
pub struct ExampleMetrics {
    pub example_count: usize,
    pub base_score: f64,
}

/// Rules metric group.
#[derive(Debug, Clone, Serialize)]
pub struct RuleMetrics {
    pub xml_tag_count: usize,
    pub constraint_count: usize,
    pub list_item_count: usize,
    pub base_score: f64,
}

/// Context metric group.
#[derive(Debug, Clone, Serialize)]
pub struct ContextMetrics {
    pub context_reference_count: usize,
    pub base_score: f64,
}

/// Problem-relevance metric group.
#[derive(Debug, Clone, Serialize)]
pub struct RelevanceMetrics {
    pub technical_term_count: usize,
    pub base_score: f64,
}

/// All metric groups for one prompt.
#[derive(Debug, Clone, Serialize)]
pub struct PromptMetrics {
    pub clarity: ClarityMetrics,
    pub examples: ExampleMetrics,
    pub rules: RuleMetrics,
    pub context: ContextMetrics,
    pub problem_relevance: RelevanceMetrics,
    pub text_length: usize,
    pub code_block_count: usize,
}

/// Compute every metric group for a prompt.
pub fn compute(text: &str, problem_algorithms: &[String]) -> PromptMetrics {
    let word_count = count_words(text);
    let sentence_count = count_sentences(text);
    let specific_value_count = count_specific_values(text);
    let example_count = count_examples(text);
    let xml_tag_count = count_xml_tags(text);
    let constraint_count = count_constraints(text);
    let list_item_count = count_list_items(text);
    let context_reference_count = count_context_references(text);
    let technical_term_count = count_technical_terms(text, problem_algorithms);

    PromptMetrics {
        clarity: ClarityMetrics {
            word_count,
            sentence_count,
            avg_words_per_sentence: if sentence_count > 0 {
                word_count as f64 / sentence_count as f64
            } else {
                0.0
            },
            specific_value_count,
            base_score: clarity_base(word_count, sentence_count, specific_value_count > 0),
        },
        examples: ExampleMetrics {
            example_count,
            base_score: examples_base(example_count),
        },
        rules: RuleMetrics {
            xml_tag_count,
            constraint_count,
            list_item_count,
            base_score: rules_base(xml_tag_count, constraint_count, list_item_count),
        },
        context: ContextMetrics {
            context_reference_count,
            base_score: context_base(context_reference_count),
        },
        problem_relevance: RelevanceMetrics {
            technical_term_count,
            base_score: relevance_base(technical_term_count),
        },
        text_length: text.chars().count(),
        code_block_count: count_code_blocks(text),
    }
}

fn clarity_base(word_count: usize, sentence_count: usize, has_specific: bool) -> f64 {
    let mut score: f64 = match word_count {
        20..=200 => 40.0,
        10..=19 | 201..=300 => 25.0,
        0..=9 => 10.0,
        _ => 15.0,
    };
    score += match sentence_count {
        2..=10 => 30.0,
        1 => 15.0,
        _ => 20.0,
    };
    if has_specific {
        score += 30.0;
    }
    score.min(100.0)
}

fn examples_base(example_count: usize) -> f64 {
    match example_count {
        0 => 0.0,
        1 => 70.0,
        _ => 100.0,
    }
}

fn rules_base(xml_count: usize, constraint_count: usize, list_count: usize) -> f64 {
    let mut score: f64 = 0.0;
    if xml_count > 0 {
        score += 30.0;
        if xml_count >= 2 {
            score += 10.0;
        }
    }
    if constraint_count > 0 {
        score += 40.0;
        if constraint_count >= 2 {
            score += 10.0;
        }
    }
    if list_count > 0 {
        score += 20.0;
    }
    score.min(100.0)
}

fn context_base(reference_count: usize) -> f64 {
    match reference_count {
        0 => 0.0,
        1 => 70.0,
        _ => 100.0,
    }
}

fn relevance_base(term_count: usize) -> f64 {
    match term_count {
        0 => 0.0,
        1 => 60.0,
        2 => 80.0,
        _ => 100.0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn word_and_sentence_counts() {
        assert_eq!(count_words("two plus two equals four"), 5);
        assert_eq!(count_sentences("First. Second! Third?"), 3);
        assert_eq!(count_sentences(""), 0);
    }

    #[test]
    fn xml_and_role_tags() {
        assert!(has_xml_tags("<Role>tutor</Role>"));
        assert!(has_role_content_tags("<role>strict grader</role>"));
        assert!(!has_role_content_tags("<ul><li>x</li></ul>"));
        assert_eq!(count_xml_tags("<a><b>"), 2);
    }

    #[test]
    fn specific_values_include_complexity_notation() {
        assert_eq!(count_specific_values("N is 16, aim for O(n^2 * 2^n)"), 2);
        assert_eq!(count_specific_values("no numbers here"), 0);
    }

    #[test]
    fn example_counting_uses_io_pairs() {
        let text = "예시: 입력 4 -> 출력 35";
        assert!(count_examples(text) >= 2);
        assert_eq!(count_examples("nothing concrete"), 0);
    }

    #[test]
    fn list_items_counted_per_line() {
        let text = "rules:\n1. no loops\n2. recursion only\n- must memoize";
        assert_eq!(count_list_items(text), 3);
    }

    #[test]
    fn technical_terms_include_problem_algorithms() {
        let algorithms = vec!["Bitmasking".to_string(), "TSP".to_string()];
        let count = count_technical_terms("use bitmasking with dp for tsp", &algorithms);
        // "bitmasking" (base + problem), "dp", "tsp" (problem).
        assert!(count >= 3);
    }

    #[test]
    fn clarity_base_rewards_mid_length_prompts() {
        // 30 words, 3 sentences, has a number: 40 + 30 + 30.
        let good = clarity_base(30, 3, true);
        assert_eq!(good, 100.0);
        let vague = clarity_base(4, 1, false);
        assert_eq!(vague, 25.0);
    }

    #[test]
    fn base_scores_are_bounded() {
        let metrics = compute(
            "<Role>grader</Role>\n1. constraint: O(n) limit\n예시: 입력 1 출력 1\n이전 힌트처럼 dp로",
            &["Dynamic Programming".to_string()],
        );
        for score in [
            metrics.clarity.base_score,
            metrics.examples.base_score,
            metrics.rules.base_score,
            metrics.context.base_score,
            metrics.problem_relevance.base_score,
        ] {
            assert!((0.0..=100.0).contains(&score));
        }
    }
}
