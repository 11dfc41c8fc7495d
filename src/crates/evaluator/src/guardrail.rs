//! Layer-1 keyword guardrail prefilter.
//!
//! Runs before any LLM call. Rules apply in order, first match wins:
//!
//! 1. structural-request keywords with no direct-answer word → pass,
//! 2. hard direct-answer patterns with no hint-intent word → block,
//! 3. recurrence terms with a direct-answer verb and no hint word → block,
//! 4. whole-code phrases without a code-generation request in the recent
//!    turns → block,
//! 5. problem-specific keywords combined with answer-related terms and no
//!    hint word → block.
//!
//! The keyword lists mix Korean and English because participants use both.

use serde::Serialize;

use crate::enums::BlockReason;

/// Structural requests (interfaces, skeletons, pseudocode) are legitimate.
const STRUCTURAL_KEYWORDS: &[&str] = &[
    "인터페이스",
    "함수 정의",
    "함수 선언",
    "구조",
    "틀",
    "껍데기",
    "의사코드",
    "수도코드",
    "pseudo",
    "interface",
    "structure",
    "skeleton",
];

/// Direct-answer words that void the structural-request pass.
const DIRECT_ANSWER_WORDS: &[&str] = &["정답", "풀이", "answer", "solution"];

/// Phrases that always read as "give me the answer".
const HARD_BLOCK_PATTERNS: &[&str] = &[
    "정답 코드",
    "정답 알려줘",
    "답 코드",
    "완성된 코드",
    "핵심 코드",
    "로직 전체",
    "점화식 알려줘",
    "재귀 구조",
    "핵심 로직",
    "dp[x][vis]",
    "점화식은",
    "재귀는",
    "알고리즘 전체",
    "complete solution",
    "answer code",
    "entire code",
    "whole solution",
    "complete algorithm",
    "recurrence relation",
    "dp formula",
];

/// Learning-guide vocabulary that turns a risky request into a hint request.
const HINT_KEYWORDS: &[&str] = &[
    "힌트",
    "가이드",
    "방향",
    "수립",
    "어떻게",
    "학습",
    "hint",
    "guide",
    "direction",
];

/// Direct-answer verbs used with recurrence/problem terms.
const DIRECT_ANSWER_VERBS: &[&str] = &[
    "알려줘",
    "알려",
    "뭐야",
    "뭐",
    "정답",
    "tell me",
    "what is",
    "show me",
];

/// Recurrence-equation terms.
const RECURRENCE_TERMS: &[&str] = &["점화식", "recurrence"];

/// Context-sensitive whole-code phrases.
const WHOLE_CODE_PATTERNS: &[&str] = &["전체 코드", "full code", "whole code"];

/// Code-generation phrases that legitimise a later whole-code request.
pub const CODE_GENERATION_PHRASES: &[&str] = &[
    "코드 작성",
    "코드 생성",
    "코드를 작성",
    "코드를 생성",
    "작성해주신 코드",
];

/// Terms that pair with a problem keyword into an answer request.
const ANSWER_RELATED_TERMS: &[&str] = &[
    "점화식",
    "recurrence",
    "재귀",
    "로직",
    "알고리즘",
    "solution",
    "code",
];

/// A Layer-1 block decision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GuardrailBlock {
    /// Why the message was blocked.
    pub block_reason: BlockReason,
    /// User-facing violation message.
    pub violation_message: String,
    /// Internal reasoning for the evaluation record.
    pub reasoning: String,
}

fn contains_any(haystack: &str, needles: &[&str]) -> bool {
    needles.iter().any(|needle| haystack.contains(needle))
}

fn block(violation: &str, reasoning: String) -> Option<GuardrailBlock> {
    Some(GuardrailBlock {
        block_reason: BlockReason::DirectAnswer,
        violation_message: violation.to_string(),
        reasoning,
    })
}

/// Run the prefilter. `problem_keywords` come from
/// [`ProblemContext::guardrail_keywords`](crate::ProblemContext::guardrail_keywords);
/// `recent_history` holds the message contents of the last three turns.
/// `None` means pass-through to the LLM classifier.
pub fn prefilter(
    message: &str,
    problem_keywords: &[String],
    recent_history: &[String],
) -> Option<GuardrailBlock> {
    let msg = message.to_lowercase();

    // 1. Structural requests pass unless they also ask for the answer.
    if contains_any(&msg, STRUCTURAL_KEYWORDS) && !contains_any(&msg, DIRECT_ANSWER_WORDS) {
        return None;
    }

    let has_hint_word = contains_any(&msg, HINT_KEYWORDS);

    // 2. Hard direct-answer patterns.
    if contains_any(&msg, HARD_BLOCK_PATTERNS) && !has_hint_word {
        return block(
            "direct answer-code request detected",
            "message matches a direct answer pattern with no hint intent".to_string(),
        );
    }

    // 3. Recurrence terms with a direct-answer verb.
    if contains_any(&msg, RECURRENCE_TERMS)
        && contains_any(&msg, DIRECT_ANSWER_VERBS)
        && !has_hint_word
    {
        return block(
            "direct recurrence-relation request detected",
            "recurrence term combined with a direct-answer verb".to_string(),
        );
    }

    // 4. Whole-code requests need prior code-generation context.
    if contains_any(&msg, WHOLE_CODE_PATTERNS) {
        let has_code_generation_context = recent_history.iter().any(|entry| {
            let entry = entry.to_lowercase();
            contains_any(&entry, CODE_GENERATION_PHRASES)
        });
        if !has_code_generation_context {
            return block(
                "whole-code request with no prior code-generation context",
                "no code-generation request found in the recent turns".to_string(),
            );
        }
    }

    // 5. Problem-specific keywords combined with answer-related terms.
    for keyword in problem_keywords {
        if !msg.contains(&keyword.to_lowercase()) {
            continue;
        }
        let has_answer_related = contains_any(&msg, ANSWER_RELATED_TERMS);
        let has_direct_verb = contains_any(&msg, DIRECT_ANSWER_VERBS);
        if (has_answer_related || has_direct_verb) && !has_hint_word {
            return block(
                "problem-specific answer request detected",
                format!("problem keyword '{keyword}' combined with an answer-related term"),
            );
        }
    }

    None
}
