//! Status and classification enums shared across nodes.

use serde::{Deserialize, Serialize};

/// Outcome of the intent/guardrail classifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IntentStatus {
    /// Safe chat request; proceed to the writer.
    PassedHint,
    /// Safe submission request; proceed to evaluation.
    PassedSubmit,
    /// Blocked by a guardrail; the writer produces a refusal.
    FailedGuardrail,
    /// Classifier hit a rate limit; retried by the router.
    FailedRateLimit,
}

/// Writer node outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WriterStatus {
    /// Reply produced.
    Success,
    /// Provider rate/quota limit.
    FailedRateLimit,
    /// Prompt overflowed the context window; memory summarization re-enters.
    FailedThreshold,
    /// Any other technical failure.
    FailedTechnical,
    /// Guardrail-stage failure surfaced at the writer.
    FailedGuardrail,
    /// Generation produced nothing usable.
    FailedWriting,
}

/// Overall safety verdict of the LLM classifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SafetyStatus {
    Safe,
    Blocked,
}

/// Why a request was blocked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BlockReason {
    /// Asked for the answer outright.
    DirectAnswer,
    /// Tried to subvert the tutor's constraints.
    Jailbreak,
    /// Unrelated to the exam problem.
    OffTopic,
}

/// Kind of request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RequestType {
    Chat,
    Submission,
}

/// The writer's operating mode for a safe request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GuideStrategy {
    /// Language/syntax help only.
    SyntaxGuide,
    /// Conceptual hints toward the algorithm.
    LogicHint,
    /// Stepwise plan without code.
    Roadmap,
    /// Interface skeletons only (signatures, no bodies).
    Generation,
    /// Full code generation permitted by conversation context.
    FullCodeAllowed,
}

impl GuideStrategy {
    /// Wire name.
    pub fn as_str(&self) -> &'static str {
        match self {
            GuideStrategy::SyntaxGuide => "SYNTAX_GUIDE",
            GuideStrategy::LogicHint => "LOGIC_HINT",
            GuideStrategy::Roadmap => "ROADMAP",
            GuideStrategy::Generation => "GENERATION",
            GuideStrategy::FullCodeAllowed => "FULL_CODE_ALLOWED",
        }
    }
}

/// Classified purpose of a user prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CodeIntentType {
    SystemPrompt,
    RuleSetting,
    Generation,
    Optimization,
    Debugging,
    TestCase,
    HintOrQuery,
    FollowUp,
}

impl CodeIntentType {
    /// Wire name.
    pub fn as_str(&self) -> &'static str {
        match self {
            CodeIntentType::SystemPrompt => "SYSTEM_PROMPT",
            CodeIntentType::RuleSetting => "RULE_SETTING",
            CodeIntentType::Generation => "GENERATION",
            CodeIntentType::Optimization => "OPTIMIZATION",
            CodeIntentType::Debugging => "DEBUGGING",
            CodeIntentType::TestCase => "TEST_CASE",
            CodeIntentType::HintOrQuery => "HINT_OR_QUERY",
            CodeIntentType::FollowUp => "FOLLOW_UP",
        }
    }

    /// Selection priority (lower wins).
    ///
    /// Default order: `GENERATION > OPTIMIZATION > DEBUGGING > TEST_CASE >
    /// RULE_SETTING > SYSTEM_PROMPT > HINT_OR_QUERY > FOLLOW_UP`. On the
    /// first turn SYSTEM_PROMPT/RULE_SETTING outrank the code intents and
    /// FOLLOW_UP is unselectable; role/content XML tags in the prompt push
    /// SYSTEM_PROMPT/RULE_SETTING to the very top.
    pub fn priority(&self, is_first_turn: bool, has_role_tags: bool) -> u32 {
        if has_role_tags
            && matches!(self, CodeIntentType::SystemPrompt | CodeIntentType::RuleSetting)
        {
            return 0;
        }
        if is_first_turn {
            match self {
                CodeIntentType::SystemPrompt => 1,
                CodeIntentType::RuleSetting => 2,
                CodeIntentType::Generation => 3,
                CodeIntentType::Optimization => 4,
                CodeIntentType::Debugging => 5,
                CodeIntentType::TestCase => 6,
                CodeIntentType::HintOrQuery => 7,
                CodeIntentType::FollowUp => 999,
            }
        } else {
            match self {
                CodeIntentType::Generation => 1,
                CodeIntentType::Optimization => 2,
                CodeIntentType::Debugging => 3,
                CodeIntentType::TestCase => 4,
                CodeIntentType::RuleSetting => 5,
                CodeIntentType::SystemPrompt => 6,
                CodeIntentType::HintOrQuery => 7,
                CodeIntentType::FollowUp => 8,
            }
        }
    }

    /// Resolve a multi-intent classification to one intent.
    ///
    /// First-turn FOLLOW_UP is rewritten: SYSTEM_PROMPT when the prompt
    /// carries role/content XML tags, RULE_SETTING otherwise.
    pub fn resolve(intents: &[CodeIntentType], turn: u32, has_role_tags: bool) -> CodeIntentType {
        let is_first_turn = turn == 1;
        let mut candidates: Vec<CodeIntentType> = intents.to_vec();

        if is_first_turn {
            candidates.retain(|i| *i != CodeIntentType::FollowUp);
            if candidates.is_empty() {
                return if has_role_tags {
                    CodeIntentType::SystemPrompt
                } else {
                    CodeIntentType::RuleSetting
                };
            }
        }
        if candidates.is_empty() {
            return CodeIntentType::HintOrQuery;
        }

        candidates
            .into_iter()
            .min_by_key(|i| i.priority(is_first_turn, has_role_tags))
            .unwrap_or(CodeIntentType::HintOrQuery)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serde_uses_screaming_snake_case() {
        let json = serde_json::to_string(&IntentStatus::PassedSubmit).unwrap();
        assert_eq!(json, "\"PASSED_SUBMIT\"");
        let back: GuideStrategy = serde_json::from_str("\"FULL_CODE_ALLOWED\"").unwrap();
        assert_eq!(back, GuideStrategy::FullCodeAllowed);
    }

    #[test]
    fn generation_wins_default_priority() {
        let resolved = CodeIntentType::resolve(
            &[
                CodeIntentType::HintOrQuery,
                CodeIntentType::Generation,
                CodeIntentType::Debugging,
            ],
            3,
            false,
        );
        assert_eq!(resolved, CodeIntentType::Generation);
    }

    #[test]
    fn first_turn_follow_up_rewrites() {
        assert_eq!(
            CodeIntentType::resolve(&[CodeIntentType::FollowUp], 1, false),
            CodeIntentType::RuleSetting
        );
        assert_eq!(
            CodeIntentType::resolve(&[CodeIntentType::FollowUp], 1, true),
            CodeIntentType::SystemPrompt
        );
    }

    #[test]
    fn first_turn_reorders_rule_setting_above_code_intents() {
        let resolved = CodeIntentType::resolve(
            &[CodeIntentType::Generation, CodeIntentType::RuleSetting],
            1,
            false,
        );
        assert_eq!(resolved, CodeIntentType::RuleSetting);
    }

    #[test]
    fn xml_tags_boost_system_prompt_any_turn() {
        let resolved = CodeIntentType::resolve(
            &[CodeIntentType::Generation, CodeIntentType::SystemPrompt],
            5,
            true,
        );
        assert_eq!(resolved, CodeIntentType::SystemPrompt);
    }

    #[test]
    fn later_turn_follow_up_survives() {
        assert_eq!(
            CodeIntentType::resolve(&[CodeIntentType::FollowUp], 4, false),
            CodeIntentType::FollowUp
        );
    }
}
