//! Structured-output parsing.
//!
//! Providers return JSON inside free text, frequently fenced. The parser
//! strips fences, locates the outermost object, and deserializes into the
//! caller's type. On a parse failure it re-asks once with a corrective
//! instruction; a second failure is the caller's problem (the node degrades
//! per its own error policy).

use serde::de::DeserializeOwned;

use stategraph_core::ChatMessage;

use crate::error::{LlmError, Result};
use crate::model::{ChatModel, ChatRequest, TokenUsage};

/// Extract the JSON payload from a model reply.
///
/// Handles ```json fences and leading/trailing prose around the outermost
/// `{...}` block.
pub fn extract_json(text: &str) -> &str {
    let trimmed = text.trim();
    let unfenced = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .map(|rest| rest.strip_suffix("```").unwrap_or(rest))
        .unwrap_or(trimmed)
        .trim();

    match (unfenced.find('{'), unfenced.rfind('}')) {
        (Some(start), Some(end)) if end > start => &unfenced[start..=end],
        _ => unfenced,
    }
}

/// Parse a reply into `T` without any fallback call.
pub fn parse_structured<T: DeserializeOwned>(text: &str) -> Result<T> {
    serde_json::from_str(extract_json(text))
        .map_err(|e| LlmError::InvalidResponse(format!("structured output parse failed: {e}")))
}

/// Call the model and parse its reply into `T`.
///
/// Returns the parsed value together with the accumulated token usage across
/// the primary call and, when needed, the one corrective re-ask.
pub async fn chat_structured<T: DeserializeOwned>(
    model: &dyn ChatModel,
    request: ChatRequest,
) -> Result<(T, TokenUsage)> {
    let mut usage = TokenUsage::default();

    let response = model.chat(request.clone()).await?;
    if let Some(call_usage) = response.usage {
        usage += call_usage;
    }

    match parse_structured::<T>(&response.content) {
        Ok(parsed) => Ok((parsed, usage)),
        Err(first_err) => {
            tracing::warn!(error = %first_err, "structured parse failed, re-asking");
            let mut retry_request = request;
            retry_request.messages.push(ChatMessage::assistant(response.content));
            retry_request.messages.push(ChatMessage::user(
                "The previous reply was not valid JSON. Respond again with ONLY the \
                 JSON object, no prose and no markdown fences.",
            ));

            let retry_response = model.chat(retry_request).await?;
            if let Some(call_usage) = retry_response.usage {
                usage += call_usage;
            }
            let parsed = parse_structured::<T>(&retry_response.content)?;
            Ok((parsed, usage))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockChatModel;
    use serde::Deserialize;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Verdict {
        status: String,
        score: f64,
    }

    #[test]
    fn extracts_fenced_json() {
        let text = "```json\n{\"status\": \"SAFE\", \"score\": 90.0}\n```";
        let parsed: Verdict = parse_structured(text).unwrap();
        assert_eq!(parsed.status, "SAFE");
    }

    #[test]
    fn extracts_json_embedded_in_prose() {
        let text = "Here is my verdict: {\"status\": \"BLOCKED\", \"score\": 0.0} hope it helps";
        let parsed: Verdict = parse_structured(text).unwrap();
        assert_eq!(parsed.status, "BLOCKED");
    }

    #[tokio::test]
    async fn corrective_reask_recovers_and_accumulates_usage() {
        let mock = MockChatModel::with_replies(vec![
            "sorry, here you go!".into(),
            "{\"status\": \"SAFE\", \"score\": 75.0}".into(),
        ]);
        let request = ChatRequest::new(vec![ChatMessage::user("classify")]);
        let (parsed, usage) = chat_structured::<Verdict>(&mock, request).await.unwrap();
        assert_eq!(parsed.score, 75.0);
        assert_eq!(mock.call_count(), 2);
        // Both calls contribute usage.
        assert_eq!(usage.total_tokens, 2 * mock.usage_per_call().total_tokens);
    }

    #[tokio::test]
    async fn second_failure_surfaces_as_invalid_response() {
        let mock = MockChatModel::with_replies(vec!["nope".into(), "still nope".into()]);
        let request = ChatRequest::new(vec![ChatMessage::user("classify")]);
        let err = chat_structured::<Verdict>(&mock, request).await.unwrap_err();
        assert!(matches!(err, LlmError::InvalidResponse(_)));
    }
}
