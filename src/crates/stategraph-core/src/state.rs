//! State schema and reducer system.
//!
//! When a node returns a partial update, every field in the update is merged
//! into the current state by that field's [`Reducer`]. The built-in reducers
//! cover the merge shapes this engine needs:
//!
//! | Reducer | Behavior | Typical field |
//! |---------|----------|---------------|
//! | [`OverwriteReducer`] | last write wins | scalars, status flags |
//! | [`AppendReducer`] | concatenate arrays | message envelope list |
//! | [`MergeReducer`] | dict union, update wins on conflict | per-turn score maps |
//! | [`SumReducer`] | numeric addition | counters |
//! | [`TokenSumReducer`] | componentwise add of token counters | `chat_tokens`, `eval_tokens` |
//!
//! Fields without a declared reducer fall back to the schema default
//! (overwrite unless configured otherwise). A `null` update value is applied
//! as-is by `OverwriteReducer`, which is how nodes clear transient fields.
//!
//! # Example
//!
//! ```rust
//! use stategraph_core::state::{AppendReducer, StateSchema, TokenSumReducer};
//! use serde_json::json;
//!
//! let mut schema = StateSchema::new();
//! schema.add_field("messages", Box::new(AppendReducer));
//! schema.add_field("chat_tokens", Box::new(TokenSumReducer));
//!
//! let mut state = json!({
//!     "messages": [{"role": "user", "content": "hi"}],
//!     "chat_tokens": {"prompt_tokens": 10, "completion_tokens": 5, "total_tokens": 15},
//! });
//!
//! schema.apply(&mut state, &json!({
//!     "messages": [{"role": "assistant", "content": "hello"}],
//!     "chat_tokens": {"prompt_tokens": 7, "completion_tokens": 3, "total_tokens": 10},
//! })).unwrap();
//!
//! assert_eq!(state["messages"].as_array().unwrap().len(), 2);
//! assert_eq!(state["chat_tokens"]["total_tokens"], 25);
//! ```

use serde_json::Value;
use std::collections::HashMap;
use thiserror::Error;

/// Errors that can occur during state operations.
#[derive(Debug, Error)]
pub enum StateError {
    /// State structure is invalid (e.g. not an object when expected).
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Reducer encountered incompatible types or failed to merge.
    #[error("Reducer error: {0}")]
    ReducerError(String),
}

pub type Result<T> = std::result::Result<T, StateError>;

/// Trait for merging a field update into the current value.
pub trait Reducer: Send + Sync {
    /// Merge `update` into `current` (which may be `Null` for a fresh field).
    fn reduce(&self, current: &Value, update: &Value) -> Result<Value>;

    /// Human-readable name for diagnostics.
    fn name(&self) -> &str;
}

/// Replaces the current value with the update. The default behavior.
#[derive(Debug, Clone)]
pub struct OverwriteReducer;

impl Reducer for OverwriteReducer {
    fn reduce(&self, _current: &Value, update: &Value) -> Result<Value> {
        Ok(update.clone())
    }

    fn name(&self) -> &str {
        "overwrite"
    }
}

/// Concatenates arrays; a non-array update is appended as a single element.
#[derive(Debug, Clone)]
pub struct AppendReducer;

impl Reducer for AppendReducer {
    fn reduce(&self, current: &Value, update: &Value) -> Result<Value> {
        match (current, update) {
            (Value::Array(curr), Value::Array(upd)) => {
                let mut merged = curr.clone();
                merged.extend_from_slice(upd);
                Ok(Value::Array(merged))
            }
            (Value::Null, Value::Array(upd)) => Ok(Value::Array(upd.clone())),
            (Value::Array(curr), single) => {
                let mut merged = curr.clone();
                merged.push(single.clone());
                Ok(Value::Array(merged))
            }
            (Value::Null, single) => Ok(Value::Array(vec![single.clone()])),
            _ => Err(StateError::ReducerError(
                "AppendReducer requires array values".to_string(),
            )),
        }
    }

    fn name(&self) -> &str {
        "append"
    }
}

/// Shallow dict union; update values win on key conflicts.
#[derive(Debug, Clone)]
pub struct MergeReducer;

impl Reducer for MergeReducer {
    fn reduce(&self, current: &Value, update: &Value) -> Result<Value> {
        match (current, update) {
            (Value::Object(curr), Value::Object(upd)) => {
                let mut merged = curr.clone();
                for (key, value) in upd {
                    merged.insert(key.clone(), value.clone());
                }
                Ok(Value::Object(merged))
            }
            (Value::Null, Value::Object(upd)) => Ok(Value::Object(upd.clone())),
            _ => Err(StateError::ReducerError(
                "MergeReducer requires object values".to_string(),
            )),
        }
    }

    fn name(&self) -> &str {
        "merge"
    }
}

/// Adds numeric values.
#[derive(Debug, Clone)]
pub struct SumReducer;

impl Reducer for SumReducer {
    fn reduce(&self, current: &Value, update: &Value) -> Result<Value> {
        match (current, update) {
            (Value::Number(a), Value::Number(b)) => {
                if let (Some(ai), Some(bi)) = (a.as_i64(), b.as_i64()) {
                    Ok(Value::Number((ai + bi).into()))
                } else if let (Some(af), Some(bf)) = (a.as_f64(), b.as_f64()) {
                    Ok(serde_json::Number::from_f64(af + bf)
                        .map(Value::Number)
                        .unwrap_or(Value::Null))
                } else {
                    Err(StateError::ReducerError(
                        "Cannot add non-numeric values".to_string(),
                    ))
                }
            }
            (Value::Null, Value::Number(_)) => Ok(update.clone()),
            _ => Err(StateError::ReducerError(
                "SumReducer requires numeric values".to_string(),
            )),
        }
    }

    fn name(&self) -> &str {
        "sum"
    }
}

/// Componentwise addition of token-usage counters.
///
/// Both operands are objects shaped
/// `{prompt_tokens, completion_tokens, total_tokens}`; missing components
/// count as zero. The merged counter can therefore never decrease, which is
/// what keeps the session token totals monotone across node updates.
#[derive(Debug, Clone)]
pub struct TokenSumReducer;

const TOKEN_COMPONENTS: [&str; 3] = ["prompt_tokens", "completion_tokens", "total_tokens"];

impl Reducer for TokenSumReducer {
    fn reduce(&self, current: &Value, update: &Value) -> Result<Value> {
        if update.is_null() {
            return Ok(current.clone());
        }
        let upd = update.as_object().ok_or_else(|| {
            StateError::ReducerError("TokenSumReducer requires object values".to_string())
        })?;
        let mut merged = serde_json::Map::new();
        for component in TOKEN_COMPONENTS {
            let a = current.get(component).and_then(Value::as_i64).unwrap_or(0);
            let b = upd.get(component).and_then(Value::as_i64).unwrap_or(0);
            merged.insert(component.to_string(), Value::Number((a + b).into()));
        }
        Ok(Value::Object(merged))
    }

    fn name(&self) -> &str {
        "token_sum"
    }
}

/// Declares how each state field merges.
///
/// Reducers are registered per field name; fields without one use the default
/// reducer (overwrite when none is configured).
#[derive(Default)]
pub struct StateSchema {
    fields: HashMap<String, Box<dyn Reducer>>,
    default_reducer: Option<Box<dyn Reducer>>,
}

impl StateSchema {
    /// Create an empty schema.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a reducer for a field.
    pub fn add_field(&mut self, field: impl Into<String>, reducer: Box<dyn Reducer>) {
        self.fields.insert(field.into(), reducer);
    }

    /// Set the reducer used for fields with no explicit registration.
    pub fn with_default_reducer(mut self, reducer: Box<dyn Reducer>) -> Self {
        self.default_reducer = Some(reducer);
        self
    }

    fn reducer_for(&self, field: &str) -> Option<&dyn Reducer> {
        self.fields
            .get(field)
            .map(|r| r.as_ref())
            .or_else(|| self.default_reducer.as_ref().map(|r| r.as_ref()))
    }

    /// Merge a partial update into `state` in place.
    pub fn apply(&self, state: &mut Value, update: &Value) -> Result<()> {
        let state_obj = state
            .as_object_mut()
            .ok_or_else(|| StateError::InvalidState("State must be an object".to_string()))?;
        let update_obj = update
            .as_object()
            .ok_or_else(|| StateError::InvalidState("Update must be an object".to_string()))?;

        for (field, update_value) in update_obj {
            let current = state_obj.get(field).cloned().unwrap_or(Value::Null);
            let merged = match self.reducer_for(field) {
                Some(reducer) => reducer.reduce(&current, update_value)?,
                None => update_value.clone(),
            };
            state_obj.insert(field.clone(), merged);
        }
        Ok(())
    }

    /// Names of the explicitly registered fields.
    pub fn fields(&self) -> Vec<String> {
        self.fields.keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn overwrite_replaces() {
        let result = OverwriteReducer.reduce(&json!("old"), &json!("new")).unwrap();
        assert_eq!(result, json!("new"));
    }

    #[test]
    fn append_concatenates_arrays() {
        let result = AppendReducer.reduce(&json!([1, 2]), &json!([3])).unwrap();
        assert_eq!(result, json!([1, 2, 3]));
    }

    #[test]
    fn append_initializes_from_null() {
        let result = AppendReducer.reduce(&Value::Null, &json!([1])).unwrap();
        assert_eq!(result, json!([1]));
    }

    #[test]
    fn merge_unions_with_update_winning() {
        let result = MergeReducer
            .reduce(&json!({"a": 1, "b": 2}), &json!({"b": 3, "c": 4}))
            .unwrap();
        assert_eq!(result, json!({"a": 1, "b": 3, "c": 4}));
    }

    #[test]
    fn sum_adds_integers() {
        let result = SumReducer.reduce(&json!(5), &json!(7)).unwrap();
        assert_eq!(result, json!(12));
    }

    #[test]
    fn token_sum_adds_componentwise() {
        let current = json!({"prompt_tokens": 10, "completion_tokens": 4, "total_tokens": 14});
        let update = json!({"prompt_tokens": 3, "completion_tokens": 2, "total_tokens": 5});
        let result = TokenSumReducer.reduce(&current, &update).unwrap();
        assert_eq!(
            result,
            json!({"prompt_tokens": 13, "completion_tokens": 6, "total_tokens": 19})
        );
    }

    #[test]
    fn token_sum_is_monotone_from_null() {
        let update = json!({"prompt_tokens": 3, "completion_tokens": 2, "total_tokens": 5});
        let result = TokenSumReducer.reduce(&Value::Null, &update).unwrap();
        assert_eq!(result, update);
        // A null update keeps the accumulated counter untouched.
        let kept = TokenSumReducer.reduce(&result, &Value::Null).unwrap();
        assert_eq!(kept, update);
    }

    #[test]
    fn schema_applies_per_field_reducers() {
        let mut schema = StateSchema::new();
        schema.add_field("messages", Box::new(AppendReducer));
        schema.add_field("count", Box::new(SumReducer));

        let mut state = json!({"messages": ["a"], "count": 1, "status": "old"});
        schema
            .apply(
                &mut state,
                &json!({"messages": ["b"], "count": 2, "status": "new"}),
            )
            .unwrap();

        assert_eq!(state["messages"], json!(["a", "b"]));
        assert_eq!(state["count"], json!(3));
        assert_eq!(state["status"], json!("new"));
    }

    #[test]
    fn schema_rejects_non_object_state() {
        let schema = StateSchema::new();
        let mut state = json!("not an object");
        assert!(schema.apply(&mut state, &json!({})).is_err());
    }
}
