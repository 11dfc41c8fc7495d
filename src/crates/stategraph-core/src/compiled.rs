//! Compiled graph execution.
//!
//! `invoke` drives the state sequentially along the discovered path: run the
//! current node, merge its partial update through the schema, persist a
//! checkpoint at the node boundary, then follow the node's edge (resolving
//! conditional routers against the post-node state) until [`END`].
//!
//! When a checkpointer is attached and the invocation carries a `thread_id`,
//! the latest snapshot for that thread is loaded before the first node runs
//! and the caller's input is applied on top of it as a schema update.

use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, warn};

use stategraph_checkpoint::{Checkpoint, CheckpointConfig, CheckpointSaver};

use crate::error::{GraphError, Result};
use crate::graph::{Edge, Graph, END, START};
use crate::state::StateSchema;

/// Per-invocation configuration.
#[derive(Debug, Clone, Default)]
pub struct InvokeConfig {
    /// Thread identity for checkpointing; usually the session id.
    pub thread_id: Option<String>,
}

impl InvokeConfig {
    /// Config keyed to a thread.
    pub fn for_thread(thread_id: impl Into<String>) -> Self {
        Self {
            thread_id: Some(thread_id.into()),
        }
    }
}

/// Executable graph produced by [`StateGraph::compile`](crate::StateGraph::compile).
pub struct CompiledGraph {
    graph: Graph,
    schema: Arc<StateSchema>,
    checkpointer: Option<Arc<dyn CheckpointSaver>>,
    max_steps: usize,
}

impl CompiledGraph {
    pub(crate) fn new(graph: Graph, schema: StateSchema) -> Self {
        Self {
            graph,
            schema: Arc::new(schema),
            checkpointer: None,
            max_steps: 50,
        }
    }

    /// Attach a checkpoint backend. Snapshots are written after every node.
    pub fn with_checkpointer(mut self, saver: Arc<dyn CheckpointSaver>) -> Self {
        self.checkpointer = Some(saver);
        self
    }

    /// Override the step bound guarding routing cycles.
    pub fn with_max_steps(mut self, max_steps: usize) -> Self {
        self.max_steps = max_steps;
        self
    }

    /// Execute the graph to completion and return the final state.
    pub async fn invoke(&self, input: Value, config: &InvokeConfig) -> Result<Value> {
        let mut state = self.load_base_state(config).await?;
        if state.is_null() {
            state = Value::Object(serde_json::Map::new());
        }
        self.schema.apply(&mut state, &input)?;

        let mut current = if self.graph.entry == START {
            self.resolve_next(START, &state)?
        } else {
            self.graph.entry.clone()
        };
        let mut steps = 0usize;

        while current != END {
            steps += 1;
            if steps > self.max_steps {
                return Err(GraphError::MaxStepsExceeded(self.max_steps));
            }

            let node = self
                .graph
                .nodes
                .get(&current)
                .ok_or_else(|| GraphError::Validation(format!("unknown node '{current}'")))?;

            debug!(node = %current, step = steps, "executing node");
            let update = (node.executor)(state.clone()).await.map_err(|e| match e {
                already @ GraphError::NodeExecution { .. } => already,
                other => GraphError::node(&current, other),
            })?;
            self.schema.apply(&mut state, &update)?;

            self.save_checkpoint(config, steps, &state).await?;

            current = self.resolve_next(&current, &state)?;
        }

        Ok(state)
    }

    /// Load the latest checkpoint for the thread, or `Null` when there is
    /// none (or no checkpointer / thread id is configured).
    async fn load_base_state(&self, config: &InvokeConfig) -> Result<Value> {
        let (saver, thread_id) = match (&self.checkpointer, &config.thread_id) {
            (Some(saver), Some(thread_id)) => (saver, thread_id),
            _ => return Ok(Value::Null),
        };
        match saver.latest(thread_id).await? {
            Some(checkpoint) => {
                debug!(thread_id = %thread_id, checkpoint_id = %checkpoint.id, "resuming from checkpoint");
                Ok(checkpoint.values)
            }
            None => Ok(Value::Null),
        }
    }

    async fn save_checkpoint(
        &self,
        config: &InvokeConfig,
        step: usize,
        state: &Value,
    ) -> Result<()> {
        let (saver, thread_id) = match (&self.checkpointer, &config.thread_id) {
            (Some(saver), Some(thread_id)) => (saver, thread_id),
            _ => return Ok(()),
        };
        let checkpoint = Checkpoint::new(format!("step-{step}"), state.clone());
        if let Err(e) = saver
            .put(&CheckpointConfig::for_thread(thread_id), checkpoint)
            .await
        {
            // Checkpointing is advisory mid-flight; a lost snapshot only
            // costs resumability, not correctness of this invocation.
            warn!(thread_id = %thread_id, error = %e, "checkpoint write failed");
        }
        Ok(())
    }

    /// Follow the single outgoing edge of `from`, resolving routers against
    /// the current state.
    fn resolve_next(&self, from: &str, state: &Value) -> Result<String> {
        let edges = self
            .graph
            .edges
            .get(from)
            .filter(|edges| !edges.is_empty())
            .ok_or_else(|| {
                if from == START {
                    GraphError::Validation("graph has no entry edge".to_string())
                } else {
                    GraphError::DeadEnd(from.to_string())
                }
            })?;

        match &edges[0] {
            Edge::Direct(to) => Ok(to.clone()),
            Edge::Conditional { router, branches } => {
                let key = router(state);
                branches.get(&key).cloned().ok_or_else(|| {
                    GraphError::UndeclaredBranch {
                        node: from.to_string(),
                        branch: key,
                    }
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::StateGraph;
    use crate::state::{AppendReducer, StateSchema, SumReducer};
    use serde_json::json;
    use stategraph_checkpoint::InMemoryCheckpointSaver;

    fn counting_graph() -> StateGraph {
        let mut schema = StateSchema::new();
        schema.add_field("visited", Box::new(AppendReducer));
        schema.add_field("count", Box::new(SumReducer));

        let mut graph = StateGraph::with_schema(schema);
        graph.add_node("one", |_| async move {
            Ok(json!({"visited": ["one"], "count": 1}))
        });
        graph.add_node("two", |_| async move {
            Ok(json!({"visited": ["two"], "count": 1}))
        });
        graph.add_edge(START, "one");
        graph.add_edge("one", "two");
        graph.add_edge("two", END);
        graph
    }

    #[tokio::test]
    async fn linear_invocation_merges_updates() {
        let compiled = counting_graph().compile().unwrap();
        let out = compiled
            .invoke(json!({"count": 0}), &InvokeConfig::default())
            .await
            .unwrap();
        assert_eq!(out["visited"], json!(["one", "two"]));
        assert_eq!(out["count"], json!(2));
    }

    #[tokio::test]
    async fn conditional_routing_follows_branch_table() {
        let mut graph = StateGraph::new();
        graph.add_node("router_node", |_| async move { Ok(json!({})) });
        graph.add_node("left", |_| async move { Ok(json!({"path": "left"})) });
        graph.add_node("right", |_| async move { Ok(json!({"path": "right"})) });
        graph.add_edge(START, "router_node");
        graph.add_conditional_edge(
            "router_node",
            |state| {
                if state["go_left"].as_bool().unwrap_or(false) {
                    "l".to_string()
                } else {
                    "r".to_string()
                }
            },
            &[("l", "left"), ("r", "right")],
        );
        graph.add_edge("left", END);
        graph.add_edge("right", END);
        let compiled = graph.compile().unwrap();

        let out = compiled
            .invoke(json!({"go_left": true}), &InvokeConfig::default())
            .await
            .unwrap();
        assert_eq!(out["path"], "left");

        let out = compiled
            .invoke(json!({"go_left": false}), &InvokeConfig::default())
            .await
            .unwrap();
        assert_eq!(out["path"], "right");
    }

    #[tokio::test]
    async fn undeclared_branch_is_an_error() {
        let mut graph = StateGraph::new();
        graph.add_node("n", |_| async move { Ok(json!({})) });
        graph.add_edge(START, "n");
        graph.add_conditional_edge("n", |_| "nowhere".to_string(), &[("done", END)]);
        let compiled = graph.compile().unwrap();

        let err = compiled
            .invoke(json!({}), &InvokeConfig::default())
            .await
            .unwrap_err();
        assert!(matches!(err, GraphError::UndeclaredBranch { .. }));
    }

    #[tokio::test]
    async fn node_error_carries_node_name() {
        let mut graph = StateGraph::new();
        graph.add_node("boom", |_| async move {
            Err(GraphError::Validation("kaput".to_string()))
        });
        graph.add_edge(START, "boom");
        graph.add_edge("boom", END);
        let compiled = graph.compile().unwrap();

        let err = compiled
            .invoke(json!({}), &InvokeConfig::default())
            .await
            .unwrap_err();
        match err {
            GraphError::NodeExecution { node, message } => {
                assert_eq!(node, "boom");
                assert!(message.contains("kaput"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn checkpointed_thread_resumes_from_snapshot() {
        let saver = Arc::new(InMemoryCheckpointSaver::new());
        let compiled = counting_graph()
            .compile()
            .unwrap()
            .with_checkpointer(saver.clone());

        let config = InvokeConfig::for_thread("thread-1");
        compiled.invoke(json!({"count": 0}), &config).await.unwrap();

        // Second invocation resumes on top of the persisted snapshot, so the
        // append/sum reducers keep accumulating.
        let out = compiled.invoke(json!({}), &config).await.unwrap();
        assert_eq!(out["visited"], json!(["one", "two", "one", "two"]));
        assert_eq!(out["count"], json!(4));

        // A different thread starts clean.
        let other = compiled
            .invoke(json!({"count": 0}), &InvokeConfig::for_thread("thread-2"))
            .await
            .unwrap();
        assert_eq!(other["count"], json!(2));
    }

    #[tokio::test]
    async fn cycle_is_bounded_by_max_steps() {
        let mut graph = StateGraph::new();
        graph.add_node("loop", |_| async move { Ok(json!({})) });
        graph.add_edge(START, "loop");
        graph.add_conditional_edge(
            "loop",
            |_| "again".to_string(),
            &[("again", "loop"), ("done", END)],
        );
        let compiled = graph.compile().unwrap().with_max_steps(5);

        let err = compiled
            .invoke(json!({}), &InvokeConfig::default())
            .await
            .unwrap_err();
        assert!(matches!(err, GraphError::MaxStepsExceeded(5)));
    }
}
