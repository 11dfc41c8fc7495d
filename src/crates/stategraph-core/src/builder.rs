//! `StateGraph` builder API.
//!
//! The builder collects nodes, edges, and the state schema, then compiles
//! into an executable [`CompiledGraph`]. Nodes are async closures over the
//! JSON state returning partial updates; conditional edges pair a router
//! closure with a declared branch table.
//!
//! ```rust,no_run
//! use stategraph_core::{StateGraph, START, END};
//! use serde_json::json;
//!
//! # fn build() -> stategraph_core::Result<()> {
//! let mut graph = StateGraph::new();
//!
//! graph.add_node("classify", |state| async move {
//!     let blocked = state["message"].as_str().unwrap_or("").contains("forbidden");
//!     Ok(json!({ "blocked": blocked }))
//! });
//! graph.add_node("answer", |_| async move { Ok(json!({"reply": "ok"})) });
//! graph.add_node("refuse", |_| async move { Ok(json!({"reply": "no"})) });
//!
//! graph.add_edge(START, "classify");
//! graph.add_conditional_edge(
//!     "classify",
//!     |state| if state["blocked"].as_bool().unwrap_or(false) { "refuse" } else { "answer" }.to_string(),
//!     &[("answer", "answer"), ("refuse", "refuse")],
//! );
//! graph.add_edge("answer", END);
//! graph.add_edge("refuse", END);
//!
//! let compiled = graph.compile()?;
//! # Ok(())
//! # }
//! ```

use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use crate::compiled::CompiledGraph;
use crate::error::{GraphError, Result};
use crate::graph::{Graph, NodeSpec};
use crate::state::StateSchema;

/// Builder for stateful graphs.
pub struct StateGraph {
    graph: Graph,
    schema: StateSchema,
}

impl Default for StateGraph {
    fn default() -> Self {
        Self::new()
    }
}

impl StateGraph {
    /// New builder with an empty schema (all fields overwrite).
    pub fn new() -> Self {
        Self {
            graph: Graph::new(),
            schema: StateSchema::new(),
        }
    }

    /// New builder with an explicit state schema.
    pub fn with_schema(schema: StateSchema) -> Self {
        Self {
            graph: Graph::new(),
            schema,
        }
    }

    /// Register a node. The closure receives the current state and returns a
    /// partial update map merged through the schema.
    pub fn add_node<F, Fut>(&mut self, name: &str, executor: F)
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value>> + Send + 'static,
    {
        let spec = NodeSpec {
            name: name.to_string(),
            executor: Arc::new(move |state| Box::pin(executor(state))),
        };
        self.graph.add_node(name.to_string(), spec);
    }

    /// Add a direct edge.
    pub fn add_edge(&mut self, from: &str, to: &str) {
        self.graph.add_edge(from.to_string(), to.to_string());
    }

    /// Add a conditional edge. `branches` declares the router's codomain as
    /// `(branch_key, target_node)` pairs.
    pub fn add_conditional_edge<R>(&mut self, from: &str, router: R, branches: &[(&str, &str)])
    where
        R: Fn(&Value) -> String + Send + Sync + 'static,
    {
        let table: HashMap<String, String> = branches
            .iter()
            .map(|(key, target)| (key.to_string(), target.to_string()))
            .collect();
        self.graph
            .add_conditional_edge(from.to_string(), Arc::new(router), table);
    }

    /// Override the entry point (defaults to [`START`](crate::START)).
    pub fn set_entry(&mut self, node: &str) {
        self.graph.set_entry(node.to_string());
    }

    /// Validate and compile into an executable graph.
    pub fn compile(self) -> Result<CompiledGraph> {
        self.graph.validate().map_err(GraphError::Validation)?;
        Ok(CompiledGraph::new(self.graph, self.schema))
    }
}
