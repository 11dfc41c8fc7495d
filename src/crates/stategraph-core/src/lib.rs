//! Typed state-graph runtime.
//!
//! This crate provides the execution substrate for graph-shaped workflows:
//! registered nodes consume a shared JSON state record and return **partial
//! update maps**, which the runtime merges back into the state according to a
//! per-field [`state::Reducer`] schema. Edges are either direct or
//! conditional (a router function of the post-node state selects a declared
//! branch), and a [`stategraph_checkpoint::CheckpointSaver`] persists a
//! snapshot at every node boundary so an invocation can resume from the last
//! checkpoint of its thread.
//!
//! # Building a graph
//!
//! ```rust,no_run
//! use stategraph_core::{StateGraph, InvokeConfig, END, START};
//! use serde_json::json;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let mut graph = StateGraph::new();
//!
//! graph.add_node("greet", |_state| async move {
//!     Ok(json!({ "greeting": "hello" }))
//! });
//!
//! graph.add_edge(START, "greet");
//! graph.add_edge("greet", END);
//!
//! let compiled = graph.compile()?;
//! let out = compiled
//!     .invoke(json!({}), &InvokeConfig::default())
//!     .await?;
//! assert_eq!(out["greeting"], "hello");
//! # Ok(())
//! # }
//! ```
//!
//! # Merge semantics
//!
//! Nodes never mutate the state directly. Each node returns the fields it
//! wants to change; the schema decides how a field merges — overwrite for
//! scalars, list concatenation for message logs, dict union for score maps,
//! componentwise addition for token counters. See [`state`].

pub mod builder;
pub mod compiled;
pub mod error;
pub mod graph;
pub mod messages;
pub mod state;

pub use builder::StateGraph;
pub use compiled::{CompiledGraph, InvokeConfig};
pub use error::{GraphError, Result};
pub use graph::{Edge, Graph, NodeId, NodeSpec, END, START};
pub use messages::{ChatMessage, MessageRole};
pub use state::{
    AppendReducer, MergeReducer, OverwriteReducer, Reducer, StateSchema, SumReducer,
    TokenSumReducer,
};
