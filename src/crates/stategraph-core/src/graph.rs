//! Core graph data structures.
//!
//! A [`Graph`] holds nodes (async executors over the shared state), edges
//! (direct or conditional), and the entry point. It is usually built through
//! [`StateGraph`](crate::StateGraph) and compiled into a
//! [`CompiledGraph`](crate::CompiledGraph) for execution.

use futures::future::BoxFuture;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

use crate::error::Result;

/// Node identifier — unique name within a graph.
pub type NodeId = String;

/// Virtual entry node. Execution follows the edges declared from `START`.
pub const START: &str = "__start__";

/// Virtual terminal node. Edging to `END` completes the invocation.
pub const END: &str = "__end__";

/// Async node executor: receives the current state, returns a partial update.
pub type NodeExecutor =
    Arc<dyn Fn(Value) -> BoxFuture<'static, Result<Value>> + Send + Sync>;

/// Router function for conditional edges: maps post-node state to a branch key.
pub type RouterFn = Arc<dyn Fn(&Value) -> String + Send + Sync>;

/// Transition between nodes.
#[derive(Clone)]
pub enum Edge {
    /// Unconditional transition to a node (or [`END`]).
    Direct(NodeId),

    /// Conditional transition: the router picks a key out of `branches`.
    ///
    /// The branch table is the declared codomain of the router; a key outside
    /// it is an execution error, which keeps routing decisions auditable.
    Conditional {
        /// Router over the post-node state.
        router: RouterFn,
        /// Branch key → target node.
        branches: HashMap<String, NodeId>,
    },
}

impl std::fmt::Debug for Edge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Edge::Direct(to) => f.debug_tuple("Direct").field(to).finish(),
            Edge::Conditional { branches, .. } => f
                .debug_struct("Conditional")
                .field("router", &"<fn>")
                .field("branches", branches)
                .finish(),
        }
    }
}

/// Node definition: name plus executor.
#[derive(Clone)]
pub struct NodeSpec {
    /// Human-readable node name, used in logs and errors.
    pub name: String,
    /// The async executor producing a partial state update.
    pub executor: NodeExecutor,
}

impl std::fmt::Debug for NodeSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeSpec")
            .field("name", &self.name)
            .field("executor", &"<fn>")
            .finish()
    }
}

/// Graph structure: nodes, edges, entry point.
#[derive(Debug, Clone)]
pub struct Graph {
    /// All nodes keyed by id.
    pub nodes: HashMap<NodeId, NodeSpec>,
    /// Outgoing edges per source node. Only the first edge of a source is
    /// followed at runtime; multiple edges from one source are a build error
    /// caught by [`validate`](Self::validate).
    pub edges: HashMap<NodeId, Vec<Edge>>,
    /// Entry node id; [`START`] by default.
    pub entry: NodeId,
}

impl Default for Graph {
    fn default() -> Self {
        Self::new()
    }
}

impl Graph {
    /// Create an empty graph with the entry set to [`START`].
    pub fn new() -> Self {
        Self {
            nodes: HashMap::new(),
            edges: HashMap::new(),
            entry: START.to_string(),
        }
    }

    /// Add a node.
    pub fn add_node(&mut self, id: NodeId, spec: NodeSpec) {
        self.nodes.insert(id, spec);
    }

    /// Add a direct edge.
    pub fn add_edge(&mut self, from: NodeId, to: NodeId) {
        self.edges.entry(from).or_default().push(Edge::Direct(to));
    }

    /// Add a conditional edge with its declared branch table.
    pub fn add_conditional_edge(
        &mut self,
        from: NodeId,
        router: RouterFn,
        branches: HashMap<String, NodeId>,
    ) {
        self.edges
            .entry(from)
            .or_default()
            .push(Edge::Conditional { router, branches });
    }

    /// Set the entry point.
    pub fn set_entry(&mut self, node: NodeId) {
        self.entry = node;
    }

    /// Validate the graph structure.
    ///
    /// Checks that the entry exists, every edge endpoint exists (or is
    /// [`END`]), no node declares more than one outgoing edge, every node has
    /// an outgoing edge, and every node can reach [`END`] through the
    /// declared edges and branch tables.
    pub fn validate(&self) -> std::result::Result<(), String> {
        if !self.nodes.contains_key(&self.entry) && self.entry != START {
            return Err(format!("entry point '{}' does not exist", self.entry));
        }

        for (from, edges) in &self.edges {
            if !self.nodes.contains_key(from) && from != START {
                return Err(format!("edge source '{from}' does not exist"));
            }
            if edges.len() > 1 {
                return Err(format!("node '{from}' declares multiple outgoing edges"));
            }
            for edge in edges {
                match edge {
                    Edge::Direct(to) => {
                        if !self.nodes.contains_key(to) && to != END {
                            return Err(format!("edge target '{to}' does not exist"));
                        }
                    }
                    Edge::Conditional { branches, .. } => {
                        for to in branches.values() {
                            if !self.nodes.contains_key(to) && to != END {
                                return Err(format!("branch target '{to}' does not exist"));
                            }
                        }
                    }
                }
            }
        }

        for node in self.nodes.keys() {
            if !self.edges.contains_key(node) {
                return Err(format!("node '{node}' has no outgoing edge"));
            }
        }

        // Every node must terminate: reverse-reachability from END over the
        // union of direct targets and branch tables.
        let mut terminating: std::collections::HashSet<&str> =
            std::collections::HashSet::from([END]);
        loop {
            let mut changed = false;
            for (from, edges) in &self.edges {
                if terminating.contains(from.as_str()) {
                    continue;
                }
                let reaches = edges.iter().any(|edge| match edge {
                    Edge::Direct(to) => terminating.contains(to.as_str()),
                    Edge::Conditional { branches, .. } => branches
                        .values()
                        .any(|to| terminating.contains(to.as_str())),
                });
                if reaches {
                    terminating.insert(from.as_str());
                    changed = true;
                }
            }
            if !changed {
                break;
            }
        }
        for node in self.nodes.keys() {
            if !terminating.contains(node.as_str()) {
                return Err(format!("node '{node}' cannot reach END"));
            }
        }

        Ok(())
    }
}
