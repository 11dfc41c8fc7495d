//! Orchestration service and API surface.
//!
//! [`EvalService`] is the external-facing facade: it owns session lifecycle,
//! the write-order invariant (user message durably written before the graph
//! runs, AI message and submission rows durably written before responding),
//! graph invocation, and the streaming path with per-turn cancellation. The
//! `api` module exposes it over HTTP and WebSocket.

pub mod api;
pub mod config;
pub mod service;

pub use config::ServerConfig;
pub use service::{EvalService, MessageResponse, StreamEvent, SubmitResponse};
