//! HTTP and WebSocket surface.

pub mod error;
pub mod routes;
pub mod ws;

pub use error::{ApiError, ErrorEnvelope};
pub use routes::{router, AppState};
