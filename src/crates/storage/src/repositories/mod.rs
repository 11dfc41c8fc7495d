//! Data-access layer over the durable store.

pub mod evaluation_repo;
pub mod session_repo;
pub mod submission_repo;

pub use evaluation_repo::EvaluationRepository;
pub use session_repo::{SavedMessage, SessionRepository};
pub use submission_repo::SubmissionRepository;
