// Modules
pub mod config;
pub mod dataset;
pub mod error;
pub mod orchestrator;
pub mod poll_loop;
pub mod predictor;
pub mod router;
pub mod service;

// Mail in and out
pub mod mailbox;
pub mod notify;

// Client modules for external collaborators
pub mod completion;
pub mod toolkit;

// Re-export commonly used types
pub use error::{AgentError, Result};
pub use router::TaskType;
