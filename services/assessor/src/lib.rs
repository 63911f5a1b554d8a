//! Asynchronous assessment job client: configuration, the transport gateway,
//! the live and local backends, and the job lifecycle controller.

pub mod backend;
pub mod backend_live;
pub mod backend_local;
pub mod config;
pub mod error;
pub mod gateway;
pub mod job;
pub mod mode;
pub mod session;
pub mod types;

pub use backend::JobBackend;
pub use config::{AppConfig, BackendMode};
pub use error::{ApiError, Result};
pub use job::{AssessmentController, PollPolicy};
pub use mode::select_backend;
pub use session::SessionState;
