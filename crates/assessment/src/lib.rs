//! Assessment data model and report assembly.
//!
//! Everything in this crate is synchronous and side-effect free: the
//! job state machine, the normalized report built from a terminal
//! payload, and the shapes handed to presentation.

pub mod error;
pub mod schema;
pub mod job;
pub mod report;
pub mod series;
pub mod export;

pub use error::*;
pub use schema::*;
pub use job::*;
pub use report::*;
pub use series::*;
pub use export::*;
