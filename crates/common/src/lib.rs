//! Shared types and the error taxonomy for the wagate workspace.

pub mod error;
pub mod types;

pub use error::{Error, Result};
