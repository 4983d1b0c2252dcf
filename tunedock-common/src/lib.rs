//! # Tunedock Common Library
//!
//! Shared code for the tunedock services including:
//! - Error types
//! - Job event types (JobEvent enum) and the EventBus
//! - Configuration loading and storage-root resolution

pub mod config;
pub mod error;
pub mod events;

pub use error::{Error, Result};
