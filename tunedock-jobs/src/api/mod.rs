//! HTTP API for the job pipeline

pub mod health;
pub mod jobs;
pub mod sse;

pub use health::health_routes;
pub use jobs::job_routes;
pub use sse::{global_event_stream, job_event_stream};
