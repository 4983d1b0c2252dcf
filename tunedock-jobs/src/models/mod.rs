//! Data models for the job pipeline

mod job;

pub use job::{
    AnalyzeInput, JobPriority, JobRecord, JobStatus, Provider, SourceCandidate,
};
