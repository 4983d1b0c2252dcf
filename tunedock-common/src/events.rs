//! Event types for the tunedock job pipeline
//!
//! Provides the shared `JobEvent` definitions and the `EventBus` used to push
//! job state changes from the worker pools to SSE subscribers.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

/// Job kind processed by the pipeline.
///
/// Download and analyze run on independent worker pools and queues; there is
/// no ordering relationship between the two kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobKind {
    /// Fetch audio for a track from one of its candidate sources
    Download,
    /// Extract audio features from previously fetched audio
    Analyze,
}

impl JobKind {
    /// Stable string form used in queue rows and log fields
    pub fn as_str(&self) -> &'static str {
        match self {
            JobKind::Download => "download",
            JobKind::Analyze => "analyze",
        }
    }

    /// Inverse of [`JobKind::as_str`]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "download" => Some(JobKind::Download),
            "analyze" => Some(JobKind::Analyze),
            _ => None,
        }
    }
}

impl std::fmt::Display for JobKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Pipeline event types
///
/// Events are broadcast via EventBus and serialized for SSE transmission.
/// All job state changes flow through this central enum so subscribers can
/// match exhaustively.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum JobEvent {
    /// Job record created and enqueued
    ///
    /// Triggers:
    /// - SSE: show the job as pending on the jobs dashboard
    JobQueued {
        /// Job UUID
        job_id: Uuid,
        /// Job kind (download or analyze)
        kind: JobKind,
        /// Target track identifier
        track_id: String,
        /// When the job was enqueued
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// A worker claimed the job and began executing it
    JobStarted {
        /// Job UUID
        job_id: Uuid,
        /// Job kind
        kind: JobKind,
        /// Execution attempt number (1-based)
        attempt: u32,
        /// When execution started
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Progress update during execution
    ///
    /// Emitted at coarse handler milestones. Subscribers must tolerate
    /// duplicated or missing intermediate ticks; only terminal events are
    /// delivered at-least-once.
    JobProgress {
        /// Job UUID
        job_id: Uuid,
        /// Job kind
        kind: JobKind,
        /// Progress percentage (0-100, non-decreasing)
        progress: u8,
        /// When progress was recorded
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Handler failed but retries remain; job returned to its queue
    JobRequeued {
        /// Job UUID
        job_id: Uuid,
        /// Job kind
        kind: JobKind,
        /// Attempts made so far
        attempt_count: u32,
        /// Backoff delay before the job becomes claimable again
        delay_ms: u64,
        /// Error that caused the retry
        error: String,
        /// When the job was re-enqueued
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Job finished successfully (terminal)
    ///
    /// Triggers:
    /// - SSE: refresh track audio-availability state in connected UIs
    JobCompleted {
        /// Job UUID
        job_id: Uuid,
        /// Job kind
        kind: JobKind,
        /// Target track identifier
        track_id: String,
        /// Owning collection identifier
        owner_id: i64,
        /// Opaque result payload (resolved audio reference or features)
        result: serde_json::Value,
        /// When the job completed
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Job failed with no retries remaining (terminal)
    JobFailed {
        /// Job UUID
        job_id: Uuid,
        /// Job kind
        kind: JobKind,
        /// Target track identifier
        track_id: String,
        /// Failure reason shown to the user
        error: String,
        /// Total attempts made
        attempt_count: u32,
        /// When the job failed
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// All job records and queued references were dropped (administrative)
    QueueCleared {
        /// Number of job records removed
        jobs_dropped: u64,
        /// When the clear happened
        timestamp: chrono::DateTime<chrono::Utc>,
    },
}

impl JobEvent {
    /// Get event type as string for SSE event naming and filtering
    pub fn event_type(&self) -> &'static str {
        match self {
            JobEvent::JobQueued { .. } => "JobQueued",
            JobEvent::JobStarted { .. } => "JobStarted",
            JobEvent::JobProgress { .. } => "JobProgress",
            JobEvent::JobRequeued { .. } => "JobRequeued",
            JobEvent::JobCompleted { .. } => "JobCompleted",
            JobEvent::JobFailed { .. } => "JobFailed",
            JobEvent::QueueCleared { .. } => "QueueCleared",
        }
    }

    /// Job this event refers to, if any
    pub fn job_id(&self) -> Option<Uuid> {
        match self {
            JobEvent::JobQueued { job_id, .. }
            | JobEvent::JobStarted { job_id, .. }
            | JobEvent::JobProgress { job_id, .. }
            | JobEvent::JobRequeued { job_id, .. }
            | JobEvent::JobCompleted { job_id, .. }
            | JobEvent::JobFailed { job_id, .. } => Some(*job_id),
            JobEvent::QueueCleared { .. } => None,
        }
    }

    /// True for completed/failed: the last event a per-job stream delivers
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobEvent::JobCompleted { .. } | JobEvent::JobFailed { .. }
        )
    }
}

/// Central event distribution bus for pipeline events
///
/// The EventBus uses tokio::broadcast internally, providing:
/// - Non-blocking publish (slow subscribers don't block workers)
/// - Multiple concurrent subscribers
/// - Automatic cleanup when subscribers drop
/// - Lagged message detection for slow subscribers
///
/// Constructed once at startup and cloned into the worker pools and the SSE
/// handlers; no global instance exists.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<JobEvent>,
    capacity: usize,
}

impl EventBus {
    /// Creates a new EventBus with the specified channel capacity
    ///
    /// Capacity bounds how far a slow SSE subscriber may lag before it starts
    /// missing intermediate events. Terminal delivery does not depend on the
    /// channel: per-job streams reconcile against the Job Store.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx, capacity }
    }

    /// Subscribe to all future events
    ///
    /// Events emitted before subscription are not received.
    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.tx.subscribe()
    }

    /// Emit an event to all subscribers
    ///
    /// Returns `Ok(subscriber_count)` if at least one subscriber exists,
    /// `Err` otherwise.
    #[allow(clippy::result_large_err)]
    pub fn emit(&self, event: JobEvent) -> Result<usize, broadcast::error::SendError<JobEvent>> {
        self.tx.send(event)
    }

    /// Emit an event, ignoring whether anyone is listening
    ///
    /// Workers use this for every emission: job state lives in the Job Store,
    /// and an event with no subscriber needs no delivery.
    pub fn emit_lossy(&self, event: JobEvent) {
        let _ = self.tx.send(event);
    }

    /// Current number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Configured channel capacity
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
