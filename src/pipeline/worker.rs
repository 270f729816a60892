//! Worker contract
//!
//! A worker reads an immutable snapshot of the record and produces exactly one
//! named payload, or a typed failure. Expected problems (missing upstream data,
//! a flaky feed, bad input) come back as `WorkerFailure` values; the
//! orchestrator never relies on a worker panicking.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

use super::payload::{OutputName, Payload};
use super::state::StateView;

/// Failure classification used for retries and for the error log
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    WorkerTimeout,
    WorkerFailure,
    ValidationFailure,
    CriticalStageFailure,
    Cancelled,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ErrorKind::WorkerTimeout => "worker timeout",
            ErrorKind::WorkerFailure => "worker failure",
            ErrorKind::ValidationFailure => "validation failure",
            ErrorKind::CriticalStageFailure => "critical stage failure",
            ErrorKind::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// A worker's own account of why it produced nothing
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct WorkerFailure {
    pub kind: ErrorKind,
    pub message: String,
    /// Worth another attempt (only meaningful for `WorkerFailure`)
    pub transient: bool,
}

impl WorkerFailure {
    /// Failure that may clear up on retry (rate limit, flaky upstream)
    pub fn transient(message: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::WorkerFailure,
            message: message.into(),
            transient: true,
        }
    }

    /// Failure that a retry cannot fix
    pub fn permanent(message: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::WorkerFailure,
            message: message.into(),
            transient: false,
        }
    }

    /// Output or input violates the expected shape
    pub fn invalid(message: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::ValidationFailure,
            message: message.into(),
            transient: false,
        }
    }

    pub fn timeout(after: Duration) -> Self {
        Self {
            kind: ErrorKind::WorkerTimeout,
            message: format!("no result within {}ms", after.as_millis()),
            transient: true,
        }
    }

    /// A slot this worker cannot do without is absent
    pub fn missing_input(slot: OutputName) -> Self {
        Self::permanent(format!("required input '{}' is absent", slot))
    }

    /// Timeouts and transient failures are retried; validation never is.
    pub fn is_retryable(&self) -> bool {
        match self.kind {
            ErrorKind::WorkerTimeout => true,
            ErrorKind::WorkerFailure => self.transient,
            _ => false,
        }
    }
}

impl From<crate::core::Error> for WorkerFailure {
    fn from(err: crate::core::Error) -> Self {
        match err {
            crate::core::Error::Feed(msg) => WorkerFailure::transient(msg),
            other => WorkerFailure::permanent(other.to_string()),
        }
    }
}

/// Successful worker result: the payload plus progress notes for the log
#[derive(Debug, Clone, PartialEq)]
pub struct WorkerOutput {
    pub payload: Payload,
    pub notes: Vec<String>,
}

impl WorkerOutput {
    pub fn new(payload: Payload) -> Self {
        Self {
            payload,
            notes: Vec::new(),
        }
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.notes.push(note.into());
        self
    }
}

/// Analysis unit run by the orchestrator
#[async_trait]
pub trait Worker: Send + Sync {
    /// Worker identity used in logs and error attribution
    fn name(&self) -> &str;

    /// The single slot this worker produces
    fn output(&self) -> OutputName;

    /// Perform one attempt against the snapshot
    async fn run(&self, view: &StateView) -> Result<WorkerOutput, WorkerFailure>;
}

/// Whether a worker's failure halts the run or only degrades it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Criticality {
    Critical,
    Advisory,
}

/// Registration of one worker inside a stage
#[derive(Clone)]
pub struct WorkerSpec {
    pub(crate) worker: Arc<dyn Worker>,
    pub(crate) criticality: Criticality,
    pub(crate) timeout: Option<Duration>,
    pub(crate) max_attempts: Option<u32>,
}

impl WorkerSpec {
    pub fn new(worker: Arc<dyn Worker>, criticality: Criticality) -> Self {
        Self {
            worker,
            criticality,
            timeout: None,
            max_attempts: None,
        }
    }

    pub fn critical(worker: impl Worker + 'static) -> Self {
        Self::new(Arc::new(worker), Criticality::Critical)
    }

    pub fn advisory(worker: impl Worker + 'static) -> Self {
        Self::new(Arc::new(worker), Criticality::Advisory)
    }

    /// Per-attempt timeout overriding the orchestrator default
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Attempt budget overriding the orchestrator default
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = Some(attempts.max(1));
        self
    }

    pub fn name(&self) -> &str {
        self.worker.name()
    }

    pub fn output(&self) -> OutputName {
        self.worker.output()
    }

    pub fn criticality(&self) -> Criticality {
        self.criticality
    }
}

impl std::fmt::Debug for WorkerSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerSpec")
            .field("worker", &self.name())
            .field("output", &self.output())
            .field("criticality", &self.criticality)
            .field("timeout", &self.timeout)
            .field("max_attempts", &self.max_attempts)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_classification() {
        assert!(WorkerFailure::timeout(Duration::from_secs(1)).is_retryable());
        assert!(WorkerFailure::transient("rate limited").is_retryable());
        assert!(!WorkerFailure::permanent("bad symbol").is_retryable());
        assert!(!WorkerFailure::invalid("rsi out of range").is_retryable());
    }

    #[test]
    fn test_feed_errors_are_transient() {
        let failure: WorkerFailure = crate::core::Error::Feed("503".into()).into();
        assert!(failure.is_retryable());

        let failure: WorkerFailure = crate::core::Error::InvalidState("x".into()).into();
        assert!(!failure.is_retryable());
    }
}
