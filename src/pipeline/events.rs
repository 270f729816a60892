//! Lifecycle events broadcast to status consumers

use serde::Serialize;
use tokio::sync::broadcast::{self, error::RecvError};
use uuid::Uuid;

use crate::core::Symbol;

use super::payload::ExecutionStatus;
use super::worker::{Criticality, ErrorKind};

/// Events emitted while a run executes
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RunEvent {
    RunStarted {
        run_id: Uuid,
        cycle_id: Uuid,
        symbol: Symbol,
        stages: usize,
    },
    StageStarted {
        run_id: Uuid,
        stage_index: usize,
        stage_name: String,
        workers: usize,
    },
    WorkerFailed {
        run_id: Uuid,
        stage_name: String,
        worker: String,
        kind: ErrorKind,
        criticality: Criticality,
        message: String,
    },
    StageCompleted {
        run_id: Uuid,
        stage_index: usize,
        stage_name: String,
        elapsed_ms: u64,
        degraded: bool,
    },
    ExecutionReported {
        run_id: Uuid,
        status: ExecutionStatus,
    },
    RunHalted {
        run_id: Uuid,
        stage_name: String,
        error: String,
    },
    RunCompleted {
        run_id: Uuid,
        degraded: bool,
        errors: usize,
        execution_time_ms: u64,
    },
}

impl RunEvent {
    pub fn run_id(&self) -> Uuid {
        match self {
            RunEvent::RunStarted { run_id, .. }
            | RunEvent::StageStarted { run_id, .. }
            | RunEvent::WorkerFailed { run_id, .. }
            | RunEvent::StageCompleted { run_id, .. }
            | RunEvent::ExecutionReported { run_id, .. }
            | RunEvent::RunHalted { run_id, .. }
            | RunEvent::RunCompleted { run_id, .. } => *run_id,
        }
    }

    /// True for the last event a run emits
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunEvent::RunHalted { .. } | RunEvent::RunCompleted { .. })
    }
}

/// Next event from a subscription, or `None` once every sender is gone.
///
/// A slow consumer that falls behind skips the overwritten events and keeps
/// following the run.
pub async fn next_event(events: &mut broadcast::Receiver<RunEvent>) -> Option<RunEvent> {
    loop {
        match events.recv().await {
            Ok(event) => return Some(event),
            Err(RecvError::Lagged(skipped)) => {
                tracing::warn!("⚠️ Event consumer lagged, {} events skipped", skipped);
            }
            Err(RecvError::Closed) => return None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn started(stage_index: usize) -> RunEvent {
        RunEvent::StageStarted {
            run_id: Uuid::nil(),
            stage_index,
            stage_name: format!("stage-{}", stage_index),
            workers: 1,
        }
    }

    #[tokio::test]
    async fn test_lagging_consumer_keeps_following() {
        let (sender, mut events) = broadcast::channel(2);
        for index in 0..5 {
            sender.send(started(index)).unwrap();
        }
        drop(sender);

        // The three oldest events were overwritten
        assert_eq!(next_event(&mut events).await, Some(started(3)));
        assert_eq!(next_event(&mut events).await, Some(started(4)));
        assert_eq!(next_event(&mut events).await, None);
    }

    #[test]
    fn test_events_are_tagged() {
        let event = RunEvent::RunHalted {
            run_id: Uuid::nil(),
            stage_name: "analysts".into(),
            error: "boom".into(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "run_halted");
        assert_eq!(json["stage_name"], "analysts");
        assert!(event.is_terminal());
    }
}
