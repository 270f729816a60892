//! Run - one pass of the pipeline over one symbol
//!
//! State machine:
//!
//! ```text
//! Pending -> Running(0) -> Running(1) -> ... -> Completed
//!                 \              \
//!                  +--------------+--------> Halted
//! ```
//!
//! `advance` executes exactly one stage. Between advances `Running(i)` names the
//! stage the next advance will execute. `Completed` and `Halted` are terminal;
//! advancing a terminal run returns the same status and touches nothing.
//!
//! The execution handoff runs inside the advance that finishes the last stage.
//! Cancelling during the handoff halts the run at position `pipeline.len()`.

use async_trait::async_trait;
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::core::Symbol;

use super::events::RunEvent;
use super::executor::{StageLimits, StageRun, execute_stage};
use super::merge::{StageVerdict, merge_stage};
use super::payload::{ExecutionReport, OutputName, Payload};
use super::registry::{RunRegistry, RunSnapshot};
use super::stage::{Pipeline, Stage};
use super::state::{FatalError, StateRecord, StateView, WorkerError};
use super::worker::{Criticality, ErrorKind, WorkerFailure};

/// Stage name attributed to the execution handoff in errors and events
pub const EXECUTION_STAGE: &str = "execution";

/// Consumer of a completed run's decision
#[async_trait]
pub trait ExecutionHandoff: Send + Sync {
    fn name(&self) -> &str;

    /// Act on the final record. The report lands in `execution_result`.
    async fn execute(&self, record: &StateView) -> crate::core::Result<ExecutionReport>;
}

/// Lifecycle state of a run
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum RunStatus {
    Pending,
    Running {
        stage: usize,
        stage_name: String,
        degraded: bool,
    },
    Halted {
        stage: usize,
        stage_name: String,
        error: FatalError,
    },
    Completed {
        degraded: bool,
    },
}

impl RunStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunStatus::Halted { .. } | RunStatus::Completed { .. })
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunStatus::Pending => write!(f, "pending"),
            RunStatus::Running { stage_name, degraded, .. } => {
                write!(f, "running ({})", stage_name)?;
                if *degraded {
                    write!(f, " [degraded]")?;
                }
                Ok(())
            }
            RunStatus::Halted { stage_name, .. } => write!(f, "halted in {}", stage_name),
            RunStatus::Completed { degraded: true } => write!(f, "completed [degraded]"),
            RunStatus::Completed { degraded: false } => write!(f, "completed"),
        }
    }
}

/// Final status and record of a run
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub status: RunStatus,
    pub record: StateRecord,
}

impl RunReport {
    pub fn is_completed(&self) -> bool {
        matches!(self.status, RunStatus::Completed { .. })
    }

    pub fn is_halted(&self) -> bool {
        matches!(self.status, RunStatus::Halted { .. })
    }

    pub fn fatal(&self) -> Option<&FatalError> {
        self.record.fatal()
    }

    pub fn errors(&self) -> &[WorkerError] {
        self.record.errors()
    }
}

pub struct Run {
    id: Uuid,
    pipeline: Arc<Pipeline>,
    limits: StageLimits,
    record: StateRecord,
    status: RunStatus,
    next: usize,
    degraded: bool,
    cancel: CancellationToken,
    execution: Option<Arc<dyn ExecutionHandoff>>,
    events: broadcast::Sender<RunEvent>,
    registry: Option<Arc<RunRegistry>>,
    started: Instant,
}

impl Run {
    pub fn new(pipeline: Arc<Pipeline>, limits: StageLimits, symbol: Symbol, cycle_id: Uuid) -> Self {
        let (events, _) = broadcast::channel(256);
        Self {
            id: Uuid::new_v4(),
            pipeline,
            limits,
            record: StateRecord::new(symbol, cycle_id),
            status: RunStatus::Pending,
            next: 0,
            degraded: false,
            cancel: CancellationToken::new(),
            execution: None,
            events,
            registry: None,
            started: Instant::now(),
        }
    }

    /// Hand the final decision to `handoff` on completion
    pub fn with_execution(mut self, handoff: Arc<dyn ExecutionHandoff>) -> Self {
        self.execution = Some(handoff);
        self
    }

    pub(crate) fn with_observers(
        mut self,
        events: broadcast::Sender<RunEvent>,
        registry: Arc<RunRegistry>,
    ) -> Self {
        self.events = events;
        self.registry = Some(registry);
        self.publish();
        self
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn status(&self) -> &RunStatus {
        &self.status
    }

    pub fn record(&self) -> &StateRecord {
        &self.record
    }

    /// Token that aborts the run when cancelled
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RunEvent> {
        self.events.subscribe()
    }

    /// Execute the next stage and apply the failure policy.
    pub async fn advance(&mut self) -> &RunStatus {
        if self.status.is_terminal() {
            return &self.status;
        }

        if self.status == RunStatus::Pending {
            self.started = Instant::now();
            tracing::info!("🚀 Run {} started for {}", self.id, self.record.symbol());
            self.emit(RunEvent::RunStarted {
                run_id: self.id,
                cycle_id: self.record.cycle_id(),
                symbol: self.record.symbol().clone(),
                stages: self.pipeline.len(),
            });
        }

        let pipeline = Arc::clone(&self.pipeline);
        match pipeline.stages().get(self.next) {
            Some(stage) => self.run_stage(stage).await,
            None => self.complete().await,
        }

        self.publish();
        &self.status
    }

    /// Advance until the run reaches a terminal state.
    pub async fn run_to_end(mut self) -> RunReport {
        while !self.advance().await.is_terminal() {}
        self.into_report()
    }

    pub fn into_report(self) -> RunReport {
        RunReport {
            run_id: self.id,
            status: self.status,
            record: self.record,
        }
    }

    async fn run_stage(&mut self, stage: &Stage) {
        let index = stage.position();
        if self.cancel.is_cancelled() {
            self.halt_cancelled(stage);
            return;
        }

        self.status = RunStatus::Running {
            stage: index,
            stage_name: stage.name().to_string(),
            degraded: self.degraded,
        };
        self.record.log(format!(
            "Stage {}/{} '{}' started",
            index + 1,
            self.pipeline.len(),
            stage.name()
        ));
        tracing::info!(
            "▶️ Stage {}/{} {} ({} workers)",
            index + 1,
            self.pipeline.len(),
            stage.name(),
            stage.workers().len()
        );
        self.emit(RunEvent::StageStarted {
            run_id: self.id,
            stage_index: index,
            stage_name: stage.name().to_string(),
            workers: stage.workers().len(),
        });
        self.publish();

        let began = Instant::now();
        let view = Arc::new(self.record.view(stage.readable()));
        let outcomes = match execute_stage(stage, view, &self.limits, &self.cancel).await {
            StageRun::Resolved(outcomes) => outcomes,
            StageRun::Cancelled => {
                self.halt_cancelled(stage);
                return;
            }
        };

        let errors_before = self.record.errors().len();
        let verdict = merge_stage(&mut self.record, stage, outcomes);
        let elapsed = began.elapsed();
        self.record.annotate(
            format!("stage.{}", stage.name()),
            json!({
                "index": index,
                "elapsed_ms": elapsed.as_millis() as u64,
                "deadline_ms": self.limits.deadline(stage).as_millis() as u64,
            }),
        );

        let failures: Vec<RunEvent> = self.record.errors()[errors_before..]
            .iter()
            .map(|e| RunEvent::WorkerFailed {
                run_id: self.id,
                stage_name: e.stage.clone(),
                worker: e.worker.clone(),
                kind: e.kind,
                criticality: e.criticality,
                message: e.message.clone(),
            })
            .collect();
        for event in failures {
            self.emit(event);
        }

        match verdict {
            StageVerdict::Critical(error) => {
                self.emit(RunEvent::WorkerFailed {
                    run_id: self.id,
                    stage_name: error.stage.clone(),
                    worker: error.worker.clone().unwrap_or_default(),
                    kind: error.cause.unwrap_or(error.kind),
                    criticality: Criticality::Critical,
                    message: error.message.clone(),
                });
                self.halt(stage, error);
                return;
            }
            StageVerdict::Degraded => self.degraded = true,
            StageVerdict::Clean => {}
        }

        self.record.log(format!("Stage '{}' completed", stage.name()));
        tracing::info!("✅ Stage {} completed in {:?}", stage.name(), elapsed);
        self.emit(RunEvent::StageCompleted {
            run_id: self.id,
            stage_index: index,
            stage_name: stage.name().to_string(),
            elapsed_ms: elapsed.as_millis() as u64,
            degraded: self.degraded,
        });

        self.next += 1;
        match self.pipeline.stages().get(self.next) {
            // Between stages the status names the stage that runs next
            Some(upcoming) => {
                self.status = RunStatus::Running {
                    stage: upcoming.position(),
                    stage_name: upcoming.name().to_string(),
                    degraded: self.degraded,
                };
            }
            None => self.complete().await,
        }
    }

    fn halt(&mut self, stage: &Stage, error: FatalError) {
        self.halt_at(stage.position(), stage.name(), error);
    }

    fn halt_at(&mut self, position: usize, stage_name: &str, error: FatalError) {
        tracing::error!("🛑 Run {} halted: {}", self.id, error);
        self.record.log(format!("Run halted in stage '{}'", stage_name));
        self.emit(RunEvent::RunHalted {
            run_id: self.id,
            stage_name: stage_name.to_string(),
            error: error.to_string(),
        });
        self.status = RunStatus::Halted {
            stage: position,
            stage_name: stage_name.to_string(),
            error,
        };
    }

    fn halt_cancelled(&mut self, stage: &Stage) {
        self.halt_cancelled_at(stage.position(), stage.name());
    }

    fn halt_cancelled_at(&mut self, position: usize, stage_name: &str) {
        let error = FatalError {
            kind: ErrorKind::Cancelled,
            stage: stage_name.to_string(),
            worker: None,
            cause: None,
            message: "run cancelled".to_string(),
        };
        self.record.set_fatal(error.clone());
        self.halt_at(position, stage_name, error);
    }

    async fn complete(&mut self) {
        if let Some(handoff) = self.execution.clone() {
            if !self.hand_off(handoff.as_ref()).await {
                return;
            }
        }

        let elapsed = self.started.elapsed();
        self.status = RunStatus::Completed {
            degraded: self.degraded,
        };
        self.record.log("Trading cycle completed");
        tracing::info!(
            "🏁 Run {} completed in {:?} ({} non-fatal errors)",
            self.id,
            elapsed,
            self.record.errors().len()
        );
        self.emit(RunEvent::RunCompleted {
            run_id: self.id,
            degraded: self.degraded,
            errors: self.record.errors().len(),
            execution_time_ms: elapsed.as_millis() as u64,
        });
    }

    /// Returns false when the run was cancelled during the handoff.
    async fn hand_off(&mut self, handoff: &dyn ExecutionHandoff) -> bool {
        let view = self.record.full_view();
        let timeout = self.limits.worker_timeout;
        // The handoff sits after the last stage
        let position = self.pipeline.len();

        let executed = tokio::select! {
            biased;

            _ = self.cancel.cancelled() => None,
            result = tokio::time::timeout(timeout, handoff.execute(&view)) => Some(result),
        };
        let Some(executed) = executed else {
            tracing::warn!("🛑 Execution handoff {} abandoned, run cancelled", handoff.name());
            self.halt_cancelled_at(position, EXECUTION_STAGE);
            return false;
        };

        let result = match executed {
            Ok(Ok(report)) => {
                let status = report.status;
                let payload = Payload::ExecutionResult(report);
                payload
                    .validate_for(OutputName::ExecutionResult)
                    .map_err(WorkerFailure::invalid)
                    .and_then(|()| {
                        self.record
                            .write_slot(OutputName::ExecutionResult, payload)
                            .map_err(|e| WorkerFailure::invalid(e.to_string()))
                    })
                    .map(|()| status)
            }
            Ok(Err(e)) => Err(WorkerFailure::permanent(e.to_string())),
            Err(_) => Err(WorkerFailure::timeout(timeout)),
        };

        match result {
            Ok(status) => {
                self.record.log(format!("Execution handoff reported {:?}", status));
                self.emit(RunEvent::ExecutionReported {
                    run_id: self.id,
                    status,
                });
            }
            Err(failure) => {
                tracing::warn!("⚠️ Execution handoff {} failed: {}", handoff.name(), failure);
                self.degraded = true;
                self.emit(RunEvent::WorkerFailed {
                    run_id: self.id,
                    stage_name: EXECUTION_STAGE.to_string(),
                    worker: handoff.name().to_string(),
                    kind: failure.kind,
                    criticality: Criticality::Advisory,
                    message: failure.message.clone(),
                });
                self.record.record_error(WorkerError {
                    stage: EXECUTION_STAGE.to_string(),
                    worker: handoff.name().to_string(),
                    output: OutputName::ExecutionResult,
                    kind: failure.kind,
                    message: failure.message,
                    attempts: 1,
                    criticality: Criticality::Advisory,
                });
            }
        }
        true
    }

    fn emit(&self, event: RunEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    fn publish(&self) {
        if let Some(registry) = &self.registry {
            registry.publish(RunSnapshot {
                run_id: self.id,
                status: self.status.clone(),
                record: self.record.clone(),
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::payload::*;
    use crate::pipeline::retry::RetryPolicy;
    use crate::pipeline::worker::{Worker, WorkerOutput, WorkerSpec};
    use std::time::Duration;

    struct News;

    #[async_trait]
    impl Worker for News {
        fn name(&self) -> &str {
            "news"
        }

        fn output(&self) -> OutputName {
            OutputName::NewsAnalysis
        }

        async fn run(&self, _view: &StateView) -> Result<WorkerOutput, WorkerFailure> {
            Ok(WorkerOutput::new(Payload::NewsAnalysis(NewsReport {
                sentiment: Sentiment::Neutral,
                market_moving_potential: Level::Low,
                headlines: vec![],
                recommendation: Action::Hold,
            })))
        }
    }

    struct Broken;

    #[async_trait]
    impl Worker for Broken {
        fn name(&self) -> &str {
            "broken"
        }

        fn output(&self) -> OutputName {
            OutputName::MarketData
        }

        async fn run(&self, _view: &StateView) -> Result<WorkerOutput, WorkerFailure> {
            Err(WorkerFailure::permanent("no quote"))
        }
    }

    struct FailingHandoff;

    #[async_trait]
    impl ExecutionHandoff for FailingHandoff {
        fn name(&self) -> &str {
            "failing"
        }

        async fn execute(&self, _record: &StateView) -> crate::core::Result<ExecutionReport> {
            Err(crate::core::Error::Broker("exchange closed".into()))
        }
    }

    struct StalledHandoff;

    #[async_trait]
    impl ExecutionHandoff for StalledHandoff {
        fn name(&self) -> &str {
            "stalled"
        }

        async fn execute(&self, _record: &StateView) -> crate::core::Result<ExecutionReport> {
            std::future::pending().await
        }
    }

    fn limits() -> StageLimits {
        StageLimits {
            worker_timeout: Duration::from_secs(1),
            overhead: Duration::from_millis(100),
            retry: RetryPolicy::none(),
        }
    }

    fn run(pipeline: Pipeline) -> Run {
        Run::new(Arc::new(pipeline), limits(), Symbol::new("ITC"), Uuid::new_v4())
    }

    #[tokio::test]
    async fn test_advance_one_stage_at_a_time() {
        let pipeline = Pipeline::builder()
            .stage(Stage::builder("one").worker(WorkerSpec::advisory(News)))
            .stage(Stage::builder("two").worker(WorkerSpec::critical(Broken)))
            .build()
            .unwrap();
        let mut run = run(pipeline);
        assert_eq!(run.status(), &RunStatus::Pending);

        let status = run.advance().await.clone();
        assert_eq!(
            status,
            RunStatus::Running {
                stage: 1,
                stage_name: "two".into(),
                degraded: false,
            }
        );
        assert!(run.record().contains(OutputName::NewsAnalysis));

        let status = run.advance().await.clone();
        assert!(matches!(status, RunStatus::Halted { stage: 1, .. }));

        // Terminal: further advances change nothing
        let record = run.record().clone();
        assert_eq!(run.advance().await, &status);
        assert_eq!(run.record(), &record);
    }

    #[tokio::test]
    async fn test_failed_handoff_degrades_completion() {
        let pipeline = Pipeline::builder()
            .stage(Stage::builder("one").worker(WorkerSpec::advisory(News)))
            .build()
            .unwrap();
        let report = run(pipeline)
            .with_execution(Arc::new(FailingHandoff))
            .run_to_end()
            .await;

        assert_eq!(report.status, RunStatus::Completed { degraded: true });
        assert!(report.fatal().is_none());
        assert!(!report.record.contains(OutputName::ExecutionResult));
        assert_eq!(report.errors().len(), 1);
        assert_eq!(report.errors()[0].stage, "execution");
    }

    #[tokio::test]
    async fn test_cancel_before_start_halts() {
        let pipeline = Pipeline::builder()
            .stage(Stage::builder("one").worker(WorkerSpec::advisory(News)))
            .build()
            .unwrap();
        let run = run(pipeline);
        run.cancel_token().cancel();

        let report = run.run_to_end().await;
        assert!(report.is_halted());
        assert_eq!(report.fatal().unwrap().kind, ErrorKind::Cancelled);
        assert!(report.record.populated().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_during_handoff_halts() {
        let pipeline = Pipeline::builder()
            .stage(Stage::builder("one").worker(WorkerSpec::advisory(News)))
            .build()
            .unwrap();
        let mut run = run(pipeline).with_execution(Arc::new(StalledHandoff));
        let cancel = run.cancel_token();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            cancel.cancel();
        });

        let started = Instant::now();
        let status = run.advance().await.clone();

        assert!(started.elapsed() < limits().worker_timeout);
        match status {
            RunStatus::Halted { stage, stage_name, error } => {
                assert_eq!(stage, 1);
                assert_eq!(stage_name, EXECUTION_STAGE);
                assert_eq!(error.kind, ErrorKind::Cancelled);
            }
            other => panic!("expected a halted run, got {:?}", other),
        }
        assert!(run.record().contains(OutputName::NewsAnalysis));
        assert!(!run.record().contains(OutputName::ExecutionResult));
        assert!(run.record().errors().is_empty());
    }
}
