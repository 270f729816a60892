//! Orchestrator - entry point for triggering and observing runs

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::core::config::OrchestratorConfig;
use crate::core::{Error, Result, Symbol};

use super::events::RunEvent;
use super::executor::StageLimits;
use super::registry::{RunRegistry, RunSnapshot};
use super::run::{ExecutionHandoff, Run, RunReport};
use super::stage::Pipeline;

/// Optional per-run adjustments
#[derive(Debug, Clone, Default)]
pub struct RunOverrides {
    pub cycle_id: Option<Uuid>,
    /// Replaces the configured per-attempt timeout for workers without their own
    pub worker_timeout: Option<Duration>,
    /// Skip the execution handoff even if one is configured
    pub skip_execution: bool,
}

#[derive(Debug, Clone)]
pub struct RunRequest {
    pub symbol: Symbol,
    pub overrides: RunOverrides,
}

impl RunRequest {
    pub fn new(symbol: impl Into<String>) -> Self {
        Self {
            symbol: Symbol::new(symbol),
            overrides: RunOverrides::default(),
        }
    }

    pub fn with_cycle_id(mut self, cycle_id: Uuid) -> Self {
        self.overrides.cycle_id = Some(cycle_id);
        self
    }

    pub fn with_worker_timeout(mut self, timeout: Duration) -> Self {
        self.overrides.worker_timeout = Some(timeout);
        self
    }

    pub fn without_execution(mut self) -> Self {
        self.overrides.skip_execution = true;
        self
    }
}

/// A run executing in the background
pub struct RunHandle {
    id: Uuid,
    cancel: CancellationToken,
    task: JoinHandle<RunReport>,
}

impl RunHandle {
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Abort the run; it halts with a `Cancelled` fatal error.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Wait for the final report
    pub async fn wait(self) -> Result<RunReport> {
        self.task
            .await
            .map_err(|e| Error::InvalidState(format!("run task failed: {}", e)))
    }
}

pub struct Orchestrator {
    pipeline: Arc<Pipeline>,
    limits: StageLimits,
    execution: Option<Arc<dyn ExecutionHandoff>>,
    registry: Arc<RunRegistry>,
    event_sender: broadcast::Sender<RunEvent>,
}

impl Orchestrator {
    pub fn new(pipeline: Pipeline, config: &OrchestratorConfig) -> Self {
        let (event_sender, _) = broadcast::channel(1000);
        Self {
            pipeline: Arc::new(pipeline),
            limits: StageLimits::from_config(config),
            execution: None,
            registry: Arc::new(RunRegistry::new()),
            event_sender,
        }
    }

    pub fn with_execution(mut self, handoff: Arc<dyn ExecutionHandoff>) -> Self {
        self.execution = Some(handoff);
        self
    }

    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    pub fn limits(&self) -> &StageLimits {
        &self.limits
    }

    /// Subscribe to lifecycle events of every run started after this call
    pub fn subscribe(&self) -> broadcast::Receiver<RunEvent> {
        self.event_sender.subscribe()
    }

    /// Build a run without starting it; drive it with `advance`.
    pub fn create_run(&self, request: RunRequest) -> Result<Run> {
        if request.symbol.is_empty() {
            return Err(Error::InvalidState("run requested for an empty symbol".into()));
        }

        let mut limits = self.limits;
        if let Some(timeout) = request.overrides.worker_timeout {
            limits.worker_timeout = timeout;
        }
        let cycle_id = request.overrides.cycle_id.unwrap_or_else(Uuid::new_v4);

        let mut run = Run::new(Arc::clone(&self.pipeline), limits, request.symbol, cycle_id);
        match &self.execution {
            Some(handoff) if !request.overrides.skip_execution => {
                run = run.with_execution(Arc::clone(handoff));
            }
            Some(_) => tracing::info!("Execution handoff skipped for run {}", run.id()),
            None => {}
        }

        Ok(run.with_observers(self.event_sender.clone(), Arc::clone(&self.registry)))
    }

    /// Start a run in the background.
    pub fn trigger(&self, request: RunRequest) -> Result<RunHandle> {
        let run = self.create_run(request)?;
        let id = run.id();
        let cancel = run.cancel_token();
        tracing::info!(
            "[ORCHESTRATOR] Triggered run {} for {} (cycle {})",
            id,
            run.record().symbol(),
            run.record().cycle_id()
        );
        let task = tokio::spawn(run.run_to_end());
        Ok(RunHandle { id, cancel, task })
    }

    /// Run one cycle to completion on the current task.
    pub async fn run_cycle(&self, request: RunRequest) -> Result<RunReport> {
        let run = self.create_run(request)?;
        Ok(run.run_to_end().await)
    }

    /// Current record and status of a run, possibly mid-flight
    pub fn snapshot(&self, run_id: Uuid) -> Option<RunSnapshot> {
        self.registry.snapshot(run_id)
    }

    /// Snapshot of the most recently updated run
    pub fn latest(&self) -> Option<RunSnapshot> {
        self.registry.latest()
    }

    /// Forget finished runs
    pub fn cleanup(&self) -> usize {
        self.registry.cleanup()
    }
}
