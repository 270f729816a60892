//! Stage fan-out
//!
//! Every worker of a stage runs as its own tokio task against the same
//! snapshot. The executor waits for all of them, the stage deadline, or the
//! run's cancellation token, whichever comes first.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::core::config::OrchestratorConfig;

use super::merge::WorkerOutcome;
use super::retry::{self, RetryPolicy};
use super::stage::Stage;
use super::state::StateView;
use super::worker::{ErrorKind, WorkerFailure, WorkerOutput, WorkerSpec};

/// Timeouts and retry budget applied to a stage's workers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StageLimits {
    /// Default per-attempt timeout
    pub worker_timeout: Duration,
    /// Slack added on top of the slowest worker budget
    pub overhead: Duration,
    pub retry: RetryPolicy,
}

impl StageLimits {
    pub fn from_config(config: &OrchestratorConfig) -> Self {
        Self {
            worker_timeout: config.worker_timeout(),
            overhead: config.stage_overhead(),
            retry: RetryPolicy::from_config(config),
        }
    }

    fn timeout_for(&self, spec: &WorkerSpec) -> Duration {
        spec.timeout.unwrap_or(self.worker_timeout)
    }

    fn policy_for(&self, spec: &WorkerSpec) -> RetryPolicy {
        match spec.max_attempts {
            Some(attempts) => self.retry.with_max_attempts(attempts),
            None => self.retry,
        }
    }

    /// Longest worker budget in the stage plus the fixed overhead
    pub fn deadline(&self, stage: &Stage) -> Duration {
        stage
            .workers()
            .iter()
            .map(|spec| self.policy_for(spec).worst_case(self.timeout_for(spec)))
            .max()
            .unwrap_or_default()
            .saturating_add(self.overhead)
    }
}

impl Default for StageLimits {
    fn default() -> Self {
        Self::from_config(&OrchestratorConfig::default())
    }
}

/// How a stage execution ended
#[derive(Debug)]
pub enum StageRun {
    /// One outcome per worker, in declaration order
    Resolved(Vec<WorkerOutcome>),
    /// The run was cancelled; partial results were dropped
    Cancelled,
}

type Finished = (usize, Result<WorkerOutput, WorkerFailure>, Duration);

pub async fn execute_stage(
    stage: &Stage,
    view: Arc<StateView>,
    limits: &StageLimits,
    cancel: &CancellationToken,
) -> StageRun {
    let started = Instant::now();
    let specs = stage.workers();
    let mut tasks: JoinSet<Finished> = JoinSet::new();
    let mut counters = Vec::with_capacity(specs.len());

    for (position, spec) in specs.iter().enumerate() {
        let counter = Arc::new(AtomicU32::new(0));
        counters.push(Arc::clone(&counter));

        let worker = Arc::clone(&spec.worker);
        let view = Arc::clone(&view);
        let timeout = limits.timeout_for(spec);
        let policy = limits.policy_for(spec);

        tasks.spawn(async move {
            let began = Instant::now();
            let result = retry::run_attempts(worker, view, timeout, policy, counter).await;
            (position, result, began.elapsed())
        });
    }

    let budget = limits.deadline(stage);
    let deadline = tokio::time::sleep(budget);
    tokio::pin!(deadline);

    let mut finished: Vec<Option<(Result<WorkerOutput, WorkerFailure>, Duration)>> =
        (0..specs.len()).map(|_| None).collect();
    let mut expired = false;

    loop {
        tokio::select! {
            biased;

            _ = cancel.cancelled() => {
                tasks.abort_all();
                tracing::warn!("🛑 stage {} cancelled, dropping partial results", stage.name());
                return StageRun::Cancelled;
            }

            _ = &mut deadline => {
                tasks.abort_all();
                expired = true;
                break;
            }

            joined = tasks.join_next() => match joined {
                Some(Ok((position, result, elapsed))) => {
                    finished[position] = Some((result, elapsed));
                }
                Some(Err(e)) => {
                    tracing::error!("worker task in stage {} ended abnormally: {}", stage.name(), e);
                }
                None => break,
            },
        }
    }

    if expired {
        tracing::warn!(
            "⏱️ stage {} hit its {}ms deadline",
            stage.name(),
            budget.as_millis()
        );
    }

    let outcomes = specs
        .iter()
        .zip(finished)
        .zip(counters)
        .enumerate()
        .map(|(position, ((spec, done), counter))| {
            let attempts = counter.load(Ordering::SeqCst);
            let (result, elapsed) = match done {
                Some(done) => done,
                None if expired => (
                    Err(WorkerFailure {
                        kind: ErrorKind::WorkerTimeout,
                        message: format!("stage deadline of {}ms exceeded", budget.as_millis()),
                        transient: true,
                    }),
                    started.elapsed(),
                ),
                None => (
                    Err(WorkerFailure::permanent("worker task terminated unexpectedly")),
                    started.elapsed(),
                ),
            };
            WorkerOutcome {
                position,
                worker: spec.name().to_string(),
                output: spec.output(),
                criticality: spec.criticality(),
                result,
                attempts,
                elapsed,
            }
        })
        .collect();

    StageRun::Resolved(outcomes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Symbol;
    use crate::pipeline::payload::*;
    use crate::pipeline::stage::Pipeline;
    use crate::pipeline::worker::Worker;
    use async_trait::async_trait;

    fn news() -> Payload {
        Payload::NewsAnalysis(NewsReport {
            sentiment: Sentiment::Neutral,
            market_moving_potential: Level::Low,
            headlines: vec![],
            recommendation: Action::Hold,
        })
    }

    /// Sleeps, then returns a news report
    struct Delayed {
        name: &'static str,
        output: OutputName,
        delay: Duration,
    }

    #[async_trait]
    impl Worker for Delayed {
        fn name(&self) -> &str {
            self.name
        }

        fn output(&self) -> OutputName {
            self.output
        }

        async fn run(&self, _view: &StateView) -> Result<WorkerOutput, WorkerFailure> {
            tokio::time::sleep(self.delay).await;
            Ok(WorkerOutput::new(news()))
        }
    }

    /// Holds its thread, so only the stage deadline can cut it off
    struct Blocking(Duration);

    #[async_trait]
    impl Worker for Blocking {
        fn name(&self) -> &str {
            "blocking"
        }

        fn output(&self) -> OutputName {
            OutputName::NewsAnalysis
        }

        async fn run(&self, _view: &StateView) -> Result<WorkerOutput, WorkerFailure> {
            std::thread::sleep(self.0);
            Ok(WorkerOutput::new(news()))
        }
    }

    fn delayed(name: &'static str, output: OutputName, millis: u64) -> WorkerSpec {
        WorkerSpec::advisory(Delayed {
            name,
            output,
            delay: Duration::from_millis(millis),
        })
    }

    fn limits() -> StageLimits {
        StageLimits {
            worker_timeout: Duration::from_secs(1),
            overhead: Duration::from_millis(100),
            retry: RetryPolicy::none(),
        }
    }

    fn view() -> Arc<StateView> {
        Arc::new(StateView::new(Symbol::new("TCS"), []))
    }

    #[test]
    fn test_deadline_uses_slowest_budget() {
        let pipeline = Pipeline::builder()
            .stage(
                Stage::builder("s")
                    .worker(delayed("a", OutputName::NewsAnalysis, 0))
                    .worker(
                        delayed("b", OutputName::SentimentAnalysis, 0)
                            .with_timeout(Duration::from_secs(3))
                            .with_max_attempts(2),
                    ),
            )
            .build()
            .unwrap();

        let limits = StageLimits {
            retry: RetryPolicy {
                max_attempts: 1,
                base_delay: Duration::from_millis(200),
                max_delay: Duration::from_secs(1),
            },
            ..limits()
        };
        // b: 2 x 3s + one 200ms backoff, plus 100ms overhead
        assert_eq!(limits.deadline(&pipeline.stages()[0]), Duration::from_millis(6_300));
    }

    #[tokio::test(start_paused = true)]
    async fn test_outcomes_follow_declaration_order() {
        let pipeline = Pipeline::builder()
            .stage(
                Stage::builder("s")
                    .worker(delayed("slow", OutputName::NewsAnalysis, 300))
                    .worker(delayed("fast", OutputName::SentimentAnalysis, 10)),
            )
            .build()
            .unwrap();

        let run = execute_stage(&pipeline.stages()[0], view(), &limits(), &CancellationToken::new()).await;
        let StageRun::Resolved(outcomes) = run else {
            panic!("stage should resolve");
        };

        let names: Vec<_> = outcomes.iter().map(|o| o.worker.as_str()).collect();
        assert_eq!(names, vec!["slow", "fast"]);
        assert!(outcomes.iter().all(|o| o.result.is_ok() && o.attempts == 1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_worker_timeout_is_recorded() {
        let pipeline = Pipeline::builder()
            .stage(
                Stage::builder("s")
                    .worker(delayed("ok", OutputName::NewsAnalysis, 10))
                    .worker(delayed("stuck", OutputName::SentimentAnalysis, 60_000)),
            )
            .build()
            .unwrap();

        let run = execute_stage(&pipeline.stages()[0], view(), &limits(), &CancellationToken::new()).await;
        let StageRun::Resolved(outcomes) = run else {
            panic!("stage should resolve");
        };

        assert!(outcomes[0].result.is_ok());
        let failure = outcomes[1].result.as_ref().unwrap_err();
        assert_eq!(failure.kind, ErrorKind::WorkerTimeout);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_drops_stage() {
        let pipeline = Pipeline::builder()
            .stage(Stage::builder("s").worker(delayed("stuck", OutputName::NewsAnalysis, 60_000)))
            .build()
            .unwrap();

        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });

        let run = execute_stage(&pipeline.stages()[0], view(), &limits(), &cancel).await;
        assert!(matches!(run, StageRun::Cancelled));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_stage_deadline_drops_late_result() {
        let pipeline = Pipeline::builder()
            .stage(
                Stage::builder("s")
                    .worker(delayed("ok", OutputName::SentimentAnalysis, 0))
                    .worker(WorkerSpec::advisory(Blocking(Duration::from_millis(600)))),
            )
            .build()
            .unwrap();
        let limits = StageLimits {
            worker_timeout: Duration::from_millis(100),
            overhead: Duration::from_millis(50),
            retry: RetryPolicy::none(),
        };

        let started = Instant::now();
        let run = execute_stage(&pipeline.stages()[0], view(), &limits, &CancellationToken::new()).await;
        assert!(started.elapsed() < Duration::from_millis(600));

        let StageRun::Resolved(outcomes) = run else {
            panic!("stage should resolve");
        };
        assert!(outcomes[0].result.is_ok());
        let failure = outcomes[1].result.as_ref().unwrap_err();
        assert_eq!(failure.kind, ErrorKind::WorkerTimeout);
        assert_eq!(failure.message, "stage deadline of 150ms exceeded");
        assert_eq!(outcomes[1].attempts, 1);
    }
}
