//! Stage barrier merge
//!
//! Runs on the orchestrator task only. Outcomes are applied in worker
//! declaration order, so the merged record never depends on which worker
//! finished first.

use serde_json::json;
use std::time::Duration;

use super::payload::OutputName;
use super::stage::Stage;
use super::state::{FatalError, StateRecord, WorkerError};
use super::worker::{Criticality, ErrorKind, WorkerFailure, WorkerOutput};

/// Resolved result of one worker for one stage execution
#[derive(Debug, Clone)]
pub struct WorkerOutcome {
    /// Declaration position within the stage
    pub position: usize,
    pub worker: String,
    pub output: OutputName,
    pub criticality: Criticality,
    pub result: Result<WorkerOutput, WorkerFailure>,
    pub attempts: u32,
    pub elapsed: Duration,
}

/// What the merge decided for the run
#[derive(Debug, Clone, PartialEq)]
pub enum StageVerdict {
    Clean,
    /// At least one advisory worker produced nothing
    Degraded,
    /// A critical worker failed; the run must halt
    Critical(FatalError),
}

/// Apply one stage's outcomes to the record.
pub fn merge_stage(
    record: &mut StateRecord,
    stage: &Stage,
    mut outcomes: Vec<WorkerOutcome>,
) -> StageVerdict {
    outcomes.sort_by_key(|o| o.position);

    let mut degraded = false;
    let mut fatal: Option<FatalError> = None;

    for outcome in outcomes {
        let failure = match outcome.result {
            Ok(output) => match accept(record, stage, outcome.output, output) {
                Ok(()) => None,
                Err(failure) => Some(failure),
            },
            Err(failure) => Some(failure),
        };

        let status = match &failure {
            None => "ok".to_string(),
            Some(f) => f.kind.to_string(),
        };
        record.annotate(
            format!("{}.{}", stage.name(), outcome.worker),
            json!({
                "attempts": outcome.attempts,
                "elapsed_ms": outcome.elapsed.as_millis() as u64,
                "status": status,
            }),
        );

        let Some(failure) = failure else {
            tracing::debug!("merged {} from {}", outcome.output, outcome.worker);
            continue;
        };

        match outcome.criticality {
            Criticality::Critical if fatal.is_none() => {
                tracing::error!(
                    "❌ critical worker {} failed in stage {}: {}",
                    outcome.worker,
                    stage.name(),
                    failure
                );
                record.log(format!(
                    "Critical failure in {}: {} ({})",
                    stage.name(),
                    outcome.worker,
                    failure.message
                ));
                fatal = Some(FatalError {
                    kind: ErrorKind::CriticalStageFailure,
                    stage: stage.name().to_string(),
                    worker: Some(outcome.worker),
                    cause: Some(failure.kind),
                    message: failure.message,
                });
            }
            criticality => {
                tracing::warn!(
                    "⚠️ {} worker {} failed in stage {}: {}",
                    if criticality == Criticality::Advisory { "advisory" } else { "critical" },
                    outcome.worker,
                    stage.name(),
                    failure
                );
                if criticality == Criticality::Advisory {
                    degraded = true;
                    record.log(format!(
                        "{} unavailable: {}",
                        outcome.output, failure.message
                    ));
                }
                record.record_error(WorkerError {
                    stage: stage.name().to_string(),
                    worker: outcome.worker,
                    output: outcome.output,
                    kind: failure.kind,
                    message: failure.message,
                    attempts: outcome.attempts,
                    criticality,
                });
            }
        }
    }

    match fatal {
        Some(error) => {
            record.set_fatal(error.clone());
            StageVerdict::Critical(error)
        }
        None if degraded => StageVerdict::Degraded,
        None => StageVerdict::Clean,
    }
}

/// Validate and write one successful output.
fn accept(
    record: &mut StateRecord,
    stage: &Stage,
    slot: OutputName,
    output: WorkerOutput,
) -> Result<(), WorkerFailure> {
    if !stage.writes().contains(&slot) {
        return Err(WorkerFailure::invalid(format!(
            "stage '{}' may not write '{}'",
            stage.name(),
            slot
        )));
    }
    output
        .payload
        .validate_for(slot)
        .map_err(WorkerFailure::invalid)?;
    record
        .write_slot(slot, output.payload)
        .map_err(|conflict| WorkerFailure::invalid(conflict.to_string()))?;
    for note in output.notes {
        record.log(note);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Symbol;
    use crate::pipeline::payload::*;
    use crate::pipeline::stage::Pipeline;
    use crate::pipeline::state::StateView;
    use crate::pipeline::worker::{Worker, WorkerSpec};
    use async_trait::async_trait;
    use uuid::Uuid;

    struct Named(&'static str, OutputName);

    #[async_trait]
    impl Worker for Named {
        fn name(&self) -> &str {
            self.0
        }

        fn output(&self) -> OutputName {
            self.1
        }

        async fn run(&self, _view: &StateView) -> Result<WorkerOutput, WorkerFailure> {
            Err(WorkerFailure::permanent("not driven in merge tests"))
        }
    }

    fn stage() -> Stage {
        let pipeline = Pipeline::builder()
            .stage(
                Stage::builder("analysts")
                    .worker(WorkerSpec::critical(Named("market", OutputName::MarketData)))
                    .worker(WorkerSpec::advisory(Named("news", OutputName::NewsAnalysis)))
                    .worker(WorkerSpec::advisory(Named(
                        "sentiment",
                        OutputName::SentimentAnalysis,
                    ))),
            )
            .build()
            .unwrap();
        pipeline.stages()[0].clone()
    }

    fn news() -> Payload {
        Payload::NewsAnalysis(NewsReport {
            sentiment: Sentiment::Positive,
            market_moving_potential: Level::Medium,
            headlines: vec!["results beat".into()],
            recommendation: Action::Buy,
        })
    }

    fn sentiment(score: f64) -> Payload {
        Payload::SentimentAnalysis(SentimentReport {
            sentiment: Sentiment::Positive,
            score,
            social_buzz: Level::High,
            drivers: vec![],
        })
    }

    fn outcome(
        position: usize,
        worker: &str,
        output: OutputName,
        criticality: Criticality,
        result: Result<WorkerOutput, WorkerFailure>,
    ) -> WorkerOutcome {
        WorkerOutcome {
            position,
            worker: worker.into(),
            output,
            criticality,
            result,
            attempts: 1,
            elapsed: Duration::from_millis(5),
        }
    }

    fn record() -> StateRecord {
        StateRecord::new(Symbol::new("INFY"), Uuid::nil())
    }

    #[test]
    fn test_advisory_failure_degrades() {
        let stage = stage();
        let mut record = record();
        let verdict = merge_stage(
            &mut record,
            &stage,
            vec![
                outcome(1, "news", OutputName::NewsAnalysis, Criticality::Advisory, Ok(WorkerOutput::new(news()))),
                outcome(
                    2,
                    "sentiment",
                    OutputName::SentimentAnalysis,
                    Criticality::Advisory,
                    Err(WorkerFailure::timeout(Duration::from_secs(1))),
                ),
            ],
        );

        assert_eq!(verdict, StageVerdict::Degraded);
        assert!(record.contains(OutputName::NewsAnalysis));
        assert!(!record.contains(OutputName::SentimentAnalysis));
        assert_eq!(record.errors().len(), 1);
        assert_eq!(record.errors()[0].kind, ErrorKind::WorkerTimeout);
        assert!(record.fatal().is_none());
        assert_eq!(record.metadata()["analysts.sentiment"]["status"], "worker timeout");
    }

    #[test]
    fn test_critical_failure_is_fatal_but_siblings_merge() {
        let stage = stage();
        let mut record = record();
        let verdict = merge_stage(
            &mut record,
            &stage,
            vec![
                outcome(
                    0,
                    "market",
                    OutputName::MarketData,
                    Criticality::Critical,
                    Err(WorkerFailure::transient("feed down")),
                ),
                outcome(1, "news", OutputName::NewsAnalysis, Criticality::Advisory, Ok(WorkerOutput::new(news()))),
            ],
        );

        let StageVerdict::Critical(fatal) = verdict else {
            panic!("expected critical verdict");
        };
        assert_eq!(fatal.kind, ErrorKind::CriticalStageFailure);
        assert_eq!(fatal.cause, Some(ErrorKind::WorkerFailure));
        assert_eq!(fatal.worker.as_deref(), Some("market"));
        assert_eq!(record.fatal(), Some(&fatal));
        assert!(record.contains(OutputName::NewsAnalysis));
        assert!(record.errors().is_empty());
    }

    #[test]
    fn test_malformed_payload_is_validation_failure() {
        let stage = stage();
        let mut record = record();
        let verdict = merge_stage(
            &mut record,
            &stage,
            vec![
                outcome(
                    2,
                    "sentiment",
                    OutputName::SentimentAnalysis,
                    Criticality::Advisory,
                    Ok(WorkerOutput::new(sentiment(f64::NAN))),
                ),
                // Wrong variant for the declared slot
                outcome(1, "news", OutputName::NewsAnalysis, Criticality::Advisory, Ok(WorkerOutput::new(sentiment(0.5)))),
            ],
        );

        assert_eq!(verdict, StageVerdict::Degraded);
        assert!(record.populated().is_empty());
        let kinds: Vec<_> = record.errors().iter().map(|e| (e.worker.as_str(), e.kind)).collect();
        assert_eq!(
            kinds,
            vec![
                ("news", ErrorKind::ValidationFailure),
                ("sentiment", ErrorKind::ValidationFailure),
            ]
        );
    }

    #[test]
    fn test_merge_is_order_independent() {
        let stage = stage();
        let outcomes = || {
            vec![
                outcome(1, "news", OutputName::NewsAnalysis, Criticality::Advisory, Ok(WorkerOutput::new(news()).with_note("news ok"))),
                outcome(
                    2,
                    "sentiment",
                    OutputName::SentimentAnalysis,
                    Criticality::Advisory,
                    Ok(WorkerOutput::new(sentiment(0.8)).with_note("sentiment ok")),
                ),
                outcome(
                    0,
                    "market",
                    OutputName::MarketData,
                    Criticality::Critical,
                    Err(WorkerFailure::permanent("unknown symbol")),
                ),
            ]
        };

        let base = record();
        let mut forward = base.clone();
        let mut reversed = base.clone();
        let mut rotated = base;

        merge_stage(&mut forward, &stage, outcomes());
        let mut rev = outcomes();
        rev.reverse();
        merge_stage(&mut reversed, &stage, rev);
        let mut rot = outcomes();
        rot.rotate_left(1);
        merge_stage(&mut rotated, &stage, rot);

        assert_eq!(forward, reversed);
        assert_eq!(forward, rotated);
        assert_eq!(
            forward.messages().iter().filter(|m| m.ends_with(" ok")).collect::<Vec<_>>(),
            vec!["news ok", "sentiment ok"]
        );
    }
}
