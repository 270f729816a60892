//! Pipeline - staged, concurrent workflow engine
//!
//! A [`Pipeline`] is an ordered list of [`Stage`]s. Each stage fans its
//! workers out concurrently over a snapshot of the [`StateRecord`], waits at a
//! barrier, and merges the results before the next stage starts.

pub mod archive;
pub mod events;
pub mod executor;
pub mod merge;
pub mod orchestrator;
pub mod payload;
pub mod registry;
pub mod retry;
pub mod run;
pub mod stage;
pub mod state;
pub mod worker;

pub use events::RunEvent;
pub use executor::StageLimits;
pub use orchestrator::{Orchestrator, RunHandle, RunOverrides, RunRequest};
pub use payload::{OutputName, Payload};
pub use registry::{RunRegistry, RunSnapshot};
pub use retry::RetryPolicy;
pub use run::{EXECUTION_STAGE, ExecutionHandoff, Run, RunReport, RunStatus};
pub use stage::{DefinitionError, Pipeline, Stage, StageBuilder};
pub use state::{FatalError, StateRecord, StateView, WorkerError};
pub use worker::{Criticality, ErrorKind, Worker, WorkerFailure, WorkerOutput, WorkerSpec};
