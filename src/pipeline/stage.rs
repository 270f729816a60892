//! Stage and pipeline definitions
//!
//! A pipeline is validated once, at construction. After `build` succeeds the
//! orchestrator can rely on: unique stage names, backward-only dependencies,
//! every slot owned by exactly one stage, and no stage claiming
//! `execution_result`.

use std::collections::{BTreeMap, BTreeSet, HashSet};

use super::payload::OutputName;
use super::worker::WorkerSpec;

/// Pipeline construction errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DefinitionError {
    #[error("pipeline has no stages")]
    EmptyPipeline,

    #[error("stage '{0}' has no workers")]
    EmptyStage(String),

    #[error("stage name '{0}' is used twice")]
    DuplicateStage(String),

    #[error("stage '{stage}' depends on unknown stage '{dependency}'")]
    UnknownDependency { stage: String, dependency: String },

    #[error("stage '{stage}' depends on '{dependency}', which does not run before it")]
    ForwardDependency { stage: String, dependency: String },

    #[error("worker '{worker}' in stage '{stage}' outputs '{output}' outside the stage write-set")]
    UndeclaredOutput {
        stage: String,
        worker: String,
        output: OutputName,
    },

    #[error("slot '{output}' is written by both '{first}' and '{second}'")]
    DuplicateWriter {
        output: OutputName,
        first: String,
        second: String,
    },

    #[error("stage '{stage}' claims '{output}', which is reserved for execution handoff")]
    ReservedOutput { stage: String, output: OutputName },

    #[error("worker name '{worker}' appears twice in stage '{stage}'")]
    DuplicateWorker { stage: String, worker: String },
}

/// One validated step of the pipeline
#[derive(Debug, Clone)]
pub struct Stage {
    name: String,
    position: usize,
    workers: Vec<WorkerSpec>,
    depends_on: Vec<String>,
    writes: BTreeSet<OutputName>,
    readable: BTreeSet<OutputName>,
}

impl Stage {
    pub fn builder(name: impl Into<String>) -> StageBuilder {
        StageBuilder {
            name: name.into(),
            workers: Vec::new(),
            depends_on: Vec::new(),
            writes: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Zero-based position in the pipeline
    pub fn position(&self) -> usize {
        self.position
    }

    pub fn workers(&self) -> &[WorkerSpec] {
        &self.workers
    }

    pub fn depends_on(&self) -> &[String] {
        &self.depends_on
    }

    /// Slots this stage may write
    pub fn writes(&self) -> &BTreeSet<OutputName> {
        &self.writes
    }

    /// Slots visible to this stage's workers
    pub fn readable(&self) -> &BTreeSet<OutputName> {
        &self.readable
    }
}

/// Unvalidated stage declaration
#[derive(Debug, Clone)]
pub struct StageBuilder {
    name: String,
    workers: Vec<WorkerSpec>,
    depends_on: Vec<String>,
    writes: Option<BTreeSet<OutputName>>,
}

impl StageBuilder {
    pub fn worker(mut self, spec: WorkerSpec) -> Self {
        self.workers.push(spec);
        self
    }

    /// Read the slots written by an earlier stage
    pub fn depends_on(mut self, stage: impl Into<String>) -> Self {
        self.depends_on.push(stage.into());
        self
    }

    /// Explicit write-set. Defaults to the workers' outputs.
    pub fn writes(mut self, outputs: impl IntoIterator<Item = OutputName>) -> Self {
        self.writes = Some(outputs.into_iter().collect());
        self
    }
}

/// Ordered, validated sequence of stages
#[derive(Debug, Clone)]
pub struct Pipeline {
    stages: Vec<Stage>,
}

impl Pipeline {
    pub fn builder() -> PipelineBuilder {
        PipelineBuilder { stages: Vec::new() }
    }

    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    pub fn stage(&self, name: &str) -> Option<&Stage> {
        self.stages.iter().find(|s| s.name == name)
    }

    /// Stage that owns `slot`, if any
    pub fn writer_of(&self, slot: OutputName) -> Option<&Stage> {
        self.stages.iter().find(|s| s.writes.contains(&slot))
    }
}

#[derive(Debug, Default)]
pub struct PipelineBuilder {
    stages: Vec<StageBuilder>,
}

impl PipelineBuilder {
    pub fn stage(mut self, stage: StageBuilder) -> Self {
        self.stages.push(stage);
        self
    }

    pub fn build(self) -> Result<Pipeline, DefinitionError> {
        if self.stages.is_empty() {
            return Err(DefinitionError::EmptyPipeline);
        }

        let mut positions: BTreeMap<String, usize> = BTreeMap::new();
        for (position, stage) in self.stages.iter().enumerate() {
            if positions.insert(stage.name.clone(), position).is_some() {
                return Err(DefinitionError::DuplicateStage(stage.name.clone()));
            }
        }

        let mut owners: BTreeMap<OutputName, String> = BTreeMap::new();
        let mut stages: Vec<Stage> = Vec::with_capacity(self.stages.len());

        for (position, decl) in self.stages.into_iter().enumerate() {
            if decl.workers.is_empty() {
                return Err(DefinitionError::EmptyStage(decl.name));
            }

            let mut names = HashSet::new();
            for spec in &decl.workers {
                if !names.insert(spec.name().to_string()) {
                    return Err(DefinitionError::DuplicateWorker {
                        stage: decl.name.clone(),
                        worker: spec.name().to_string(),
                    });
                }
            }

            let writes = match decl.writes {
                Some(writes) => writes,
                None => decl.workers.iter().map(WorkerSpec::output).collect(),
            };
            if writes.contains(&OutputName::ExecutionResult) {
                return Err(DefinitionError::ReservedOutput {
                    stage: decl.name,
                    output: OutputName::ExecutionResult,
                });
            }

            // One worker per slot, inside the stage and across stages
            let mut produced: BTreeMap<OutputName, &str> = BTreeMap::new();
            for spec in &decl.workers {
                let output = spec.output();
                if !writes.contains(&output) {
                    return Err(DefinitionError::UndeclaredOutput {
                        stage: decl.name.clone(),
                        worker: spec.name().to_string(),
                        output,
                    });
                }
                if let Some(first) = produced.insert(output, spec.name()) {
                    return Err(DefinitionError::DuplicateWriter {
                        output,
                        first: format!("{}/{}", decl.name, first),
                        second: format!("{}/{}", decl.name, spec.name()),
                    });
                }
            }
            for output in &writes {
                if let Some(first) = owners.get(output) {
                    return Err(DefinitionError::DuplicateWriter {
                        output: *output,
                        first: first.clone(),
                        second: decl.name.clone(),
                    });
                }
            }
            for output in &writes {
                owners.insert(*output, decl.name.clone());
            }

            let mut readable = BTreeSet::new();
            for dependency in &decl.depends_on {
                match positions.get(dependency) {
                    None => {
                        return Err(DefinitionError::UnknownDependency {
                            stage: decl.name.clone(),
                            dependency: dependency.clone(),
                        });
                    }
                    Some(&dep_position) if dep_position >= position => {
                        return Err(DefinitionError::ForwardDependency {
                            stage: decl.name.clone(),
                            dependency: dependency.clone(),
                        });
                    }
                    Some(&dep_position) => {
                        readable.extend(stages[dep_position].writes.iter().copied());
                    }
                }
            }

            stages.push(Stage {
                name: decl.name,
                position,
                workers: decl.workers,
                depends_on: decl.depends_on,
                writes,
                readable,
            });
        }

        Ok(Pipeline { stages })
    }
}
