//! State record - the document threaded through one run
//!
//! Only the orchestrator mutates a record, and only between stages. Workers get
//! a [`StateView`]: an immutable, filtered snapshot sharing payloads by `Arc`.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value, json};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use uuid::Uuid;

use crate::core::Symbol;

use super::payload::*;
use super::worker::{Criticality, ErrorKind};

/// Non-fatal error attributed to one worker of one stage
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WorkerError {
    pub stage: String,
    pub worker: String,
    pub output: OutputName,
    pub kind: ErrorKind,
    pub message: String,
    pub attempts: u32,
    pub criticality: Criticality,
}

impl std::fmt::Display for WorkerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "[{}] {} ({}) after {} attempt(s): {}",
            self.stage, self.worker, self.kind, self.attempts, self.message
        )
    }
}

/// The error that ended a run
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FatalError {
    pub kind: ErrorKind,
    pub stage: String,
    pub worker: Option<String>,
    /// Underlying worker error kind for critical stage failures
    pub cause: Option<ErrorKind>,
    pub message: String,
}

impl std::fmt::Display for FatalError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match (&self.worker, self.cause) {
            (Some(worker), Some(cause)) => write!(
                f,
                "{} in stage '{}': worker '{}' ({}): {}",
                self.kind, self.stage, worker, cause, self.message
            ),
            (Some(worker), None) => write!(
                f,
                "{} in stage '{}': worker '{}': {}",
                self.kind, self.stage, worker, self.message
            ),
            _ => write!(f, "{} in stage '{}': {}", self.kind, self.stage, self.message),
        }
    }
}

/// Attempt to write a slot that already holds a payload
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("slot '{0}' is already written")]
pub struct SlotConflict(pub OutputName);

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StateRecord {
    symbol: Symbol,
    timestamp: DateTime<Utc>,
    cycle_id: Uuid,
    messages: Vec<String>,
    slots: BTreeMap<OutputName, Arc<Payload>>,
    errors: Vec<WorkerError>,
    fatal: Option<FatalError>,
    metadata: BTreeMap<String, Value>,
}

impl StateRecord {
    pub fn new(symbol: Symbol, cycle_id: Uuid) -> Self {
        let opening = format!("Starting trading analysis for {}", symbol);
        Self {
            symbol,
            timestamp: Utc::now(),
            cycle_id,
            messages: vec![opening],
            slots: BTreeMap::new(),
            errors: Vec::new(),
            fatal: None,
            metadata: BTreeMap::new(),
        }
    }

    pub fn symbol(&self) -> &Symbol {
        &self.symbol
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn cycle_id(&self) -> Uuid {
        self.cycle_id
    }

    pub fn messages(&self) -> &[String] {
        &self.messages
    }

    pub fn errors(&self) -> &[WorkerError] {
        &self.errors
    }

    pub fn fatal(&self) -> Option<&FatalError> {
        self.fatal.as_ref()
    }

    pub fn metadata(&self) -> &BTreeMap<String, Value> {
        &self.metadata
    }

    pub fn get(&self, slot: OutputName) -> Option<&Payload> {
        self.slots.get(&slot).map(Arc::as_ref)
    }

    pub fn contains(&self, slot: OutputName) -> bool {
        self.slots.contains_key(&slot)
    }

    /// Slots written so far, in slot order
    pub fn populated(&self) -> Vec<OutputName> {
        self.slots.keys().copied().collect()
    }

    pub(crate) fn log(&mut self, message: impl Into<String>) {
        self.messages.push(message.into());
    }

    /// Write-once: a populated slot is never replaced.
    pub(crate) fn write_slot(&mut self, slot: OutputName, payload: Payload) -> Result<(), SlotConflict> {
        if self.slots.contains_key(&slot) {
            return Err(SlotConflict(slot));
        }
        self.slots.insert(slot, Arc::new(payload));
        Ok(())
    }

    pub(crate) fn record_error(&mut self, error: WorkerError) {
        self.errors.push(error);
    }

    /// Returns false if a fatal error was already set; the first one wins.
    pub(crate) fn set_fatal(&mut self, error: FatalError) -> bool {
        if self.fatal.is_some() {
            return false;
        }
        self.fatal = Some(error);
        true
    }

    pub(crate) fn annotate(&mut self, key: impl Into<String>, value: Value) {
        self.metadata.insert(key.into(), value);
    }

    /// Snapshot exposing only `readable` slots
    pub fn view(&self, readable: &BTreeSet<OutputName>) -> StateView {
        StateView {
            symbol: self.symbol.clone(),
            timestamp: self.timestamp,
            cycle_id: self.cycle_id,
            slots: self
                .slots
                .iter()
                .filter(|(slot, _)| readable.contains(slot))
                .map(|(slot, payload)| (*slot, Arc::clone(payload)))
                .collect(),
        }
    }

    /// Snapshot exposing every slot
    pub fn full_view(&self) -> StateView {
        StateView {
            symbol: self.symbol.clone(),
            timestamp: self.timestamp,
            cycle_id: self.cycle_id,
            slots: self.slots.clone(),
        }
    }

    /// Flat key -> payload document for logging and archiving
    pub fn to_document(&self) -> serde_json::Result<Value> {
        let mut doc = Map::new();
        doc.insert("symbol".into(), json!(self.symbol));
        doc.insert("timestamp".into(), json!(self.timestamp.to_rfc3339()));
        doc.insert("cycle_id".into(), json!(self.cycle_id));
        doc.insert("messages".into(), json!(self.messages));
        for slot in OutputName::ALL {
            let value = match self.slots.get(&slot) {
                Some(payload) => serde_json::to_value(payload.as_ref())?,
                None => Value::Null,
            };
            doc.insert(slot.as_str().into(), value);
        }
        doc.insert("errors".into(), serde_json::to_value(&self.errors)?);
        doc.insert("error".into(), json!(self.fatal.as_ref().map(|f| f.to_string())));
        doc.insert("metadata".into(), serde_json::to_value(&self.metadata)?);
        Ok(Value::Object(doc))
    }
}

/// Read-only snapshot handed to workers
#[derive(Debug, Clone)]
pub struct StateView {
    symbol: Symbol,
    timestamp: DateTime<Utc>,
    cycle_id: Uuid,
    slots: BTreeMap<OutputName, Arc<Payload>>,
}

macro_rules! slot_accessor {
    ($fn_name:ident, $variant:ident, $ty:ty) => {
        pub fn $fn_name(&self) -> Option<&$ty> {
            match self.slots.get(&OutputName::$variant).map(Arc::as_ref) {
                Some(Payload::$variant(inner)) => Some(inner),
                _ => None,
            }
        }
    };
}

impl StateView {
    /// Standalone view, for driving a worker outside a run.
    pub fn new(symbol: Symbol, payloads: impl IntoIterator<Item = Payload>) -> Self {
        Self {
            symbol,
            timestamp: Utc::now(),
            cycle_id: Uuid::new_v4(),
            slots: payloads
                .into_iter()
                .map(|p| (p.output_name(), Arc::new(p)))
                .collect(),
        }
    }

    pub fn symbol(&self) -> &Symbol {
        &self.symbol
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn cycle_id(&self) -> Uuid {
        self.cycle_id
    }

    pub fn get(&self, slot: OutputName) -> Option<&Payload> {
        self.slots.get(&slot).map(Arc::as_ref)
    }

    pub fn visible(&self) -> Vec<OutputName> {
        self.slots.keys().copied().collect()
    }

    slot_accessor!(market_data, MarketData, MarketSnapshot);
    slot_accessor!(technical_indicators, TechnicalIndicators, IndicatorSet);
    slot_accessor!(fundamentals, FundamentalsAnalysis, FundamentalsReport);
    slot_accessor!(sentiment, SentimentAnalysis, SentimentReport);
    slot_accessor!(news, NewsAnalysis, NewsReport);
    slot_accessor!(bull_research, BullResearch, ResearchThesis);
    slot_accessor!(bear_research, BearResearch, ResearchThesis);
    slot_accessor!(trading_signals, TradingSignals, SignalSet);
    slot_accessor!(risk_assessment, RiskAssessment, RiskReport);
    slot_accessor!(portfolio_decision, PortfolioDecision, PortfolioDecision);
    slot_accessor!(execution_result, ExecutionResult, ExecutionReport);
}
