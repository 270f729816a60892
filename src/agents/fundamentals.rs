//! Fundamentals analyst (simulated) - valuation and a price target

use async_trait::async_trait;
use rand::Rng;
use std::sync::Arc;

use crate::core::MarketFeed;
use crate::feeds::seeded_rng;
use crate::pipeline::payload::{Action, FundamentalsReport, Level, Valuation};
use crate::pipeline::{OutputName, Payload, StateView, Worker, WorkerFailure, WorkerOutput};

use super::round_price;

pub struct FundamentalsAnalyst {
    feed: Arc<dyn MarketFeed>,
    seed: u64,
}

impl FundamentalsAnalyst {
    pub fn new(feed: Arc<dyn MarketFeed>, seed: u64) -> Self {
        Self { feed, seed }
    }
}

#[async_trait]
impl Worker for FundamentalsAnalyst {
    fn name(&self) -> &str {
        "fundamentals_analyst"
    }

    fn output(&self) -> OutputName {
        OutputName::FundamentalsAnalysis
    }

    async fn run(&self, view: &StateView) -> Result<WorkerOutput, WorkerFailure> {
        let symbol = view.symbol();
        let quote = self.feed.fetch_quote(symbol).await?;
        let mut rng = seeded_rng(self.seed, symbol, "fundamentals");

        let upside: f64 = rng.random_range(-0.10..0.20);
        let financial_health = match rng.random_range(0..3) {
            0 => Level::Low,
            1 => Level::Medium,
            _ => Level::High,
        };
        let valuation = if upside > 0.08 {
            Valuation::Undervalued
        } else if upside < -0.03 {
            Valuation::Overvalued
        } else {
            Valuation::Fair
        };
        let recommendation = match (valuation, financial_health) {
            (Valuation::Undervalued, Level::Medium | Level::High) => Action::Buy,
            (Valuation::Undervalued, Level::Low) => Action::Accumulate,
            (Valuation::Overvalued, Level::Low | Level::Medium) => Action::Sell,
            (Valuation::Overvalued, Level::High) => Action::Reduce,
            (Valuation::Fair, _) => Action::Hold,
        };

        let report = FundamentalsReport {
            financial_health,
            valuation,
            price_target: round_price(quote.last_price * (1.0 + upside)),
            recommendation,
        };
        let note = format!(
            "Fundamentals: {:?}, target {:.2}, {}",
            report.valuation, report.price_target, report.recommendation
        );
        Ok(WorkerOutput::new(Payload::FundamentalsAnalysis(report)).with_note(note))
    }
}
