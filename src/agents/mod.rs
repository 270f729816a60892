//! Analysis agents and the default five-stage pipeline
//!
//! These are the simulation-mode workers: rule-based stand-ins for the
//! language-model analysts. Every agent treats an absent upstream slot as
//! "no opinion" rather than inventing a value.

pub mod fundamentals;
pub mod market_data;
pub mod news;
pub mod portfolio;
pub mod research;
pub mod risk;
pub mod sentiment;
pub mod signals;
pub mod technical;

pub use fundamentals::FundamentalsAnalyst;
pub use market_data::MarketDataAgent;
pub use news::NewsAnalyst;
pub use portfolio::PortfolioManager;
pub use research::Researcher;
pub use risk::RiskAnalyst;
pub use sentiment::SentimentAnalyst;
pub use signals::SignalGenerator;
pub use technical::TechnicalAnalyst;

use std::sync::Arc;

use crate::core::{Config, MarketFeed};
use crate::pipeline::{DefinitionError, Pipeline, Stage, WorkerSpec};

pub const ANALYSTS: &str = "analysts";
pub const RESEARCH: &str = "research";
pub const SIGNALS: &str = "signals";
pub const RISK: &str = "risk";
pub const PORTFOLIO: &str = "portfolio";

/// analysts -> research -> signals -> risk -> portfolio
///
/// Market data and every decision step are critical; the other analysts and
/// the researchers are advisory.
pub fn default_pipeline(config: &Config, feed: Arc<dyn MarketFeed>) -> Result<Pipeline, DefinitionError> {
    let seed = config.app.sample_seed;

    Pipeline::builder()
        .stage(
            Stage::builder(ANALYSTS)
                .worker(WorkerSpec::critical(MarketDataAgent::new(Arc::clone(&feed))))
                .worker(WorkerSpec::advisory(TechnicalAnalyst::new(
                    Arc::clone(&feed),
                    &config.strategy,
                )))
                .worker(WorkerSpec::advisory(FundamentalsAnalyst::new(
                    Arc::clone(&feed),
                    seed,
                )))
                .worker(WorkerSpec::advisory(SentimentAnalyst::new(seed)))
                .worker(WorkerSpec::advisory(NewsAnalyst::new(seed))),
        )
        .stage(
            Stage::builder(RESEARCH)
                .depends_on(ANALYSTS)
                .worker(WorkerSpec::advisory(Researcher::bull()))
                .worker(WorkerSpec::advisory(Researcher::bear())),
        )
        .stage(
            Stage::builder(SIGNALS)
                .depends_on(ANALYSTS)
                .depends_on(RESEARCH)
                .worker(WorkerSpec::critical(SignalGenerator::new(&config.risk))),
        )
        .stage(
            Stage::builder(RISK)
                .depends_on(ANALYSTS)
                .depends_on(SIGNALS)
                .worker(WorkerSpec::critical(RiskAnalyst::new(&config.risk))),
        )
        .stage(
            Stage::builder(PORTFOLIO)
                .depends_on(ANALYSTS)
                .depends_on(RESEARCH)
                .depends_on(SIGNALS)
                .depends_on(RISK)
                .worker(WorkerSpec::critical(PortfolioManager::new(&config.trading))),
        )
        .build()
}

/// Tally of directional opinions
#[derive(Debug, Default, Clone, PartialEq)]
pub(crate) struct Votes {
    pub bullish: Vec<String>,
    pub bearish: Vec<String>,
}

impl Votes {
    pub fn bull(&mut self, reason: impl Into<String>) {
        self.bullish.push(reason.into());
    }

    pub fn bear(&mut self, reason: impl Into<String>) {
        self.bearish.push(reason.into());
    }

    /// Bullish minus bearish
    pub fn net(&self) -> i32 {
        self.bullish.len() as i32 - self.bearish.len() as i32
    }
}

pub(crate) fn clamp(value: f64, lo: f64, hi: f64) -> f64 {
    value.max(lo).min(hi)
}

pub(crate) fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Cents for prices of one unit and up, four places below that. A price too
/// small for either is left as is so it never collapses to zero.
pub(crate) fn round_price(price: f64) -> f64 {
    let rounded = if price.abs() >= 1.0 {
        round2(price)
    } else {
        (price * 10_000.0).round() / 10_000.0
    };
    if rounded == 0.0 { price } else { rounded }
}
