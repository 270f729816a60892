//! News analyst (simulated) - recent headlines and their likely impact

use async_trait::async_trait;
use rand::Rng;
use rand::seq::IndexedRandom;

use crate::feeds::seeded_rng;
use crate::pipeline::payload::{Action, Level, NewsReport, Sentiment};
use crate::pipeline::{OutputName, Payload, StateView, Worker, WorkerFailure, WorkerOutput};

const GOOD_NEWS: &[&str] = &[
    "{} wins large multi-year contract",
    "{} reports better-than-expected quarterly margins",
    "Brokerages raise target price on {}",
    "{} announces share buyback",
];

const BAD_NEWS: &[&str] = &[
    "{} faces regulatory scrutiny over disclosures",
    "{} guidance trimmed on weak demand",
    "Promoter stake sale reported in {}",
    "{} hit by supply chain disruption",
];

const ROUTINE_NEWS: &[&str] = &[
    "{} to hold annual general meeting",
    "{} board meeting scheduled next week",
    "{} included in sector index rebalance",
];

pub struct NewsAnalyst {
    seed: u64,
}

impl NewsAnalyst {
    pub fn new(seed: u64) -> Self {
        Self { seed }
    }
}

#[async_trait]
impl Worker for NewsAnalyst {
    fn name(&self) -> &str {
        "news_analyst"
    }

    fn output(&self) -> OutputName {
        OutputName::NewsAnalysis
    }

    async fn run(&self, view: &StateView) -> Result<WorkerOutput, WorkerFailure> {
        let symbol = view.symbol();
        let mut rng = seeded_rng(self.seed, symbol, "news");

        let good = rng.random_range(0..3usize);
        let bad = rng.random_range(0..3usize);
        let mut headlines: Vec<String> = GOOD_NEWS
            .choose_multiple(&mut rng, good)
            .chain(BAD_NEWS.choose_multiple(&mut rng, bad))
            .map(|t| t.replace("{}", symbol.as_str()))
            .collect();
        if headlines.is_empty() {
            headlines.extend(
                ROUTINE_NEWS
                    .choose(&mut rng)
                    .map(|t| t.replace("{}", symbol.as_str())),
            );
        }

        let (sentiment, recommendation) = match good.cmp(&bad) {
            std::cmp::Ordering::Greater => (Sentiment::Positive, Action::Buy),
            std::cmp::Ordering::Less => (Sentiment::Negative, Action::Sell),
            std::cmp::Ordering::Equal => (Sentiment::Neutral, Action::Hold),
        };
        let market_moving_potential = match good.abs_diff(bad) {
            0 => Level::Low,
            1 => Level::Medium,
            _ => Level::High,
        };

        let report = NewsReport {
            sentiment,
            market_moving_potential,
            headlines,
            recommendation,
        };
        let note = format!(
            "News: {} headlines, {:?} impact",
            report.headlines.len(),
            report.market_moving_potential
        );
        Ok(WorkerOutput::new(Payload::NewsAnalysis(report)).with_note(note))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Symbol;

    #[tokio::test]
    async fn test_headlines_name_the_symbol() {
        let output = NewsAnalyst::new(5)
            .run(&StateView::new(Symbol::new("kotakbank"), []))
            .await
            .unwrap();
        let Payload::NewsAnalysis(report) = &output.payload else {
            panic!("wrong payload variant");
        };
        assert!(!report.headlines.is_empty());
        assert!(report.headlines.iter().all(|h| h.contains("KOTAKBANK")));
    }
}
