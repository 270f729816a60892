//! Sentiment analyst (simulated) - social and market mood score

use async_trait::async_trait;
use rand::Rng;
use rand::seq::IndexedRandom;

use crate::feeds::seeded_rng;
use crate::pipeline::payload::{Level, Sentiment, SentimentReport};
use crate::pipeline::{OutputName, Payload, StateView, Worker, WorkerFailure, WorkerOutput};

use super::round2;

const POSITIVE_DRIVERS: &[&str] = &[
    "strong quarterly delivery expectations",
    "institutional buying reported",
    "upbeat analyst commentary",
    "sector tailwinds",
];

const NEGATIVE_DRIVERS: &[&str] = &[
    "margin pressure concerns",
    "foreign fund outflows",
    "regulatory overhang",
    "weak sector breadth",
];

const NEUTRAL_DRIVERS: &[&str] = &["sector tailwinds", "margin pressure concerns"];

pub struct SentimentAnalyst {
    seed: u64,
}

impl SentimentAnalyst {
    pub fn new(seed: u64) -> Self {
        Self { seed }
    }
}

#[async_trait]
impl Worker for SentimentAnalyst {
    fn name(&self) -> &str {
        "sentiment_analyst"
    }

    fn output(&self) -> OutputName {
        OutputName::SentimentAnalysis
    }

    async fn run(&self, view: &StateView) -> Result<WorkerOutput, WorkerFailure> {
        let mut rng = seeded_rng(self.seed, view.symbol(), "sentiment");
        let score = round2(rng.random_range(0.2..0.85));

        let sentiment = if score > 0.6 {
            Sentiment::Positive
        } else if score < 0.4 {
            Sentiment::Negative
        } else {
            Sentiment::Neutral
        };
        let social_buzz = match rng.random_range(0..3) {
            0 => Level::Low,
            1 => Level::Medium,
            _ => Level::High,
        };
        let pool = match sentiment {
            Sentiment::Positive => POSITIVE_DRIVERS,
            Sentiment::Negative => NEGATIVE_DRIVERS,
            Sentiment::Neutral => NEUTRAL_DRIVERS,
        };
        let drivers = pool
            .choose_multiple(&mut rng, 2)
            .map(|d| d.to_string())
            .collect();

        let report = SentimentReport {
            sentiment,
            score,
            social_buzz,
            drivers,
        };
        let note = format!("Sentiment: {:?} ({:.2})", report.sentiment, report.score);
        Ok(WorkerOutput::new(Payload::SentimentAnalysis(report)).with_note(note))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Symbol;

    #[tokio::test]
    async fn test_score_in_range_and_consistent() {
        let agent = SentimentAnalyst::new(11);
        for symbol in ["TCS", "INFY", "SBIN", "ITC", "ACME"] {
            let output = agent.run(&StateView::new(Symbol::new(symbol), [])).await.unwrap();
            let Payload::SentimentAnalysis(report) = &output.payload else {
                panic!("wrong payload variant");
            };
            assert!((0.0..=1.0).contains(&report.score));
            assert_eq!(report.drivers.len(), 2);
            match report.sentiment {
                Sentiment::Positive => assert!(report.score > 0.6),
                Sentiment::Negative => assert!(report.score < 0.4),
                Sentiment::Neutral => assert!((0.4..=0.6).contains(&report.score)),
            }
        }
    }
}
