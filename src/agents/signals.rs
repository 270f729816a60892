//! Signal generator - blends analyst and research output into one trade signal

use async_trait::async_trait;

use crate::core::config::RiskConfig;
use crate::pipeline::payload::{Action, Sentiment, SignalSet, Strength};
use crate::pipeline::{OutputName, Payload, StateView, Worker, WorkerFailure, WorkerOutput};

use super::research::gather_evidence;
use super::{clamp, round2, round_price};

pub struct SignalGenerator {
    stop_loss_pct: f64,
}

impl SignalGenerator {
    pub fn new(risk: &RiskConfig) -> Self {
        Self {
            stop_loss_pct: risk.stop_loss_pct,
        }
    }

    /// Composite 0-100 score; 50 is neutral and every absent input stays neutral.
    fn composite(view: &StateView) -> f64 {
        let mut score = view.technical_indicators().map_or(50.0, |t| t.score);

        let bull = view.bull_research().map_or(50.0, |r| r.confidence);
        let bear = view.bear_research().map_or(50.0, |r| r.confidence);
        score += (bull - bear) / 4.0;

        if let Some(sentiment) = view.sentiment() {
            score += (sentiment.score - 0.5) * 20.0;
        }
        if let Some(news) = view.news() {
            score += match news.sentiment {
                Sentiment::Positive => 5.0,
                Sentiment::Negative => -5.0,
                Sentiment::Neutral => 0.0,
            };
        }
        if let Some(fundamentals) = view.fundamentals() {
            score += match fundamentals.recommendation {
                Action::Buy | Action::Accumulate => 5.0,
                Action::Sell | Action::Reduce => -5.0,
                Action::Hold => 0.0,
            };
        }

        clamp(score, 0.0, 100.0)
    }
}

fn action_for(score: f64) -> Action {
    if score >= 65.0 {
        Action::Buy
    } else if score >= 55.0 {
        Action::Accumulate
    } else if score <= 35.0 {
        Action::Sell
    } else if score <= 45.0 {
        Action::Reduce
    } else {
        Action::Hold
    }
}

#[async_trait]
impl Worker for SignalGenerator {
    fn name(&self) -> &str {
        "signal_generator"
    }

    fn output(&self) -> OutputName {
        OutputName::TradingSignals
    }

    async fn run(&self, view: &StateView) -> Result<WorkerOutput, WorkerFailure> {
        let market = view
            .market_data()
            .ok_or_else(|| WorkerFailure::missing_input(OutputName::MarketData))?;

        let score = Self::composite(view);
        let action = action_for(score);
        let distance = (score - 50.0).abs();
        let strength = if distance >= 20.0 {
            Strength::Strong
        } else if distance >= 10.0 {
            Strength::Moderate
        } else {
            Strength::Weak
        };

        let entry = market.last_price;
        let short = matches!(action, Action::Sell | Action::Reduce);
        let (stop_loss, take_profit) = if short {
            (
                entry * (1.0 + self.stop_loss_pct),
                (entry * (1.0 - 2.0 * self.stop_loss_pct)).max(entry * 0.01),
            )
        } else {
            (
                entry * (1.0 - self.stop_loss_pct),
                entry * (1.0 + 2.0 * self.stop_loss_pct),
            )
        };

        let votes = gather_evidence(view);
        let (supporting_factors, risk_factors) = if short {
            (votes.bearish, votes.bullish)
        } else {
            (votes.bullish, votes.bearish)
        };

        let signals = SignalSet {
            action,
            confidence: round2(clamp(50.0 + distance, 0.0, 95.0)),
            strength,
            entry_price: round_price(entry),
            stop_loss: round_price(stop_loss),
            take_profit: round_price(take_profit),
            reasoning: format!(
                "Composite score {:.1} from {} analyst inputs",
                score,
                view.visible().len()
            ),
            supporting_factors,
            risk_factors,
        };
        let note = format!(
            "Trading signal: {} ({:?}, {:.0}% confidence)",
            signals.action, signals.strength, signals.confidence
        );
        Ok(WorkerOutput::new(Payload::TradingSignals(signals)).with_note(note))
    }
}
