//! Risk analyst - scores the proposed trade and approves, conditions or rejects it

use async_trait::async_trait;

use crate::core::config::RiskConfig;
use crate::pipeline::payload::{Action, Approval, Level, RiskLevel, RiskReport, Sentiment, Strength};
use crate::pipeline::{OutputName, Payload, StateView, Worker, WorkerFailure, WorkerOutput};

use super::{clamp, round2};

pub struct RiskAnalyst {
    config: RiskConfig,
}

impl RiskAnalyst {
    pub fn new(config: &RiskConfig) -> Self {
        Self {
            config: config.clone(),
        }
    }

    fn approval(&self, score: f64) -> Approval {
        if score > self.config.max_risk_score {
            Approval::Rejected
        } else if score > self.config.max_risk_score * 0.7 {
            Approval::Conditional
        } else {
            Approval::Approved
        }
    }
}

fn level_for(score: f64) -> RiskLevel {
    if score < 30.0 {
        RiskLevel::Low
    } else if score < 55.0 {
        RiskLevel::Medium
    } else if score < 75.0 {
        RiskLevel::High
    } else {
        RiskLevel::Extreme
    }
}

#[async_trait]
impl Worker for RiskAnalyst {
    fn name(&self) -> &str {
        "risk_analyst"
    }

    fn output(&self) -> OutputName {
        OutputName::RiskAssessment
    }

    async fn run(&self, view: &StateView) -> Result<WorkerOutput, WorkerFailure> {
        let market = view
            .market_data()
            .ok_or_else(|| WorkerFailure::missing_input(OutputName::MarketData))?;
        let signals = view
            .trading_signals()
            .ok_or_else(|| WorkerFailure::missing_input(OutputName::TradingSignals))?;

        let mut score: f64 = 30.0;
        let mut factors = Vec::new();

        match market.volatility {
            Level::High => {
                score += 25.0;
                factors.push("high intraday volatility".to_string());
            }
            Level::Medium => score += 10.0,
            Level::Low => {}
        }
        if signals.strength == Strength::Weak && signals.action != Action::Hold {
            score += 10.0;
            factors.push("weak signal strength".to_string());
        }
        if signals.confidence < 60.0 {
            score += 10.0;
        }
        match view.technical_indicators() {
            Some(tech) => {
                if let Some(rsi) = tech.rsi.filter(|r| !(20.0..=80.0).contains(r)) {
                    score += 10.0;
                    factors.push(format!("RSI at an extreme ({:.1})", rsi));
                }
            }
            None => {
                score += 5.0;
                factors.push("no technical confirmation".to_string());
            }
        }
        if let Some(last) = market.history.last() {
            let avg = market.history.iter().map(|b| b.volume as f64).sum::<f64>()
                / market.history.len() as f64;
            if (last.volume as f64) < avg * 0.5 {
                score += 5.0;
                factors.push("thin recent volume".to_string());
            }
        }
        if view.sentiment().is_some_and(|s| s.sentiment == Sentiment::Negative) {
            score += 5.0;
            factors.push("negative sentiment".to_string());
        }
        factors.extend(signals.risk_factors.iter().cloned());

        let score = clamp(score, 0.0, 100.0);
        let approval = self.approval(score);
        let position_size = match approval {
            Approval::Rejected => 0.0,
            _ => self.config.max_position_size * (1.0 - score / 100.0),
        };

        let report = RiskReport {
            risk_score: score,
            risk_level: level_for(score),
            approval,
            recommended_position_size: round2(position_size * 100.0) / 100.0,
            max_acceptable_loss: self.config.stop_loss_pct,
            stop_loss: signals.stop_loss,
            risk_factors: factors,
            reason: format!(
                "Risk score {:.0} against a limit of {:.0}",
                score, self.config.max_risk_score
            ),
        };
        let note = format!(
            "Risk assessment: {:?} ({:?}, score {:.0})",
            report.approval, report.risk_level, report.risk_score
        );
        Ok(WorkerOutput::new(Payload::RiskAssessment(report)).with_note(note))
    }
}
