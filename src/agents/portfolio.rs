//! Portfolio manager - final decision and share count

use async_trait::async_trait;

use crate::core::config::TradingConfig;
use crate::pipeline::payload::{Action, Approval, PortfolioDecision};
use crate::pipeline::{OutputName, Payload, StateView, Worker, WorkerFailure, WorkerOutput};

use super::{clamp, round2};

pub struct PortfolioManager {
    capital: f64,
    base_quantity: u64,
}

impl PortfolioManager {
    pub fn new(config: &TradingConfig) -> Self {
        Self {
            capital: config.capital,
            base_quantity: config.quantity,
        }
    }
}

/// Soften or veto the signal according to the risk verdict
fn gate(action: Action, approval: Approval) -> Action {
    match (approval, action) {
        (Approval::Rejected, _) => Action::Hold,
        (Approval::Conditional, Action::Buy) => Action::Accumulate,
        (Approval::Conditional, Action::Sell) => Action::Reduce,
        (_, action) => action,
    }
}

#[async_trait]
impl Worker for PortfolioManager {
    fn name(&self) -> &str {
        "portfolio_manager"
    }

    fn output(&self) -> OutputName {
        OutputName::PortfolioDecision
    }

    async fn run(&self, view: &StateView) -> Result<WorkerOutput, WorkerFailure> {
        let market = view
            .market_data()
            .ok_or_else(|| WorkerFailure::missing_input(OutputName::MarketData))?;
        let signals = view
            .trading_signals()
            .ok_or_else(|| WorkerFailure::missing_input(OutputName::TradingSignals))?;
        let risk = view
            .risk_assessment()
            .ok_or_else(|| WorkerFailure::missing_input(OutputName::RiskAssessment))?;

        let action = gate(signals.action, risk.approval);
        let position_size = match action {
            Action::Buy | Action::Sell => risk.recommended_position_size,
            Action::Accumulate | Action::Reduce => risk.recommended_position_size / 2.0,
            Action::Hold => 0.0,
        };

        let entry = market.last_price;
        let quantity = if position_size > 0.0 {
            ((self.capital * position_size / entry).floor() as u64).max(self.base_quantity)
        } else {
            0
        };

        let reward = (signals.take_profit - entry).abs();
        let exposure = (entry - risk.stop_loss).abs();
        let risk_reward_ratio = if exposure > 0.0 { reward / exposure } else { 0.0 };

        let mut confidence = signals.confidence;
        if risk.approval == Approval::Conditional {
            confidence -= 10.0;
        }
        // Researchers pulling in opposite directions lowers conviction
        if let (Some(bull), Some(bear)) = (view.bull_research(), view.bear_research()) {
            if (bull.confidence - bear.confidence).abs() < 10.0 {
                confidence -= 5.0;
            }
        }

        let decision = PortfolioDecision {
            action,
            quantity,
            position_size,
            entry_price: entry,
            stop_loss: risk.stop_loss,
            take_profit: signals.take_profit,
            risk_reward_ratio: round2(risk_reward_ratio),
            confidence: clamp(confidence, 0.0, 100.0),
            rationale: format!(
                "Signal {} with risk {:?} ({:.0}); {} bullish / {} bearish research points",
                signals.action,
                risk.approval,
                risk.risk_score,
                view.bull_research().map_or(0, |r| r.key_points.len()),
                view.bear_research().map_or(0, |r| r.key_points.len()),
            ),
        };
        let note = format!(
            "Portfolio decision: {} {} shares of {}",
            decision.action,
            decision.quantity,
            view.symbol()
        );
        Ok(WorkerOutput::new(Payload::PortfolioDecision(decision)).with_note(note))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Symbol;
    use crate::pipeline::payload::*;

    fn inputs(action: Action, approval: Approval) -> Vec<Payload> {
        vec![
            Payload::MarketData(MarketSnapshot {
                symbol: Symbol::new("TCS"),
                last_price: 3000.0,
                open: 3000.0,
                high: 3010.0,
                low: 2990.0,
                close: 3000.0,
                volume: 1_000_000,
                history: vec![],
                trend: Trend::Bullish,
                volatility: Level::Low,
                as_of: chrono::Utc::now(),
            }),
            Payload::TradingSignals(SignalSet {
                action,
                confidence: 70.0,
                strength: Strength::Strong,
                entry_price: 3000.0,
                stop_loss: 2850.0,
                take_profit: 3300.0,
                reasoning: String::new(),
                supporting_factors: vec![],
                risk_factors: vec![],
            }),
            Payload::RiskAssessment(RiskReport {
                risk_score: 30.0,
                risk_level: RiskLevel::Medium,
                approval,
                recommended_position_size: 0.015,
                max_acceptable_loss: 0.05,
                stop_loss: 2850.0,
                risk_factors: vec![],
                reason: String::new(),
            }),
        ]
    }

    async fn decide(action: Action, approval: Approval) -> PortfolioDecision {
        let manager = PortfolioManager::new(&TradingConfig::default());
        let output = manager
            .run(&StateView::new(Symbol::new("TCS"), inputs(action, approval)))
            .await
            .unwrap();
        match output.payload {
            Payload::PortfolioDecision(decision) => decision,
            other => panic!("wrong payload variant: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_approved_buy_is_sized_from_capital() {
        let decision = decide(Action::Buy, Approval::Approved).await;
        assert_eq!(decision.action, Action::Buy);
        // 1,000,000 x 1.5% / 3000
        assert_eq!(decision.quantity, 5);
        assert_eq!(decision.risk_reward_ratio, 2.0);
    }

    #[tokio::test]
    async fn test_risk_verdict_gates_action() {
        let decision = decide(Action::Buy, Approval::Rejected).await;
        assert_eq!(decision.action, Action::Hold);
        assert_eq!(decision.quantity, 0);

        let decision = decide(Action::Sell, Approval::Conditional).await;
        assert_eq!(decision.action, Action::Reduce);
        assert_eq!(decision.confidence, 60.0);
    }

    #[tokio::test]
    async fn test_requires_risk_assessment() {
        let mut payloads = inputs(Action::Buy, Approval::Approved);
        payloads.pop();
        let failure = PortfolioManager::new(&TradingConfig::default())
            .run(&StateView::new(Symbol::new("TCS"), payloads))
            .await
            .unwrap_err();
        assert!(failure.message.contains("risk_assessment"));
    }
}
