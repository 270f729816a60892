//! Execution layer - paper broker and the pipeline's execution handoff

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::core::{Broker, Order, OrderStatus, Price, Quantity, Result, Side};
use crate::pipeline::payload::{Action, Approval, ExecutionReport, ExecutionStatus};
use crate::pipeline::{ExecutionHandoff, StateView};

/// Paper broker - fills market orders at their reference price
pub struct PaperBroker {
    orders: Arc<RwLock<HashMap<Uuid, Order>>>,
    slippage_bps: i64,
}

impl PaperBroker {
    pub fn new() -> Self {
        Self {
            orders: Arc::new(RwLock::new(HashMap::new())),
            slippage_bps: 0,
        }
    }

    /// Fill buys above and sells below the reference price by `bps`.
    pub fn with_slippage_bps(mut self, bps: i64) -> Self {
        self.slippage_bps = bps;
        self
    }

    /// Get order by ID
    pub fn get_order(&self, order_id: &Uuid) -> Option<Order> {
        self.orders.read().get(order_id).cloned()
    }

    /// Get all orders
    pub fn orders(&self) -> Vec<Order> {
        self.orders.read().values().cloned().collect()
    }

    fn fill_price(&self, order: &Order) -> Option<Price> {
        let reference = order.price?.as_decimal();
        let slip = Decimal::new(self.slippage_bps, 4);
        let adjusted = match order.side {
            Side::Buy => reference * (Decimal::ONE + slip),
            Side::Sell => reference * (Decimal::ONE - slip),
        };
        Some(Price::new(adjusted.round_dp(2)))
    }
}

impl Default for PaperBroker {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Broker for PaperBroker {
    async fn place_order(&self, order: &Order) -> Result<Order> {
        info!(
            "Placing paper order: {} {} {} @ {:?}",
            order.side, order.quantity, order.symbol, order.price
        );

        let mut placed = order.clone();
        placed.updated_at = Utc::now();
        match self.fill_price(order) {
            Some(price) if !order.quantity.is_zero() => {
                placed.status = OrderStatus::Filled;
                placed.filled_quantity = order.quantity;
                placed.filled_price = Some(price);
            }
            _ => {
                warn!("Rejecting paper order {}: no reference price or zero quantity", order.id);
                placed.status = OrderStatus::Rejected;
            }
        }

        // Track order
        self.orders.write().insert(placed.id, placed.clone());

        Ok(placed)
    }

    fn name(&self) -> &str {
        "paper"
    }

    fn is_simulated(&self) -> bool {
        true
    }
}

/// Hands an approved portfolio decision to a [`Broker`].
pub struct BrokerHandoff {
    broker: Arc<dyn Broker>,
    exchange: String,
}

impl BrokerHandoff {
    pub fn new(broker: Arc<dyn Broker>, exchange: impl Into<String>) -> Self {
        Self {
            broker,
            exchange: exchange.into(),
        }
    }
}

fn not_executed(detail: impl Into<String>) -> ExecutionReport {
    ExecutionReport {
        executed: false,
        status: ExecutionStatus::NotExecuted,
        order_id: None,
        price: 0.0,
        quantity: 0,
        simulated: false,
        detail: detail.into(),
    }
}

#[async_trait]
impl ExecutionHandoff for BrokerHandoff {
    fn name(&self) -> &str {
        "broker"
    }

    async fn execute(&self, record: &StateView) -> Result<ExecutionReport> {
        let Some(decision) = record.portfolio_decision() else {
            return Ok(not_executed("no portfolio decision"));
        };
        let side = match decision.action {
            Action::Buy | Action::Sell => decision.action.side(),
            _ => None,
        };
        let Some(side) = side else {
            return Ok(not_executed(format!("{} is not an executable action", decision.action)));
        };
        let approved = record
            .risk_assessment()
            .is_some_and(|risk| risk.approval == Approval::Approved);
        if !approved {
            return Ok(not_executed("trade not approved by risk assessment"));
        }
        if decision.quantity == 0 {
            return Ok(not_executed("zero quantity"));
        }

        let order = Order::new_market(
            record.symbol().clone(),
            self.exchange.clone(),
            side,
            Quantity::new(decision.quantity),
            Price::from_f64(decision.entry_price),
        );
        let placed = self.broker.place_order(&order).await?;
        let price = placed
            .filled_price
            .or(placed.price)
            .map_or(0.0, |p| p.as_f64());

        let (executed, status) = match placed.status {
            OrderStatus::Rejected => (false, ExecutionStatus::Rejected),
            _ if self.broker.is_simulated() => (true, ExecutionStatus::Simulated),
            _ => (true, ExecutionStatus::Filled),
        };
        info!(
            "Execution via {}: {:?} {} {} @ {:.2}",
            self.broker.name(),
            status,
            side,
            decision.quantity,
            price
        );

        Ok(ExecutionReport {
            executed,
            status,
            order_id: Some(placed.id),
            price,
            quantity: decision.quantity,
            simulated: self.broker.is_simulated(),
            detail: format!(
                "{} {} {} order {:?} on {}",
                self.broker.name(),
                placed.order_type,
                placed.side,
                placed.status,
                self.exchange
            ),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Symbol;
    use crate::pipeline::Payload;
    use crate::pipeline::payload::{PortfolioDecision, RiskLevel, RiskReport};

    fn decision(action: Action, quantity: u64) -> Payload {
        Payload::PortfolioDecision(PortfolioDecision {
            action,
            quantity,
            position_size: 0.01,
            entry_price: 2450.0,
            stop_loss: 2327.5,
            take_profit: 2695.0,
            risk_reward_ratio: 2.0,
            confidence: 70.0,
            rationale: String::new(),
        })
    }

    fn risk(approval: Approval) -> Payload {
        Payload::RiskAssessment(RiskReport {
            risk_score: 30.0,
            risk_level: RiskLevel::Medium,
            approval,
            recommended_position_size: 0.01,
            max_acceptable_loss: 0.05,
            stop_loss: 2327.5,
            risk_factors: vec![],
            reason: String::new(),
        })
    }

    fn handoff(broker: Arc<PaperBroker>) -> BrokerHandoff {
        BrokerHandoff::new(broker, "NSE")
    }

    #[tokio::test]
    async fn test_paper_fill_with_slippage() {
        let broker = PaperBroker::new().with_slippage_bps(10);
        let order = Order::new_market(
            Symbol::new("INFY"),
            "NSE",
            Side::Buy,
            Quantity::new(3u64),
            Price::from_f64(1500.0),
        );
        let placed = broker.place_order(&order).await.unwrap();
        assert_eq!(placed.status, OrderStatus::Filled);
        assert_eq!(placed.filled_price, Some(Price::from_f64(1501.5)));
        assert!(broker.get_order(&order.id).is_some());
    }

    #[tokio::test]
    async fn test_zero_quantity_rejected() {
        let broker = PaperBroker::new();
        let order = Order::new_market(
            Symbol::new("INFY"),
            "NSE",
            Side::Sell,
            Quantity::new(0u64),
            Price::from_f64(1500.0),
        );
        let placed = broker.place_order(&order).await.unwrap();
        assert_eq!(placed.status, OrderStatus::Rejected);
        assert_eq!(broker.orders().len(), 1);
    }

    #[tokio::test]
    async fn test_approved_buy_is_executed() {
        let broker = Arc::new(PaperBroker::new());
        let view = StateView::new(
            Symbol::new("RELIANCE"),
            [decision(Action::Buy, 4), risk(Approval::Approved)],
        );
        let report = handoff(broker.clone()).execute(&view).await.unwrap();
        assert!(report.executed);
        assert_eq!(report.status, ExecutionStatus::Simulated);
        assert_eq!(report.quantity, 4);
        assert_eq!(report.price, 2450.0);
        assert!(report.simulated);
        assert_eq!(report.detail, "paper MARKET BUY order Filled on NSE");
        let order_id = report.order_id.unwrap();
        assert_eq!(broker.get_order(&order_id).unwrap().side, Side::Buy);
    }

    #[tokio::test]
    async fn test_non_executable_decisions_place_nothing() {
        let broker = Arc::new(PaperBroker::new());
        let cases = [
            vec![],
            vec![decision(Action::Accumulate, 4), risk(Approval::Approved)],
            vec![decision(Action::Hold, 0), risk(Approval::Approved)],
            vec![decision(Action::Sell, 4), risk(Approval::Conditional)],
            vec![decision(Action::Sell, 0), risk(Approval::Approved)],
        ];
        for payloads in cases {
            let view = StateView::new(Symbol::new("RELIANCE"), payloads);
            let report = handoff(broker.clone()).execute(&view).await.unwrap();
            assert!(!report.executed);
            assert_eq!(report.status, ExecutionStatus::NotExecuted);
            assert!(report.order_id.is_none());
        }
        assert!(broker.orders().is_empty());
    }
}
