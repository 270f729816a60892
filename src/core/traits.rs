//! Core traits - Seams for external collaborators

use async_trait::async_trait;
use crate::core::{Result, types::*};

/// Market data feed trait - implemented by data providers
#[async_trait]
pub trait MarketFeed: Send + Sync {
    /// Fetch the current quote
    async fn fetch_quote(&self, symbol: &Symbol) -> Result<Quote>;

    /// Fetch historical bars, oldest first
    async fn fetch_history(&self, symbol: &Symbol, interval: Interval, days: u32) -> Result<Vec<Candle>>;

    /// Feed name
    fn name(&self) -> &str;
}

/// Broker trait - order placement, real or simulated
#[async_trait]
pub trait Broker: Send + Sync {
    /// Place an order, returning it with its updated status
    async fn place_order(&self, order: &Order) -> Result<Order>;

    /// Broker name
    fn name(&self) -> &str;

    /// Whether fills are simulated
    fn is_simulated(&self) -> bool;
}
