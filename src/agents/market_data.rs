//! Market data agent - current quote plus a month of daily bars

use async_trait::async_trait;
use std::sync::Arc;

use crate::core::{Candle, Interval, MarketFeed};
use crate::pipeline::payload::{Level, MarketSnapshot, Trend};
use crate::pipeline::{OutputName, Payload, StateView, Worker, WorkerFailure, WorkerOutput};

const HISTORY_DAYS: u32 = 30;

pub struct MarketDataAgent {
    feed: Arc<dyn MarketFeed>,
}

impl MarketDataAgent {
    pub fn new(feed: Arc<dyn MarketFeed>) -> Self {
        Self { feed }
    }
}

/// Net move across the window: beyond +/-2% is a trend
fn trend_of(history: &[Candle], last_price: f64) -> Trend {
    let Some(first) = history.first() else {
        return Trend::Sideways;
    };
    if first.close <= 0.0 {
        return Trend::Sideways;
    }
    let change = (last_price - first.close) / first.close;
    if change > 0.02 {
        Trend::Bullish
    } else if change < -0.02 {
        Trend::Bearish
    } else {
        Trend::Sideways
    }
}

/// Intraday range relative to price
fn volatility_of(high: f64, low: f64, last_price: f64) -> Level {
    let range = (high - low) / last_price;
    if range > 0.03 {
        Level::High
    } else if range > 0.015 {
        Level::Medium
    } else {
        Level::Low
    }
}

#[async_trait]
impl Worker for MarketDataAgent {
    fn name(&self) -> &str {
        "market_data"
    }

    fn output(&self) -> OutputName {
        OutputName::MarketData
    }

    async fn run(&self, view: &StateView) -> Result<WorkerOutput, WorkerFailure> {
        let symbol = view.symbol();
        let quote = self.feed.fetch_quote(symbol).await?;
        if !(quote.last_price.is_finite() && quote.last_price > 0.0) {
            return Err(WorkerFailure::invalid(format!(
                "{} returned unusable price {} for {}",
                self.feed.name(),
                quote.last_price,
                symbol
            )));
        }

        let history = self
            .feed
            .fetch_history(symbol, Interval::Day, HISTORY_DAYS)
            .await?;

        let snapshot = MarketSnapshot {
            symbol: symbol.clone(),
            trend: trend_of(&history, quote.last_price),
            volatility: volatility_of(quote.high, quote.low, quote.last_price),
            last_price: quote.last_price,
            open: quote.open,
            high: quote.high,
            low: quote.low,
            close: quote.close,
            volume: quote.volume,
            history,
            as_of: quote.timestamp,
        };

        let note = format!(
            "Market data for {}: {:.2} ({:?} trend, {} bars)",
            symbol,
            snapshot.last_price,
            snapshot.trend,
            snapshot.history.len()
        );
        Ok(WorkerOutput::new(Payload::MarketData(snapshot)).with_note(note))
    }
}
