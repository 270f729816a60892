//! Technical analyst - RSI, moving averages, MACD and volume on hourly bars

use async_trait::async_trait;
use std::sync::Arc;

use crate::core::config::StrategyConfig;
use crate::core::{Interval, MarketFeed};
use crate::pipeline::payload::{IndicatorSet, Trend};
use crate::pipeline::{OutputName, Payload, StateView, Worker, WorkerFailure, WorkerOutput};

use super::clamp;

const HISTORY_DAYS: u32 = 30;

/// Technical analysis parameters
#[derive(Debug, Clone)]
pub struct TechnicalParams {
    /// RSI period
    pub rsi_period: usize,
    /// RSI oversold threshold
    pub rsi_oversold: f64,
    /// RSI overbought threshold
    pub rsi_overbought: f64,
}

impl TechnicalParams {
    pub fn from_config(config: &StrategyConfig) -> Self {
        Self {
            rsi_period: config.rsi_period,
            rsi_oversold: config.rsi_oversold,
            rsi_overbought: config.rsi_overbought,
        }
    }
}

/// Relative strength index over the last `period` changes
pub fn rsi(closes: &[f64], period: usize) -> Option<f64> {
    if period == 0 || closes.len() < period + 1 {
        return None;
    }

    let mut gains = 0.0;
    let mut losses = 0.0;
    let window = &closes[closes.len() - period - 1..];

    for pair in window.windows(2) {
        let change = pair[1] - pair[0];
        if change > 0.0 {
            gains += change;
        } else {
            losses -= change;
        }
    }

    let avg_gain = gains / period as f64;
    let avg_loss = losses / period as f64;

    if avg_loss == 0.0 {
        return Some(100.0);
    }

    let rs = avg_gain / avg_loss;
    Some(100.0 - (100.0 / (1.0 + rs)))
}

/// Simple moving average of the last `period` values
pub fn sma(values: &[f64], period: usize) -> Option<f64> {
    if period == 0 || values.len() < period {
        return None;
    }
    let sum: f64 = values.iter().rev().take(period).sum();
    Some(sum / period as f64)
}

/// Exponential moving average, seeded with the SMA of the first `period` values
pub fn ema(values: &[f64], period: usize) -> Option<f64> {
    let seed = sma(&values[..period.min(values.len())], period)?;
    let k = 2.0 / (period as f64 + 1.0);
    Some(values[period..].iter().fold(seed, |prev, v| v * k + prev * (1.0 - k)))
}

pub struct TechnicalAnalyst {
    feed: Arc<dyn MarketFeed>,
    params: TechnicalParams,
}

impl TechnicalAnalyst {
    pub fn new(feed: Arc<dyn MarketFeed>, config: &StrategyConfig) -> Self {
        Self {
            feed,
            params: TechnicalParams::from_config(config),
        }
    }

    fn analyze(&self, closes: &[f64], volumes: &[f64]) -> Option<IndicatorSet> {
        let last_close = *closes.last()?;
        let rsi = rsi(closes, self.params.rsi_period);
        let sma_20 = sma(closes, 20);
        let sma_50 = sma(closes, 50);
        let ema_12 = ema(closes, 12);
        let ema_26 = ema(closes, 26);
        let macd = ema_12.zip(ema_26).map(|(fast, slow)| fast - slow);

        let trend = match (sma_20, sma_50) {
            (Some(fast), Some(slow)) if fast > slow && last_close > fast => Trend::Bullish,
            (Some(fast), Some(slow)) if fast < slow && last_close < fast => Trend::Bearish,
            _ => Trend::Sideways,
        };

        let mut score = 50.0;
        if let Some(rsi) = rsi {
            if rsi < self.params.rsi_oversold {
                score += 15.0;
            } else if rsi > self.params.rsi_overbought {
                score -= 15.0;
            }
        }
        score += match trend {
            Trend::Bullish => 20.0,
            Trend::Bearish => -20.0,
            Trend::Sideways => 0.0,
        };
        if let Some(macd) = macd {
            score += if macd > 0.0 { 10.0 } else { -10.0 };
        }

        Some(IndicatorSet {
            last_close,
            rsi,
            sma_20,
            sma_50,
            ema_12,
            ema_26,
            macd,
            volume_sma: sma(volumes, 20),
            trend,
            score: clamp(score, 0.0, 100.0),
        })
    }
}

#[async_trait]
impl Worker for TechnicalAnalyst {
    fn name(&self) -> &str {
        "technical_analyst"
    }

    fn output(&self) -> OutputName {
        OutputName::TechnicalIndicators
    }

    async fn run(&self, view: &StateView) -> Result<WorkerOutput, WorkerFailure> {
        let history = self
            .feed
            .fetch_history(view.symbol(), Interval::Hour, HISTORY_DAYS)
            .await?;

        let closes: Vec<f64> = history.iter().map(|c| c.close).collect();
        let volumes: Vec<f64> = history.iter().map(|c| c.volume as f64).collect();

        let indicators = self.analyze(&closes, &volumes).ok_or_else(|| {
            WorkerFailure::permanent(format!("no price history for {}", view.symbol()))
        })?;

        let note = match indicators.rsi {
            Some(rsi) => format!(
                "Technical analysis: RSI({}) {:.1}, {:?} trend, score {:.0}",
                self.params.rsi_period, rsi, indicators.trend, indicators.score
            ),
            None => format!(
                "Technical analysis: {:?} trend, score {:.0}",
                indicators.trend, indicators.score
            ),
        };
        Ok(WorkerOutput::new(Payload::TechnicalIndicators(indicators)).with_note(note))
    }
}
