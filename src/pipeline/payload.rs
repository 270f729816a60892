//! Output slots and their typed payloads
//!
//! Every slot of the state record has exactly one payload variant. Payloads are
//! checked at the stage boundary; a payload that does not match its declared
//! slot or carries malformed fields is a validation failure, never merged.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::core::{Candle, Side, Symbol};

/// Name of an output slot in the state record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputName {
    MarketData,
    TechnicalIndicators,
    FundamentalsAnalysis,
    SentimentAnalysis,
    NewsAnalysis,
    BullResearch,
    BearResearch,
    TradingSignals,
    RiskAssessment,
    PortfolioDecision,
    ExecutionResult,
}

impl OutputName {
    pub const ALL: [OutputName; 11] = [
        OutputName::MarketData,
        OutputName::TechnicalIndicators,
        OutputName::FundamentalsAnalysis,
        OutputName::SentimentAnalysis,
        OutputName::NewsAnalysis,
        OutputName::BullResearch,
        OutputName::BearResearch,
        OutputName::TradingSignals,
        OutputName::RiskAssessment,
        OutputName::PortfolioDecision,
        OutputName::ExecutionResult,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            OutputName::MarketData => "market_data",
            OutputName::TechnicalIndicators => "technical_indicators",
            OutputName::FundamentalsAnalysis => "fundamentals_analysis",
            OutputName::SentimentAnalysis => "sentiment_analysis",
            OutputName::NewsAnalysis => "news_analysis",
            OutputName::BullResearch => "bull_research",
            OutputName::BearResearch => "bear_research",
            OutputName::TradingSignals => "trading_signals",
            OutputName::RiskAssessment => "risk_assessment",
            OutputName::PortfolioDecision => "portfolio_decision",
            OutputName::ExecutionResult => "execution_result",
        }
    }
}

impl std::fmt::Display for OutputName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Trade action recommended by an analysis step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Action {
    Buy,
    Accumulate,
    Hold,
    Reduce,
    Sell,
}

impl Action {
    /// Order side this action trades on, if any
    pub fn side(&self) -> Option<Side> {
        match self {
            Action::Buy | Action::Accumulate => Some(Side::Buy),
            Action::Sell | Action::Reduce => Some(Side::Sell),
            Action::Hold => None,
        }
    }
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Action::Buy => "BUY",
            Action::Accumulate => "ACCUMULATE",
            Action::Hold => "HOLD",
            Action::Reduce => "REDUCE",
            Action::Sell => "SELL",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Trend {
    Bullish,
    Bearish,
    Sideways,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sentiment {
    Positive,
    Neutral,
    Negative,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Valuation {
    Undervalued,
    Fair,
    Overvalued,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stance {
    Bull,
    Bear,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Strength {
    Strong,
    Moderate,
    Weak,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Extreme,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Approval {
    Approved,
    Conditional,
    Rejected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Filled,
    Simulated,
    Rejected,
    NotExecuted,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketSnapshot {
    pub symbol: Symbol,
    pub last_price: f64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: u64,
    pub history: Vec<Candle>,
    pub trend: Trend,
    pub volatility: Level,
    pub as_of: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndicatorSet {
    pub last_close: f64,
    pub rsi: Option<f64>,
    pub sma_20: Option<f64>,
    pub sma_50: Option<f64>,
    pub ema_12: Option<f64>,
    pub ema_26: Option<f64>,
    pub macd: Option<f64>,
    pub volume_sma: Option<f64>,
    pub trend: Trend,
    /// 0 (strongly bearish) to 100 (strongly bullish)
    pub score: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FundamentalsReport {
    pub financial_health: Level,
    pub valuation: Valuation,
    pub price_target: f64,
    pub recommendation: Action,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SentimentReport {
    pub sentiment: Sentiment,
    /// 0.0 (bearish) to 1.0 (bullish)
    pub score: f64,
    pub social_buzz: Level,
    pub drivers: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewsReport {
    pub sentiment: Sentiment,
    pub market_moving_potential: Level,
    pub headlines: Vec<String>,
    pub recommendation: Action,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResearchThesis {
    pub stance: Stance,
    pub thesis: String,
    pub key_points: Vec<String>,
    /// Expected move in percent, unsigned
    pub potential_pct: f64,
    /// 0-100
    pub confidence: f64,
    pub recommended_action: Action,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalSet {
    pub action: Action,
    /// 0-100
    pub confidence: f64,
    pub strength: Strength,
    pub entry_price: f64,
    pub stop_loss: f64,
    pub take_profit: f64,
    pub reasoning: String,
    pub supporting_factors: Vec<String>,
    pub risk_factors: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskReport {
    /// 0-100
    pub risk_score: f64,
    pub risk_level: RiskLevel,
    pub approval: Approval,
    /// Fraction of capital
    pub recommended_position_size: f64,
    /// Fraction of position
    pub max_acceptable_loss: f64,
    pub stop_loss: f64,
    pub risk_factors: Vec<String>,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortfolioDecision {
    pub action: Action,
    pub quantity: u64,
    /// Fraction of capital
    pub position_size: f64,
    pub entry_price: f64,
    pub stop_loss: f64,
    pub take_profit: f64,
    pub risk_reward_ratio: f64,
    /// 0-100
    pub confidence: f64,
    pub rationale: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionReport {
    pub executed: bool,
    pub status: ExecutionStatus,
    pub order_id: Option<Uuid>,
    pub price: f64,
    pub quantity: u64,
    pub simulated: bool,
    pub detail: String,
}

/// Typed payload of one output slot
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Payload {
    MarketData(MarketSnapshot),
    TechnicalIndicators(IndicatorSet),
    FundamentalsAnalysis(FundamentalsReport),
    SentimentAnalysis(SentimentReport),
    NewsAnalysis(NewsReport),
    BullResearch(ResearchThesis),
    BearResearch(ResearchThesis),
    TradingSignals(SignalSet),
    RiskAssessment(RiskReport),
    PortfolioDecision(PortfolioDecision),
    ExecutionResult(ExecutionReport),
}

impl Payload {
    /// Slot this payload variant belongs to
    pub fn output_name(&self) -> OutputName {
        match self {
            Payload::MarketData(_) => OutputName::MarketData,
            Payload::TechnicalIndicators(_) => OutputName::TechnicalIndicators,
            Payload::FundamentalsAnalysis(_) => OutputName::FundamentalsAnalysis,
            Payload::SentimentAnalysis(_) => OutputName::SentimentAnalysis,
            Payload::NewsAnalysis(_) => OutputName::NewsAnalysis,
            Payload::BullResearch(_) => OutputName::BullResearch,
            Payload::BearResearch(_) => OutputName::BearResearch,
            Payload::TradingSignals(_) => OutputName::TradingSignals,
            Payload::RiskAssessment(_) => OutputName::RiskAssessment,
            Payload::PortfolioDecision(_) => OutputName::PortfolioDecision,
            Payload::ExecutionResult(_) => OutputName::ExecutionResult,
        }
    }

    /// Shape check for a payload destined for `slot`.
    pub fn validate_for(&self, slot: OutputName) -> Result<(), String> {
        if self.output_name() != slot {
            return Err(format!(
                "payload for '{}' delivered to slot '{}'",
                self.output_name(),
                slot
            ));
        }

        match self {
            Payload::MarketData(m) => {
                positive("last_price", m.last_price)?;
                positive("high", m.high)?;
                positive("low", m.low)?;
                if m.low > m.high {
                    return Err(format!("low {} above high {}", m.low, m.high));
                }
                if m.symbol.is_empty() {
                    return Err("empty symbol".into());
                }
                Ok(())
            }
            Payload::TechnicalIndicators(t) => {
                positive("last_close", t.last_close)?;
                if let Some(rsi) = t.rsi {
                    within("rsi", rsi, 0.0, 100.0)?;
                }
                for (name, value) in [
                    ("sma_20", t.sma_20),
                    ("sma_50", t.sma_50),
                    ("ema_12", t.ema_12),
                    ("ema_26", t.ema_26),
                    ("volume_sma", t.volume_sma),
                ] {
                    if let Some(v) = value {
                        positive(name, v)?;
                    }
                }
                if let Some(macd) = t.macd {
                    finite("macd", macd)?;
                }
                within("score", t.score, 0.0, 100.0)
            }
            Payload::FundamentalsAnalysis(f) => positive("price_target", f.price_target),
            Payload::SentimentAnalysis(s) => within("score", s.score, 0.0, 1.0),
            Payload::NewsAnalysis(_) => Ok(()),
            Payload::BullResearch(r) => research(r, Stance::Bull),
            Payload::BearResearch(r) => research(r, Stance::Bear),
            Payload::TradingSignals(s) => {
                within("confidence", s.confidence, 0.0, 100.0)?;
                positive("entry_price", s.entry_price)?;
                positive("stop_loss", s.stop_loss)?;
                positive("take_profit", s.take_profit)
            }
            Payload::RiskAssessment(r) => {
                within("risk_score", r.risk_score, 0.0, 100.0)?;
                within("recommended_position_size", r.recommended_position_size, 0.0, 1.0)?;
                within("max_acceptable_loss", r.max_acceptable_loss, 0.0, 1.0)?;
                finite("stop_loss", r.stop_loss)
            }
            Payload::PortfolioDecision(d) => {
                within("confidence", d.confidence, 0.0, 100.0)?;
                within("position_size", d.position_size, 0.0, 1.0)?;
                positive("entry_price", d.entry_price)?;
                finite("stop_loss", d.stop_loss)?;
                finite("take_profit", d.take_profit)?;
                finite("risk_reward_ratio", d.risk_reward_ratio)
            }
            Payload::ExecutionResult(e) => {
                if e.executed && e.order_id.is_none() {
                    return Err("executed without an order id".into());
                }
                finite("price", e.price)
            }
        }
    }
}

fn finite(field: &str, value: f64) -> Result<(), String> {
    if value.is_finite() {
        Ok(())
    } else {
        Err(format!("{} is not finite", field))
    }
}

fn positive(field: &str, value: f64) -> Result<(), String> {
    finite(field, value)?;
    if value > 0.0 {
        Ok(())
    } else {
        Err(format!("{} must be positive, got {}", field, value))
    }
}

fn within(field: &str, value: f64, lo: f64, hi: f64) -> Result<(), String> {
    finite(field, value)?;
    if (lo..=hi).contains(&value) {
        Ok(())
    } else {
        Err(format!("{} {} outside [{}, {}]", field, value, lo, hi))
    }
}

fn research(thesis: &ResearchThesis, expected: Stance) -> Result<(), String> {
    if thesis.stance != expected {
        return Err(format!("stance {:?} in {:?} research slot", thesis.stance, expected));
    }
    within("confidence", thesis.confidence, 0.0, 100.0)?;
    finite("potential_pct", thesis.potential_pct)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn thesis(stance: Stance) -> ResearchThesis {
        ResearchThesis {
            stance,
            thesis: "t".into(),
            key_points: vec![],
            potential_pct: 4.0,
            confidence: 60.0,
            recommended_action: Action::Hold,
        }
    }

    #[test]
    fn test_slot_mismatch_rejected() {
        let payload = Payload::BullResearch(thesis(Stance::Bull));
        assert!(payload.validate_for(OutputName::BullResearch).is_ok());
        assert!(payload.validate_for(OutputName::BearResearch).is_err());
    }

    #[test]
    fn test_stance_must_match_slot() {
        let payload = Payload::BearResearch(thesis(Stance::Bull));
        let err = payload.validate_for(OutputName::BearResearch).unwrap_err();
        assert!(err.contains("stance"));
    }

    #[test]
    fn test_out_of_range_confidence() {
        let mut t = thesis(Stance::Bull);
        t.confidence = 140.0;
        assert!(Payload::BullResearch(t).validate_for(OutputName::BullResearch).is_err());
    }

    #[test]
    fn test_output_names_are_snake_case() {
        for name in OutputName::ALL {
            let json = serde_json::to_value(name).unwrap();
            assert_eq!(json.as_str(), Some(name.as_str()));
        }
    }

    #[test]
    fn test_action_sides() {
        assert_eq!(Action::Accumulate.side(), Some(Side::Buy));
        assert_eq!(Action::Reduce.side(), Some(Side::Sell));
        assert_eq!(Action::Hold.side(), None);
    }
}
