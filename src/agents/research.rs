//! Bull and bear researchers - argue one side from the analyst reports

use async_trait::async_trait;

use crate::pipeline::payload::{
    Action, ResearchThesis, Sentiment, Stance, Trend, Valuation,
};
use crate::pipeline::{OutputName, Payload, StateView, Worker, WorkerFailure, WorkerOutput};

use super::{Votes, clamp, round2};

/// Collect directional evidence from whatever analyst slots are present.
pub(crate) fn gather_evidence(view: &StateView) -> Votes {
    let mut votes = Votes::default();

    if let Some(market) = view.market_data() {
        match market.trend {
            Trend::Bullish => votes.bull("price trending higher over the month"),
            Trend::Bearish => votes.bear("price trending lower over the month"),
            Trend::Sideways => {}
        }
    }
    if let Some(tech) = view.technical_indicators() {
        if tech.score >= 60.0 {
            votes.bull(format!("technical score {:.0} favours buyers", tech.score));
        } else if tech.score <= 40.0 {
            votes.bear(format!("technical score {:.0} favours sellers", tech.score));
        }
    }
    if let Some(fund) = view.fundamentals() {
        match fund.valuation {
            Valuation::Undervalued => votes.bull(format!("undervalued, target {:.2}", fund.price_target)),
            Valuation::Overvalued => votes.bear(format!("overvalued, target {:.2}", fund.price_target)),
            Valuation::Fair => {}
        }
    }
    if let Some(sent) = view.sentiment() {
        match sent.sentiment {
            Sentiment::Positive => votes.bull(format!("positive sentiment ({:.2})", sent.score)),
            Sentiment::Negative => votes.bear(format!("negative sentiment ({:.2})", sent.score)),
            Sentiment::Neutral => {}
        }
    }
    if let Some(news) = view.news() {
        match news.sentiment {
            Sentiment::Positive => votes.bull("supportive news flow"),
            Sentiment::Negative => votes.bear("adverse news flow"),
            Sentiment::Neutral => {}
        }
    }

    votes
}

pub struct Researcher {
    stance: Stance,
}

impl Researcher {
    pub fn bull() -> Self {
        Self { stance: Stance::Bull }
    }

    pub fn bear() -> Self {
        Self { stance: Stance::Bear }
    }

    fn thesis(&self, view: &StateView) -> ResearchThesis {
        let votes = gather_evidence(view);
        let (ours, theirs) = match self.stance {
            Stance::Bull => (&votes.bullish, &votes.bearish),
            Stance::Bear => (&votes.bearish, &votes.bullish),
        };

        // Distance to the fundamentals target, when there is one
        let target_move = view
            .fundamentals()
            .zip(view.market_data())
            .map(|(f, m)| (f.price_target - m.last_price) / m.last_price * 100.0);
        let potential_pct = match (self.stance, target_move) {
            (Stance::Bull, Some(pct)) if pct > 0.0 => pct,
            (Stance::Bear, Some(pct)) if pct < 0.0 => -pct,
            _ => 2.0 + ours.len() as f64 * 1.5,
        };

        let edge = match self.stance {
            Stance::Bull => votes.net(),
            Stance::Bear => -votes.net(),
        };
        let confidence = clamp(50.0 + edge as f64 * 10.0, 10.0, 90.0);
        let recommended_action = match (self.stance, edge) {
            (_, e) if e <= 0 => Action::Hold,
            (Stance::Bull, e) if e >= 2 => Action::Buy,
            (Stance::Bull, _) => Action::Accumulate,
            (Stance::Bear, e) if e >= 2 => Action::Sell,
            (Stance::Bear, _) => Action::Reduce,
        };

        let side = match self.stance {
            Stance::Bull => "Bull",
            Stance::Bear => "Bear",
        };
        let thesis = if ours.is_empty() {
            format!("{} case for {} lacks supporting evidence", side, view.symbol())
        } else {
            format!(
                "{} case for {}: {} supporting vs {} opposing factors",
                side,
                view.symbol(),
                ours.len(),
                theirs.len()
            )
        };

        ResearchThesis {
            stance: self.stance,
            thesis,
            key_points: ours.clone(),
            potential_pct: round2(potential_pct),
            confidence,
            recommended_action,
        }
    }
}

#[async_trait]
impl Worker for Researcher {
    fn name(&self) -> &str {
        match self.stance {
            Stance::Bull => "bull_researcher",
            Stance::Bear => "bear_researcher",
        }
    }

    fn output(&self) -> OutputName {
        match self.stance {
            Stance::Bull => OutputName::BullResearch,
            Stance::Bear => OutputName::BearResearch,
        }
    }

    async fn run(&self, view: &StateView) -> Result<WorkerOutput, WorkerFailure> {
        let thesis = self.thesis(view);
        let note = format!(
            "{}: {} ({:.0}% confidence)",
            self.name(),
            thesis.recommended_action,
            thesis.confidence
        );
        let payload = match self.stance {
            Stance::Bull => Payload::BullResearch(thesis),
            Stance::Bear => Payload::BearResearch(thesis),
        };
        Ok(WorkerOutput::new(payload).with_note(note))
    }
}
