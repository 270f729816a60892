//! Market data feeds
//!
//! Only the simulated feed ships with the crate; live broker feeds plug in
//! behind the same `MarketFeed` trait.

pub mod sample;

pub use sample::{SampleFeed, seeded_rng};
