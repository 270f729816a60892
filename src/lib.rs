//! Trading Agents - Core Library
//! Staged multi-agent analysis pipeline for one trading decision per cycle

// Public modules
pub mod agents;
pub mod core;
pub mod execution;
pub mod feeds;
pub mod pipeline;

// Re-exports
pub use core::{Config, Error, Result};
