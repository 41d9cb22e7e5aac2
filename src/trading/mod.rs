//! Trading: guards, sizing, the engine, adaptive learning, reconciliation.

pub mod engine;
pub mod guards;
pub mod learning;
pub mod reconcile;
pub mod sizing;

pub use engine::{EntryMarketState, TickContext, TradingEngine};
