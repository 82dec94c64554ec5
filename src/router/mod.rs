//! Router module for model selection.
//!
//! This module decides which upstream model serves a request based on:
//! - Model capabilities (image support) from the registry
//! - Recent call outcomes and failure cooldown

pub mod health;
mod selector;

pub use health::{HealthStats, HealthTracker};
pub use selector::ModelSelector;
