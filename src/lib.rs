//! degpt-gateway - OpenAI- and Claude-compatible gateway for DeGPT
//!
//! This library provides the core functionality for the gateway, including
//! configuration, model discovery, health-based model selection, session
//! memory and the streaming relay.

pub mod clock;
pub mod config;
pub mod error;
pub mod proxy;
pub mod registry;
pub mod router;
pub mod session;

pub use config::Config;
pub use error::{Error, Result};
