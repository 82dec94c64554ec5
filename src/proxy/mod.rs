//! HTTP gateway module.
//!
//! This module provides the OpenAI- and Claude-compatible HTTP API, the
//! protocol adapters between them, and the relay to the upstream service.

pub mod anthropic;
pub mod content;
mod handlers;
mod server;
pub mod stream;
pub mod tokens;
pub mod types;
pub mod upstream;

pub use server::{create_router, run_server, spawn_background_tasks, AppState};
pub use stream::{Protocol, RelayOutcome, StreamResult};
pub use types::{CanonicalRequest, ChatCompletionRequest, ChatCompletionResponse, Message};
pub use upstream::UpstreamGateway;
