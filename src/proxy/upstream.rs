//! Upstream completion service: credentials, dispatch and regional failover.

use axum::http::header;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use super::types::{Message, Role, SamplingParams};
use crate::config::UpstreamConfig;
use crate::error::{Error, Result};
use crate::router::HealthTracker;

/// Path of the completion endpoint below each regional base URL.
pub const COMPLETION_PATH: &str = "/v1/chat/completion/proxy";

#[derive(Serialize)]
struct SignIn<'a> {
    id: &'a str,
    channel: &'a str,
}

#[derive(Deserialize)]
struct SignInResponse {
    token: Option<String>,
}

/// Body of an upstream completion call. The upstream is always asked to stream.
#[derive(Serialize)]
struct CompletionPayload<'a> {
    model: &'a str,
    messages: &'a [Message],
    project: &'a str,
    stream: bool,
    #[serde(flatten)]
    params: &'a SamplingParams,
}

/// Client for the vendor's completion proxy.
pub struct UpstreamGateway {
    client: reqwest::Client,
    config: UpstreamConfig,
    active: RwLock<String>,
    health: Arc<HealthTracker>,
}

impl UpstreamGateway {
    /// The first configured endpoint starts out active.
    pub fn new(client: reqwest::Client, config: UpstreamConfig, health: Arc<HealthTracker>) -> Self {
        let active = config
            .endpoints
            .first()
            .map(|e| e.trim_end_matches('/').to_string())
            .unwrap_or_default();
        Self {
            client,
            config,
            active: RwLock::new(active),
            health,
        }
    }

    pub fn active_endpoint(&self) -> String {
        self.active.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn set_active(&self, endpoint: &str) {
        *self.active.write().unwrap_or_else(|e| e.into_inner()) = endpoint.to_string();
    }

    fn request(&self, url: &str) -> reqwest::RequestBuilder {
        let mut builder = self
            .client
            .post(url)
            .header(header::CONTENT_TYPE, "application/json")
            .header(header::REFERER, &self.config.referer);
        if let Some(cookie) = &self.config.cookie {
            builder = builder.header(header::COOKIE, cookie.expose_secret());
        }
        builder
    }

    /// Exchange the client id for a bearer token.
    pub async fn fetch_token(&self) -> Result<String> {
        let response = self
            .request(&self.config.auth_url)
            .json(&SignIn {
                id: self.config.client_id.expose_secret(),
                channel: "",
            })
            .timeout(Duration::from_secs(10))
            .send()
            .await
            .map_err(Error::from_upstream)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::UpstreamStatus {
                status: status.as_u16(),
                body,
            });
        }

        let body = response.text().await.map_err(Error::from_upstream)?;
        serde_json::from_str::<SignInResponse>(&body)
            .ok()
            .and_then(|r| r.token)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| Error::UpstreamPayload("auth response carries no token".to_string()))
    }

    /// Send a completion request to the active endpoint.
    ///
    /// Returns the live streaming response. Any failure is recorded against
    /// `model` before it is returned; success is left to the stream consumer.
    pub async fn dispatch(
        &self,
        model: &str,
        messages: &[Message],
        params: &SamplingParams,
    ) -> Result<reqwest::Response> {
        let result = self.try_dispatch(model, messages, params).await;
        if let Err(e) = &result {
            tracing::error!(model = %model, error = %e, "Upstream dispatch failed");
            self.health.record_outcome(model, false);
        }
        result
    }

    async fn try_dispatch(
        &self,
        model: &str,
        messages: &[Message],
        params: &SamplingParams,
    ) -> Result<reqwest::Response> {
        let token = self.fetch_token().await?;
        let endpoint = self.active_endpoint();
        let url = format!("{}{}", endpoint, COMPLETION_PATH);

        tracing::debug!(model = %model, endpoint = %endpoint, messages = messages.len(), "Dispatching");

        let response = self
            .request(&url)
            .bearer_auth(token)
            .json(&CompletionPayload {
                model,
                messages,
                project: &self.config.project,
                stream: true,
                params,
            })
            .timeout(Duration::from_secs(self.config.request_timeout_secs))
            .send()
            .await
            .map_err(Error::from_upstream)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::UpstreamStatus {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }

    /// Minimal streamed request; healthy means 200 with a non-empty body.
    async fn probe(&self, endpoint: &str, model: &str) -> bool {
        let token = match self.fetch_token().await {
            Ok(t) => t,
            Err(e) => {
                tracing::warn!(error = %e, "Probe could not obtain a token");
                return false;
            }
        };
        let messages = [Message::text(Role::User, "test")];
        let params = SamplingParams {
            max_tokens: Some(50),
            ..Default::default()
        };

        let response = self
            .request(&format!("{}{}", endpoint, COMPLETION_PATH))
            .bearer_auth(token)
            .json(&CompletionPayload {
                model,
                messages: &messages,
                project: &self.config.project,
                stream: true,
                params: &params,
            })
            .timeout(Duration::from_secs(self.config.probe_timeout_secs))
            .send()
            .await;

        match response {
            Ok(r) if r.status() == reqwest::StatusCode::OK => {
                let mut body = r.bytes_stream();
                matches!(body.next().await, Some(Ok(chunk)) if !chunk.is_empty())
            }
            Ok(r) => {
                tracing::debug!(endpoint = %endpoint, status = %r.status(), "Probe rejected");
                false
            }
            Err(e) => {
                tracing::debug!(endpoint = %endpoint, error = %e, "Probe failed");
                false
            }
        }
    }

    /// Verify the active endpoint and fail over if it no longer answers.
    ///
    /// Alternates are tried in configured order; the first healthy one becomes
    /// active. Returns the active endpoint afterwards (unchanged when all fail).
    pub async fn reload_check(&self, probe_model: &str) -> String {
        let active = self.active_endpoint();
        if self.probe(&active, probe_model).await {
            tracing::debug!(endpoint = %active, "Active endpoint healthy");
            return active;
        }

        tracing::warn!(endpoint = %active, "Active endpoint unhealthy, trying alternates");
        for candidate in self
            .config
            .endpoints
            .iter()
            .map(|e| e.trim_end_matches('/'))
            .filter(|e| *e != active)
        {
            if self.probe(candidate, probe_model).await {
                tracing::info!(from = %active, to = %candidate, "Switched upstream endpoint");
                self.set_active(candidate);
                return candidate.to_string();
            }
        }

        tracing::error!(endpoint = %active, "No upstream endpoint answered, keeping current");
        active
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_payload_shape() {
        let messages = [Message::text(Role::User, "hi")];
        let params = SamplingParams {
            temperature: Some(0.5),
            ..Default::default()
        };
        let payload = CompletionPayload {
            model: "m1",
            messages: &messages,
            project: "DecentralGPT",
            stream: true,
            params: &params,
        };
        assert_eq!(
            serde_json::to_value(payload).unwrap(),
            json!({
                "model": "m1",
                "messages": [{"role": "user", "content": "hi"}],
                "project": "DecentralGPT",
                "stream": true,
                "temperature": 0.5
            })
        );
    }
}
