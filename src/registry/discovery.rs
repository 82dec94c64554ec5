//! Authoritative model list from the vendor configuration endpoint.

use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;

use crate::error::{Error, Result};

/// Metadata reported by the configuration endpoint.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteConfig {
    pub default_models: Vec<String>,
    pub version: Option<String>,
    pub provider: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawConfig {
    #[serde(default)]
    default_models: Value,
    #[serde(default)]
    version: Option<Value>,
    #[serde(default)]
    provider: Option<String>,
    #[serde(default)]
    name: Option<String>,
}

/// Fetch and decode the configuration document.
pub async fn fetch_config(client: &reqwest::Client, url: &str) -> Result<RemoteConfig> {
    let response = client
        .get(url)
        .timeout(Duration::from_secs(10))
        .send()
        .await
        .map_err(|e| Error::Discovery(format!("config fetch failed: {}", e)))?;

    let status = response.status();
    if !status.is_success() {
        return Err(Error::Discovery(format!(
            "config endpoint returned {}",
            status
        )));
    }

    let body = response
        .text()
        .await
        .map_err(|e| Error::Discovery(format!("config body unreadable: {}", e)))?;

    parse_config(&body)
}

/// Decode a configuration document.
///
/// `default_models` is a comma-separated string on the live service; a JSON
/// array of strings is accepted as well. Blank entries are dropped.
pub fn parse_config(body: &str) -> Result<RemoteConfig> {
    let raw: RawConfig = serde_json::from_str(body)
        .map_err(|e| Error::Discovery(format!("config is not valid JSON: {}", e)))?;

    let default_models = match &raw.default_models {
        Value::String(list) => list
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect(),
        Value::Array(items) => items
            .iter()
            .filter_map(Value::as_str)
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect(),
        _ => Vec::new(),
    };

    let version = raw.version.map(|v| match v {
        Value::String(s) => s,
        other => other.to_string(),
    });

    Ok(RemoteConfig {
        default_models,
        version,
        provider: raw.provider.or(raw.name),
    })
}
