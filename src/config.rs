//! Configuration parsing, environment overrides and validation.

use chrono::Duration;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::path::Path;

/// Default OpenAI-style chat completion path.
pub const DEFAULT_CHAT_PATH: &str = "/api/v1/chat/completions";

/// Routes served regardless of configuration; chat paths may not reuse them.
pub const RESERVED_PATHS: &[&str] = &[
    "/health",
    "/v1/models",
    "/api/v1/models",
    "/v1/messages",
    "/api/v1/messages",
    "/v1/session/clear",
    "/api/v1/session/clear",
];

/// Root configuration structure.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub upstream: UpstreamConfig,
    pub registry: RegistryConfig,
    pub health: HealthConfig,
    pub session: SessionConfig,
    pub logging: LoggingConfig,
}

/// HTTP server configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address to listen on (e.g., "0.0.0.0:7860")
    pub listen: String,
    /// Paths that accept OpenAI-style chat completion requests
    pub chat_paths: Vec<String>,
    /// Shared token inbound requests must present
    pub auth_token: Option<ApiKey>,
    /// Interval of the short maintenance tick (session sweep)
    pub maintenance_interval_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: "0.0.0.0:7860".to_string(),
            chat_paths: vec![
                DEFAULT_CHAT_PATH.to_string(),
                "/v1/chat/completions".to_string(),
            ],
            auth_token: None,
            maintenance_interval_secs: 30,
        }
    }
}

/// Upstream completion service configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct UpstreamConfig {
    /// Regional base URLs; the first is the initially active endpoint
    pub endpoints: Vec<String>,
    /// Endpoint that exchanges the client id for a bearer token
    pub auth_url: String,
    /// Client identifier sent to the auth endpoint
    pub client_id: ApiKey,
    /// Optional cookie forwarded on every upstream call
    pub cookie: Option<ApiKey>,
    /// Project tag the upstream expects in every payload
    pub project: String,
    /// Model used when no tracked model qualifies for selection
    pub default_model: String,
    /// User agent presented to the upstream and the crawled site
    pub user_agent: String,
    /// Referer the upstream expects from its own web front-end
    pub referer: String,
    pub request_timeout_secs: u64,
    pub probe_timeout_secs: u64,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            endpoints: vec![
                "https://usa-chat.degpt.ai/api".to_string(),
                "https://singapore-chat.degpt.ai/api".to_string(),
                "https://korea-chat.degpt.ai/api".to_string(),
            ],
            auth_url: "https://www.degpt.ai/api/v1/auths/printSignIn".to_string(),
            client_id: ApiKey::from("b39fdee47a6bdbab5bc6827ac954c422"),
            cookie: None,
            project: "DecentralGPT".to_string(),
            default_model: "gpt-4o-mini".to_string(),
            user_agent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
                         (KHTML, like Gecko) Chrome/137.0.0.0 Safari/537.36"
                .to_string(),
            referer: "https://www.degpt.ai/".to_string(),
            request_timeout_secs: 120,
            probe_timeout_secs: 5,
        }
    }
}

/// Model discovery configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// Authoritative configuration endpoint listing default models
    pub config_url: String,
    /// Root page of the vendor web front-end crawled for enrichment
    pub site_root: String,
    /// Whether the enrichment crawl runs at all
    pub crawl_enabled: bool,
    pub crawl_max_depth: usize,
    pub crawl_max_pages: usize,
    /// Snapshot age after which a refresh is attempted
    pub cache_duration_secs: u64,
    /// Interval of the long reload tick (registry refresh + endpoint probe)
    pub reload_interval_secs: u64,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            config_url: "https://www.degpt.ai/api/config".to_string(),
            site_root: "https://www.degpt.ai/".to_string(),
            crawl_enabled: true,
            crawl_max_depth: 6,
            crawl_max_pages: 64,
            cache_duration_secs: 14_400,
            reload_interval_secs: 1_800,
        }
    }
}

/// Health tracking configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HealthConfig {
    /// Window after a failure during which a model is passed over
    pub cooldown_secs: u64,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self { cooldown_secs: 300 }
    }
}

/// Session cache configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Idle time after which a session is evicted
    pub ttl_secs: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self { ttl_secs: 3_600 }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level for the gateway's own target
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// Secret value that redacts in Debug/Display/Serialize and zeroizes on drop.
///
/// Used for the upstream client id, the upstream cookie and the inbound
/// shared token. Only accessible via `.expose_secret()`.
#[derive(Clone)]
pub struct ApiKey(SecretString);

impl ApiKey {
    /// Access the raw value. Every call site is auditable via `grep expose_secret`.
    pub fn expose_secret(&self) -> &str {
        self.0.expose_secret()
    }
}

impl std::fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[REDACTED]")
    }
}

impl std::fmt::Display for ApiKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[REDACTED]")
    }
}

impl Serialize for ApiKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str("[REDACTED]")
    }
}

impl<'de> Deserialize<'de> for ApiKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        String::deserialize(deserializer).map(|s| ApiKey(SecretString::from(s)))
    }
}

impl From<String> for ApiKey {
    fn from(s: String) -> Self {
        ApiKey(SecretString::from(s))
    }
}

impl From<&str> for ApiKey {
    fn from(s: &str) -> Self {
        ApiKey(SecretString::from(s.to_string()))
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Configuration validation error: {0}")]
    Validation(String),

    #[error("Environment variable '{var}' not usable for '{field}': {message}")]
    EnvVar {
        var: String,
        field: String,
        message: String,
    },
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| ConfigError::Io {
            path: path.as_ref().display().to_string(),
            source: e,
        })?;

        Self::parse_str(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn parse_str(content: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(content).map_err(ConfigError::Parse)?;
        config.validate()?;
        Ok(config)
    }

    /// Load the file if it exists (defaults otherwise), then apply the
    /// process environment on top.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let mut config = if path.as_ref().exists() {
            Self::from_file(path)?
        } else {
            tracing::info!(
                path = %path.as_ref().display(),
                "Config file not found, using defaults"
            );
            Self::default()
        };
        config.apply_env_with(|name| std::env::var(name).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Apply environment overrides using a custom lookup function.
    ///
    /// The closure-based design makes this testable without touching global env state.
    pub fn apply_env_with<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("DEGPT_CACHE_DURATION") {
            self.registry.cache_duration_secs = parse_secs("DEGPT_CACHE_DURATION", &v)?;
        }
        if let Some(v) = lookup("DEGPT_SESSION_TTL") {
            self.session.ttl_secs = parse_secs("DEGPT_SESSION_TTL", &v)?;
        }
        if let Some(base) = lookup("DEGPT_BASE_URL").filter(|v| !v.trim().is_empty()) {
            let base = base.trim().trim_end_matches('/').to_string();
            self.upstream.endpoints.retain(|e| e != &base);
            self.upstream.endpoints.insert(0, base);
        }
        if let Some(token) = lookup("DEGPT_TOKEN").filter(|v| !v.is_empty()) {
            self.server.auth_token = Some(ApiKey::from(token));
        }
        if let Some(id) = lookup("DEGPT_CLIENT_ID").filter(|v| !v.is_empty()) {
            self.upstream.client_id = ApiKey::from(id);
        }
        if let Some(cookie) = lookup("DEGPT_COOKIE").filter(|v| !v.is_empty()) {
            self.upstream.cookie = Some(ApiKey::from(cookie));
        }
        if let Some(paths) = resolve_chat_paths(&lookup) {
            self.server.chat_paths = paths;
        }

        // Secrets may carry ${VAR} references
        self.upstream.client_id =
            expand_secret(&self.upstream.client_id, "upstream.client_id", &lookup)?;
        if let Some(cookie) = &self.upstream.cookie {
            self.upstream.cookie = Some(expand_secret(cookie, "upstream.cookie", &lookup)?);
        }
        if let Some(token) = &self.server.auth_token {
            self.server.auth_token = Some(expand_secret(token, "server.auth_token", &lookup)?);
        }

        Ok(())
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.upstream.endpoints.is_empty() {
            return Err(ConfigError::Validation(
                "upstream.endpoints must list at least one base URL".to_string(),
            ));
        }
        if let Some(empty) = self.upstream.endpoints.iter().position(|e| e.trim().is_empty()) {
            return Err(ConfigError::Validation(format!(
                "upstream.endpoints[{}] is empty",
                empty
            )));
        }
        if self.upstream.auth_url.is_empty() || self.registry.config_url.is_empty() {
            return Err(ConfigError::Validation(
                "upstream.auth_url and registry.config_url must be set".to_string(),
            ));
        }
        if self.server.chat_paths.iter().any(|p| !p.starts_with('/')) {
            return Err(ConfigError::Validation(
                "server.chat_paths entries must start with '/'".to_string(),
            ));
        }
        let mut seen = std::collections::HashSet::new();
        for path in &self.server.chat_paths {
            if RESERVED_PATHS.contains(&path.as_str()) {
                return Err(ConfigError::Validation(format!(
                    "server.chat_paths entry '{}' collides with a built-in route",
                    path
                )));
            }
            if !seen.insert(path.as_str()) {
                return Err(ConfigError::Validation(format!(
                    "server.chat_paths lists '{}' twice",
                    path
                )));
            }
        }
        for (name, value) in [
            ("session.ttl_secs", self.session.ttl_secs),
            ("registry.cache_duration_secs", self.registry.cache_duration_secs),
            ("health.cooldown_secs", self.health.cooldown_secs),
            ("registry.reload_interval_secs", self.registry.reload_interval_secs),
            ("server.maintenance_interval_secs", self.server.maintenance_interval_secs),
            ("upstream.request_timeout_secs", self.upstream.request_timeout_secs),
            ("upstream.probe_timeout_secs", self.upstream.probe_timeout_secs),
        ] {
            if value == 0 {
                return Err(ConfigError::Validation(format!("{} must be > 0", name)));
            }
        }
        if self.server.auth_token.is_none() {
            tracing::warn!("No inbound auth token configured - endpoints are open");
        }
        Ok(())
    }

    pub fn cache_duration(&self) -> Duration {
        Duration::seconds(self.registry.cache_duration_secs as i64)
    }

    pub fn session_ttl(&self) -> Duration {
        Duration::seconds(self.session.ttl_secs as i64)
    }

    pub fn cooldown(&self) -> Duration {
        Duration::seconds(self.health.cooldown_secs as i64)
    }
}

fn parse_secs(var: &str, value: &str) -> Result<u64, ConfigError> {
    value.trim().parse::<u64>().map_err(|e| ConfigError::EnvVar {
        var: var.to_string(),
        field: var.to_lowercase(),
        message: format!("expected whole seconds, got '{}': {}", value, e),
    })
}

/// Resolve the chat path set from `REPLACE_CHAT`, `PREFIX_CHAT` and `APPEND_CHAT`.
///
/// Precedence follows that order. Returns `None` when none is set, leaving
/// the configured paths in place.
pub fn resolve_chat_paths<F>(lookup: &F) -> Option<Vec<String>>
where
    F: Fn(&str) -> Option<String>,
{
    let split = |value: String| -> Vec<String> {
        value
            .split(',')
            .map(|p| p.trim().to_string())
            .filter(|p| !p.is_empty())
            .collect()
    };

    if let Some(replace) = lookup("REPLACE_CHAT").map(split).filter(|v| !v.is_empty()) {
        return Some(replace);
    }
    if let Some(prefixes) = lookup("PREFIX_CHAT").map(split).filter(|v| !v.is_empty()) {
        return Some(
            prefixes
                .iter()
                .map(|p| format!("{}{}", p.trim_end_matches('/'), DEFAULT_CHAT_PATH))
                .collect(),
        );
    }
    if let Some(extra) = lookup("APPEND_CHAT").map(split).filter(|v| !v.is_empty()) {
        let mut paths = vec![DEFAULT_CHAT_PATH.to_string()];
        paths.extend(extra);
        return Some(paths);
    }
    None
}

fn expand_secret<F>(key: &ApiKey, field: &str, lookup: &F) -> Result<ApiKey, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let raw = key.expose_secret();
    if !raw.contains("${") {
        return Ok(key.clone());
    }
    expand_env_vars_with(raw, field, lookup).map(ApiKey::from)
}

/// Expand all `${VAR}` references in a string using a custom lookup function.
///
/// Supports multiple `${VAR}` in one string. Fails on first missing variable,
/// unclosed `${`, or empty variable name.
fn expand_env_vars_with<F>(input: &str, field: &str, lookup: &F) -> Result<String, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let mut result = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(start) = rest.find("${") {
        result.push_str(&rest[..start]);
        let after = &rest[start + 2..];

        let end = after.find('}').ok_or_else(|| ConfigError::EnvVar {
            var: "<unclosed>".to_string(),
            field: field.to_string(),
            message: "Unclosed '${' in config value".to_string(),
        })?;

        let var_name = &after[..end];
        if var_name.is_empty() {
            return Err(ConfigError::EnvVar {
                var: String::new(),
                field: field.to_string(),
                message: "Empty variable name in '${}' reference".to_string(),
            });
        }

        let value = lookup(var_name).ok_or_else(|| ConfigError::EnvVar {
            var: var_name.to_string(),
            field: field.to_string(),
            message: "variable is not set".to_string(),
        })?;

        result.push_str(&value);
        rest = &after[end + 1..];
    }

    result.push_str(rest);
    Ok(result)
}
