//! Model registry: the snapshot of models the upstream currently serves.
//!
//! The snapshot is filled from two discovery sources, in order:
//! - the vendor configuration endpoint (authoritative id list + metadata)
//! - a best-effort crawl of the vendor web front-end for richer descriptors
//!
//! Both run before anything is merged; a crawled descriptor replaces the bare
//! one for an id the configuration endpoint also listed. Across refreshes
//! entries are only ever appended and the first descriptor seen for an id wins.

pub mod crawl;
pub mod discovery;
pub mod lenient;

use chrono::{DateTime, Duration, Utc};
use serde::{Serialize, Serializer};
use serde_json::Value;
use std::collections::HashSet;
use std::sync::{Arc, Mutex, RwLock};
use url::Url;

use crate::clock::Clock;
use crate::config::RegistryConfig;
use crawl::{CrawlLimits, Crawler};

/// Input modality a model accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Modality {
    Text,
    Image,
}

/// A single model known to the gateway.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelDescriptor {
    pub id: String,
    pub display_name: String,
    pub owner_prefix: String,
    pub modalities: Vec<Modality>,
    pub description: String,
    pub tip: String,
    pub created_at_millis: i64,
}

impl ModelDescriptor {
    /// Descriptor for an id known only by name (configuration endpoint).
    pub fn from_id(id: &str, now: DateTime<Utc>) -> Self {
        Self {
            id: id.to_string(),
            display_name: id.to_string(),
            owner_prefix: owner_prefix(id),
            modalities: vec![Modality::Text],
            description: String::new(),
            tip: String::new(),
            created_at_millis: now.timestamp_millis(),
        }
    }

    /// Descriptor from a crawled front-end entry.
    ///
    /// Keys: `model` (id), `name`, `desc`, `support`, `tip`. Entries without a
    /// model id are skipped.
    pub fn from_crawled(entry: &Value, now: DateTime<Utc>) -> Option<Self> {
        let field = |key: &str| {
            entry
                .get(key)
                .and_then(Value::as_str)
                .map(str::trim)
                .unwrap_or_default()
                .to_string()
        };

        let id = field("model");
        if id.is_empty() {
            return None;
        }

        let support = field("support");
        let mut modalities = vec![Modality::Text];
        if support.to_ascii_lowercase().contains("image") {
            modalities.push(Modality::Image);
        }

        let name = field("name");
        Some(Self {
            display_name: if name.is_empty() { id.clone() } else { name },
            owner_prefix: owner_prefix(&id),
            modalities,
            description: field("desc"),
            tip: field("tip"),
            created_at_millis: now.timestamp_millis(),
            id,
        })
    }

    pub fn supports_image(&self) -> bool {
        self.modalities.contains(&Modality::Image)
    }
}

/// Text before the first `-`, or `"unknown"` for ids without one.
fn owner_prefix(id: &str) -> String {
    match id.split_once('-') {
        Some((prefix, _)) => prefix.to_string(),
        None => "unknown".to_string(),
    }
}

#[derive(Serialize)]
struct ModelEntry<'a> {
    id: &'a str,
    object: &'static str,
    created: i64,
    owned_by: &'a str,
    name: &'a str,
    description: &'a str,
    support: &'static str,
    tip: &'a str,
}

impl Serialize for ModelDescriptor {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        ModelEntry {
            id: &self.id,
            object: "model",
            created: self.created_at_millis,
            owned_by: &self.owner_prefix,
            name: &self.display_name,
            description: &self.description,
            support: if self.supports_image() { "image" } else { "text" },
            tip: &self.tip,
        }
        .serialize(serializer)
    }
}

/// Combine one refresh's discovery results in merge order.
///
/// Listed ids keep their configuration-endpoint position but take the crawled
/// descriptor when the front-end describes the same id, so its modalities are
/// not lost. Crawled ids the configuration endpoint did not list follow.
fn enrich(listed: Vec<ModelDescriptor>, crawled: Vec<ModelDescriptor>) -> Vec<ModelDescriptor> {
    let mut crawled: Vec<Option<ModelDescriptor>> = crawled.into_iter().map(Some).collect();
    let mut combined: Vec<ModelDescriptor> = listed
        .into_iter()
        .map(|listed| {
            crawled
                .iter_mut()
                .find(|c| c.as_ref().is_some_and(|c| c.id == listed.id))
                .and_then(Option::take)
                .unwrap_or(listed)
        })
        .collect();
    combined.extend(crawled.into_iter().flatten());
    combined
}

/// Point-in-time view of the registry, in `/models` list shape.
#[derive(Debug, Clone, Default)]
pub struct RegistrySnapshot {
    pub data: Vec<ModelDescriptor>,
    pub provider: String,
    pub version: String,
    pub refreshed_at: Option<DateTime<Utc>>,
}

#[derive(Serialize)]
struct SnapshotEntry<'a> {
    object: &'static str,
    data: &'a [ModelDescriptor],
    provider: &'a str,
    version: &'a str,
    time: i64,
}

impl Serialize for RegistrySnapshot {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        SnapshotEntry {
            object: "list",
            data: &self.data,
            provider: &self.provider,
            version: &self.version,
            time: self.refreshed_at.map_or(0, |t| t.timestamp_millis()),
        }
        .serialize(serializer)
    }
}

impl RegistrySnapshot {
    pub fn get(&self, id: &str) -> Option<&ModelDescriptor> {
        self.data.iter().find(|m| m.id == id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.get(id).is_some()
    }

    /// First image-capable model in discovery order.
    pub fn first_image_capable(&self) -> Option<&ModelDescriptor> {
        self.data.iter().find(|m| m.supports_image())
    }
}

/// Shared, self-refreshing model registry.
pub struct ModelRegistry {
    snapshot: RwLock<RegistrySnapshot>,
    last_refresh_started: Mutex<Option<DateTime<Utc>>>,
    client: reqwest::Client,
    config: RegistryConfig,
    clock: Arc<dyn Clock>,
}

impl ModelRegistry {
    pub fn new(client: reqwest::Client, config: RegistryConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            snapshot: RwLock::new(RegistrySnapshot {
                provider: "unknown".to_string(),
                version: "unknown".to_string(),
                ..Default::default()
            }),
            last_refresh_started: Mutex::new(None),
            client,
            config,
            clock,
        }
    }

    /// Copy of the current snapshot.
    pub fn snapshot(&self) -> RegistrySnapshot {
        self.snapshot
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    fn cache_duration(&self) -> Duration {
        Duration::seconds(self.config.cache_duration_secs as i64)
    }

    /// Refresh the snapshot if it is older than the cache duration.
    ///
    /// The staleness check and the timestamp stamp happen together; the slow
    /// discovery work runs without holding any lock, so two callers that both
    /// observe staleness may refresh concurrently. Merging is idempotent.
    ///
    /// Returns the ids added by this refresh. Discovery failures are logged
    /// and the last known snapshot is kept.
    pub async fn refresh_if_stale(&self) -> Vec<String> {
        let now = self.clock.now();
        {
            let mut started = self
                .last_refresh_started
                .lock()
                .unwrap_or_else(|e| e.into_inner());
            if let Some(last) = *started {
                if now - last <= self.cache_duration() {
                    return Vec::new();
                }
            }
            *started = Some(now);
        }

        let mut listed: Vec<ModelDescriptor> = Vec::new();
        match discovery::fetch_config(&self.client, &self.config.config_url).await {
            Ok(remote) => {
                {
                    let mut snap = self.snapshot.write().unwrap_or_else(|e| e.into_inner());
                    if let Some(provider) = remote.provider {
                        snap.provider = provider;
                    }
                    if let Some(version) = remote.version {
                        snap.version = version;
                    }
                }
                listed.extend(
                    remote
                        .default_models
                        .iter()
                        .map(|id| ModelDescriptor::from_id(id, now)),
                );
            }
            Err(e) => {
                tracing::warn!(error = %e, url = %self.config.config_url, "Config discovery failed");
            }
        }

        let crawled = if self.config.crawl_enabled {
            self.crawl(now).await
        } else {
            Vec::new()
        };

        let added = self.merge(enrich(listed, crawled));

        self.snapshot
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .refreshed_at = Some(now);

        tracing::info!(
            added = added.len(),
            total = self.snapshot().data.len(),
            "Model registry refreshed"
        );
        added
    }

    async fn crawl(&self, now: DateTime<Utc>) -> Vec<ModelDescriptor> {
        let root = match Url::parse(&self.config.site_root) {
            Ok(u) => u,
            Err(e) => {
                tracing::warn!(error = %e, root = %self.config.site_root, "Invalid crawl root");
                return Vec::new();
            }
        };

        let crawler = Crawler::new(
            self.client.clone(),
            root,
            CrawlLimits {
                max_depth: self.config.crawl_max_depth,
                max_pages: self.config.crawl_max_pages,
            },
        );

        match crawler.run().await {
            Some(entries) => entries
                .iter()
                .filter_map(|e| ModelDescriptor::from_crawled(e, now))
                .collect(),
            None => {
                tracing::warn!(root = %self.config.site_root, "Crawl found no models literal");
                Vec::new()
            }
        }
    }

    /// Append descriptors whose id is not present yet.
    ///
    /// Existing entries are never modified. Returns the newly added ids.
    pub fn merge(&self, descriptors: impl IntoIterator<Item = ModelDescriptor>) -> Vec<String> {
        let mut snap = self.snapshot.write().unwrap_or_else(|e| e.into_inner());
        let mut known: HashSet<String> = snap.data.iter().map(|m| m.id.clone()).collect();
        let mut added = Vec::new();

        for descriptor in descriptors {
            if known.insert(descriptor.id.clone()) {
                tracing::debug!(model = %descriptor.id, "Discovered model");
                added.push(descriptor.id.clone());
                snap.data.push(descriptor);
            }
        }
        added
    }
}
