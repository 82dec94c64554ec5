//! Content-aware model selection.

use std::sync::Arc;

use super::health::HealthTracker;
use crate::error::{Error, Result};
use crate::proxy::content::ContentKind;
use crate::registry::ModelRegistry;

/// Combines the registry (what exists, what it can do) with health tracking
/// (what currently works) to pick the upstream model for a request.
#[derive(Clone)]
pub struct ModelSelector {
    registry: Arc<ModelRegistry>,
    health: Arc<HealthTracker>,
}

impl ModelSelector {
    pub fn new(registry: Arc<ModelRegistry>, health: Arc<HealthTracker>) -> Self {
        Self { registry, health }
    }

    pub fn registry(&self) -> &Arc<ModelRegistry> {
        &self.registry
    }

    pub fn health(&self) -> &Arc<HealthTracker> {
        &self.health
    }

    /// Refresh the registry if stale and start tracking newly found models.
    ///
    /// New models get one recorded success so they are immediately eligible
    /// for automatic selection.
    pub async fn refresh(&self) {
        for id in self.registry.refresh_if_stale().await {
            self.health.record_outcome(&id, true);
        }
    }

    /// Pick the model that will serve a request.
    ///
    /// Text requests keep an available requested model, otherwise the healthiest
    /// one. Multimodal requests keep a requested model only if it declares image
    /// support; otherwise the first image-capable model in the registry is used.
    pub fn select(&self, requested: Option<&str>, kind: ContentKind) -> Result<String> {
        match kind {
            ContentKind::Text => Ok(self.health.resolve(requested)),
            ContentKind::Multimodal => {
                let snapshot = self.registry.snapshot();
                if let Some(model) = requested
                    .and_then(|id| snapshot.get(id))
                    .filter(|m| m.supports_image())
                {
                    return Ok(model.id.clone());
                }

                match snapshot.first_image_capable() {
                    Some(model) => {
                        tracing::info!(
                            requested = requested.unwrap_or("auto"),
                            model = %model.id,
                            "Requested model cannot read images, switching"
                        );
                        Ok(model.id.clone())
                    }
                    None => Err(Error::ModelUnavailable(format!(
                        "no registered model supports images (requested '{}')",
                        requested.unwrap_or("auto")
                    ))),
                }
            }
        }
    }
}
