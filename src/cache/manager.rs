//! Cache Orchestrator - ordered tiers in front of an origin
//!
//! Lookups scan the layers nearest-first. A hit in tier `i > 0` is promoted
//! into tiers `0..i` in the background; a full miss is fetched from the
//! origin, transformed once and written into every tier in the background.
//! Callers never wait for cache writes.

use std::ops::Range;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures::future::join_all;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, instrument, warn};

use super::key::{CacheKey, Rendition};
use super::layer::Layer;
use super::metrics::CacheMetrics;
use crate::error::{Error, Result};
use crate::store::Origin;
use crate::transform::{FormatRegistry, ImageFormat, TransformOptions, Transformer};

/// Where a lookup was answered from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Source {
    /// Tier index, 0 nearest
    Tier(usize),
    /// Fetched from the origin and transformed
    Origin,
}

impl std::fmt::Display for Source {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Source::Tier(tier) => write!(f, "tier {}", tier),
            Source::Origin => write!(f, "origin"),
        }
    }
}

/// Lookup result
#[derive(Debug, Clone)]
pub struct Lookup {
    /// Key the content is cached under
    pub key: CacheKey,
    pub content: Bytes,
    pub source: Source,
}

#[derive(Debug, Clone, Copy)]
enum WriteBack {
    Promotion,
    Population,
}

/// Tiered cache over an origin
pub struct Cache {
    origin: Arc<dyn Origin>,
    transformer: Arc<dyn Transformer>,
    registry: FormatRegistry,
    layers: Vec<Layer>,
    metrics: Arc<CacheMetrics>,
    tasks: TaskTracker,
    quiescing: tokio::sync::Mutex<()>,
}

impl Cache {
    /// Create a cache. `layers[0]` is the nearest tier; the order is fixed
    /// from here on. The transformer is asked for its formats once.
    pub fn new(
        origin: Arc<dyn Origin>,
        transformer: Arc<dyn Transformer>,
        layers: Vec<Layer>,
    ) -> Self {
        let registry = FormatRegistry::from_transformer(transformer.as_ref());
        info!(
            tiers = layers.len(),
            formats = registry.formats().count(),
            "Cache created"
        );

        Self {
            origin,
            transformer,
            registry,
            metrics: Arc::new(CacheMetrics::new(layers.len())),
            layers,
            tasks: TaskTracker::new(),
            quiescing: tokio::sync::Mutex::new(()),
        }
    }

    /// Tiers, nearest first
    pub fn layers(&self) -> &[Layer] {
        &self.layers
    }

    pub fn registry(&self) -> &FormatRegistry {
        &self.registry
    }

    pub fn metrics(&self) -> &CacheMetrics {
        &self.metrics
    }

    /// Validate a (format, options) pair against this cache's transformer.
    ///
    /// Fails with `UnsupportedFormat` for formats the transformer cannot
    /// produce or that have no content type.
    pub fn rendition(&self, format: ImageFormat, options: TransformOptions) -> Result<Rendition> {
        let content_type = self.registry.resolve(format)?;
        Rendition::new(format, options, content_type)
    }

    /// Fetch the `rendition` of origin object `name`
    #[instrument(skip(self, rendition), fields(format = %rendition.format()))]
    pub async fn lookup(&self, rendition: &Rendition, name: &str) -> Result<Lookup> {
        let key = rendition.key_for(name);

        for (tier, layer) in self.layers.iter().enumerate() {
            if !layer.exists(key.as_str()).await {
                continue;
            }

            match layer.get(key.as_str()).await {
                Ok(content) => {
                    self.metrics.record_tier_hit(tier);
                    if tier > 0 {
                        self.write_back(&key, &content, 0..tier, WriteBack::Promotion);
                    }
                    debug!(tier, key = %key, "Cache hit");
                    return Ok(Lookup {
                        key,
                        content,
                        source: Source::Tier(tier),
                    });
                }
                Err(e) => {
                    debug!(tier, key = %key, "Tier read failed, falling through: {}", e);
                }
            }
        }

        if !self.origin.exists(name).await {
            self.metrics.record_miss();
            return Err(Error::not_found(name));
        }
        let original = self.origin.get(name).await?;

        let transformed = match self.transform(original, rendition).await {
            Ok(transformed) => transformed,
            Err(e) => {
                self.metrics.record_transform_failure();
                warn!(key = %key, "Transform failed: {}", e);
                return Err(e);
            }
        };
        self.metrics.record_origin_hit();
        self.write_back(
            &key,
            &transformed,
            0..self.layers.len(),
            WriteBack::Population,
        );

        debug!(key = %key, size = transformed.len(), "Served from origin");
        Ok(Lookup {
            key,
            content: transformed,
            source: Source::Origin,
        })
    }

    /// Delete `key` from every tier. Per-tier failures are logged and skipped.
    #[instrument(skip_all, fields(key = %key))]
    pub async fn clear(&self, key: &CacheKey) {
        for (tier, layer) in self.layers.iter().enumerate() {
            if let Err(e) = layer.delete(key.as_str()).await {
                warn!(tier, "Failed to clear key: {}", e);
            }
        }
    }

    /// Sweep every tier in order. Returns the total number of evicted blobs.
    #[instrument(skip(self))]
    pub async fn evict_all(&self) -> usize {
        let mut total = 0;
        for layer in &self.layers {
            total += layer.evict().await;
        }
        if total > 0 {
            info!(evicted = total, "Eviction sweep complete");
        }
        total
    }

    /// Blobs evicted across all tiers, by any sweep
    pub fn evictions(&self) -> u64 {
        self.layers.iter().map(Layer::evictions).sum()
    }

    /// Start background eviction on every tier with one shared period
    pub fn spawn_background_eviction(
        &self,
        period: Duration,
        cancel: &CancellationToken,
    ) -> Vec<JoinHandle<()>> {
        self.layers
            .iter()
            .map(|layer| layer.spawn_eviction(period, cancel.child_token()))
            .collect()
    }

    /// Wait for pending promotions and populations, then for every tier's
    /// own bookkeeping. Concurrent callers take turns.
    pub async fn quiesce(&self) {
        {
            let _turn = self.quiescing.lock().await;
            self.tasks.close();
            self.tasks.wait().await;
            self.tasks.reopen();
        }

        for layer in &self.layers {
            layer.quiesce().await;
        }
    }

    // -- Internal helpers --

    async fn transform(&self, content: Bytes, rendition: &Rendition) -> Result<Bytes> {
        let transformer = Arc::clone(&self.transformer);
        let options = rendition.options().clone();
        let format = rendition.format();

        tokio::task::spawn_blocking(move || transformer.transform(content, &options, format))
            .await
            .map_err(|e| Error::Internal(format!("Transform task failed: {}", e)))?
    }

    /// Write `content` into `tiers` concurrently, without the caller waiting
    fn write_back(&self, key: &CacheKey, content: &Bytes, tiers: Range<usize>, kind: WriteBack) {
        let targets: Vec<(usize, Layer)> = tiers
            .filter_map(|tier| self.layers.get(tier).map(|layer| (tier, layer.clone())))
            .collect();
        if targets.is_empty() {
            return;
        }

        let key = key.clone();
        let content = content.clone();
        let metrics = Arc::clone(&self.metrics);

        self.tasks.spawn(async move {
            let writes = targets.into_iter().map(|(tier, layer)| {
                let key = &key;
                let content = content.clone();
                let metrics = &metrics;
                async move {
                    match layer.put(key.as_str(), content).await {
                        Ok(()) => match kind {
                            WriteBack::Promotion => metrics.record_promotion(),
                            WriteBack::Population => metrics.record_population(),
                        },
                        Err(e) => {
                            metrics.record_write_failure();
                            warn!(tier, key = %key, ?kind, "Cache write failed: {}", e);
                        }
                    }
                }
            });
            join_all(writes).await;
        });
    }
}

impl std::fmt::Debug for Cache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cache")
            .field("layers", &self.layers)
            .field("registry", &self.registry)
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================
