//! Prometheus Exporter
//!
//! Mirrors [`CacheMetrics`](crate::cache::CacheMetrics) and per-layer totals
//! into a private Prometheus registry at scrape time.

use prometheus::{Encoder, IntGauge, IntGaugeVec, Opts, Registry, TextEncoder};

use crate::cache::Cache;
use crate::error::{Error, Result};

/// Gauges refreshed from a [`Cache`] on every scrape
pub struct PrometheusExporter {
    registry: Registry,
    tier_hits: IntGaugeVec,
    origin_hits: IntGauge,
    misses: IntGauge,
    promotions: IntGauge,
    populations: IntGauge,
    write_failures: IntGauge,
    transform_failures: IntGauge,
    evictions: IntGauge,
    layer_items: IntGaugeVec,
    layer_bytes: IntGaugeVec,
    layer_evictions: IntGaugeVec,
}

fn gauge(registry: &Registry, name: &str, help: &str) -> Result<IntGauge> {
    let gauge = IntGauge::new(name, help).map_err(prometheus_error)?;
    registry
        .register(Box::new(gauge.clone()))
        .map_err(prometheus_error)?;
    Ok(gauge)
}

fn gauge_vec(registry: &Registry, name: &str, help: &str, label: &str) -> Result<IntGaugeVec> {
    let gauge = IntGaugeVec::new(Opts::new(name, help), &[label]).map_err(prometheus_error)?;
    registry
        .register(Box::new(gauge.clone()))
        .map_err(prometheus_error)?;
    Ok(gauge)
}

fn prometheus_error(err: prometheus::Error) -> Error {
    Error::Internal(format!("Prometheus error: {}", err))
}

impl PrometheusExporter {
    pub fn new() -> Result<Self> {
        let registry = Registry::new_custom(Some("layercache".to_string()), None)
            .map_err(prometheus_error)?;

        Ok(Self {
            tier_hits: gauge_vec(&registry, "tier_hits", "Lookups answered by a tier", "tier")?,
            origin_hits: gauge(&registry, "origin_hits", "Lookups answered by the origin")?,
            misses: gauge(&registry, "misses", "Lookups not found anywhere")?,
            promotions: gauge(&registry, "promotions", "Blobs promoted into nearer tiers")?,
            populations: gauge(&registry, "populations", "Blobs written after an origin fetch")?,
            write_failures: gauge(&registry, "write_failures", "Failed background tier writes")?,
            transform_failures: gauge(&registry, "transform_failures", "Failed transforms")?,
            evictions: gauge(&registry, "evictions", "Blobs evicted across all layers")?,
            layer_items: gauge_vec(&registry, "layer_items", "Tracked items per layer", "layer")?,
            layer_bytes: gauge_vec(&registry, "layer_bytes", "Tracked bytes per layer", "layer")?,
            layer_evictions: gauge_vec(
                &registry,
                "layer_evictions",
                "Blobs evicted per layer",
                "layer",
            )?,
            registry,
        })
    }

    /// Refresh from `cache` and encode in the text exposition format.
    /// Returns the content type and the body.
    pub fn render(&self, cache: &Cache) -> Result<(String, Vec<u8>)> {
        self.refresh(cache);

        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder
            .encode(&self.registry.gather(), &mut buffer)
            .map_err(prometheus_error)?;
        Ok((encoder.format_type().to_string(), buffer))
    }

    fn refresh(&self, cache: &Cache) {
        let snapshot = cache.metrics().snapshot();

        for (tier, hits) in snapshot.tier_hits.iter().enumerate() {
            let tier = tier.to_string();
            self.tier_hits
                .with_label_values(&[tier.as_str()])
                .set(*hits as i64);
        }
        self.origin_hits.set(snapshot.origin_hits as i64);
        self.misses.set(snapshot.misses as i64);
        self.promotions.set(snapshot.promotions as i64);
        self.populations.set(snapshot.populations as i64);
        self.write_failures.set(snapshot.write_failures as i64);
        self.transform_failures.set(snapshot.transform_failures as i64);
        self.evictions.set(cache.evictions() as i64);

        for layer in cache.layers() {
            let stats = layer.stats();
            self.layer_items
                .with_label_values(&[layer.name()])
                .set(stats.items as i64);
            self.layer_bytes
                .with_label_values(&[layer.name()])
                .set(stats.bytes as i64);
            self.layer_evictions
                .with_label_values(&[layer.name()])
                .set(layer.evictions() as i64);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{Layer, MaxItems};
    use crate::store::{BlobStore, MemoryStore};
    use crate::transform::{ImageFormat, Passthrough, TransformOptions};
    use bytes::Bytes;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_render_reflects_cache_state() {
        let origin = Arc::new(MemoryStore::new());
        origin.put("cat", Bytes::from_static(b"meow")).await.unwrap();
        let layer = Layer::new("hot", Arc::new(MemoryStore::new()), vec![]);
        let cache = Cache::new(origin, Arc::new(Passthrough::default()), vec![layer]);

        let rendition = cache
            .rendition(ImageFormat::Png, TransformOptions::default())
            .unwrap();
        cache.lookup(&rendition, "cat").await.unwrap();
        cache.quiesce().await;
        cache.lookup(&rendition, "cat").await.unwrap();

        let exporter = PrometheusExporter::new().unwrap();
        let (content_type, body) = exporter.render(&cache).unwrap();
        let text = String::from_utf8(body).unwrap();

        assert!(content_type.starts_with("text/plain"));
        assert!(text.contains("layercache_origin_hits 1"));
        assert!(text.contains("layercache_tier_hits{tier=\"0\"} 1"));
        assert!(text.contains("layercache_layer_items{layer=\"hot\"} 1"));
        assert!(text.contains("layercache_layer_bytes{layer=\"hot\"} 4"));
    }

    #[test]
    fn test_exporters_are_independent() {
        // Private registries, so two exporters never collide
        assert!(PrometheusExporter::new().is_ok());
        assert!(PrometheusExporter::new().is_ok());
    }

    #[tokio::test]
    async fn test_sweeps_outside_evict_all_are_exported() {
        let layer = Layer::new(
            "hot",
            Arc::new(MemoryStore::new()),
            vec![Box::new(MaxItems::new(1))],
        );
        let cache = Cache::new(
            Arc::new(MemoryStore::new()),
            Arc::new(Passthrough::default()),
            vec![layer],
        );

        // Each put triggers its own sweep
        for key in ["a", "b", "c"] {
            cache.layers()[0]
                .put(key, Bytes::from_static(b"x"))
                .await
                .unwrap();
            cache.quiesce().await;
        }

        let exporter = PrometheusExporter::new().unwrap();
        let (_, body) = exporter.render(&cache).unwrap();
        let text = String::from_utf8(body).unwrap();

        assert!(text.contains("layercache_evictions 2"));
        assert!(text.contains("layercache_layer_evictions{layer=\"hot\"} 2"));
    }
}
