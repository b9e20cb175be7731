//! layercache - Multi-Tier Cache with Pluggable Eviction
//!
//! Serves renditions of origin objects through an ordered list of cache
//! tiers. Each tier pairs a backing store with a recency index and any number
//! of eviction strategies.
//!
//! # Architecture
//!
//! ```text
//! HTTP handler → Cache (tiers 0..n) → Origin → Transformer
//!                  │
//!                  └─ Layer = BlobStore + RecencyIndex + EvictionStrategy*
//! ```
//!
//! # Modules
//!
//! - [`cache`] - Tiered lookup, layers, recency tracking and eviction
//! - [`config`] - YAML settings
//! - [`error`] - Error types
//! - [`exporter`] - Prometheus exposition of cache metrics
//! - [`hash`] - Stable hashing for keys and on-disk placement
//! - [`http`] - Request handler
//! - [`store`] - Memory and sharded filesystem backing stores
//! - [`transform`] - Formats, transform options and the transformer boundary
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use layercache::cache::{Cache, Layer, MaxCacheSize, MB};
//! use layercache::store::{FilesystemStore, FilesystemStoreConfig, MemoryStore};
//! use layercache::transform::{ImageFormat, Passthrough, TransformOptions};
//!
//! # async fn run() -> layercache::Result<()> {
//! let origin = FilesystemStore::open(FilesystemStoreConfig::new("/srv/images", 0)).await?;
//! let hot = Layer::new(
//!     "hot",
//!     Arc::new(MemoryStore::new()),
//!     vec![Box::new(MaxCacheSize::new(64 * MB))],
//! );
//! let cache = Cache::new(Arc::new(origin), Arc::new(Passthrough::default()), vec![hot]);
//!
//! let rendition = cache.rendition(ImageFormat::Webp, TransformOptions::default())?;
//! let lookup = cache.lookup(&rendition, "cat.jpg").await?;
//! println!("{} bytes from {}", lookup.content.len(), lookup.source);
//! # Ok(())
//! # }
//! ```

pub mod cache;
pub mod config;
pub mod error;
pub mod exporter;
pub mod hash;
pub mod http;
pub mod store;
pub mod transform;

// Re-export commonly used types
pub use cache::{Cache, Layer};
pub use config::Settings;
pub use error::{Error, Result};
pub use store::{BlobStore, Origin};
