//! Tiered Cache with Pluggable Eviction
//!
//! An ordered list of [`Layer`]s in front of an [`Origin`](crate::store::Origin).
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────────┐
//! │                              Cache                                │
//! ├───────────────────────────────────────────────────────────────────┤
//! │  Layer 0              │  Layer 1              │  Origin           │
//! │  ┌─────────────────┐  │  ┌─────────────────┐  │  ┌─────────────┐  │
//! │  │ BlobStore       │  │  │ BlobStore       │  │  │ exists/get  │  │
//! │  │ RecencyIndex    │  │  │ RecencyIndex    │  │  └─────────────┘  │
//! │  │ Strategies      │  │  │ Strategies      │  │        │          │
//! │  └─────────────────┘  │  └─────────────────┘  │    Transformer    │
//! │          ▲            │          │            │        │          │
//! │          └── promote ─┴──────────┘            │        │          │
//! │          ▲                       ▲            │        │          │
//! │          └────────── populate ───┴────────────┴────────┘          │
//! └───────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Consistency
//!
//! Store reads and writes are awaited by the caller. Recency tracking,
//! promotion and population run as detached tasks, so counters and tier
//! contents are eventually consistent. [`Cache::quiesce`] and
//! [`Layer::quiesce`] wait for that work to drain.

mod key;
mod layer;
mod manager;
mod metrics;
mod policy;
mod recency;

pub use key::{CacheKey, Rendition};
pub use layer::{Layer, LayerStats};
pub use manager::{Cache, Lookup, Source};
pub use metrics::{CacheMetrics, MetricsSnapshot};
pub use policy::{
    EvictionConfig, EvictionStrategy, LastAccess, LayerUsage, MaxCacheSize, MaxItems, GB, KB, MB,
};
pub use recency::{Entry, RecencyIndex, Touch};
