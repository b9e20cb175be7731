//! Backing Stores
//!
//! Concrete blob storage wrapped by a cache [`Layer`](crate::cache::Layer),
//! and the origin capability the [`Cache`](crate::cache::Cache) falls back to.
//!
//! # Stores
//!
//! - [`MemoryStore`] - `RwLock`-guarded map, useful as a hot tier or in tests
//! - [`FilesystemStore`] - content-addressed files, optionally sharded into
//!   up to 26 subdirectories

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::Result;

mod filesystem;
mod memory;

pub use filesystem::{FilesystemStore, FilesystemStoreConfig, SHARD_ALPHABET};
pub use memory::MemoryStore;

/// Blob storage consumed by a cache layer
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Store `content` under `key`, overwriting any previous value
    async fn put(&self, key: &str, content: Bytes) -> Result<()>;

    /// Read the content stored under `key`.
    ///
    /// Fails with [`Error::NotFound`](crate::Error::NotFound) if the key is absent.
    async fn get(&self, key: &str) -> Result<Bytes>;

    /// Check if `key` is present. Never counts as an access.
    async fn exists(&self, key: &str) -> bool;

    /// Remove `key`. Removing a missing key is not an error.
    async fn delete(&self, key: &str) -> Result<()>;
}

/// Authoritative source consulted on a full cache miss
#[async_trait]
pub trait Origin: Send + Sync {
    /// Check if the origin has `key`
    async fn exists(&self, key: &str) -> bool;

    /// Fetch `key` from the origin
    async fn get(&self, key: &str) -> Result<Bytes>;
}
