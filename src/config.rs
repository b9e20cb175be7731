//! Settings File
//!
//! YAML description of an origin, an ordered list of layers and the formats
//! to serve:
//!
//! ```yaml
//! origin:
//!   type: filesystem
//!   root: /srv/images
//! formats: [jpeg, webp]
//! layers:
//!   - name: hot
//!     store: { type: memory }
//!     eviction:
//!       - strategy: max-cache-size
//!         max_bytes: 268435456
//!     sweep_interval_secs: 30
//!   - name: disk
//!     store: { type: filesystem, root: /var/cache/layercache, shards: 26 }
//!     eviction:
//!       - strategy: last-access
//!         max_idle_secs: 86400
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use tracing::info;

use crate::cache::{Cache, EvictionConfig, Layer, MB};
use crate::error::{Error, Result};
use crate::store::{BlobStore, FilesystemStore, FilesystemStoreConfig, MemoryStore, Origin};
use crate::transform::{ImageFormat, Passthrough};

fn default_file_mode() -> u32 {
    FilesystemStoreConfig::default().file_mode
}

fn default_dir_mode() -> u32 {
    FilesystemStoreConfig::default().dir_mode
}

/// Backing store description
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StoreSettings {
    Memory,
    Filesystem {
        root: PathBuf,
        /// 0 stores blobs flat under `root`
        #[serde(default)]
        shards: usize,
        #[serde(default = "default_file_mode")]
        file_mode: u32,
        #[serde(default = "default_dir_mode")]
        dir_mode: u32,
    },
}

enum OpenedStore {
    Memory(Arc<MemoryStore>),
    Filesystem(Arc<FilesystemStore>),
}

impl StoreSettings {
    async fn open(&self) -> Result<OpenedStore> {
        match self {
            StoreSettings::Memory => Ok(OpenedStore::Memory(Arc::new(MemoryStore::new()))),
            StoreSettings::Filesystem {
                root,
                shards,
                file_mode,
                dir_mode,
            } => {
                let config = FilesystemStoreConfig {
                    root: root.clone(),
                    shards: *shards,
                    file_mode: *file_mode,
                    dir_mode: *dir_mode,
                };
                Ok(OpenedStore::Filesystem(Arc::new(
                    FilesystemStore::open(config).await?,
                )))
            }
        }
    }

    /// Open as a cache tier
    pub async fn open_blob_store(&self) -> Result<Arc<dyn BlobStore>> {
        let store: Arc<dyn BlobStore> = match self.open().await? {
            OpenedStore::Memory(store) => store,
            OpenedStore::Filesystem(store) => store,
        };
        Ok(store)
    }

    /// Open as the origin
    pub async fn open_origin(&self) -> Result<Arc<dyn Origin>> {
        let store: Arc<dyn Origin> = match self.open().await? {
            OpenedStore::Memory(store) => store,
            OpenedStore::Filesystem(store) => store,
        };
        Ok(store)
    }
}

/// One tier
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct LayerSettings {
    /// Name for logs; defaults to `layer<index>`
    #[serde(default)]
    pub name: Option<String>,
    pub store: StoreSettings,
    /// Applied in order on every sweep
    #[serde(default)]
    pub eviction: Vec<EvictionConfig>,
    /// Period of the background sweep; none when absent
    #[serde(default)]
    pub sweep_interval_secs: Option<u64>,
}

/// Whole settings document
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Settings {
    pub origin: StoreSettings,
    /// Formats to serve; every known format when absent
    #[serde(default)]
    pub formats: Option<Vec<ImageFormat>>,
    #[serde(default)]
    pub layers: Vec<LayerSettings>,
}

impl Default for Settings {
    /// Origin in the working directory behind one 256 MiB memory tier
    fn default() -> Self {
        Self {
            origin: StoreSettings::Filesystem {
                root: PathBuf::from("."),
                shards: 0,
                file_mode: default_file_mode(),
                dir_mode: default_dir_mode(),
            },
            formats: None,
            layers: vec![LayerSettings {
                name: Some("memory".to_string()),
                store: StoreSettings::Memory,
                eviction: vec![EvictionConfig::MaxCacheSize {
                    max_bytes: 256 * MB,
                }],
                sweep_interval_secs: Some(60),
            }],
        }
    }
}

/// A cache assembled from [`Settings`], plus the background sweeps to start
#[derive(Debug)]
pub struct Assembled {
    pub cache: Arc<Cache>,
    /// Layers with a configured sweep period
    pub sweeps: Vec<(Layer, Duration)>,
}

impl Settings {
    /// Parse a YAML document
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let settings: Settings = serde_yaml::from_str(yaml)?;
        settings.validate()?;
        Ok(settings)
    }

    /// Read and parse a YAML file
    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let yaml = tokio::fs::read_to_string(path).await.map_err(|e| {
            Error::Config(format!("Failed to read {}: {}", path.display(), e))
        })?;
        Self::from_yaml(&yaml)
    }

    /// Check invariants serde cannot express
    pub fn validate(&self) -> Result<()> {
        if let Some(formats) = &self.formats {
            if formats.is_empty() {
                return Err(Error::Config("formats must not be empty".to_string()));
            }
        }
        for (index, layer) in self.layers.iter().enumerate() {
            if layer.sweep_interval_secs == Some(0) {
                return Err(Error::Config(format!(
                    "layer {}: sweep_interval_secs must be positive",
                    index
                )));
            }
        }
        Ok(())
    }

    /// Open every store and assemble the cache
    pub async fn build(&self) -> Result<Assembled> {
        self.validate()?;

        let origin = self.origin.open_origin().await?;
        let transformer = match &self.formats {
            Some(formats) => Passthrough::with_formats(formats.iter().copied()),
            None => Passthrough::default(),
        };

        let mut layers = Vec::with_capacity(self.layers.len());
        let mut sweeps = Vec::new();
        for (index, settings) in self.layers.iter().enumerate() {
            let name = settings
                .name
                .clone()
                .unwrap_or_else(|| format!("layer{}", index));
            let store = settings.store.open_blob_store().await?;
            let strategies = settings.eviction.iter().map(EvictionConfig::build).collect();
            let layer = Layer::new(name, store, strategies);

            info!(
                layer = %layer.name(),
                strategies = settings.eviction.len(),
                "Layer configured"
            );
            if let Some(secs) = settings.sweep_interval_secs {
                sweeps.push((layer.clone(), Duration::from_secs(secs)));
            }
            layers.push(layer);
        }

        Ok(Assembled {
            cache: Arc::new(Cache::new(origin, Arc::new(transformer), layers)),
            sweeps,
        })
    }
}
