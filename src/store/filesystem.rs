//! Sharded, content-addressed filesystem store
//!
//! # Layout
//!
//! ```text
//! <root>/<shard-letter>/<hex(fnv1a_64(key))>    (shards > 0)
//! <root>/<hex(fnv1a_64(key))>                   (shards = 0)
//! ```
//!
//! Filenames carry no extension. Shard directories are drawn from
//! [`SHARD_ALPHABET`], which bounds the shard count to 26.
//!
//! Writes go to a `<name>.tmp<pid>.<seq>` sibling and are renamed into place once
//! complete, so a failed put never leaves a partial blob behind. There is no
//! locking beyond what the OS provides: concurrent writers to the same key
//! race on the rename and the last one wins.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::debug;

use super::{BlobStore, Origin};
use crate::error::{Error, Result};
use crate::hash::{fnv1a_64, hex64};

/// Symbols used to name shard subdirectories
pub const SHARD_ALPHABET: &[u8; 26] = b"abcdefghijklmnopqrstuvwxyz";

/// Filesystem store configuration
#[derive(Debug, Clone)]
pub struct FilesystemStoreConfig {
    /// Existing directory that holds the blobs
    pub root: PathBuf,
    /// Number of shard subdirectories (0 = flat layout, max 26)
    pub shards: usize,
    /// Permission bits for blob files (Unix only)
    pub file_mode: u32,
    /// Permission bits for shard directories (Unix only)
    pub dir_mode: u32,
}

impl Default for FilesystemStoreConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("."),
            shards: 0,
            file_mode: 0o644,
            dir_mode: 0o755,
        }
    }
}

impl FilesystemStoreConfig {
    /// Config rooted at `root` with `shards` subdirectories and default modes
    pub fn new(root: impl Into<PathBuf>, shards: usize) -> Self {
        Self {
            root: root.into(),
            shards,
            ..Default::default()
        }
    }
}

/// Content-addressed blob store on a local filesystem
#[derive(Debug)]
pub struct FilesystemStore {
    root: PathBuf,
    shards: usize,
    #[cfg_attr(not(unix), allow(dead_code))]
    file_mode: u32,
    /// Suffix counter for in-flight temporary files
    next_temp: AtomicU64,
}

impl FilesystemStore {
    /// Validate the root directory and pre-create shard subdirectories.
    ///
    /// Fails with [`Error::Validation`] if the root is missing or not a
    /// directory, or if more shards are requested than [`SHARD_ALPHABET`]
    /// has symbols. Shard directories that already exist are reused.
    pub async fn open(config: FilesystemStoreConfig) -> Result<Self> {
        if config.shards > SHARD_ALPHABET.len() {
            return Err(Error::Validation(format!(
                "number of requested shards is too large: {} (maximum: {})",
                config.shards,
                SHARD_ALPHABET.len()
            )));
        }

        let meta = tokio::fs::metadata(&config.root).await.map_err(|e| {
            Error::Validation(format!(
                "cache root '{}' is not accessible: {}",
                config.root.display(),
                e
            ))
        })?;
        if !meta.is_dir() {
            return Err(Error::Validation(format!(
                "cache root '{}' is not a directory",
                config.root.display()
            )));
        }

        for &letter in SHARD_ALPHABET.iter().take(config.shards) {
            let dir = config.root.join((letter as char).to_string());
            let mut builder = tokio::fs::DirBuilder::new();
            #[cfg(unix)]
            builder.mode(config.dir_mode);
            match builder.create(&dir).await {
                Ok(()) => debug!("Created shard directory {}", dir.display()),
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {}
                Err(e) => return Err(Error::Io(e)),
            }
        }

        Ok(Self {
            root: config.root,
            shards: config.shards,
            file_mode: config.file_mode,
            next_temp: AtomicU64::new(0),
        })
    }

    /// Root directory of the store
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Number of shard subdirectories (0 = flat)
    pub fn shards(&self) -> usize {
        self.shards
    }

    /// Shard letter a key maps to, or `None` for a flat layout
    pub fn shard_for(&self, key: &str) -> Option<char> {
        if self.shards == 0 {
            return None;
        }
        let index = (fnv1a_64(key.as_bytes()) % self.shards as u64) as usize;
        Some(SHARD_ALPHABET[index] as char)
    }

    /// Absolute location of the file backing `key`
    pub fn path_for(&self, key: &str) -> PathBuf {
        let name = hex64(fnv1a_64(key.as_bytes()));
        match self.shard_for(key) {
            Some(shard) => self.root.join(shard.to_string()).join(name),
            None => self.root.join(name),
        }
    }

    /// Fresh sibling of `path` to stage a write in
    fn temp_path_for(&self, path: &Path) -> PathBuf {
        let seq = self.next_temp.fetch_add(1, Ordering::Relaxed);
        let mut name = path.file_name().unwrap_or_default().to_os_string();
        name.push(format!(".tmp{}.{}", std::process::id(), seq));
        path.with_file_name(name)
    }

    async fn write_staged(&self, temp: &Path, path: &Path, content: &[u8]) -> Result<()> {
        let mut options = tokio::fs::OpenOptions::new();
        options.write(true).create(true).truncate(true);
        #[cfg(unix)]
        options.mode(self.file_mode);

        let mut file = options.open(temp).await?;
        write_fully(&mut file, content).await?;
        file.flush().await?;
        drop(file);

        tokio::fs::rename(temp, path).await?;
        Ok(())
    }
}

/// Write all of `content`, failing with [`Error::ShortWrite`] if the writer
/// stops accepting bytes early
async fn write_fully<W>(writer: &mut W, content: &[u8]) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut written = 0;
    while written < content.len() {
        match writer.write(&content[written..]).await? {
            0 => {
                return Err(Error::ShortWrite {
                    expected: content.len(),
                    written,
                })
            }
            n => written += n,
        }
    }
    Ok(())
}

fn read_error(key: &str, err: std::io::Error) -> Error {
    if err.kind() == ErrorKind::NotFound {
        Error::not_found(key)
    } else {
        Error::Io(err)
    }
}

#[async_trait]
impl BlobStore for FilesystemStore {
    async fn put(&self, key: &str, content: Bytes) -> Result<()> {
        let path = self.path_for(key);
        let temp = self.temp_path_for(&path);

        let result = self.write_staged(&temp, &path, &content).await;
        if result.is_err() {
            if let Err(e) = tokio::fs::remove_file(&temp).await {
                if e.kind() != ErrorKind::NotFound {
                    debug!("Failed to remove {}: {}", temp.display(), e);
                }
            }
        }
        result
    }

    async fn get(&self, key: &str) -> Result<Bytes> {
        tokio::fs::read(self.path_for(key))
            .await
            .map(Bytes::from)
            .map_err(|e| read_error(key, e))
    }

    async fn exists(&self, key: &str) -> bool {
        tokio::fs::metadata(self.path_for(key))
            .await
            .map(|m| m.is_file())
            .unwrap_or(false)
    }

    async fn delete(&self, key: &str) -> Result<()> {
        match tokio::fs::remove_file(self.path_for(key)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::Io(e)),
        }
    }
}

#[async_trait]
impl Origin for FilesystemStore {
    async fn exists(&self, key: &str) -> bool {
        BlobStore::exists(self, key).await
    }

    async fn get(&self, key: &str) -> Result<Bytes> {
        BlobStore::get(self, key).await
    }
}

// =============================================================================
// Tests
// =============================================================================
