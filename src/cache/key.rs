//! Cache Keys
//!
//! A rendition is a validated (format, options) pair. Its cache keys have the
//! form `<format>-<fingerprint>-<name>`, where the fingerprint is the hex
//! FNV-1a digest of the options' JSON encoding. Keys are stable across
//! processes, so blobs written to disk by one run are found by the next.

use std::fmt;

use crate::error::{Error, Result};
use crate::hash::{fnv1a_64, hex64};
use crate::transform::{ImageFormat, TransformOptions};

/// Key under which one rendition of one origin object is cached
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey(String);

impl CacheKey {
    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for CacheKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// A servable output format plus transform options
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rendition {
    format: ImageFormat,
    options: TransformOptions,
    content_type: &'static str,
    prefix: String,
}

impl Rendition {
    /// Build a rendition. Callers normally go through
    /// [`Cache::rendition`](super::Cache::rendition), which also checks the
    /// format against the transformer's capabilities.
    pub fn new(
        format: ImageFormat,
        options: TransformOptions,
        content_type: &'static str,
    ) -> Result<Self> {
        options.validate()?;
        let encoded = serde_json::to_vec(&options)
            .map_err(|e| Error::Internal(format!("Failed to encode transform options: {}", e)))?;
        let prefix = format!("{}-{}", format.name(), hex64(fnv1a_64(&encoded)));

        Ok(Self {
            format,
            options,
            content_type,
            prefix,
        })
    }

    pub fn format(&self) -> ImageFormat {
        self.format
    }

    pub fn options(&self) -> &TransformOptions {
        &self.options
    }

    /// MIME type of the produced blobs
    pub fn content_type(&self) -> &'static str {
        self.content_type
    }

    /// Cache key for origin object `name`
    pub fn key_for(&self, name: &str) -> CacheKey {
        CacheKey(format!("{}-{}", self.prefix, name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn options(width: u32) -> TransformOptions {
        TransformOptions {
            width: Some(width),
            ..Default::default()
        }
    }

    #[test]
    fn test_key_layout() {
        let rendition = Rendition::new(ImageFormat::Webp, options(200), "image/webp").unwrap();
        let key = rendition.key_for("cat.jpg");

        let parts: Vec<&str> = key.as_str().splitn(3, '-').collect();
        assert_eq!(parts[0], "webp");
        assert_eq!(parts[1].len(), 16);
        assert_eq!(parts[2], "cat.jpg");
    }

    #[test]
    fn test_key_is_deterministic() {
        let a = Rendition::new(ImageFormat::Png, options(100), "image/png").unwrap();
        let b = Rendition::new(ImageFormat::Png, options(100), "image/png").unwrap();
        assert_eq!(a.key_for("x"), b.key_for("x"));
    }

    #[test]
    fn test_key_distinguishes_inputs() {
        let base = Rendition::new(ImageFormat::Png, options(100), "image/png").unwrap();
        let wider = Rendition::new(ImageFormat::Png, options(101), "image/png").unwrap();
        let other_format = Rendition::new(ImageFormat::Gif, options(100), "image/gif").unwrap();

        assert_ne!(base.key_for("x"), wider.key_for("x"));
        assert_ne!(base.key_for("x"), other_format.key_for("x"));
        assert_ne!(base.key_for("x"), base.key_for("y"));
    }

    #[test]
    fn test_invalid_options_rejected() {
        let bad = TransformOptions {
            quality: Some(0),
            ..Default::default()
        };
        assert_matches!(
            Rendition::new(ImageFormat::Jpeg, bad, "image/jpeg"),
            Err(Error::Validation(_))
        );
    }
}
