//! Transform Collaborator
//!
//! Image formats, transform options and the [`Transformer`] boundary the
//! cache calls on a full miss. Actual image processing lives behind the
//! trait; [`Passthrough`] is the built-in implementation that returns the
//! origin bytes unchanged.
//!
//! Format capability is resolved once: a [`FormatRegistry`] is built from the
//! transformer at startup and owned by the [`Cache`](crate::cache::Cache).

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Target image format
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageFormat {
    Jpeg,
    Webp,
    Png,
    Tiff,
    Gif,
    Pdf,
    Svg,
    Magick,
    Heif,
    Avif,
}

impl ImageFormat {
    /// Every known format
    pub const ALL: [ImageFormat; 10] = [
        ImageFormat::Jpeg,
        ImageFormat::Webp,
        ImageFormat::Png,
        ImageFormat::Tiff,
        ImageFormat::Gif,
        ImageFormat::Pdf,
        ImageFormat::Svg,
        ImageFormat::Magick,
        ImageFormat::Heif,
        ImageFormat::Avif,
    ];

    /// Canonical lowercase name, also used as the cache key prefix
    pub fn name(self) -> &'static str {
        match self {
            ImageFormat::Jpeg => "jpeg",
            ImageFormat::Webp => "webp",
            ImageFormat::Png => "png",
            ImageFormat::Tiff => "tiff",
            ImageFormat::Gif => "gif",
            ImageFormat::Pdf => "pdf",
            ImageFormat::Svg => "svg",
            ImageFormat::Magick => "magick",
            ImageFormat::Heif => "heif",
            ImageFormat::Avif => "avif",
        }
    }

    /// MIME type served for this format. PDF, SVG and Magick output is
    /// never served.
    pub fn content_type(self) -> Option<&'static str> {
        match self {
            ImageFormat::Jpeg => Some("image/jpeg"),
            ImageFormat::Webp => Some("image/webp"),
            ImageFormat::Png => Some("image/png"),
            ImageFormat::Tiff => Some("image/tiff"),
            ImageFormat::Gif => Some("image/gif"),
            ImageFormat::Heif => Some("image/heif"),
            ImageFormat::Avif => Some("image/avif"),
            ImageFormat::Pdf | ImageFormat::Svg | ImageFormat::Magick => None,
        }
    }
}

impl fmt::Display for ImageFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ImageFormat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let lower = s.to_ascii_lowercase();
        if lower == "jpg" {
            return Ok(ImageFormat::Jpeg);
        }
        ImageFormat::ALL
            .into_iter()
            .find(|format| format.name() == lower)
            .ok_or_else(|| Error::UnsupportedFormat(format!("unknown image format '{}'", s)))
    }
}

/// Transform parameters. Part of the cache key, so every field must
/// serialize deterministically.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TransformOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
    /// Encoder quality, 1-100
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quality: Option<u8>,
}

impl TransformOptions {
    /// Reject values no encoder accepts
    pub fn validate(&self) -> Result<()> {
        if self.width == Some(0) || self.height == Some(0) {
            return Err(Error::Validation(
                "width and height must be positive".to_string(),
            ));
        }
        if let Some(quality) = self.quality {
            if !(1..=100).contains(&quality) {
                return Err(Error::Validation(format!(
                    "quality must be between 1 and 100, got {}",
                    quality
                )));
            }
        }
        Ok(())
    }
}

/// Turns origin bytes into a rendition in the target format
pub trait Transformer: Send + Sync {
    /// Formats this transformer can produce
    fn supported_formats(&self) -> Vec<ImageFormat>;

    /// Transform `content`. May block; the cache runs it off the async
    /// executor.
    fn transform(
        &self,
        content: Bytes,
        options: &TransformOptions,
        format: ImageFormat,
    ) -> Result<Bytes>;
}

/// Returns origin bytes unchanged, for origins that already hold renditions
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Passthrough {
    formats: Vec<ImageFormat>,
}

impl Passthrough {
    /// Advertise only `formats`
    pub fn with_formats(formats: impl IntoIterator<Item = ImageFormat>) -> Self {
        Self {
            formats: formats.into_iter().collect(),
        }
    }
}

impl Default for Passthrough {
    fn default() -> Self {
        Self::with_formats(ImageFormat::ALL)
    }
}

impl Transformer for Passthrough {
    fn supported_formats(&self) -> Vec<ImageFormat> {
        self.formats.clone()
    }

    fn transform(
        &self,
        content: Bytes,
        _options: &TransformOptions,
        _format: ImageFormat,
    ) -> Result<Bytes> {
        Ok(content)
    }
}

/// Immutable table of the formats a cache can serve
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FormatRegistry {
    supported: BTreeSet<ImageFormat>,
}

impl FormatRegistry {
    pub fn new(formats: impl IntoIterator<Item = ImageFormat>) -> Self {
        Self {
            supported: formats.into_iter().collect(),
        }
    }

    /// Ask `transformer` once for its capabilities
    pub fn from_transformer(transformer: &dyn Transformer) -> Self {
        Self::new(transformer.supported_formats())
    }

    pub fn supports(&self, format: ImageFormat) -> bool {
        self.supported.contains(&format)
    }

    /// Supported formats in declaration order
    pub fn formats(&self) -> impl Iterator<Item = ImageFormat> + '_ {
        self.supported.iter().copied()
    }

    /// Content type for a servable format, or `UnsupportedFormat`
    pub fn resolve(&self, format: ImageFormat) -> Result<&'static str> {
        match format.content_type() {
            Some(content_type) if self.supports(format) => Ok(content_type),
            _ => Err(Error::UnsupportedFormat(format!(
                "image type {} is not supported",
                format
            ))),
        }
    }
}
