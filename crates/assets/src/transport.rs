//! Network side of the asset pipeline: CDN URL resolution and the fetch
//! adapter hosts plug in.

use async_trait::async_trait;
use bytes::Bytes;
use campaign_core::config::AssetsConfig;
use campaign_core::{AssetQueueItem, CampaignError, CampaignResult};
use url::Url;

/// A decoded image. Hosts wrap whatever image type their platform decodes
/// into; the pipeline only needs it re-encoded as PNG for storage.
pub trait Bitmap: Send {
    fn encode_png(&self) -> anyhow::Result<Bytes>;
}

const PNG_SIGNATURE: &[u8] = b"\x89PNG\r\n\x1a\n";

/// A bitmap for hosts without an image decoder: PNG bodies are stored as
/// served, any other format fails to encode.
#[derive(Debug, Clone)]
pub struct PngPassthrough {
    raw: Bytes,
}

impl PngPassthrough {
    pub fn new(raw: Bytes) -> Self {
        Self { raw }
    }
}

impl Bitmap for PngPassthrough {
    fn encode_png(&self) -> anyhow::Result<Bytes> {
        if self.raw.starts_with(PNG_SIGNATURE) {
            Ok(self.raw.clone())
        } else {
            anyhow::bail!("image is not PNG and no decoder is available")
        }
    }
}

/// An image response: the bytes as served, plus the decoded bitmap.
pub struct FetchedImage {
    pub raw: Bytes,
    pub bitmap: Box<dyn Bitmap>,
}

/// Fetches asset content. Any error is treated as transient by the
/// pipeline and the item is queued for retry.
#[async_trait]
pub trait AssetTransport: Send + Sync {
    async fn fetch_bytes(&self, url: &Url) -> anyhow::Result<Bytes>;

    async fn fetch_image(&self, url: &Url) -> anyhow::Result<FetchedImage>;
}

/// CDN roots for first-party assets.
#[derive(Debug, Clone)]
pub struct CdnUrls {
    images: Url,
    fonts: Url,
}

impl CdnUrls {
    pub fn new(images: &str, fonts: &str) -> CampaignResult<Self> {
        Ok(Self {
            images: parse_root(images)?,
            fonts: parse_root(fonts)?,
        })
    }

    pub fn from_config(config: &AssetsConfig) -> CampaignResult<Self> {
        Self::new(&config.cdn_images, &config.cdn_fonts)
    }

    /// External items carry their source URL in the digest field; everything
    /// else is fetched by name from the image or font root.
    pub fn resolve(&self, item: &AssetQueueItem) -> CampaignResult<Url> {
        let url = if item.is_external_source {
            Url::parse(&item.digest)
        } else if item.is_image {
            self.images.join(&item.name)
        } else {
            self.fonts.join(&item.name)
        };
        url.map_err(|e| CampaignError::Transport(format!("cannot resolve {}: {e}", item.name)))
    }
}

fn parse_root(root: &str) -> CampaignResult<Url> {
    // Url::join replaces the last path segment unless the base ends in '/'.
    let normalized = if root.ends_with('/') {
        root.to_string()
    } else {
        format!("{root}/")
    };
    Url::parse(&normalized).map_err(|e| CampaignError::Config(format!("bad CDN root {root}: {e}")))
}
