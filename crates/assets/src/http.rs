//! `reqwest`-backed transport for hosts that fetch assets over HTTP.

use crate::transport::{AssetTransport, FetchedImage, PngPassthrough};
use async_trait::async_trait;
use bytes::Bytes;
use std::time::Duration;
use tracing::debug;
use url::Url;

/// Single-attempt HTTP GET. Non-2xx responses are errors, which the
/// pipeline queues for retry.
///
/// Images are not decoded: the body is handed over as a [`PngPassthrough`],
/// so anything other than PNG fails to store. Hosts with an image decoder
/// wrap this client and supply their own [`crate::Bitmap`].
pub struct HttpAssetTransport {
    client: reqwest::Client,
}

impl HttpAssetTransport {
    pub fn new(timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client })
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl AssetTransport for HttpAssetTransport {
    async fn fetch_bytes(&self, url: &Url) -> anyhow::Result<Bytes> {
        let response = self
            .client
            .get(url.clone())
            .send()
            .await?
            .error_for_status()?;
        let body = response.bytes().await?;
        debug!(url = %url, size = body.len(), "Fetched asset");
        Ok(body)
    }

    async fn fetch_image(&self, url: &Url) -> anyhow::Result<FetchedImage> {
        let raw = self.fetch_bytes(url).await?;
        Ok(FetchedImage {
            bitmap: Box::new(PngPassthrough::new(raw.clone())),
            raw,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_unreachable_host_is_an_error() {
        let transport = HttpAssetTransport::new(Duration::from_millis(500)).unwrap();
        // Nothing listens on the loopback discard port.
        let url = Url::parse("http://127.0.0.1:9/images/abc").unwrap();
        assert!(transport.fetch_bytes(&url).await.is_err());
        assert!(transport.fetch_image(&url).await.is_err());
    }
}
