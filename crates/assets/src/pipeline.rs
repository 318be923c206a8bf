//! Asset retrieval pipeline.
//!
//! Batches run one at a time behind a single-worker gate and fetch their
//! items sequentially. The on-disk and retry sets live behind a short-lived
//! lock that is never held across a network or storage call.

use crate::storage::AssetStorage;
use crate::transport::{AssetTransport, CdnUrls};
use bytes::Bytes;
use campaign_core::{AssetQueueItem, NoOpQaSink, QaSink};
use metrics::counter;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Which queue a batch came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchKind {
    AutoShow,
    Campaign,
    Retry,
}

/// How a single requested item resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ItemOutcome {
    AlreadyOnDisk,
    Downloaded,
    /// Content did not hash to the declared digest. Dropped, not retried.
    DigestMismatch { actual: String },
    /// Transport failed; the item waits in the retry queue.
    QueuedForRetry { reason: String },
    /// Content was good but could not be stored.
    StorageFailed { reason: String },
}

/// Names of the items in a batch, grouped by outcome.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BatchReport {
    pub already_on_disk: Vec<String>,
    pub downloaded: Vec<String>,
    pub digest_mismatch: Vec<String>,
    pub queued_for_retry: Vec<String>,
    pub storage_failed: Vec<String>,
}

impl BatchReport {
    fn record(&mut self, name: &str, outcome: &ItemOutcome) {
        let bucket = match outcome {
            ItemOutcome::AlreadyOnDisk => &mut self.already_on_disk,
            ItemOutcome::Downloaded => &mut self.downloaded,
            ItemOutcome::DigestMismatch { .. } => &mut self.digest_mismatch,
            ItemOutcome::QueuedForRetry { .. } => &mut self.queued_for_retry,
            ItemOutcome::StorageFailed { .. } => &mut self.storage_failed,
        };
        bucket.push(name.to_string());
    }

    pub fn total(&self) -> usize {
        self.already_on_disk.len()
            + self.downloaded.len()
            + self.digest_mismatch.len()
            + self.queued_for_retry.len()
            + self.storage_failed.len()
    }

    /// Every item ended up on disk.
    pub fn all_available(&self) -> bool {
        self.already_on_disk.len() + self.downloaded.len() == self.total()
    }
}

#[derive(Debug, Default)]
struct PipelineState {
    assets_on_disk: HashSet<String>,
    missing_assets: HashSet<AssetQueueItem>,
}

pub struct AssetPipeline {
    transport: Arc<dyn AssetTransport>,
    storage: Arc<dyn AssetStorage>,
    urls: CdnUrls,
    qa: Arc<dyn QaSink>,
    state: Mutex<PipelineState>,
    worker: tokio::sync::Mutex<()>,
}

impl AssetPipeline {
    pub fn new(
        transport: Arc<dyn AssetTransport>,
        storage: Arc<dyn AssetStorage>,
        urls: CdnUrls,
    ) -> Self {
        Self {
            transport,
            storage,
            urls,
            qa: Arc::new(NoOpQaSink),
            state: Mutex::new(PipelineState::default()),
            worker: tokio::sync::Mutex::new(()),
        }
    }

    pub fn with_qa_sink(mut self, qa: Arc<dyn QaSink>) -> Self {
        self.qa = qa;
        self
    }

    /// Names confirmed present and verified.
    pub fn assets_on_disk(&self) -> HashSet<String> {
        self.state.lock().assets_on_disk.clone()
    }

    /// Items waiting for the next retry pass.
    pub fn missing_assets(&self) -> HashSet<AssetQueueItem> {
        self.state.lock().missing_assets.clone()
    }

    /// Marks names as already present, e.g. from a previous session's cache
    /// index.
    pub fn mark_on_disk<I, S>(&self, names: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut state = self.state.lock();
        state
            .assets_on_disk
            .extend(names.into_iter().map(Into::into));
    }

    /// Fetches every requested item that is not already on disk.
    pub async fn resolve_and_fetch(&self, requested: &HashSet<AssetQueueItem>) -> BatchReport {
        let _worker = self.worker.lock().await;
        self.run_batch(requested).await
    }

    /// Runs one batch and invokes `on_complete` once every item has resolved.
    pub async fn download_batch<F>(
        &self,
        requested: &HashSet<AssetQueueItem>,
        on_complete: F,
    ) -> BatchReport
    where
        F: FnOnce(&BatchReport),
    {
        let _worker = self.worker.lock().await;
        let report = self.run_batch(requested).await;
        on_complete(&report);
        report
    }

    /// Downloads the auto-show assets first, then the remaining campaign
    /// assets. `on_batch` fires once per batch, in that order.
    pub async fn download_assets<F>(
        &self,
        auto_show: &HashSet<AssetQueueItem>,
        assets: &HashSet<AssetQueueItem>,
        mut on_batch: F,
    ) -> (BatchReport, BatchReport)
    where
        F: FnMut(BatchKind, &BatchReport),
    {
        let _worker = self.worker.lock().await;

        let auto_show_report = self.run_batch(auto_show).await;
        on_batch(BatchKind::AutoShow, &auto_show_report);

        let campaign_report = self.run_batch(assets).await;
        on_batch(BatchKind::Campaign, &campaign_report);

        (auto_show_report, campaign_report)
    }

    /// Retries everything in the retry queue. The queue is snapshotted and
    /// cleared up front, so items that fail during this pass are queued
    /// fresh. Returns `None` without calling `on_complete` when there is
    /// nothing to retry.
    pub async fn download_any_missing_assets<F>(&self, on_complete: F) -> Option<BatchReport>
    where
        F: FnOnce(&BatchReport),
    {
        let _worker = self.worker.lock().await;

        let snapshot = std::mem::take(&mut self.state.lock().missing_assets);
        if snapshot.is_empty() {
            return None;
        }
        info!(
            count = snapshot.len(),
            "There were assets not yet downloaded. Retrieving them now"
        );

        let report = self.run_batch(&snapshot).await;
        on_complete(&report);
        Some(report)
    }

    async fn run_batch(&self, requested: &HashSet<AssetQueueItem>) -> BatchReport {
        let mut items: Vec<&AssetQueueItem> = requested.iter().collect();
        items.sort_by(|a, b| a.name.cmp(&b.name));

        let mut report = BatchReport::default();
        for item in items {
            let outcome = self.fetch_one(item).await;
            report.record(&item.name, &outcome);
        }

        debug!(
            requested = report.total(),
            downloaded = report.downloaded.len(),
            queued = report.queued_for_retry.len(),
            "Asset batch finished"
        );
        report
    }

    async fn fetch_one(&self, item: &AssetQueueItem) -> ItemOutcome {
        let known = self.state.lock().assets_on_disk.contains(&item.name);
        if known {
            return ItemOutcome::AlreadyOnDisk;
        }
        if self.storage.exists(&item.name).await {
            self.state.lock().assets_on_disk.insert(item.name.clone());
            counter!("assets.already_on_disk").increment(1);
            return ItemOutcome::AlreadyOnDisk;
        }

        // Removed before the attempt; a failure below puts it back.
        self.state.lock().missing_assets.remove(item);

        let url = match self.urls.resolve(item) {
            Ok(url) => url,
            Err(e) => return self.queue_for_retry(item, e.to_string()),
        };

        let (raw, stored) = if item.is_image {
            let image = match self.transport.fetch_image(&url).await {
                Ok(image) => image,
                Err(e) => return self.queue_for_retry(item, e.to_string()),
            };
            if let Some(outcome) = self.verify(item, &image.raw) {
                return outcome;
            }
            match image.bitmap.encode_png() {
                Ok(png) => (image.raw, png),
                Err(e) => return self.storage_failed(item, format!("could not encode image: {e}")),
            }
        } else {
            let bytes = match self.transport.fetch_bytes(&url).await {
                Ok(bytes) => bytes,
                Err(e) => return self.queue_for_retry(item, e.to_string()),
            };
            if let Some(outcome) = self.verify(item, &bytes) {
                return outcome;
            }
            (bytes.clone(), bytes)
        };

        if let Err(e) = self.storage.save(&item.name, &stored).await {
            return self.storage_failed(item, e.to_string());
        }

        self.state.lock().assets_on_disk.insert(item.name.clone());
        counter!("assets.downloaded").increment(1);
        debug!(
            name = %item.name,
            url = %url,
            received = raw.len(),
            stored = stored.len(),
            "Asset downloaded"
        );
        ItemOutcome::Downloaded
    }

    /// External-source items are trusted without a digest check.
    fn verify(&self, item: &AssetQueueItem, raw: &Bytes) -> Option<ItemOutcome> {
        if item.is_external_source {
            return None;
        }
        let actual = self.storage.digest(raw);
        if actual == item.digest {
            return None;
        }
        warn!(
            name = %item.name,
            expected = %item.digest,
            actual = %actual,
            "Error downloading asset: digest mismatch"
        );
        counter!("assets.digest_mismatch").increment(1);
        self.qa.asset_failed_to_download(
            &item.name,
            &item.digest,
            &format!("Asset sha1 verification failed (computed {actual})"),
        );
        Some(ItemOutcome::DigestMismatch { actual })
    }

    fn queue_for_retry(&self, item: &AssetQueueItem, reason: String) -> ItemOutcome {
        warn!(name = %item.name, reason = %reason, "Could not download asset, queued for retry");
        self.state.lock().missing_assets.insert(item.clone());
        counter!("assets.queued_for_retry").increment(1);
        self.qa
            .asset_failed_to_download(&item.name, &item.digest, &reason);
        ItemOutcome::QueuedForRetry { reason }
    }

    fn storage_failed(&self, item: &AssetQueueItem, reason: String) -> ItemOutcome {
        warn!(name = %item.name, reason = %reason, "Could not store asset");
        counter!("assets.storage_failed").increment(1);
        self.qa
            .asset_failed_to_download(&item.name, &item.digest, &reason);
        ItemOutcome::StorageFailed { reason }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryAssetStorage;
    use crate::transport::{Bitmap, FetchedImage};
    use async_trait::async_trait;
    use campaign_core::digest::sha1_hex;
    use campaign_core::CaptureQaSink;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use url::Url;

    struct PngBitmap(Bytes);

    impl Bitmap for PngBitmap {
        fn encode_png(&self) -> anyhow::Result<Bytes> {
            let mut out = b"PNG:".to_vec();
            out.extend_from_slice(&self.0);
            Ok(Bytes::from(out))
        }
    }

    struct UndecodableBitmap;

    impl Bitmap for UndecodableBitmap {
        fn encode_png(&self) -> anyhow::Result<Bytes> {
            anyhow::bail!("unsupported pixel format")
        }
    }

    #[derive(Default)]
    struct FakeTransport {
        bodies: HashMap<String, Bytes>,
        calls: AtomicUsize,
        undecodable: bool,
    }

    impl FakeTransport {
        fn serve(mut self, url: &str, body: &'static [u8]) -> Self {
            self.bodies.insert(url.to_string(), Bytes::from_static(body));
            self
        }

        fn undecodable(mut self) -> Self {
            self.undecodable = true;
            self
        }

        fn body(&self, url: &Url) -> anyhow::Result<Bytes> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.bodies
                .get(url.as_str())
                .cloned()
                .ok_or_else(|| anyhow::anyhow!("404 for {url}"))
        }
    }

    #[async_trait]
    impl AssetTransport for FakeTransport {
        async fn fetch_bytes(&self, url: &Url) -> anyhow::Result<Bytes> {
            self.body(url)
        }

        async fn fetch_image(&self, url: &Url) -> anyhow::Result<FetchedImage> {
            let raw = self.body(url)?;
            let bitmap: Box<dyn Bitmap> = if self.undecodable {
                Box::new(UndecodableBitmap)
            } else {
                Box::new(PngBitmap(raw.clone()))
            };
            Ok(FetchedImage { bitmap, raw })
        }
    }

    fn pipeline(
        transport: FakeTransport,
    ) -> (AssetPipeline, Arc<FakeTransport>, Arc<MemoryAssetStorage>) {
        let transport = Arc::new(transport);
        let storage = Arc::new(MemoryAssetStorage::new());
        let urls = CdnUrls::new("https://cdn.test/images/", "https://cdn.test/fonts/").unwrap();
        let pipeline = AssetPipeline::new(transport.clone(), storage.clone(), urls);
        (pipeline, transport, storage)
    }

    fn set(items: &[AssetQueueItem]) -> HashSet<AssetQueueItem> {
        items.iter().cloned().collect()
    }

    #[tokio::test]
    async fn test_image_is_verified_on_raw_bytes_and_stored_as_png() {
        let digest = sha1_hex(b"img");
        let url = format!("https://cdn.test/images/{digest}");
        let (pipeline, _, storage) = pipeline(FakeTransport::default().serve(&url, b"img"));

        let report = pipeline
            .resolve_and_fetch(&set(&[AssetQueueItem::image(digest.clone())]))
            .await;

        assert_eq!(report.downloaded, vec![digest.clone()]);
        assert_eq!(storage.get(&digest).unwrap().as_ref(), b"PNG:img");
        assert!(pipeline.assets_on_disk().contains(&digest));
    }

    #[tokio::test]
    async fn test_image_that_cannot_be_encoded_is_a_storage_failure() {
        let digest = sha1_hex(b"img");
        let url = format!("https://cdn.test/images/{digest}");
        let qa = Arc::new(CaptureQaSink::new());
        let (pipeline, _, storage) =
            pipeline(FakeTransport::default().serve(&url, b"img").undecodable());
        let pipeline = pipeline.with_qa_sink(qa.clone());

        let report = pipeline
            .resolve_and_fetch(&set(&[AssetQueueItem::image(digest.clone())]))
            .await;

        assert_eq!(report.storage_failed, vec![digest.clone()]);
        assert!(pipeline.missing_assets().is_empty());
        assert!(!pipeline.assets_on_disk().contains(&digest));
        assert!(storage.is_empty());
        assert!(qa.asset_failures()[0].reason.contains("could not encode image"));
    }

    #[tokio::test]
    async fn test_binary_is_stored_byte_for_byte() {
        let item = AssetQueueItem::new("font_a", sha1_hex(b"glyphs"), false, false);
        let (pipeline, _, storage) =
            pipeline(FakeTransport::default().serve("https://cdn.test/fonts/font_a", b"glyphs"));

        let report = pipeline.resolve_and_fetch(&set(&[item])).await;

        assert!(report.all_available());
        assert_eq!(storage.get("font_a").unwrap().as_ref(), b"glyphs");
    }

    #[tokio::test]
    async fn test_external_source_skips_digest_check() {
        let item = AssetQueueItem::external_image("ext", "https://elsewhere.test/pic.png");
        let (pipeline, _, _) =
            pipeline(FakeTransport::default().serve("https://elsewhere.test/pic.png", b"anything"));

        let report = pipeline.resolve_and_fetch(&set(&[item])).await;
        assert_eq!(report.downloaded, vec!["ext".to_string()]);
    }

    #[tokio::test]
    async fn test_transport_failure_is_queued_and_reported() {
        let qa = Arc::new(CaptureQaSink::new());
        let (pipeline, _, _) = pipeline(FakeTransport::default());
        let pipeline = pipeline.with_qa_sink(qa.clone());
        let item = AssetQueueItem::image("deadbeef");

        let report = pipeline.resolve_and_fetch(&set(&[item.clone()])).await;

        assert_eq!(report.queued_for_retry, vec!["deadbeef".to_string()]);
        assert!(pipeline.missing_assets().contains(&item));
        assert_eq!(qa.asset_failures().len(), 1);
        assert!(qa.asset_failures()[0].reason.contains("404"));
    }

    #[tokio::test]
    async fn test_known_asset_is_not_fetched_again() {
        let (pipeline, transport, _) = pipeline(FakeTransport::default());
        pipeline.mark_on_disk(["cached"]);

        let report = pipeline
            .resolve_and_fetch(&set(&[AssetQueueItem::image("cached")]))
            .await;

        assert_eq!(report.already_on_disk, vec!["cached".to_string()]);
        assert_eq!(transport.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_retry_with_empty_queue_does_nothing() {
        let (pipeline, _, _) = pipeline(FakeTransport::default());
        let mut called = false;
        let report = pipeline
            .download_any_missing_assets(|_| called = true)
            .await;
        assert!(report.is_none());
        assert!(!called);
    }

    #[test]
    fn test_report_totals() {
        let mut report = BatchReport::default();
        report.record("a", &ItemOutcome::Downloaded);
        report.record("b", &ItemOutcome::AlreadyOnDisk);
        assert!(report.all_available());
        report.record("c", &ItemOutcome::DigestMismatch { actual: "x".into() });
        assert_eq!(report.total(), 3);
        assert!(!report.all_available());
    }
}
