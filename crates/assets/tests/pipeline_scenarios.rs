//! Asset pipeline behaviour across batches, retries and failures.

use async_trait::async_trait;
use bytes::Bytes;
use campaign_assets::{
    AssetPipeline, AssetStorage, AssetTransport, BatchKind, Bitmap, CdnUrls, FetchedImage,
    FsAssetStorage, MemoryAssetStorage,
};
use campaign_core::digest::sha1_hex;
use campaign_core::{AssetQueueItem, CaptureQaSink};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use url::Url;

const IMAGES: &str = "https://cdn.test/images/";
const FONTS: &str = "https://cdn.test/fonts/";

struct Passthrough(Bytes);

impl Bitmap for Passthrough {
    fn encode_png(&self) -> anyhow::Result<Bytes> {
        Ok(self.0.clone())
    }
}

/// Serves fixed bodies; URLs in `down` fail as if the network dropped.
#[derive(Default)]
struct ScriptedTransport {
    bodies: HashMap<String, Bytes>,
    down: Mutex<HashSet<String>>,
    requests: Mutex<Vec<String>>,
}

impl ScriptedTransport {
    fn serve(mut self, url: impl Into<String>, body: &[u8]) -> Self {
        self.bodies.insert(url.into(), Bytes::copy_from_slice(body));
        self
    }

    fn take_down(&self, url: impl Into<String>) {
        self.down.lock().insert(url.into());
    }

    fn bring_up(&self, url: &str) {
        self.down.lock().remove(url);
    }

    fn requests(&self) -> Vec<String> {
        self.requests.lock().clone()
    }

    fn respond(&self, url: &Url) -> anyhow::Result<Bytes> {
        self.requests.lock().push(url.to_string());
        if self.down.lock().contains(url.as_str()) {
            anyhow::bail!("connection reset fetching {url}");
        }
        self.bodies
            .get(url.as_str())
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("not found: {url}"))
    }
}

#[async_trait]
impl AssetTransport for ScriptedTransport {
    async fn fetch_bytes(&self, url: &Url) -> anyhow::Result<Bytes> {
        self.respond(url)
    }

    async fn fetch_image(&self, url: &Url) -> anyhow::Result<FetchedImage> {
        let raw = self.respond(url)?;
        Ok(FetchedImage {
            bitmap: Box::new(Passthrough(raw.clone())),
            raw,
        })
    }
}

/// Storage that refuses every write.
struct ReadOnlyStorage;

#[async_trait]
impl AssetStorage for ReadOnlyStorage {
    async fn exists(&self, _name: &str) -> bool {
        false
    }

    async fn save(&self, name: &str, _bytes: &[u8]) -> anyhow::Result<()> {
        anyhow::bail!("disk full writing {name}")
    }
}

fn urls() -> CdnUrls {
    CdnUrls::new(IMAGES, FONTS).unwrap()
}

fn set(items: &[AssetQueueItem]) -> HashSet<AssetQueueItem> {
    items.iter().cloned().collect()
}

#[tokio::test]
async fn digest_mismatch_is_discarded_and_not_retried() {
    let item = AssetQueueItem::new("a.png", "abc123", true, false);
    let transport =
        Arc::new(ScriptedTransport::default().serve(format!("{IMAGES}a.png"), b"not the asset"));
    let storage = Arc::new(MemoryAssetStorage::new());
    let qa = Arc::new(CaptureQaSink::new());
    let pipeline =
        AssetPipeline::new(transport.clone(), storage.clone(), urls()).with_qa_sink(qa.clone());

    let report = pipeline.resolve_and_fetch(&set(&[item])).await;

    assert_eq!(report.digest_mismatch, vec!["a.png".to_string()]);
    assert!(pipeline.assets_on_disk().is_empty());
    assert!(pipeline.missing_assets().is_empty());
    assert!(storage.is_empty());
    assert!(qa.asset_failures()[0].reason.contains("sha1"));
}

#[tokio::test]
async fn on_disk_batches_complete_in_order_without_network() {
    let transport = Arc::new(ScriptedTransport::default());
    let storage = Arc::new(MemoryAssetStorage::new());
    storage.insert("auto_img", Bytes::from_static(b"a"));
    storage.insert("other_img", Bytes::from_static(b"b"));
    let pipeline = AssetPipeline::new(transport.clone(), storage, urls());

    let mut order = Vec::new();
    let (auto_show, campaign) = pipeline
        .download_assets(
            &set(&[AssetQueueItem::image("auto_img")]),
            &set(&[AssetQueueItem::image("other_img")]),
            |kind, report| order.push((kind, report.total())),
        )
        .await;

    assert_eq!(order, vec![(BatchKind::AutoShow, 1), (BatchKind::Campaign, 1)]);
    assert_eq!(auto_show.already_on_disk, vec!["auto_img".to_string()]);
    assert_eq!(campaign.already_on_disk, vec!["other_img".to_string()]);
    assert!(transport.requests().is_empty());
}

#[tokio::test]
async fn retry_pass_only_requeues_what_failed_again() {
    let x = AssetQueueItem::new("x", sha1_hex(b"xx"), false, false);
    let y = AssetQueueItem::new("y", sha1_hex(b"yy"), false, false);
    let transport = Arc::new(
        ScriptedTransport::default()
            .serve(format!("{FONTS}x"), b"xx")
            .serve(format!("{FONTS}y"), b"yy"),
    );
    transport.take_down(format!("{FONTS}x"));
    transport.take_down(format!("{FONTS}y"));
    let pipeline = AssetPipeline::new(
        transport.clone(),
        Arc::new(MemoryAssetStorage::new()),
        urls(),
    );

    pipeline.resolve_and_fetch(&set(&[x.clone(), y.clone()])).await;
    assert_eq!(pipeline.missing_assets(), set(&[x.clone(), y.clone()]));

    transport.bring_up(&format!("{FONTS}y"));
    let mut callbacks = 0;
    let report = pipeline
        .download_any_missing_assets(|_| callbacks += 1)
        .await
        .unwrap();

    assert_eq!(callbacks, 1);
    assert_eq!(report.downloaded, vec!["y".to_string()]);
    assert_eq!(report.queued_for_retry, vec!["x".to_string()]);
    assert_eq!(pipeline.missing_assets(), set(&[x]));
    assert!(pipeline.assets_on_disk().contains("y"));
}

#[tokio::test]
async fn storage_failure_does_not_abort_siblings() {
    let good = AssetQueueItem::new("good", sha1_hex(b"g"), false, false);
    let bad = AssetQueueItem::new("unreachable", sha1_hex(b"u"), false, false);
    let transport = Arc::new(ScriptedTransport::default().serve(format!("{FONTS}good"), b"g"));
    let pipeline = AssetPipeline::new(transport.clone(), Arc::new(ReadOnlyStorage), urls());

    let mut seen = None;
    let report = pipeline
        .download_batch(&set(&[good, bad.clone()]), |r| seen = Some(r.clone()))
        .await;

    assert_eq!(seen.as_ref(), Some(&report));
    assert_eq!(report.storage_failed, vec!["good".to_string()]);
    assert_eq!(report.queued_for_retry, vec!["unreachable".to_string()]);
    assert_eq!(pipeline.missing_assets(), set(&[bad]));
    assert_eq!(transport.requests().len(), 2);
}

#[tokio::test]
async fn filesystem_store_persists_verified_assets() {
    let dir = tempfile::tempdir().unwrap();
    let storage = Arc::new(FsAssetStorage::open(dir.path()).await.unwrap());
    let digest = sha1_hex(b"pixels");
    let transport = Arc::new(ScriptedTransport::default().serve(format!("{IMAGES}{digest}"), b"pixels"));
    let pipeline = AssetPipeline::new(transport.clone(), storage.clone(), urls());
    let item = AssetQueueItem::image(digest.clone());

    let first = pipeline.resolve_and_fetch(&set(&[item.clone()])).await;
    assert_eq!(first.downloaded, vec![digest.clone()]);
    assert!(dir.path().join(&digest).exists());

    // A fresh pipeline over the same directory finds the file without fetching.
    let fresh = AssetPipeline::new(transport.clone(), storage, urls());
    let second = fresh.resolve_and_fetch(&set(&[item])).await;
    assert_eq!(second.already_on_disk, vec![digest]);
    assert_eq!(transport.requests().len(), 1);
}

/// Tracks how many fetches are in flight at once.
#[derive(Default)]
struct OverlapTransport {
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    requests: Mutex<Vec<String>>,
}

#[async_trait]
impl AssetTransport for OverlapTransport {
    async fn fetch_bytes(&self, url: &Url) -> anyhow::Result<Bytes> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        self.requests.lock().push(url.path().to_string());
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        let name = url.path_segments().and_then(|s| s.last()).unwrap_or_default();
        Ok(Bytes::from(name.to_string()))
    }

    async fn fetch_image(&self, url: &Url) -> anyhow::Result<FetchedImage> {
        let raw = self.fetch_bytes(url).await?;
        Ok(FetchedImage {
            bitmap: Box::new(Passthrough(raw.clone())),
            raw,
        })
    }
}

fn font(name: &str) -> AssetQueueItem {
    AssetQueueItem::new(name, sha1_hex(name.as_bytes()), false, false)
}

#[tokio::test]
async fn concurrent_batches_run_one_at_a_time() {
    let transport = Arc::new(OverlapTransport::default());
    let pipeline = AssetPipeline::new(
        transport.clone(),
        Arc::new(MemoryAssetStorage::new()),
        urls(),
    );
    let first = set(&[font("a1"), font("a2")]);
    let second = set(&[font("b1"), font("b2")]);

    let (r1, r2) = tokio::join!(
        pipeline.resolve_and_fetch(&first),
        pipeline.download_batch(&second, |_| {}),
    );

    assert_eq!(r1.downloaded.len() + r2.downloaded.len(), 4);
    assert_eq!(transport.max_in_flight.load(Ordering::SeqCst), 1);
    // Each batch's requests are contiguous.
    let order: Vec<String> = transport.requests.lock().clone();
    let batch_of = |path: &String| path.ends_with("a1") || path.ends_with("a2");
    assert_eq!(batch_of(&order[0]), batch_of(&order[1]));
    assert_eq!(batch_of(&order[2]), batch_of(&order[3]));
    assert_ne!(batch_of(&order[0]), batch_of(&order[2]));
}
