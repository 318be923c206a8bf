//! QA diagnostics sink — receives every eligibility decision and asset
//! failure when QA logging is enabled for the device.
//!
//! Callers pass a `&dyn QaSink` into evaluation; `NoOpQaSink` is the default.

use crate::types::QaCampaignInfo;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

pub trait QaSink: Send + Sync {
    fn campaign_evaluated(&self, info: QaCampaignInfo);

    fn asset_failed_to_download(&self, _name: &str, _digest: &str, _reason: &str) {}
}

/// Discards everything.
pub struct NoOpQaSink;

impl QaSink for NoOpQaSink {
    fn campaign_evaluated(&self, _info: QaCampaignInfo) {}
}

/// An asset failure as recorded by `CaptureQaSink`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QaAssetFailure {
    pub name: String,
    pub digest: String,
    pub reason: String,
}

/// In-memory sink that captures records, used by the CLI `--qa` flag and tests.
#[derive(Default)]
pub struct CaptureQaSink {
    campaigns: Mutex<Vec<QaCampaignInfo>>,
    assets: Mutex<Vec<QaAssetFailure>>,
}

impl CaptureQaSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn campaigns(&self) -> Vec<QaCampaignInfo> {
        self.campaigns.lock().clone()
    }

    pub fn asset_failures(&self) -> Vec<QaAssetFailure> {
        self.assets.lock().clone()
    }

    pub fn count(&self) -> usize {
        self.campaigns.lock().len()
    }

    pub fn clear(&self) {
        self.campaigns.lock().clear();
        self.assets.lock().clear();
    }
}

impl QaSink for CaptureQaSink {
    fn campaign_evaluated(&self, info: QaCampaignInfo) {
        self.campaigns.lock().push(info);
    }

    fn asset_failed_to_download(&self, name: &str, digest: &str, reason: &str) {
        self.assets.lock().push(QaAssetFailure {
            name: name.to_string(),
            digest: digest.to_string(),
            reason: reason.to_string(),
        });
    }
}
