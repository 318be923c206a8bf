use serde::{Deserialize, Serialize};
use std::fmt;

// ─── Assets ─────────────────────────────────────────────────────────────────

/// A unit of downloadable campaign content.
///
/// Two items are equal only when all four fields match. For first-party
/// assets `digest` is the SHA-1 of the content; for external-source assets it
/// carries the URL the asset is fetched from and is never verified.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AssetQueueItem {
    pub name: String,
    pub digest: String,
    pub is_image: bool,
    pub is_external_source: bool,
}

impl AssetQueueItem {
    pub fn new(
        name: impl Into<String>,
        digest: impl Into<String>,
        is_image: bool,
        is_external_source: bool,
    ) -> Self {
        Self {
            name: name.into(),
            digest: digest.into(),
            is_image,
            is_external_source,
        }
    }

    /// First-party image whose name is its own digest.
    pub fn image(sha: impl Into<String>) -> Self {
        let sha = sha.into();
        Self::new(sha.clone(), sha, true, false)
    }

    /// Externally hosted image: stored under `name`, fetched from `url`.
    pub fn external_image(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self::new(name, url, true, true)
    }
}

// ─── Campaigns ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CampaignType {
    Conversation,
    #[serde(rename = "iam")]
    InApp,
    Embedded,
}

impl CampaignType {
    pub fn as_str(&self) -> &'static str {
        match self {
            CampaignType::Conversation => "conversation",
            CampaignType::InApp => "iam",
            CampaignType::Embedded => "embedded",
        }
    }
}

impl fmt::Display for CampaignType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One eligibility decision as surfaced to QA tooling.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QaCampaignInfo {
    pub campaign_id: i64,
    /// Id of the conversation or message variant inside the campaign.
    pub variant_id: i64,
    pub campaign_type: CampaignType,
    pub displayed: bool,
    pub reason: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_asset_item_equality_uses_all_fields() {
        let a = AssetQueueItem::new("a.png", "abc123", true, false);
        let b = AssetQueueItem::new("a.png", "abc123", true, true);
        assert_ne!(a, b);

        let mut set = HashSet::new();
        set.insert(a.clone());
        set.insert(a.clone());
        set.insert(b);
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn test_campaign_type_serializes_to_qa_names() {
        assert_eq!(serde_json::to_string(&CampaignType::InApp).unwrap(), "\"iam\"");
        assert_eq!(
            serde_json::to_string(&CampaignType::Conversation).unwrap(),
            "\"conversation\""
        );
        assert_eq!(CampaignType::Embedded.to_string(), "embedded");
    }
}
