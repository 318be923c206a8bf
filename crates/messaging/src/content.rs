//! Campaign content variants — conversations, in-app messages and embedded
//! messages — and the asset/orientation capabilities each one provides.

use campaign_core::digest::sha1_hex;
use campaign_core::{AssetQueueItem, CampaignType};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Orientation {
    Portrait,
    Landscape,
    #[default]
    Both,
}

impl Orientation {
    fn supports(self, requested: Orientation) -> bool {
        self == Orientation::Both || requested == Orientation::Both || self == requested
    }
}

// ─── Shared image references ───────────────────────────────────────────

/// An image slot: a static CDN asset, a personalized URL template, or both
/// (the static asset is the fallback when the template cannot be used).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageRef {
    #[serde(default)]
    pub value: Option<String>,
    #[serde(default)]
    pub dynamic_image_url: Option<String>,
}

impl ImageRef {
    fn is_ready(&self, personalization: &HashMap<String, String>, on_disk: &HashSet<String>) -> bool {
        if let Some(url) = self
            .dynamic_image_url
            .as_deref()
            .and_then(|t| resolve_template(t, personalization))
        {
            if on_disk.contains(&external_asset_name(&url)) {
                return true;
            }
        }
        match &self.value {
            Some(value) => on_disk.contains(value),
            None => self.dynamic_image_url.is_none(),
        }
    }

    fn queue_items(&self, personalization: &HashMap<String, String>, out: &mut HashSet<AssetQueueItem>) {
        if let Some(value) = &self.value {
            out.insert(AssetQueueItem::image(value.clone()));
        }
        if let Some(url) = self
            .dynamic_image_url
            .as_deref()
            .and_then(|t| resolve_template(t, personalization))
        {
            out.insert(AssetQueueItem::external_image(external_asset_name(&url), url));
        }
    }
}

/// Externally hosted assets are stored under the SHA-1 of their URL.
pub fn external_asset_name(url: &str) -> String {
    sha1_hex(url.as_bytes())
}

/// Substitutes `${key}` placeholders. Returns `None` if any placeholder has
/// no value in `properties` or is left unterminated.
pub fn resolve_template(template: &str, properties: &HashMap<String, String>) -> Option<String> {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let end = after.find('}')?;
        let key = after[..end].trim();
        out.push_str(properties.get(key)?);
        rest = &after[end + 1..];
    }
    out.push_str(rest);
    Some(out)
}

// ─── Conversation ──────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: i64,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub priority: Option<i32>,
    #[serde(default)]
    pub pages: Vec<ConversationPage>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationPage {
    #[serde(default)]
    pub content: Vec<ConversationContent>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationContent {
    #[serde(rename = "type")]
    pub content_type: String,
    #[serde(default)]
    pub value: serde_json::Value,
}

impl Conversation {
    pub fn image_assets(&self) -> impl Iterator<Item = &str> {
        self.pages
            .iter()
            .flat_map(|p| p.content.iter())
            .filter(|c| c.content_type == "image")
            .filter_map(|c| c.value.as_str())
    }
}

// ─── In-app message ────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InAppMessage {
    pub id: i64,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub priority: Option<i32>,
    #[serde(default)]
    pub template: MessageTemplate,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MessageTemplate {
    #[serde(default)]
    pub formats: Vec<MessageFormat>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageFormat {
    #[serde(default)]
    pub orientation: Orientation,
    #[serde(default)]
    pub images: Vec<ImageElement>,
    #[serde(default)]
    pub buttons: Vec<ButtonElement>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageElement {
    pub image: ImageRef,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ButtonElement {
    #[serde(default)]
    pub image_up: Option<ImageRef>,
}

impl MessageFormat {
    fn image_refs(&self) -> impl Iterator<Item = &ImageRef> {
        self.images
            .iter()
            .map(|i| &i.image)
            .chain(self.buttons.iter().filter_map(|b| b.image_up.as_ref()))
    }
}

// ─── Embedded message ──────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbeddedMessage {
    pub id: i64,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub priority: Option<i32>,
    #[serde(rename = "type", default = "default_embedded_type")]
    pub message_type: String,
    #[serde(default)]
    pub data: String,
    #[serde(default)]
    pub buttons: Vec<String>,
}

fn default_embedded_type() -> String {
    "other".to_string()
}

// ─── Closed variant set ────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CampaignKind {
    Conversation(Conversation),
    InApp(InAppMessage),
    Embedded(EmbeddedMessage),
}

impl CampaignKind {
    pub fn campaign_type(&self) -> CampaignType {
        match self {
            CampaignKind::Conversation(_) => CampaignType::Conversation,
            CampaignKind::InApp(_) => CampaignType::InApp,
            CampaignKind::Embedded(_) => CampaignType::Embedded,
        }
    }

    /// Id of the conversation or message inside the campaign.
    pub fn variant_id(&self) -> i64 {
        match self {
            CampaignKind::Conversation(c) => c.id,
            CampaignKind::InApp(m) => m.id,
            CampaignKind::Embedded(m) => m.id,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            CampaignKind::Conversation(c) => &c.name,
            CampaignKind::InApp(m) => &m.name,
            CampaignKind::Embedded(m) => &m.name,
        }
    }

    pub fn priority(&self) -> Option<i32> {
        match self {
            CampaignKind::Conversation(c) => c.priority,
            CampaignKind::InApp(m) => m.priority,
            CampaignKind::Embedded(m) => m.priority,
        }
    }

    pub fn are_assets_ready(
        &self,
        personalization: &HashMap<String, String>,
        on_disk: &HashSet<String>,
    ) -> bool {
        match self {
            CampaignKind::Conversation(c) => c.image_assets().all(|a| on_disk.contains(a)),
            CampaignKind::InApp(m) => m
                .template
                .formats
                .iter()
                .flat_map(MessageFormat::image_refs)
                .all(|r| r.is_ready(personalization, on_disk)),
            CampaignKind::Embedded(_) => true,
        }
    }

    pub fn supports_orientation(&self, orientation: Orientation) -> bool {
        match self {
            CampaignKind::InApp(m) => m
                .template
                .formats
                .iter()
                .any(|f| f.orientation.supports(orientation)),
            CampaignKind::Conversation(_) | CampaignKind::Embedded(_) => true,
        }
    }

    /// Assets this content needs on disk before it can render.
    pub fn asset_queue_items(&self, personalization: &HashMap<String, String>) -> HashSet<AssetQueueItem> {
        let mut items = HashSet::new();
        match self {
            CampaignKind::Conversation(c) => {
                items.extend(c.image_assets().map(AssetQueueItem::image));
            }
            CampaignKind::InApp(m) => {
                for image in m.template.formats.iter().flat_map(MessageFormat::image_refs) {
                    image.queue_items(personalization, &mut items);
                }
            }
            CampaignKind::Embedded(_) => {}
        }
        items
    }
}
