//! In-app messaging decisions — trigger matching, campaign windows,
//! impression caps and message throttling for campaigns synced to the device.

pub mod campaign;
pub mod content;
pub mod engine;
pub mod loader;
pub mod state;
pub mod trigger;

pub use campaign::{Campaign, CampaignRules, Eligibility, EvaluationContext, Rejection};
pub use content::{CampaignKind, Orientation};
pub use engine::{AssetQueues, CampaignEngine, DisplayContext};
pub use loader::CampaignLoader;
pub use state::{CampaignState, CampaignStatus};
pub use trigger::{Payload, Trigger, TriggerConditions};
