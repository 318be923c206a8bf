pub mod clock;
pub mod config;
pub mod digest;
pub mod error;
pub mod qa;
pub mod types;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::SdkConfig;
pub use error::{CampaignError, CampaignResult};
pub use qa::{CaptureQaSink, NoOpQaSink, QaSink};
pub use types::{AssetQueueItem, CampaignType, QaCampaignInfo};
