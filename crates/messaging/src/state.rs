//! Persisted per-campaign state. Transitions return a new value rather
//! than mutating in place, so the engine decides when state is committed.

use chrono::{DateTime, Duration, FixedOffset, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CampaignStatus {
    #[default]
    Unseen,
    Seen,
    Deleted,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CampaignState {
    impressions: u64,
    status: CampaignStatus,
    download_date: Option<DateTime<Utc>>,
    show_messages_after_delay: Option<DateTime<Utc>>,
}

impl CampaignState {
    pub fn new(download_date: DateTime<Utc>) -> Self {
        Self {
            download_date: Some(download_date),
            ..Self::default()
        }
    }

    pub fn impressions(&self) -> u64 {
        self.impressions
    }

    pub fn status(&self) -> CampaignStatus {
        self.status
    }

    pub fn download_date(&self) -> Option<DateTime<Utc>> {
        self.download_date
    }

    /// The "do not show before" instant set by the last show or dismiss.
    pub fn show_messages_after_delay(&self) -> Option<DateTime<Utc>> {
        self.show_messages_after_delay
    }

    /// The campaign was displayed: marks it seen, counts the impression and
    /// starts the inter-message throttle.
    pub fn shown(&self, now: DateTime<FixedOffset>, min_delay: Duration) -> Self {
        Self {
            impressions: self.impressions.saturating_add(1),
            status: CampaignStatus::Seen,
            ..self.throttled(now, min_delay)
        }
    }

    /// Restarts the inter-message throttle only. A delay reaching past the
    /// end of the calendar holds messages back indefinitely.
    pub fn throttled(&self, now: DateTime<FixedOffset>, min_delay: Duration) -> Self {
        Self {
            show_messages_after_delay: Some(
                now.with_timezone(&Utc)
                    .checked_add_signed(min_delay)
                    .unwrap_or(DateTime::<Utc>::MAX_UTC),
            ),
            ..self.clone()
        }
    }

    pub fn deleted(&self) -> Self {
        Self {
            status: CampaignStatus::Deleted,
            ..self.clone()
        }
    }
}
