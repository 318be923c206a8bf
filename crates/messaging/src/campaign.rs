//! A synced campaign and its rule chain: trigger match, active window,
//! impression cap, launch delay and inter-message throttle.

use crate::content::{CampaignKind, Orientation};
use crate::state::CampaignState;
use crate::trigger::{Payload, Trigger};
use campaign_core::config::MessagingConfig;
use campaign_core::{AssetQueueItem, CampaignError, CampaignResult, CampaignType, QaCampaignInfo};
use chrono::{DateTime, Duration, FixedOffset, Utc};
use rand::RngCore;
use std::collections::{HashMap, HashSet};
use std::fmt;

const WAIT_TIME_FORMAT: &str = "%H:%M:%S %:z";

/// Throttle parameters, resolved from config defaults and the campaign's
/// own `rules` block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CampaignRules {
    pub max_impressions: u64,
    pub delay_first_message: Duration,
    pub min_delay_between_messages: Duration,
}

impl CampaignRules {
    pub fn from_config(config: &MessagingConfig) -> Self {
        Self {
            max_impressions: config.max_impressions,
            delay_first_message: clamped_seconds(config.delay_first_message_secs),
            min_delay_between_messages: clamped_seconds(config.min_delay_between_messages_secs),
        }
    }
}

/// Negative delays count as zero; values past what `Duration` can hold
/// saturate.
fn clamped_seconds(secs: i64) -> Duration {
    Duration::try_seconds(secs.max(0)).unwrap_or(Duration::MAX)
}

impl Default for CampaignRules {
    fn default() -> Self {
        Self::from_config(&MessagingConfig::default())
    }
}

/// Why a campaign cannot be shown for an event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    NoMatchingTrigger {
        campaign_id: i64,
        event: String,
    },
    NotStarted {
        campaign_id: i64,
        now: DateTime<Utc>,
        start: DateTime<Utc>,
    },
    Finished {
        campaign_id: i64,
        now: DateTime<Utc>,
        end: DateTime<Utc>,
    },
    ImpressionCap {
        campaign_id: i64,
        max_impressions: u64,
    },
    TooSoonAfterLaunch {
        wait_until: DateTime<FixedOffset>,
    },
    TooSoonAfterLastMessage {
        wait_until: DateTime<FixedOffset>,
    },
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Rejection::NoMatchingTrigger { campaign_id, event } => {
                write!(f, "There is no trigger in {campaign_id} that matches {event}")
            }
            Rejection::NotStarted {
                campaign_id,
                now,
                start,
            } => write!(
                f,
                "Campaign {campaign_id} not started yet (now: {now}, start: {start})"
            ),
            Rejection::Finished {
                campaign_id,
                now,
                end,
            } => write!(f, "Campaign {campaign_id} has finished (now: {now}, end: {end})"),
            Rejection::ImpressionCap {
                campaign_id,
                max_impressions,
            } => write!(
                f,
                "{{Campaign throttle limit}} Campaign {campaign_id} has been shown {max_impressions} times already"
            ),
            Rejection::TooSoonAfterLaunch { wait_until } => write!(
                f,
                "{{Campaign throttle limit}} Too soon after launch. Wait until {}",
                wait_until.format(WAIT_TIME_FORMAT)
            ),
            Rejection::TooSoonAfterLastMessage { wait_until } => write!(
                f,
                "{{Campaign throttle limit}} Too soon after last message. Wait until {}",
                wait_until.format(WAIT_TIME_FORMAT)
            ),
        }
    }
}

/// Outcome of `Campaign::check_campaign_limits`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Eligibility {
    Eligible,
    Rejected(Rejection),
}

impl Eligibility {
    pub fn is_eligible(&self) -> bool {
        matches!(self, Eligibility::Eligible)
    }

    pub fn reason(&self) -> String {
        match self {
            Eligibility::Eligible => "Campaign is eligible".to_string(),
            Eligibility::Rejected(rejection) => rejection.to_string(),
        }
    }
}

impl From<Result<(), Rejection>> for Eligibility {
    fn from(result: Result<(), Rejection>) -> Self {
        match result {
            Ok(()) => Eligibility::Eligible,
            Err(rejection) => Eligibility::Rejected(rejection),
        }
    }
}

/// Everything a rule check reads besides the campaign itself. Clock readings
/// are taken once per evaluation by the caller.
pub struct EvaluationContext<'a> {
    pub now_local: DateTime<FixedOffset>,
    pub now_utc: DateTime<Utc>,
    pub auto_show_trigger: &'a str,
    pub rng: &'a mut dyn RngCore,
}

#[derive(Debug, Clone)]
pub struct Campaign {
    id: i64,
    kind: CampaignKind,
    triggers: Vec<Trigger>,
    start_date: DateTime<Utc>,
    end_date: DateTime<Utc>,
    message_center: bool,
    subject: String,
    priority: i32,
    rules: CampaignRules,
    show_messages_after_launch: DateTime<Utc>,
    state: CampaignState,
}

impl Campaign {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        id: i64,
        kind: CampaignKind,
        triggers: Vec<Trigger>,
        start_date: DateTime<Utc>,
        end_date: DateTime<Utc>,
        message_center: bool,
        subject: String,
        priority: i32,
        rules: CampaignRules,
        initialised_at: DateTime<Utc>,
        state: CampaignState,
    ) -> CampaignResult<Self> {
        let show_messages_after_launch = initialised_at
            .checked_add_signed(rules.delay_first_message)
            .ok_or_else(|| {
                CampaignError::MalformedCampaign(format!(
                    "campaign {id}: delay_first_message is out of range"
                ))
            })?;
        Ok(Self {
            id,
            kind,
            triggers,
            start_date,
            end_date,
            message_center,
            subject,
            priority,
            rules,
            show_messages_after_launch,
            state,
        })
    }

    pub fn id(&self) -> i64 {
        self.id
    }

    pub fn kind(&self) -> &CampaignKind {
        &self.kind
    }

    pub fn name(&self) -> &str {
        self.kind.name()
    }

    pub fn campaign_type(&self) -> CampaignType {
        self.kind.campaign_type()
    }

    pub fn triggers(&self) -> &[Trigger] {
        &self.triggers
    }

    pub fn start_date(&self) -> DateTime<Utc> {
        self.start_date
    }

    pub fn end_date(&self) -> DateTime<Utc> {
        self.end_date
    }

    pub fn is_message_center(&self) -> bool {
        self.message_center
    }

    pub fn subject(&self) -> &str {
        &self.subject
    }

    /// Lower values win.
    pub fn priority(&self) -> i32 {
        self.priority
    }

    pub fn rules(&self) -> &CampaignRules {
        &self.rules
    }

    pub fn state(&self) -> &CampaignState {
        &self.state
    }

    pub(crate) fn set_state(&mut self, state: CampaignState) {
        self.state = state;
    }

    /// True if any trigger matches (OR across triggers, AND within one).
    pub fn can_trigger(&self, event_name: &str, payload: &Payload, rng: &mut dyn RngCore) -> bool {
        self.triggers
            .iter()
            .any(|t| t.matches(event_name, payload, &mut *rng))
    }

    pub fn has_trigger_named(&self, event_name: &str) -> bool {
        self.triggers
            .iter()
            .any(|t| t.event_name.eq_ignore_ascii_case(event_name))
    }

    /// Start date is inclusive, end date exclusive.
    pub fn is_active(&self, now_utc: DateTime<Utc>) -> Result<(), Rejection> {
        if now_utc < self.start_date {
            return Err(Rejection::NotStarted {
                campaign_id: self.id,
                now: now_utc,
                start: self.start_date,
            });
        }
        if now_utc >= self.end_date {
            return Err(Rejection::Finished {
                campaign_id: self.id,
                now: now_utc,
                end: self.end_date,
            });
        }
        Ok(())
    }

    pub fn check_impressions(&self) -> Result<(), Rejection> {
        if self.state.impressions() >= self.rules.max_impressions {
            return Err(Rejection::ImpressionCap {
                campaign_id: self.id,
                max_impressions: self.rules.max_impressions,
            });
        }
        Ok(())
    }

    fn check_launch_delay(&self, now_local: DateTime<FixedOffset>) -> Result<(), Rejection> {
        if now_local.with_timezone(&Utc) < self.show_messages_after_launch {
            return Err(Rejection::TooSoonAfterLaunch {
                wait_until: self.show_messages_after_launch.with_timezone(now_local.offset()),
            });
        }
        Ok(())
    }

    fn check_message_delay(&self, now_local: DateTime<FixedOffset>) -> Result<(), Rejection> {
        match self.state.show_messages_after_delay() {
            Some(after) if now_local.with_timezone(&Utc) < after => {
                Err(Rejection::TooSoonAfterLastMessage {
                    wait_until: after.with_timezone(now_local.offset()),
                })
            }
            _ => Ok(()),
        }
    }

    /// Runs the rule chain in order and stops at the first failing check.
    /// The launch delay is skipped for the auto-show trigger.
    pub fn check_campaign_limits(
        &self,
        event_name: &str,
        payload: &Payload,
        ctx: &mut EvaluationContext<'_>,
    ) -> Eligibility {
        self.run_checks(event_name, payload, ctx).into()
    }

    fn run_checks(
        &self,
        event_name: &str,
        payload: &Payload,
        ctx: &mut EvaluationContext<'_>,
    ) -> Result<(), Rejection> {
        if !self.can_trigger(event_name, payload, &mut *ctx.rng) {
            return Err(Rejection::NoMatchingTrigger {
                campaign_id: self.id,
                event: event_name.to_string(),
            });
        }
        self.is_active(ctx.now_utc)?;
        self.check_impressions()?;
        if !event_name.eq_ignore_ascii_case(ctx.auto_show_trigger) {
            self.check_launch_delay(ctx.now_local)?;
        }
        self.check_message_delay(ctx.now_local)
    }

    pub fn are_assets_ready(
        &self,
        personalization: &HashMap<String, String>,
        on_disk: &HashSet<String>,
    ) -> bool {
        self.kind.are_assets_ready(personalization, on_disk)
    }

    pub fn supports_orientation(&self, orientation: Orientation) -> bool {
        self.kind.supports_orientation(orientation)
    }

    pub fn asset_queue_items(&self, personalization: &HashMap<String, String>) -> HashSet<AssetQueueItem> {
        self.kind.asset_queue_items(personalization)
    }

    pub fn qa_info(&self, displayed: bool, reason: impl Into<String>) -> QaCampaignInfo {
        qa_record(self.id, &self.kind, displayed, reason)
    }
}

pub(crate) fn qa_record(
    campaign_id: i64,
    kind: &CampaignKind,
    displayed: bool,
    reason: impl Into<String>,
) -> QaCampaignInfo {
    QaCampaignInfo {
        campaign_id,
        variant_id: kind.variant_id(),
        campaign_type: kind.campaign_type(),
        displayed,
        reason: reason.into(),
    }
}

impl fmt::Display for Campaign {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Campaign[{} {}]", self.id, self.campaign_type())
    }
}
