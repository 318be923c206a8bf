//! Campaign loader — turns synced campaign definitions into typed campaigns.
//!
//! A malformed definition only costs that one campaign (or trigger); its
//! siblings still load.

use crate::campaign::{qa_record, Campaign, CampaignRules};
use crate::content::{CampaignKind, Conversation, EmbeddedMessage, InAppMessage};
use crate::state::CampaignState;
use crate::trigger::Trigger;
use campaign_core::config::MessagingConfig;
use campaign_core::{CampaignError, CampaignResult, QaSink};
use chrono::{DateTime, Duration, TimeZone, Utc};
use serde_json::{Map, Value};
use std::collections::HashMap;
use tracing::{debug, warn};

const ID_KEY: &str = "id";
const CONVERSATION_KEY: &str = "conversation";
const MESSAGE_KEY: &str = "message";
const EMBEDDED_MESSAGE_KEY: &str = "embedded_message";
const SUBJECT_KEY: &str = "subject";
const MESSAGE_CENTER_KEY: &str = "message_center";
const TRIGGERS_KEY: &str = "triggers";
const RULES_KEY: &str = "rules";
const DISMISS_AFTER_VIEWS_KEY: &str = "dismiss_after_views";
const DELAY_FIRST_MESSAGE_KEY: &str = "delay_first_message";
const MIN_DELAY_BETWEEN_MESSAGES_KEY: &str = "min_delay_between_messages";
const START_DATE_KEY: &str = "start_date";
const END_DATE_KEY: &str = "end_date";

pub struct CampaignLoader {
    defaults: MessagingConfig,
    initialised_at: DateTime<Utc>,
}

impl CampaignLoader {
    /// `initialised_at` is the SDK start time the launch delay counts from.
    pub fn new(defaults: MessagingConfig, initialised_at: DateTime<Utc>) -> Self {
        Self {
            defaults,
            initialised_at,
        }
    }

    /// Loads every campaign in `definitions` (a JSON array, or an object with
    /// a `campaigns` array), carrying prior state forward by campaign id.
    pub fn load_all(
        &self,
        definitions: &Value,
        prior_states: &HashMap<i64, CampaignState>,
        now: DateTime<Utc>,
        sink: &dyn QaSink,
    ) -> Vec<Campaign> {
        let entries = match definitions {
            Value::Array(entries) => entries.as_slice(),
            Value::Object(obj) => match obj.get("campaigns").and_then(Value::as_array) {
                Some(entries) => entries.as_slice(),
                None => {
                    warn!("Campaign definitions object has no campaigns array");
                    return Vec::new();
                }
            },
            _ => {
                warn!("Campaign definitions must be an array or an object");
                return Vec::new();
            }
        };

        let mut campaigns = Vec::with_capacity(entries.len());
        for entry in entries {
            let prior = entry
                .get(ID_KEY)
                .and_then(Value::as_i64)
                .and_then(|id| prior_states.get(&id).cloned());
            match self.load(entry, prior, now, sink) {
                Ok(Some(campaign)) => campaigns.push(campaign),
                Ok(None) => {}
                Err(e) => warn!(error = %e, "Unable to load campaign, skipping"),
            }
        }
        debug!(loaded = campaigns.len(), total = entries.len(), "Campaigns loaded");
        campaigns
    }

    /// Loads one campaign. Returns `Ok(None)` for a campaign that nothing
    /// could ever show: no triggers and not in the message center.
    pub fn load(
        &self,
        data: &Value,
        prior_state: Option<CampaignState>,
        now: DateTime<Utc>,
        sink: &dyn QaSink,
    ) -> CampaignResult<Option<Campaign>> {
        let obj = data
            .as_object()
            .ok_or_else(|| CampaignError::MalformedCampaign("expected an object".to_string()))?;
        let id = obj
            .get(ID_KEY)
            .and_then(Value::as_i64)
            .ok_or_else(|| CampaignError::MalformedCampaign("missing integer id".to_string()))?;

        let kind = parse_kind(obj).map_err(|e| {
            CampaignError::MalformedCampaign(format!("campaign {id}: {e}"))
        })?;
        let triggers = parse_triggers(id, obj);
        let message_center = obj
            .get(MESSAGE_CENTER_KEY)
            .and_then(Value::as_bool)
            .unwrap_or(false);

        if !message_center && triggers.is_empty() {
            let reason = format!("Campaign [{id}], has no triggers. Skipping this campaign.");
            debug!(campaign_id = id, "{reason}");
            sink.campaign_evaluated(qa_record(id, &kind, false, reason));
            return Ok(None);
        }

        let rules = self.parse_rules(id, obj)?;
        let start_date = parse_date(id, obj, START_DATE_KEY)?;
        let end_date = parse_date(id, obj, END_DATE_KEY)?;
        let subject = obj
            .get(SUBJECT_KEY)
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let priority = kind.priority().unwrap_or(self.defaults.default_priority);
        let state = prior_state.unwrap_or_else(|| CampaignState::new(now));

        Ok(Some(Campaign::new(
            id,
            kind,
            triggers,
            start_date,
            end_date,
            message_center,
            subject,
            priority,
            rules,
            self.initialised_at,
            state,
        )?))
    }

    fn parse_rules(&self, id: i64, obj: &Map<String, Value>) -> CampaignResult<CampaignRules> {
        let mut rules = CampaignRules::from_config(&self.defaults);
        let Some(raw) = obj.get(RULES_KEY) else {
            return Ok(rules);
        };
        let raw = raw.as_object().ok_or_else(|| {
            CampaignError::MalformedCampaign(format!("campaign {id}: rules must be an object"))
        })?;

        if let Some(v) = raw.get(DISMISS_AFTER_VIEWS_KEY) {
            rules.max_impressions = v.as_u64().ok_or_else(|| bad_rule(id, DISMISS_AFTER_VIEWS_KEY))?;
        }
        if let Some(v) = raw.get(DELAY_FIRST_MESSAGE_KEY) {
            rules.delay_first_message = delay_rule(id, DELAY_FIRST_MESSAGE_KEY, v)?;
        }
        if let Some(v) = raw.get(MIN_DELAY_BETWEEN_MESSAGES_KEY) {
            rules.min_delay_between_messages = delay_rule(id, MIN_DELAY_BETWEEN_MESSAGES_KEY, v)?;
        }
        Ok(rules)
    }
}

fn bad_rule(id: i64, key: &str) -> CampaignError {
    CampaignError::MalformedCampaign(format!("campaign {id}: rule {key} must be an integer"))
}

/// A delay in whole seconds, non-negative and small enough for `Duration`.
fn delay_rule(id: i64, key: &str, value: &Value) -> CampaignResult<Duration> {
    value
        .as_i64()
        .filter(|secs| *secs >= 0)
        .and_then(Duration::try_seconds)
        .ok_or_else(|| {
            CampaignError::MalformedCampaign(format!(
                "campaign {id}: rule {key} must be a non-negative number of seconds in range"
            ))
        })
}

/// The three variant keys are mutually exclusive; the first one present wins.
fn parse_kind(obj: &Map<String, Value>) -> CampaignResult<CampaignKind> {
    if let Some(v) = obj.get(CONVERSATION_KEY) {
        let conversation: Conversation = serde_json::from_value(v.clone())?;
        return Ok(CampaignKind::Conversation(conversation));
    }
    if let Some(v) = obj.get(MESSAGE_KEY) {
        let message: InAppMessage = serde_json::from_value(v.clone())?;
        return Ok(CampaignKind::InApp(message));
    }
    if let Some(v) = obj.get(EMBEDDED_MESSAGE_KEY) {
        let message: EmbeddedMessage = serde_json::from_value(v.clone())?;
        return Ok(CampaignKind::Embedded(message));
    }
    Err(CampaignError::MalformedCampaign(format!(
        "none of {CONVERSATION_KEY}, {MESSAGE_KEY} or {EMBEDDED_MESSAGE_KEY} present"
    )))
}

fn parse_triggers(id: i64, obj: &Map<String, Value>) -> Vec<Trigger> {
    let Some(raw) = obj.get(TRIGGERS_KEY).and_then(Value::as_array) else {
        return Vec::new();
    };
    raw.iter()
        .filter_map(|t| match Trigger::from_json(t) {
            Ok(trigger) => Some(trigger),
            Err(e) => {
                warn!(campaign_id = id, trigger = %t, error = %e, "Unable to parse trigger, skipping");
                None
            }
        })
        .collect()
}

fn parse_date(id: i64, obj: &Map<String, Value>, key: &str) -> CampaignResult<DateTime<Utc>> {
    obj.get(key)
        .and_then(Value::as_i64)
        .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
        .ok_or_else(|| {
            CampaignError::MalformedCampaign(format!("campaign {id}: {key} must be epoch milliseconds"))
        })
}
