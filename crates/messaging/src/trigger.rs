//! Trigger matching — decides whether an event name and payload can
//! activate a campaign.

use campaign_core::{CampaignError, CampaignResult};
use rand::{Rng, RngCore};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// Event payload as key/value strings.
pub type Payload = HashMap<String, String>;

const EVENT_NAME_KEY: &str = "event_name";
const CONDITIONS_KEY: &str = "conditions";
const RANDOM_KEY: &str = "random";

/// A single `key == value` requirement on the event payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PayloadCondition {
    pub key: String,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerConditions {
    /// Matches every occurrence of the named event.
    Always,
    /// Every condition must hold.
    AllOf(Vec<PayloadCondition>),
    /// Matches when a fresh uniform draw is below `probability`.
    Random { probability: f64 },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trigger {
    pub event_name: String,
    pub conditions: TriggerConditions,
}

impl Trigger {
    pub fn new(event_name: impl Into<String>, conditions: TriggerConditions) -> Self {
        Self {
            event_name: event_name.into(),
            conditions,
        }
    }

    /// Parses a trigger from either a bare event name or an
    /// `{"event_name": .., "conditions": {..}}` object.
    pub fn from_json(value: &Value) -> CampaignResult<Self> {
        match value {
            Value::String(name) => Ok(Self::new(name.clone(), TriggerConditions::Always)),
            Value::Object(obj) => {
                let event_name = obj
                    .get(EVENT_NAME_KEY)
                    .and_then(Value::as_str)
                    .ok_or_else(|| {
                        CampaignError::MalformedTrigger(format!("missing {EVENT_NAME_KEY}"))
                    })?;
                let conditions = match obj.get(CONDITIONS_KEY) {
                    None | Some(Value::Null) => TriggerConditions::Always,
                    Some(conditions) => parse_conditions(conditions)?,
                };
                Ok(Self::new(event_name, conditions))
            }
            other => Err(CampaignError::MalformedTrigger(format!(
                "expected string or object, got {other}"
            ))),
        }
    }

    /// Name comparison is case-insensitive; conditions are only consulted
    /// once the name matches. Random triggers draw from `rng` on every call.
    pub fn matches(&self, event_name: &str, payload: &Payload, rng: &mut dyn RngCore) -> bool {
        if !self.event_name.eq_ignore_ascii_case(event_name) {
            return false;
        }
        match &self.conditions {
            TriggerConditions::Always => true,
            TriggerConditions::AllOf(conditions) => conditions
                .iter()
                .all(|c| payload.get(&c.key).is_some_and(|v| *v == c.value)),
            TriggerConditions::Random { probability } => rng.gen::<f64>() < *probability,
        }
    }
}

fn parse_conditions(value: &Value) -> CampaignResult<TriggerConditions> {
    let obj = value.as_object().ok_or_else(|| {
        CampaignError::MalformedTrigger(format!("conditions must be an object, got {value}"))
    })?;
    if obj.is_empty() {
        return Ok(TriggerConditions::Always);
    }

    if let Some(random) = obj.get(RANDOM_KEY) {
        let probability = random
            .as_f64()
            .filter(|p| (0.0..=1.0).contains(p))
            .ok_or_else(|| {
                CampaignError::MalformedTrigger(format!("random must be within [0, 1], got {random}"))
            })?;
        return Ok(TriggerConditions::Random { probability });
    }

    match obj.get("op").and_then(Value::as_str) {
        Some("eq") => Ok(TriggerConditions::AllOf(vec![parse_eq(value)?])),
        Some("and") => {
            let args = obj.get("args").and_then(Value::as_array).ok_or_else(|| {
                CampaignError::MalformedTrigger("\"and\" condition without args".to_string())
            })?;
            let conditions = args.iter().map(parse_eq).collect::<CampaignResult<Vec<_>>>()?;
            Ok(TriggerConditions::AllOf(conditions))
        }
        Some(op) => Err(CampaignError::MalformedTrigger(format!(
            "unsupported condition op {op:?}"
        ))),
        None => Err(CampaignError::MalformedTrigger(format!(
            "condition without op: {value}"
        ))),
    }
}

fn parse_eq(value: &Value) -> CampaignResult<PayloadCondition> {
    if value.get("op").and_then(Value::as_str) != Some("eq") {
        return Err(CampaignError::MalformedTrigger(format!(
            "expected an eq condition, got {value}"
        )));
    }
    let key = value
        .get("key")
        .and_then(Value::as_str)
        .ok_or_else(|| CampaignError::MalformedTrigger("eq condition without key".to_string()))?;
    let value = match value.get("value") {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Number(n)) => n.to_string(),
        Some(Value::Bool(b)) => b.to_string(),
        _ => {
            return Err(CampaignError::MalformedTrigger(format!(
                "eq condition on {key:?} without a scalar value"
            )))
        }
    };
    Ok(PayloadCondition {
        key: key.to_string(),
        value,
    })
}
