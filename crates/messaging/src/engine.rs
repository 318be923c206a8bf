//! Campaign eligibility engine — owns the synced ruleset, the clock, and the
//! single random source shared by every random trigger.
//!
//! Show/dismiss notifications restart the inter-message throttle on every
//! loaded campaign, so one message on screen holds back all the others.

use crate::campaign::{Campaign, Eligibility, EvaluationContext};
use crate::content::Orientation;
use crate::loader::CampaignLoader;
use crate::state::{CampaignState, CampaignStatus};
use crate::trigger::Payload;
use campaign_core::config::MessagingConfig;
use campaign_core::{AssetQueueItem, CampaignError, CampaignResult, Clock, QaSink};
use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info};

/// Device-side facts needed to pick a message to display.
#[derive(Debug, Clone, Default)]
pub struct DisplayContext {
    pub orientation: Orientation,
    pub personalization: HashMap<String, String>,
    pub assets_on_disk: HashSet<String>,
}

/// Asset needs of the current ruleset, split so that assets of campaigns
/// shown at session start can be fetched first.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AssetQueues {
    pub auto_show: HashSet<AssetQueueItem>,
    pub all: HashSet<AssetQueueItem>,
}

pub struct CampaignEngine {
    config: MessagingConfig,
    clock: Arc<dyn Clock>,
    rng: Box<dyn RngCore + Send>,
    initialised_at: DateTime<Utc>,
    campaigns: Vec<Campaign>,
}

impl CampaignEngine {
    /// Creates an engine whose launch delay counts from now. The random
    /// source is seeded once here, from `random_seed` when configured.
    pub fn new(config: MessagingConfig, clock: Arc<dyn Clock>) -> Self {
        let rng: Box<dyn RngCore + Send> = match config.random_seed {
            Some(seed) => Box::new(StdRng::seed_from_u64(seed)),
            None => Box::new(StdRng::from_entropy()),
        };
        let initialised_at = clock.now_utc();
        info!(%initialised_at, "Campaign engine initialised");
        Self {
            config,
            clock,
            rng,
            initialised_at,
            campaigns: Vec::new(),
        }
    }

    /// Replaces the random source used by random triggers.
    pub fn with_rng(mut self, rng: impl RngCore + Send + 'static) -> Self {
        self.rng = Box::new(rng);
        self
    }

    pub fn initialised_at(&self) -> DateTime<Utc> {
        self.initialised_at
    }

    pub fn config(&self) -> &MessagingConfig {
        &self.config
    }

    /// Replaces the ruleset wholesale. State from `prior_states` is carried
    /// forward by campaign id. Returns the number of campaigns loaded.
    pub fn load_campaigns(
        &mut self,
        definitions: &Value,
        prior_states: &HashMap<i64, CampaignState>,
        sink: &dyn QaSink,
    ) -> usize {
        let loader = CampaignLoader::new(self.config.clone(), self.initialised_at);
        self.campaigns = loader.load_all(definitions, prior_states, self.clock.now_utc(), sink);
        info!(count = self.campaigns.len(), "Campaign ruleset loaded");
        self.campaigns.len()
    }

    pub fn campaigns(&self) -> &[Campaign] {
        &self.campaigns
    }

    pub fn campaign(&self, id: i64) -> Option<&Campaign> {
        self.campaigns.iter().find(|c| c.id() == id)
    }

    /// Runs the rule chain for one campaign. A rejection is logged and
    /// reported to `sink`.
    pub fn check_campaign_limits(
        &mut self,
        id: i64,
        event_name: &str,
        payload: &Payload,
        sink: &dyn QaSink,
    ) -> CampaignResult<Eligibility> {
        let now_local = self.clock.now_local();
        let now_utc = self.clock.now_utc();
        let campaign = self
            .campaigns
            .iter()
            .find(|c| c.id() == id)
            .ok_or(CampaignError::UnknownCampaign(id))?;
        let mut ctx = EvaluationContext {
            now_local,
            now_utc,
            auto_show_trigger: &self.config.auto_show_trigger,
            rng: &mut *self.rng,
        };
        Ok(evaluate(campaign, event_name, payload, &mut ctx, sink))
    }

    /// Evaluates every campaign that has not been deleted, in load order.
    pub fn evaluate_all(
        &mut self,
        event_name: &str,
        payload: &Payload,
        sink: &dyn QaSink,
    ) -> Vec<(i64, Eligibility)> {
        let mut ctx = EvaluationContext {
            now_local: self.clock.now_local(),
            now_utc: self.clock.now_utc(),
            auto_show_trigger: &self.config.auto_show_trigger,
            rng: &mut *self.rng,
        };
        self.campaigns
            .iter()
            .filter(|c| c.state().status() != CampaignStatus::Deleted)
            .map(|c| (c.id(), evaluate(c, event_name, payload, &mut ctx, sink)))
            .collect()
    }

    /// Picks the campaign to display for an event: eligible, assets on disk,
    /// orientation supported, lowest priority value. Ties go to load order.
    pub fn message_for_event(
        &mut self,
        event_name: &str,
        payload: &Payload,
        display: &DisplayContext,
        sink: &dyn QaSink,
    ) -> Option<&Campaign> {
        let eligible: Vec<i64> = self
            .evaluate_all(event_name, payload, sink)
            .into_iter()
            .filter(|(_, e)| e.is_eligible())
            .map(|(id, _)| id)
            .collect();

        let mut candidates = Vec::new();
        for campaign in self.campaigns.iter().filter(|c| eligible.contains(&c.id())) {
            if !campaign.supports_orientation(display.orientation) {
                let reason = format!("Campaign {} does not support the current orientation", campaign.id());
                debug!(campaign_id = campaign.id(), "{reason}");
                sink.campaign_evaluated(campaign.qa_info(false, reason));
            } else if !campaign.are_assets_ready(&display.personalization, &display.assets_on_disk) {
                let reason = format!("Campaign {} assets are not downloaded yet", campaign.id());
                debug!(campaign_id = campaign.id(), "{reason}");
                sink.campaign_evaluated(campaign.qa_info(false, reason));
            } else {
                candidates.push(campaign);
            }
        }

        // min_by_key keeps the first of equal elements.
        let chosen = candidates.iter().copied().min_by_key(|c| c.priority())?;
        for other in candidates.iter().filter(|c| c.id() != chosen.id()) {
            sink.campaign_evaluated(other.qa_info(
                false,
                format!("Campaign {} was selected for display ahead of it", chosen.id()),
            ));
        }
        info!(campaign_id = chosen.id(), event = event_name, "Campaign selected for display");
        sink.campaign_evaluated(chosen.qa_info(true, "Campaign was selected for display"));
        Some(chosen)
    }

    /// Records that `id` was displayed. Call exactly once per display.
    pub fn was_shown_to_user(&mut self, id: i64) -> CampaignResult<()> {
        self.ensure_known(id)?;
        let now = self.clock.now_local();
        for campaign in &mut self.campaigns {
            let delay = campaign.rules().min_delay_between_messages;
            let next = if campaign.id() == id {
                campaign.state().shown(now, delay)
            } else {
                campaign.state().throttled(now, delay)
            };
            campaign.set_state(next);
        }
        metrics::counter!("campaigns.shown").increment(1);
        debug!(campaign_id = id, "Campaign shown to user");
        Ok(())
    }

    /// Records that the message for `id` was dismissed. Call exactly once
    /// per dismissal.
    pub fn message_dismissed(&mut self, id: i64) -> CampaignResult<()> {
        self.ensure_known(id)?;
        let now = self.clock.now_local();
        for campaign in &mut self.campaigns {
            let next = campaign
                .state()
                .throttled(now, campaign.rules().min_delay_between_messages);
            campaign.set_state(next);
        }
        debug!(campaign_id = id, "Campaign message dismissed");
        Ok(())
    }

    /// Removes a campaign from the message center for good.
    pub fn remove_campaign(&mut self, id: i64) -> CampaignResult<()> {
        let campaign = self
            .campaigns
            .iter_mut()
            .find(|c| c.id() == id)
            .ok_or(CampaignError::UnknownCampaign(id))?;
        let next = campaign.state().deleted();
        campaign.set_state(next);
        Ok(())
    }

    /// Message center campaigns that are live and not deleted.
    pub fn message_center_campaigns(&self) -> Vec<&Campaign> {
        let now = self.clock.now_utc();
        self.campaigns
            .iter()
            .filter(|c| c.is_message_center())
            .filter(|c| c.state().status() != CampaignStatus::Deleted)
            .filter(|c| c.is_active(now).is_ok())
            .collect()
    }

    /// Snapshot of every campaign's state, for persistence.
    pub fn campaign_states(&self) -> HashMap<i64, CampaignState> {
        self.campaigns
            .iter()
            .map(|c| (c.id(), c.state().clone()))
            .collect()
    }

    pub fn asset_queues(&self, personalization: &HashMap<String, String>) -> AssetQueues {
        let mut queues = AssetQueues::default();
        for campaign in &self.campaigns {
            let items = campaign.asset_queue_items(personalization);
            if campaign.has_trigger_named(&self.config.auto_show_trigger) {
                queues.auto_show.extend(items.iter().cloned());
            }
            queues.all.extend(items);
        }
        queues
    }

    fn ensure_known(&self, id: i64) -> CampaignResult<()> {
        self.campaign(id)
            .map(|_| ())
            .ok_or(CampaignError::UnknownCampaign(id))
    }
}

fn evaluate(
    campaign: &Campaign,
    event_name: &str,
    payload: &Payload,
    ctx: &mut EvaluationContext<'_>,
    sink: &dyn QaSink,
) -> Eligibility {
    metrics::counter!("campaigns.evaluated").increment(1);
    let eligibility = campaign.check_campaign_limits(event_name, payload, ctx);
    if let Eligibility::Rejected(rejection) = &eligibility {
        metrics::counter!("campaigns.rejected").increment(1);
        let reason = rejection.to_string();
        debug!(campaign_id = campaign.id(), event = event_name, %reason, "{campaign} rejected");
        sink.campaign_evaluated(campaign.qa_info(false, reason));
    }
    eligibility
}
