//! Campaign cache and the event-driven campaign manager.
//!
//! The cache is time-boxed: within the five-minute window cached campaigns
//! are served (loading from persistence once if memory is cold); a fetch
//! failure falls back to last-known-good without touching the timestamp so
//! the next call retries immediately. The manager wires the pipeline's
//! events into rule evaluation and the impression gate.

use std::sync::{Arc, OnceLock, Weak};

use chrono::{DateTime, Utc};
use uuid::Uuid;

use beacon_core::{keys, rules, Campaign, DeviceSnapshot, Event, HideKind, SystemEvent};

use crate::api::{Api, CampaignFilter};
use crate::config::BeaconConfig;
use crate::gate::ImpressionGate;
use crate::pipeline::{EventObserver, EventPipeline};
use crate::profile::ProfileCache;
use crate::server_time::ServerClock;
use crate::store::{self, KeyValueStore, KeyValueStoreExt};

const CACHE_EXPIRATION_SECS: i64 = 5 * 60;

struct CacheState {
    campaigns: Option<Vec<Campaign>>,
    last_fetch: Option<DateTime<Utc>>,
    loaded_from_store: bool,
}

pub struct CampaignCache {
    api: Arc<dyn Api>,
    store: Arc<dyn KeyValueStore>,
    profile: Arc<ProfileCache>,
    config: Arc<BeaconConfig>,
    state: tokio::sync::Mutex<CacheState>,
}

impl CampaignCache {
    pub fn new(
        api: Arc<dyn Api>,
        store: Arc<dyn KeyValueStore>,
        profile: Arc<ProfileCache>,
        config: Arc<BeaconConfig>,
    ) -> Self {
        Self {
            api,
            store,
            profile,
            config,
            state: tokio::sync::Mutex::new(CacheState {
                campaigns: None,
                last_fetch: None,
                loaded_from_store: false,
            }),
        }
    }

    /// Current campaigns. Serves the cache inside the expiration window
    /// unless forced; on fetch failure returns whatever is cached without
    /// updating the fetch timestamp.
    pub async fn fetch(&self, force: bool) -> Vec<Campaign> {
        let mut state = self.state.lock().await;

        if !state.loaded_from_store {
            state.loaded_from_store = true;
            if state.campaigns.is_none() {
                state.campaigns = self
                    .store
                    .get_json::<Vec<Campaign>>(store::keys::CAMPAIGNS)
                    .unwrap_or_default();
            }
            if state.last_fetch.is_none() {
                state.last_fetch = self
                    .store
                    .get_json::<i64>(store::keys::CAMPAIGNS_LAST_FETCH)
                    .unwrap_or_default()
                    .and_then(DateTime::from_timestamp_millis);
            }
        }

        let now = Utc::now();
        if !force {
            if let (Some(campaigns), Some(last_fetch)) = (&state.campaigns, state.last_fetch) {
                if (now - last_fetch).num_seconds() < CACHE_EXPIRATION_SECS {
                    return campaigns.clone();
                }
            }
        }

        let filter = CampaignFilter {
            project_id: self.config.project_id.clone(),
            user_id: self.profile.user_id(),
            device: self.profile.device().to_request(false),
        };

        match self.api.fetch_campaigns(&filter).await {
            Ok(response) => {
                state.campaigns = Some(response.campaigns.clone());
                state.last_fetch = Some(now);
                if let Err(err) = self
                    .store
                    .set_json(store::keys::CAMPAIGNS, &response.campaigns)
                {
                    tracing::warn!(%err, "failed to persist campaigns");
                }
                if let Err(err) = self
                    .store
                    .set_json(store::keys::CAMPAIGNS_LAST_FETCH, &now.timestamp_millis())
                {
                    tracing::warn!(%err, "failed to persist campaign fetch time");
                }
                response.campaigns
            }
            Err(err) => {
                tracing::warn!(%err, "campaign fetch failed, serving cached");
                state.campaigns.clone().unwrap_or_default()
            }
        }
    }
}

/// Observer gluing the pipeline to campaign evaluation: on every tracked
/// event it matches cached campaigns and asks the gate to surface the first
/// eligible one; on identity changes it force-refreshes the cache.
pub struct CampaignManager {
    cache: Arc<CampaignCache>,
    gate: Arc<ImpressionGate>,
    clock: Arc<ServerClock>,
    // Back-reference for bookkeeping events; weak to keep composition
    // top-down without a reference cycle.
    pipeline: OnceLock<Weak<EventPipeline>>,
}

impl CampaignManager {
    pub fn new(
        cache: Arc<CampaignCache>,
        gate: Arc<ImpressionGate>,
        clock: Arc<ServerClock>,
    ) -> Self {
        Self {
            cache,
            gate,
            clock,
            pipeline: OnceLock::new(),
        }
    }

    /// Wire the pipeline used for delivery/click bookkeeping events. Called
    /// once by the SDK initializer after the pipeline is composed.
    pub fn attach_pipeline(&self, pipeline: &Arc<EventPipeline>) {
        let _ = self.pipeline.set(Arc::downgrade(pipeline));
    }

    /// Dismissal callback from the rendering surface.
    pub fn hide_campaign(&self, campaign_id: &str, kind: HideKind) {
        let gate = self.gate.clone();
        let clock = self.clock.clone();
        let campaign_id = campaign_id.to_string();
        tokio::spawn(async move {
            let now = clock.now().await;
            gate.hide(&campaign_id, kind, now);
        });
    }

    /// Click callback from the rendering surface.
    pub fn handle_click(&self, campaign: &Campaign, location_id: &str, message_id: &str) {
        self.track_message_event(
            SystemEvent::ClickMessage,
            campaign,
            message_id,
            Some(location_id.to_string()),
        );
    }

    async fn handle_event(
        cache: Arc<CampaignCache>,
        gate: Arc<ImpressionGate>,
        clock: Arc<ServerClock>,
        manager: CampaignManagerHandle,
        event: Event,
        device: DeviceSnapshot,
    ) {
        let campaigns = cache.fetch(false).await;
        let now = clock.now().await;

        for campaign in campaigns {
            if !rules::is_triggered(&campaign.trigger_condition, &event, &device, now) {
                continue;
            }

            let delay_minutes = campaign.trigger_condition.delay_minutes.unwrap_or(0);
            if delay_minutes > 0 {
                let gate = gate.clone();
                let clock = clock.clone();
                let manager = manager.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(std::time::Duration::from_secs(
                        delay_minutes as u64 * 60,
                    ))
                    .await;
                    let now = clock.now().await;
                    if gate.try_show(&campaign, now) {
                        manager.track_delivery(&campaign);
                    }
                });
                break;
            }

            if gate.try_show(&campaign, now) {
                manager.track_delivery(&campaign);
                break;
            }
        }
    }

    fn track_message_event(
        &self,
        kind: SystemEvent,
        campaign: &Campaign,
        message_id: &str,
        location_id: Option<String>,
    ) {
        let Some(pipeline) = self.pipeline.get().and_then(Weak::upgrade) else {
            return;
        };
        let properties = message_properties(campaign, message_id, location_id);
        tokio::spawn(async move {
            pipeline.track(kind.name(), Some(properties)).await;
        });
    }
}

/// Shared property bag for delivery/click bookkeeping events.
fn message_properties(
    campaign: &Campaign,
    message_id: &str,
    location_id: Option<String>,
) -> std::collections::HashMap<String, beacon_core::PropertyValue> {
    let mut properties = std::collections::HashMap::new();
    properties.insert(keys::CAMPAIGN_ID.to_string(), campaign.id.as_str().into());
    properties.insert(keys::CAMPAIGN_CATEGORY.to_string(), "ON_SITE".into());
    properties.insert(keys::CHANNEL_TYPE.to_string(), "IN_APP_MESSAGE".into());
    properties.insert(
        keys::SUB_CHANNEL_TYPE.to_string(),
        campaign.layout.layout_sub_type.as_str().into(),
    );
    properties.insert(keys::RESULT_STATUS.to_string(), 200_000.into());
    properties.insert(keys::RESULT_MESSAGE.to_string(), "SUCCESS".into());
    properties.insert(keys::IS_SUCCESS.to_string(), true.into());
    properties.insert(keys::MESSAGE_ID.to_string(), message_id.into());
    if let Some(location_id) = location_id {
        properties.insert(keys::LOCATION_ID.to_string(), location_id.into());
    }
    properties
}

/// Cloneable slice of the manager used inside spawned evaluation tasks.
#[derive(Clone)]
struct CampaignManagerHandle {
    pipeline: Option<Weak<EventPipeline>>,
}

impl CampaignManagerHandle {
    fn track_delivery(&self, campaign: &Campaign) {
        let Some(pipeline) = self.pipeline.as_ref().and_then(Weak::upgrade) else {
            return;
        };
        let properties = message_properties(campaign, &Uuid::new_v4().to_string(), None);
        tokio::spawn(async move {
            pipeline
                .track(SystemEvent::DeliveryMessage.name(), Some(properties))
                .await;
        });
    }
}

impl EventObserver for CampaignManager {
    fn handle_user_id_changed(&self) {
        let cache = self.cache.clone();
        tokio::spawn(async move {
            cache.fetch(true).await;
        });
    }

    fn on_event(&self, event: &Event, device: &DeviceSnapshot, _from_web_bridge: bool) {
        // Campaign bookkeeping events would evaluate against themselves.
        if event.name == SystemEvent::DeliveryMessage.name()
            || event.name == SystemEvent::ClickMessage.name()
        {
            return;
        }

        let handle = CampaignManagerHandle {
            pipeline: self.pipeline.get().cloned(),
        };
        let cache = self.cache.clone();
        let gate = self.gate.clone();
        let clock = self.clock.clone();
        let event = event.clone();
        let device = device.clone();
        tokio::spawn(async move {
            Self::handle_event(cache, gate, clock, handle, event, device).await;
        });
    }
}
