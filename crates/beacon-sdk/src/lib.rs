//! beacon-sdk - Embeddable telemetry and campaign-triggering engine.
//!
//! This crate wires the Beacon core types into a running client engine:
//! durable retry queues, session windowing, campaign caching, rule-driven
//! campaign display, and the HTTP transport. The host application supplies
//! three collaborators: a durable [`store::KeyValueStore`], a
//! [`profile::DeviceInfoProvider`], and a [`gate::PresentationSurface`].
//!
//! # Example
//!
//! ```ignore
//! use beacon_sdk::{Beacon, BeaconConfig};
//!
//! let beacon = Beacon::initialize(
//!     BeaconConfig::new("my-project"),
//!     store,       // e.g. SqliteKeyValueStore::new("beacon.db")?
//!     device_info, // platform attribute collector
//!     surface,     // in-app message renderer
//! );
//!
//! beacon.track("mkt_page_view", None);
//! beacon.identify("user_123", None);
//! ```

pub mod api;
pub mod campaigns;
pub mod config;
pub mod gate;
pub mod pipeline;
pub mod profile;
pub mod server_time;
pub mod store;

pub use config::BeaconConfig;

// Re-export the core vocabulary so embedders depend on one crate.
pub use beacon_core::{
    BeaconError, BeaconResult, Campaign, DeviceSnapshot, Event, HideKind, Profile, PropertyValue,
    SystemEvent,
};

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::api::{Api, HttpApi};
use crate::campaigns::{CampaignCache, CampaignManager};
use crate::gate::{ImpressionGate, PresentationSurface};
use crate::pipeline::{EventObserver, EventPipeline};
use crate::profile::{DeviceInfoProvider, ProfileCache};
use crate::server_time::ServerClock;
use crate::store::KeyValueStore;

/// SDK instance handle. Composed top-down by [`Beacon::initialize`]; the
/// embedding application owns its lifecycle, and tests build fresh instances
/// instead of sharing process-wide state.
///
/// The tracking surface is fire-and-forget: calls enqueue work onto the
/// current tokio runtime and return immediately. The composed
/// [`EventPipeline`] is exposed for callers that want to await completion.
pub struct Beacon {
    profile: Arc<ProfileCache>,
    pipeline: Arc<EventPipeline>,
    campaigns: Arc<CampaignCache>,
    manager: Arc<CampaignManager>,
    gate: Arc<ImpressionGate>,
}

impl Beacon {
    /// Build an instance against the production HTTP transport.
    pub fn initialize(
        config: BeaconConfig,
        store: Arc<dyn KeyValueStore>,
        device_info: Arc<dyn DeviceInfoProvider>,
        surface: Arc<dyn PresentationSurface>,
    ) -> Self {
        let config = Arc::new(config);
        let api: Arc<dyn Api> = Arc::new(HttpApi::new(config.clone()));
        Self::with_api(config, api, store, device_info, surface)
    }

    /// Build an instance over any transport; tests inject mocks here.
    pub fn with_api(
        config: Arc<BeaconConfig>,
        api: Arc<dyn Api>,
        store: Arc<dyn KeyValueStore>,
        device_info: Arc<dyn DeviceInfoProvider>,
        surface: Arc<dyn PresentationSurface>,
    ) -> Self {
        let profile = Arc::new(ProfileCache::new(store.clone(), device_info));
        let clock = Arc::new(ServerClock::new(api.clone()));
        let campaigns = Arc::new(CampaignCache::new(
            api.clone(),
            store.clone(),
            profile.clone(),
            config.clone(),
        ));
        let gate = Arc::new(ImpressionGate::new(store.clone(), surface));
        let manager = Arc::new(CampaignManager::new(
            campaigns.clone(),
            gate.clone(),
            clock,
        ));
        let observers = vec![manager.clone() as Arc<dyn EventObserver>];
        let pipeline = Arc::new(EventPipeline::new(
            api,
            store,
            profile.clone(),
            config.max_stored_failures,
            observers,
        ));
        manager.attach_pipeline(&pipeline);

        Self {
            profile,
            pipeline,
            campaigns,
            manager,
            gate,
        }
    }

    /// Track a named event.
    pub fn track(&self, name: impl Into<String>, properties: Option<HashMap<String, PropertyValue>>) {
        let pipeline = self.pipeline.clone();
        let name = name.into();
        tokio::spawn(async move {
            pipeline.track(&name, properties).await;
        });
    }

    /// Track with an explicit idempotency id and/or timestamp.
    pub fn track_event(
        &self,
        name: impl Into<String>,
        properties: Option<HashMap<String, PropertyValue>>,
        id: Option<String>,
        timestamp: Option<DateTime<Utc>>,
    ) {
        let pipeline = self.pipeline.clone();
        let name = name.into();
        tokio::spawn(async move {
            pipeline
                .track_event(&name, properties, id, timestamp, false)
                .await;
        });
    }

    pub fn track_purchase(&self, revenue: f64, properties: Option<HashMap<String, PropertyValue>>) {
        let pipeline = self.pipeline.clone();
        tokio::spawn(async move {
            pipeline.track_purchase(revenue, properties).await;
        });
    }

    pub fn track_revenue(
        &self,
        name: impl Into<String>,
        revenue: f64,
        properties: Option<HashMap<String, PropertyValue>>,
    ) {
        let pipeline = self.pipeline.clone();
        let name = name.into();
        tokio::spawn(async move {
            pipeline.track_revenue(&name, revenue, properties).await;
        });
    }

    pub fn track_page_view(&self, properties: Option<HashMap<String, PropertyValue>>) {
        let pipeline = self.pipeline.clone();
        tokio::spawn(async move {
            pipeline.track_page_view(properties).await;
        });
    }

    pub fn identify(
        &self,
        user_id: impl Into<String>,
        properties: Option<HashMap<String, PropertyValue>>,
    ) {
        let pipeline = self.pipeline.clone();
        let user_id = user_id.into();
        tokio::spawn(async move {
            pipeline.identify(&user_id, properties).await;
        });
    }

    pub fn login(
        &self,
        user_id: impl Into<String>,
        user_properties: Option<HashMap<String, PropertyValue>>,
        event_properties: Option<HashMap<String, PropertyValue>>,
    ) {
        let pipeline = self.pipeline.clone();
        let user_id = user_id.into();
        tokio::spawn(async move {
            pipeline
                .login(&user_id, user_properties, event_properties)
                .await;
        });
    }

    pub fn logout(&self, properties: Option<HashMap<String, PropertyValue>>) {
        let pipeline = self.pipeline.clone();
        tokio::spawn(async move {
            pipeline.logout(properties).await;
        });
    }

    pub fn set_push_token(&self, token: impl Into<String>) {
        let pipeline = self.pipeline.clone();
        let token = token.into();
        tokio::spawn(async move {
            pipeline.set_push_token(&token).await;
        });
    }

    /// Retry both failure queues now (normally triggered automatically on
    /// the next successful call).
    pub fn flush(&self) {
        let pipeline = self.pipeline.clone();
        tokio::spawn(async move {
            pipeline.send_failed_if_needed().await;
        });
    }

    /// Rendering-surface signal: ready to present.
    pub fn surface_ready(&self) {
        self.gate.surface_ready();
    }

    /// Dismissal callback from the rendering surface.
    pub fn hide_campaign(&self, campaign_id: &str, kind: HideKind) {
        self.manager.hide_campaign(campaign_id, kind);
    }

    /// Click callback from the rendering surface.
    pub fn handle_click(&self, campaign: &Campaign, location_id: &str, message_id: &str) {
        self.manager.handle_click(campaign, location_id, message_id);
    }

    /// The composed pipeline, for awaitable access.
    pub fn pipeline(&self) -> &Arc<EventPipeline> {
        &self.pipeline
    }

    /// The campaign cache, for forced refreshes.
    pub fn campaigns(&self) -> &Arc<CampaignCache> {
        &self.campaigns
    }

    /// Cached identity/device state.
    pub fn profile(&self) -> &Arc<ProfileCache> {
        &self.profile
    }
}
