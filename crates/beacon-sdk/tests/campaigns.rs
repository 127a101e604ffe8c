//! Campaign cache and display-flow behavior against a mock transport.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use beacon_core::{
    BeaconError, BeaconResult, Campaign, DataType, DeviceRequest, DeviceSnapshot, Layout,
    Operator, PropertyCondition, PropertyPath, TriggerCondition,
};
use beacon_sdk::api::{
    Api, BulkEventRequest, BulkProfileRequest, CampaignFilter, CampaignResponse, EventRequest,
    ProfileRequest, ServerInfo,
};
use beacon_sdk::campaigns::CampaignCache;
use beacon_sdk::config::BeaconConfig;
use beacon_sdk::gate::PresentationSurface;
use beacon_sdk::profile::{DeviceInfoProvider, ProfileCache};
use beacon_sdk::store::{KeyValueStore, MemoryKeyValueStore};
use beacon_sdk::{Beacon, SystemEvent};

#[derive(Default)]
struct MockApi {
    campaigns: Mutex<Vec<Campaign>>,
    fail_campaigns: AtomicBool,
    campaign_fetches: AtomicUsize,
    events: Mutex<Vec<EventRequest>>,
}

#[async_trait]
impl Api for MockApi {
    async fn ingest_event(&self, request: &EventRequest) -> BeaconResult<()> {
        self.events.lock().unwrap().push(request.clone());
        Ok(())
    }

    async fn ingest_events_bulk(&self, _request: &BulkEventRequest) -> BeaconResult<()> {
        Ok(())
    }

    async fn update_profile(&self, _request: &ProfileRequest) -> BeaconResult<()> {
        Ok(())
    }

    async fn update_profiles_bulk(&self, _request: &BulkProfileRequest) -> BeaconResult<()> {
        Ok(())
    }

    async fn update_device(&self, _request: &DeviceRequest) -> BeaconResult<()> {
        Ok(())
    }

    async fn fetch_campaigns(&self, _request: &CampaignFilter) -> BeaconResult<CampaignResponse> {
        self.campaign_fetches.fetch_add(1, Ordering::SeqCst);
        if self.fail_campaigns.load(Ordering::SeqCst) {
            return Err(BeaconError::ServerRejected { status: 500 });
        }
        Ok(CampaignResponse {
            checksum: None,
            campaigns: self.campaigns.lock().unwrap().clone(),
        })
    }

    async fn server_info(&self, _client_time_ms: i64) -> BeaconResult<ServerInfo> {
        Ok(ServerInfo {
            server_time_offset: 0,
        })
    }
}

struct StaticDeviceInfo;

impl DeviceInfoProvider for StaticDeviceInfo {
    fn collect(&self) -> DeviceSnapshot {
        DeviceSnapshot::new("", "ios")
    }
}

#[derive(Default)]
struct TestSurface {
    presented: Mutex<Vec<String>>,
}

impl PresentationSurface for TestSurface {
    fn is_ready(&self) -> bool {
        true
    }

    fn present(&self, campaign: &Campaign) {
        self.presented.lock().unwrap().push(campaign.id.clone());
    }
}

fn campaign(id: &str, event_name: &str) -> Campaign {
    Campaign {
        id: id.to_string(),
        layout: Layout {
            layout_type: "MODAL".to_string(),
            layout_sub_type: "CENTER".to_string(),
            orientations: vec!["PORTRAIT".to_string()],
        },
        trigger_condition: TriggerCondition::for_event(event_name),
        html: "<html></html>".to_string(),
        updated_at: String::new(),
    }
}

fn cache_over(api: &Arc<MockApi>, store: &Arc<MemoryKeyValueStore>) -> CampaignCache {
    let profile = Arc::new(ProfileCache::new(
        store.clone() as Arc<dyn KeyValueStore>,
        Arc::new(StaticDeviceInfo),
    ));
    CampaignCache::new(
        api.clone(),
        store.clone(),
        profile,
        Arc::new(BeaconConfig::new("project-1")),
    )
}

#[tokio::test]
async fn test_cache_serves_within_expiration_window() {
    let api = Arc::new(MockApi::default());
    api.campaigns.lock().unwrap().push(campaign("cmp-1", "x"));
    let store = Arc::new(MemoryKeyValueStore::new());
    let cache = cache_over(&api, &store);

    let first = cache.fetch(false).await;
    assert_eq!(first.len(), 1);
    let second = cache.fetch(false).await;
    assert_eq!(second.len(), 1);
    // The second call was served from cache.
    assert_eq!(api.campaign_fetches.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_force_refresh_bypasses_window() {
    let api = Arc::new(MockApi::default());
    let store = Arc::new(MemoryKeyValueStore::new());
    let cache = cache_over(&api, &store);

    cache.fetch(false).await;
    cache.fetch(true).await;
    assert_eq!(api.campaign_fetches.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_fetch_failure_falls_back_to_last_known_good() {
    let api = Arc::new(MockApi::default());
    api.campaigns.lock().unwrap().push(campaign("cmp-1", "x"));
    let store = Arc::new(MemoryKeyValueStore::new());
    let cache = cache_over(&api, &store);

    assert_eq!(cache.fetch(false).await.len(), 1);

    api.fail_campaigns.store(true, Ordering::SeqCst);
    let fallback = cache.fetch(true).await;
    assert_eq!(fallback.len(), 1);
    assert_eq!(fallback[0].id, "cmp-1");

    // The failed fetch did not stamp the window: the next call retries
    // immediately instead of waiting out the TTL.
    api.fail_campaigns.store(false, Ordering::SeqCst);
    cache.fetch(true).await;
    assert_eq!(api.campaign_fetches.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_persisted_campaigns_survive_restart() {
    let api = Arc::new(MockApi::default());
    api.campaigns.lock().unwrap().push(campaign("cmp-1", "x"));
    let store = Arc::new(MemoryKeyValueStore::new());

    let cache = cache_over(&api, &store);
    cache.fetch(false).await;

    // A cold cache over the same store with a dead network still serves the
    // persisted campaigns.
    api.fail_campaigns.store(true, Ordering::SeqCst);
    let revived = cache_over(&api, &store);
    let campaigns = revived.fetch(true).await;
    assert_eq!(campaigns.len(), 1);
}

async fn wait_for<F: Fn() -> bool>(predicate: F) -> bool {
    for _ in 0..100 {
        if predicate() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    false
}

#[tokio::test]
async fn test_matching_event_surfaces_campaign() {
    let api = Arc::new(MockApi::default());
    let mut purchase_campaign = campaign("cmp-big-spender", "mkt_purchase");
    purchase_campaign.trigger_condition.property_conditions = Some(vec![vec![PropertyCondition {
        property_name: "mkt_revenue".to_string(),
        data_type: DataType::Double,
        path: PropertyPath::Event,
        operator: Operator::GreaterThan,
        target_values: vec![5.0.into()],
    }]]);
    api.campaigns.lock().unwrap().push(purchase_campaign);

    let surface = Arc::new(TestSurface::default());
    let beacon = Beacon::with_api(
        Arc::new(BeaconConfig::new("project-1")),
        api.clone(),
        Arc::new(MemoryKeyValueStore::new()),
        Arc::new(StaticDeviceInfo),
        surface.clone(),
    );

    beacon.pipeline().track_purchase(9.99, None).await;

    assert!(
        wait_for(|| !surface.presented.lock().unwrap().is_empty()).await,
        "campaign was not presented"
    );
    assert_eq!(surface.presented.lock().unwrap()[0], "cmp-big-spender");

    // The delivery bookkeeping event flows through the normal pipeline.
    assert!(
        wait_for(|| {
            api.events
                .lock()
                .unwrap()
                .iter()
                .any(|e| e.name == SystemEvent::DeliveryMessage.name())
        })
        .await,
        "delivery event was not tracked"
    );
}

#[tokio::test]
async fn test_non_matching_event_shows_nothing() {
    let api = Arc::new(MockApi::default());
    api.campaigns
        .lock()
        .unwrap()
        .push(campaign("cmp-1", "mkt_purchase"));

    let surface = Arc::new(TestSurface::default());
    let beacon = Beacon::with_api(
        Arc::new(BeaconConfig::new("project-1")),
        api.clone(),
        Arc::new(MemoryKeyValueStore::new()),
        Arc::new(StaticDeviceInfo),
        surface.clone(),
    );

    beacon.pipeline().track("mkt_page_view", None).await;

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(surface.presented.lock().unwrap().is_empty());
}
