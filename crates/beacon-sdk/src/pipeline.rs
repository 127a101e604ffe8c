//! Event and profile ingestion pipeline.
//!
//! Resolves session windows, builds and sends requests, queues
//! server-rejected records into the bounded retry stores, and bulk-drains
//! both stores on any successful call. Observers are notified after every
//! send attempt regardless of network outcome, so rule evaluation never
//! depends on connectivity.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use beacon_core::{keys, DeviceRequest, DeviceSnapshot, Event, Profile, PropertyValue, SystemEvent};

use crate::api::{Api, BulkEventRequest, BulkProfileRequest, EventRequest, ProfileRequest};
use crate::profile::ProfileCache;
use crate::store::{self, KeyValueStore, KeyValueStoreExt, RetryQueue};

/// Inactivity gap that closes a session.
pub const SESSION_GAP_SECS: i64 = 1800;

/// Observer interface registered at construction; powers campaign
/// evaluation and identity-sensitive caches.
pub trait EventObserver: Send + Sync {
    fn handle_user_id_changed(&self);
    fn on_event(&self, event: &Event, device: &DeviceSnapshot, from_web_bridge: bool);
}

/// A server-rejected event with the device request resolved at enqueue time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailedEvent {
    pub event: Event,
    pub device: DeviceRequest,
}

/// A server-rejected profile update with its enqueue-time device request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailedProfile {
    pub profile: Profile,
    pub device: DeviceRequest,
}

pub struct EventPipeline {
    api: Arc<dyn Api>,
    store: Arc<dyn KeyValueStore>,
    profile: Arc<ProfileCache>,
    failed_events: RetryQueue<FailedEvent>,
    failed_profiles: RetryQueue<FailedProfile>,
    observers: Vec<Arc<dyn EventObserver>>,
    // Serializes pipeline operations: sends happen in call order and every
    // read-modify-write of the session clock runs exclusively.
    op_lock: tokio::sync::Mutex<()>,
}

impl EventPipeline {
    pub fn new(
        api: Arc<dyn Api>,
        store: Arc<dyn KeyValueStore>,
        profile: Arc<ProfileCache>,
        max_stored_failures: usize,
        observers: Vec<Arc<dyn EventObserver>>,
    ) -> Self {
        let failed_events = RetryQueue::new(
            store.clone(),
            store::keys::FAILED_EVENTS,
            max_stored_failures,
        );
        let failed_profiles = RetryQueue::new(
            store.clone(),
            store::keys::FAILED_PROFILES,
            max_stored_failures,
        );
        Self {
            api,
            store,
            profile,
            failed_events,
            failed_profiles,
            observers,
            op_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Track a named event with default options.
    pub async fn track(&self, name: &str, properties: Option<HashMap<String, PropertyValue>>) {
        self.track_event(name, properties, None, None, false).await;
    }

    /// Track a named event.
    ///
    /// The timestamp defaults to now but an explicit (possibly back-dated)
    /// value is respected, including by the session clock below.
    pub async fn track_event(
        &self,
        name: &str,
        properties: Option<HashMap<String, PropertyValue>>,
        id: Option<String>,
        timestamp: Option<DateTime<Utc>>,
        from_web_bridge: bool,
    ) {
        let _op = self.op_lock.lock().await;
        let timestamp = timestamp.unwrap_or_else(Utc::now);
        let session_id = self.resolve_session(timestamp).await;

        let mut event = Event::new(name, timestamp)
            .with_properties(properties.unwrap_or_default())
            .with_property(keys::SESSION_ID, session_id.as_str());
        if let Some(id) = id {
            event = event.with_id(id);
        }
        if let Some(user_id) = self.profile.user_id() {
            event = event.with_user(user_id);
        }

        self.send_event(event, from_web_bridge).await;
    }

    /// Named-event sugar: purchase with revenue.
    pub async fn track_purchase(
        &self,
        revenue: f64,
        properties: Option<HashMap<String, PropertyValue>>,
    ) {
        self.track_revenue(SystemEvent::Purchase.name(), revenue, properties)
            .await;
    }

    /// Named-event sugar: any revenue-bearing event.
    pub async fn track_revenue(
        &self,
        name: &str,
        revenue: f64,
        properties: Option<HashMap<String, PropertyValue>>,
    ) {
        let mut properties = properties.unwrap_or_default();
        properties.insert(keys::REVENUE.to_string(), revenue.into());
        self.track_event(name, Some(properties), None, None, false)
            .await;
    }

    /// Named-event sugar: page view.
    pub async fn track_page_view(&self, properties: Option<HashMap<String, PropertyValue>>) {
        self.track_event(SystemEvent::PageView.name(), properties, None, None, false)
            .await;
    }

    /// Persist the user identity and send a profile update. Notifies
    /// identity observers exactly once when the id actually changed.
    pub async fn identify(
        &self,
        user_id: &str,
        properties: Option<HashMap<String, PropertyValue>>,
    ) {
        let _op = self.op_lock.lock().await;
        let changed = self.profile.user_id().as_deref() != Some(user_id);
        self.profile.set_user_id(Some(user_id));

        let device = self.profile.device();
        let profile = Profile {
            user_id: user_id.to_string(),
            properties: properties.unwrap_or_default(),
            timestamp: Utc::now(),
        };
        let request = ProfileRequest {
            user_id: profile.user_id.clone(),
            properties: profile.properties.clone(),
            device: Some(device.to_request(false)),
            timestamp: profile.timestamp,
        };

        match self.api.update_profile(&request).await {
            Ok(()) => self.send_failed_if_needed().await,
            Err(err) if err.is_retryable() => {
                tracing::warn!(user_id, %err, "profile update rejected, queued for retry");
                self.failed_profiles.push(FailedProfile {
                    profile,
                    device: device.to_request(false),
                });
            }
            Err(err) => tracing::warn!(user_id, %err, "profile update dropped"),
        }

        if changed {
            self.notify_user_id_changed();
        }
    }

    /// `identify` followed by the canonical login event.
    pub async fn login(
        &self,
        user_id: &str,
        user_properties: Option<HashMap<String, PropertyValue>>,
        event_properties: Option<HashMap<String, PropertyValue>>,
    ) {
        self.identify(user_id, user_properties).await;
        self.track_event(SystemEvent::Login.name(), event_properties, None, None, false)
            .await;
    }

    /// Clear identity and track the canonical logout event. No-op without a
    /// cached user id.
    pub async fn logout(&self, properties: Option<HashMap<String, PropertyValue>>) {
        if self.profile.user_id().is_none() {
            return;
        }
        self.flush_user().await;
        self.track_event(SystemEvent::Logout.name(), properties, None, None, false)
            .await;
    }

    /// Clear the cached user id, flag removal on the next device update,
    /// and notify identity observers if an id was present.
    pub async fn flush_user(&self) {
        let _op = self.op_lock.lock().await;
        let previous = self.profile.user_id();
        self.profile.set_user_id(None);
        self.update_device_locked(true).await;
        if previous.is_some() {
            self.notify_user_id_changed();
        }
    }

    /// Push the current device snapshot to the server if it changed since
    /// the last successful send.
    pub async fn update_device(&self, remove_user_id: bool) {
        let _op = self.op_lock.lock().await;
        self.update_device_locked(remove_user_id).await;
    }

    /// Store a push token and propagate the device change.
    pub async fn set_push_token(&self, token: &str) {
        let _op = self.op_lock.lock().await;
        self.profile.set_push_token(token);
        self.update_device_locked(false).await;
    }

    /// Bulk-drain both retry queues, restoring each snapshot if its resend
    /// fails. The two queues drain independently.
    pub async fn send_failed_if_needed(&self) {
        futures::future::join(self.send_failed_events(), self.send_failed_profiles()).await;
    }

    pub fn failed_event_count(&self) -> usize {
        self.failed_events.len()
    }

    pub fn failed_profile_count(&self) -> usize {
        self.failed_profiles.len()
    }

    /// Session windowing. Reads the persisted last-event time; a missing
    /// value or a gap of `SESSION_GAP_SECS` or more renews the session and
    /// emits a synthetic session-start event through the normal send path.
    ///
    /// The last-event time is updated to the *call's* timestamp, not
    /// wall-clock now, so back-dated events shift session math at call
    /// granularity. This mirrors long-standing behavior; see DESIGN.md.
    async fn resolve_session(&self, timestamp: DateTime<Utc>) -> String {
        let last_ms = self
            .store
            .get_json::<i64>(store::keys::LAST_EVENT_TIME)
            .unwrap_or_default();
        let renew = last_ms
            .map_or(true, |last| {
                timestamp.timestamp_millis() - last >= SESSION_GAP_SECS * 1000
            });
        if let Err(err) = self
            .store
            .set_json(store::keys::LAST_EVENT_TIME, &timestamp.timestamp_millis())
        {
            tracing::warn!(%err, "failed to persist last event time");
        }

        if !renew {
            if let Some(session_id) = self.profile.session_id() {
                return session_id;
            }
        }

        let session_id = Uuid::new_v4().to_string();
        self.profile.set_session_id(&session_id);

        if renew {
            // Synthetic session-start event; carries only the new session id
            // and is subject to the same failure/enqueue rule.
            let mut event = Event::new(SystemEvent::SessionStart.name(), timestamp)
                .with_property(keys::SESSION_ID, session_id.as_str());
            if let Some(user_id) = self.profile.user_id() {
                event = event.with_user(user_id);
            }
            self.send_event(event, false).await;
        }

        session_id
    }

    async fn send_event(&self, event: Event, from_web_bridge: bool) {
        let device = self.profile.device();
        let request = EventRequest::new(&event, device.to_request(false));

        match self.api.ingest_event(&request).await {
            Ok(()) => {
                tracing::debug!(name = %event.name, "event sent");
                self.send_failed_if_needed().await;
            }
            Err(err) if err.is_retryable() => {
                tracing::warn!(name = %event.name, %err, "event rejected, queued for retry");
                self.failed_events.push(FailedEvent {
                    event: event.clone(),
                    device: request.device,
                });
            }
            Err(err) => tracing::warn!(name = %event.name, %err, "event dropped"),
        }

        // Local bookkeeping must not require network success.
        for observer in &self.observers {
            observer.on_event(&event, &device, from_web_bridge);
        }
    }

    async fn update_device_locked(&self, remove_user_id: bool) {
        let request = self.profile.device().to_request(remove_user_id);
        let last = self
            .store
            .get_json::<DeviceRequest>(store::keys::LAST_DEVICE_REQUEST)
            .unwrap_or_default();
        if last.as_ref() == Some(&request) {
            tracing::debug!("device unchanged since last successful send");
            return;
        }

        match self.api.update_device(&request).await {
            Ok(()) => {
                if let Err(err) = self
                    .store
                    .set_json(store::keys::LAST_DEVICE_REQUEST, &request)
                {
                    tracing::warn!(%err, "failed to persist device request");
                }
                self.send_failed_if_needed().await;
            }
            // Device updates are not queued: change detection resends on the
            // next update attempt.
            Err(err) => tracing::warn!(%err, "device update failed"),
        }
    }

    async fn send_failed_events(&self) {
        let records = self.failed_events.drain_all();
        let Some(newest) = records.last() else {
            return;
        };
        let request = BulkEventRequest {
            device: newest.device.clone(),
            events: records.iter().map(|r| r.event.clone()).collect(),
        };
        match self.api.ingest_events_bulk(&request).await {
            Ok(()) => tracing::debug!(count = records.len(), "drained failed events"),
            Err(err) => {
                tracing::warn!(count = records.len(), %err, "bulk event resend failed");
                self.failed_events.restore(records);
            }
        }
    }

    async fn send_failed_profiles(&self) {
        let records = self.failed_profiles.drain_all();
        let Some(newest) = records.last() else {
            return;
        };
        let request = BulkProfileRequest {
            device: newest.device.clone(),
            profiles: records.iter().map(|r| r.profile.clone()).collect(),
        };
        match self.api.update_profiles_bulk(&request).await {
            Ok(()) => tracing::debug!(count = records.len(), "drained failed profiles"),
            Err(err) => {
                tracing::warn!(count = records.len(), %err, "bulk profile resend failed");
                self.failed_profiles.restore(records);
            }
        }
    }

    fn notify_user_id_changed(&self) {
        for observer in &self.observers {
            observer.handle_user_id_changed();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failed_record_serde_round_trip() {
        let event = Event::new("mkt_purchase", Utc::now()).with_property(keys::REVENUE, 9.99);
        let device = DeviceSnapshot::new("local-1", "ios").to_request(false);
        let record = FailedEvent {
            event: event.clone(),
            device,
        };
        let bytes = serde_json::to_vec(&record).unwrap();
        let decoded: FailedEvent = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(decoded.event, event);
    }
}
