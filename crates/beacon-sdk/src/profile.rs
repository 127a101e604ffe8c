//! Cached identity, device, and session state.
//!
//! Each mutable field lives behind its own lock; reads and writes go through
//! the owning lock and write-through to the persistent store.

use std::sync::{Arc, RwLock};

use uuid::Uuid;

use beacon_core::DeviceSnapshot;

use crate::store::{keys, KeyValueStore, KeyValueStoreExt};

/// Platform collaborator that collects device attributes (battery, locale,
/// ad identifiers, network type, ...). The engine only consumes the bag.
pub trait DeviceInfoProvider: Send + Sync {
    fn collect(&self) -> DeviceSnapshot;
}

pub struct ProfileCache {
    store: Arc<dyn KeyValueStore>,
    provider: Arc<dyn DeviceInfoProvider>,
    local_device_id: String,
    user_id: RwLock<Option<String>>,
    device: RwLock<Option<DeviceSnapshot>>,
    session_id: RwLock<Option<String>>,
}

impl ProfileCache {
    pub fn new(store: Arc<dyn KeyValueStore>, provider: Arc<dyn DeviceInfoProvider>) -> Self {
        let local_device_id = load_or_create_local_id(store.as_ref());
        let user_id = store.get_json(keys::USER_ID).unwrap_or_default();
        let session_id = store.get_json(keys::SESSION_ID).unwrap_or_default();
        let device = store.get_json(keys::DEVICE).unwrap_or_default();
        Self {
            store,
            provider,
            local_device_id,
            user_id: RwLock::new(user_id),
            device: RwLock::new(device),
            session_id: RwLock::new(session_id),
        }
    }

    /// SDK-generated device identifier, created on first launch.
    pub fn local_device_id(&self) -> &str {
        &self.local_device_id
    }

    pub fn user_id(&self) -> Option<String> {
        self.user_id.read().unwrap().clone()
    }

    pub fn set_user_id(&self, user_id: Option<&str>) {
        let mut guard = self.user_id.write().unwrap();
        *guard = user_id.map(str::to_string);
        let result = match user_id {
            Some(id) => self.store.set_json(keys::USER_ID, &id),
            None => self.store.delete(keys::USER_ID),
        };
        if let Err(err) = result {
            tracing::warn!(%err, "failed to persist user id");
        }
    }

    pub fn session_id(&self) -> Option<String> {
        self.session_id.read().unwrap().clone()
    }

    pub fn set_session_id(&self, session_id: &str) {
        let mut guard = self.session_id.write().unwrap();
        *guard = Some(session_id.to_string());
        if let Err(err) = self.store.set_json(keys::SESSION_ID, &session_id) {
            tracing::warn!(%err, "failed to persist session id");
        }
        // Keep the cached device snapshot in step; it carries the session id
        // on the wire.
        drop(guard);
        let mut device = self.device.write().unwrap();
        if let Some(snapshot) = device.as_mut() {
            snapshot.session_id = Some(session_id.to_string());
        }
    }

    /// Current device snapshot, collecting from the provider on first use.
    pub fn device(&self) -> DeviceSnapshot {
        if let Some(snapshot) = self.device.read().unwrap().clone() {
            return snapshot;
        }
        self.refresh_device()
    }

    /// Re-collect attributes from the platform provider and cache them.
    pub fn refresh_device(&self) -> DeviceSnapshot {
        let mut snapshot = self.provider.collect();
        snapshot.app_local_id = self.local_device_id.clone();
        snapshot.session_id = self.session_id();
        let mut guard = self.device.write().unwrap();
        // A push token set earlier survives provider refreshes.
        if snapshot.push_token.is_none() {
            if let Some(previous) = guard.as_ref() {
                snapshot.push_token = previous.push_token.clone();
            }
        }
        *guard = Some(snapshot.clone());
        if let Err(err) = self.store.set_json(keys::DEVICE, &snapshot) {
            tracing::warn!(%err, "failed to persist device snapshot");
        }
        snapshot
    }

    pub fn set_push_token(&self, token: &str) {
        let mut snapshot = self.device();
        snapshot.push_token = Some(token.to_string());
        let mut guard = self.device.write().unwrap();
        *guard = Some(snapshot.clone());
        if let Err(err) = self.store.set_json(keys::DEVICE, &snapshot) {
            tracing::warn!(%err, "failed to persist device snapshot");
        }
    }
}

fn load_or_create_local_id(store: &dyn KeyValueStore) -> String {
    if let Ok(Some(id)) = store.get_json::<String>(keys::LOCAL_DEVICE_ID) {
        return id;
    }
    let id = Uuid::new_v4().to_string();
    if let Err(err) = store.set_json(keys::LOCAL_DEVICE_ID, &id) {
        tracing::warn!(%err, "failed to persist local device id");
    }
    id
}
