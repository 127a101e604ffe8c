//! Device snapshot and its wire form.
//!
//! Attribute collection itself (battery, locale, network type, ad ids) is an
//! external collaborator; the snapshot is the cached bag it hands over.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::value::PropertyValue;

/// Cached device state owned by the profile cache and refreshed by the
/// platform device-info collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceSnapshot {
    /// Stable device identifier supplied by the platform, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_id: Option<String>,
    /// SDK-generated identifier, persisted on first launch.
    pub app_local_id: String,
    pub platform: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub push_token: Option<String>,
    /// Opaque attribute bag (os version, model, locale, battery, ...).
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub properties: HashMap<String, PropertyValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
}

impl DeviceSnapshot {
    pub fn new(app_local_id: impl Into<String>, platform: impl Into<String>) -> Self {
        Self {
            device_id: None,
            app_local_id: app_local_id.into(),
            platform: platform.into(),
            push_token: None,
            properties: HashMap::new(),
            session_id: None,
        }
    }

    /// Attribute lookup used by DEVICE-path rule conditions.
    pub fn property(&self, key: &str) -> Option<&PropertyValue> {
        self.properties.get(key)
    }

    /// Build the wire request for profile/device endpoints. The session id
    /// travels inside the property bag.
    pub fn to_request(&self, remove_user_id: bool) -> DeviceRequest {
        let mut properties = self.properties.clone();
        if let Some(session_id) = &self.session_id {
            properties.insert("session_id".to_string(), session_id.as_str().into());
        }
        DeviceRequest {
            device_id: self.device_id.clone(),
            app_local_id: self.app_local_id.clone(),
            platform: self.platform.clone(),
            token: self.push_token.clone(),
            properties,
            remove_user_id,
        }
    }
}

/// Wire form of a device snapshot, sent with every ingest/profile call and
/// as the body of the device-profile endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceRequest {
    #[serde(rename = "device_id", skip_serializing_if = "Option::is_none")]
    pub device_id: Option<String>,
    #[serde(rename = "app_local_id")]
    pub app_local_id: String,
    pub platform: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub properties: HashMap<String, PropertyValue>,
    #[serde(rename = "remove_user_id")]
    pub remove_user_id: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_to_request_carries_session_id() {
        let mut snapshot = DeviceSnapshot::new("local-1", "ios");
        snapshot.session_id = Some("session-9".to_string());
        let request = snapshot.to_request(false);
        assert_eq!(
            request.properties.get("session_id").and_then(|v| v.as_str()),
            Some("session-9")
        );
        assert!(!request.remove_user_id);
    }

    #[test]
    fn test_remove_user_id_flag_passes_through() {
        let snapshot = DeviceSnapshot::new("local-1", "android");
        assert!(snapshot.to_request(true).remove_user_id);
    }
}
