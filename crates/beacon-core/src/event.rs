//! Event and profile payloads plus the canonical event vocabulary.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::value::PropertyValue;

/// Reserved property keys stamped by the pipeline or read by the evaluator.
pub mod keys {
    pub const SESSION_ID: &str = "mkt_session_id";
    pub const REVENUE: &str = "mkt_revenue";
    pub const ITEMS: &str = "mkt_items";

    pub const CAMPAIGN_ID: &str = "mkt_campaign_id";
    pub const CAMPAIGN_CATEGORY: &str = "mkt_campaign_category";
    pub const CHANNEL_TYPE: &str = "mkt_channel_type";
    pub const SUB_CHANNEL_TYPE: &str = "mkt_sub_channel_type";
    pub const RESULT_STATUS: &str = "mkt_result_status";
    pub const RESULT_MESSAGE: &str = "mkt_result_message";
    pub const IS_SUCCESS: &str = "mkt_is_success";
    pub const MESSAGE_ID: &str = "mkt_message_id";
    pub const LOCATION_ID: &str = "mkt_location_id";
}

/// Canonical events emitted by the SDK itself or by the named-event sugar.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, strum::AsRefStr, strum::Display, strum::IntoStaticStr,
)]
pub enum SystemEvent {
    #[strum(serialize = "mkt_login")]
    Login,
    #[strum(serialize = "mkt_logout")]
    Logout,
    #[strum(serialize = "mkt_page_view")]
    PageView,
    #[strum(serialize = "mkt_purchase")]
    Purchase,
    #[strum(serialize = "mkt_signup")]
    Signup,
    #[strum(serialize = "mkt_session_start")]
    SessionStart,
    #[strum(serialize = "mkt_session_end")]
    SessionEnd,
    #[strum(serialize = "mkt_search")]
    Search,
    #[strum(serialize = "mkt_product_view")]
    ProductView,
    #[strum(serialize = "mkt_add_to_cart")]
    AddToCart,
    #[strum(serialize = "mkt_add_to_wishlist")]
    AddToWishlist,
    #[strum(serialize = "mkt_begin_checkout")]
    BeginCheckout,
    #[strum(serialize = "mkt_cart_view")]
    CartView,
    #[strum(serialize = "mkt_delivery_message")]
    DeliveryMessage,
    #[strum(serialize = "mkt_click_message")]
    ClickMessage,
}

impl SystemEvent {
    /// The wire name of this event.
    pub fn name(self) -> &'static str {
        self.into()
    }
}

/// A behavioral event. Immutable once constructed; the timestamp is fixed
/// before the event reaches a queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Optional idempotency id; the server deduplicates on it.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub name: String,
    #[serde(rename = "user_id", skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub properties: HashMap<String, PropertyValue>,
    pub timestamp: DateTime<Utc>,
}

impl Event {
    pub fn new(name: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self {
            id: None,
            name: name.into(),
            user_id: None,
            properties: HashMap::new(),
            timestamp,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn with_properties(mut self, properties: HashMap<String, PropertyValue>) -> Self {
        self.properties = properties;
        self
    }

    pub fn with_property(
        mut self,
        key: impl Into<String>,
        value: impl Into<PropertyValue>,
    ) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    /// Look up a property by name.
    pub fn property(&self, key: &str) -> Option<&PropertyValue> {
        self.properties.get(key)
    }
}

/// A user profile update.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    #[serde(rename = "user_id")]
    pub user_id: String,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub properties: HashMap<String, PropertyValue>,
    pub timestamp: DateTime<Utc>,
}

impl Profile {
    pub fn new(user_id: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self {
            user_id: user_id.into(),
            properties: HashMap::new(),
            timestamp,
        }
    }

    pub fn with_properties(mut self, properties: HashMap<String, PropertyValue>) -> Self {
        self.properties = properties;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_system_event_names() {
        assert_eq!(SystemEvent::Purchase.name(), "mkt_purchase");
        assert_eq!(SystemEvent::SessionStart.as_ref(), "mkt_session_start");
        assert_eq!(SystemEvent::Login.to_string(), "mkt_login");
    }

    #[test]
    fn test_event_builder() {
        let event = Event::new("mkt_purchase", Utc::now())
            .with_id("evt-1")
            .with_user("user_123")
            .with_property(keys::REVENUE, 9.99);

        assert_eq!(event.name, "mkt_purchase");
        assert_eq!(event.user_id.as_deref(), Some("user_123"));
        assert_eq!(
            event.property(keys::REVENUE).and_then(|v| v.as_f64()),
            Some(9.99)
        );
    }

    #[test]
    fn test_event_serialization_skips_empty_fields() {
        let event = Event::new("mkt_page_view", Utc::now());
        let json = serde_json::to_value(&event).unwrap();
        assert!(json.get("id").is_none());
        assert!(json.get("user_id").is_none());
        assert!(json.get("properties").is_none());
        assert_eq!(json["name"], "mkt_page_view");
    }
}
