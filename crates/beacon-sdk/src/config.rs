//! SDK configuration.

use serde::{Deserialize, Serialize};

use crate::store::DEFAULT_MAX_STORAGE_SIZE;

const DEFAULT_EVENT_BASE_URL: &str = "https://event.beacon-api.io";
const DEFAULT_CRM_BASE_URL: &str = "https://crm.beacon-api.io";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BeaconConfig {
    /// Project identifier appended to every endpoint call.
    pub project_id: String,
    /// Ingestion host.
    #[serde(default = "default_event_base_url")]
    pub event_base_url: String,
    /// CRM host (profiles, campaigns, server time).
    #[serde(default = "default_crm_base_url")]
    pub crm_base_url: String,
    /// Capacity of each persisted retry queue.
    #[serde(default = "default_max_stored_failures")]
    pub max_stored_failures: usize,
}

fn default_event_base_url() -> String {
    DEFAULT_EVENT_BASE_URL.to_string()
}

fn default_crm_base_url() -> String {
    DEFAULT_CRM_BASE_URL.to_string()
}

fn default_max_stored_failures() -> usize {
    DEFAULT_MAX_STORAGE_SIZE
}

impl BeaconConfig {
    pub fn new(project_id: impl Into<String>) -> Self {
        Self {
            project_id: project_id.into(),
            event_base_url: default_event_base_url(),
            crm_base_url: default_crm_base_url(),
            max_stored_failures: default_max_stored_failures(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = BeaconConfig::new("project-1");
        assert_eq!(config.project_id, "project-1");
        assert_eq!(config.max_stored_failures, 100);
        assert!(config.event_base_url.starts_with("https://event."));
    }

    #[test]
    fn test_deserialization_fills_defaults() {
        let config: BeaconConfig = serde_json::from_str(r#"{"project_id":"p"}"#).unwrap();
        assert_eq!(config.crm_base_url, DEFAULT_CRM_BASE_URL);
        assert_eq!(config.max_stored_failures, 100);
    }
}
