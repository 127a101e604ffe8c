//! HTTP API client and wire request/response types.
//!
//! One trait method per endpoint so tests can substitute a mock transport.
//! Every response body is enveloped as `{code, message, data}`; a 2xx status
//! with a decodable envelope is success, a non-2xx status is a retryable
//! `ServerRejected`, and a bad body on a 2xx status is a local `Decode`
//! failure.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use beacon_core::{BeaconError, BeaconResult, Campaign, DeviceRequest, Event, Profile, PropertyValue};

use crate::config::BeaconConfig;

/// Single-event ingestion body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub name: String,
    #[serde(rename = "user_id", skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    pub device: DeviceRequest,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub properties: HashMap<String, PropertyValue>,
    pub timestamp: DateTime<Utc>,
}

impl EventRequest {
    pub fn new(event: &Event, device: DeviceRequest) -> Self {
        Self {
            id: event.id.clone(),
            name: event.name.clone(),
            user_id: event.user_id.clone(),
            device,
            properties: event.properties.clone(),
            timestamp: event.timestamp,
        }
    }
}

/// Bulk ingestion body; one device envelope for the whole batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BulkEventRequest {
    pub device: DeviceRequest,
    pub events: Vec<Event>,
}

/// Profile-update body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProfileRequest {
    #[serde(rename = "user_id")]
    pub user_id: String,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub properties: HashMap<String, PropertyValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device: Option<DeviceRequest>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BulkProfileRequest {
    pub device: DeviceRequest,
    pub profiles: Vec<Profile>,
}

/// Campaign-fetch filter body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CampaignFilter {
    #[serde(rename = "project_id")]
    pub project_id: String,
    #[serde(rename = "user_id", skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    pub device: DeviceRequest,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CampaignResponse {
    #[serde(default)]
    pub checksum: Option<String>,
    #[serde(default)]
    pub campaigns: Vec<Campaign>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ServerInfo {
    /// Server-minus-client clock offset in milliseconds.
    #[serde(rename = "server_time_offset")]
    pub server_time_offset: i64,
}

/// Standard response envelope.
#[derive(Debug, Deserialize)]
pub struct ServerResponse<T> {
    pub code: i64,
    pub message: String,
    pub data: T,
}

/// Transport interface consumed by the pipeline, campaign cache, and server
/// clock.
#[async_trait]
pub trait Api: Send + Sync {
    async fn ingest_event(&self, request: &EventRequest) -> BeaconResult<()>;
    async fn ingest_events_bulk(&self, request: &BulkEventRequest) -> BeaconResult<()>;
    async fn update_profile(&self, request: &ProfileRequest) -> BeaconResult<()>;
    async fn update_profiles_bulk(&self, request: &BulkProfileRequest) -> BeaconResult<()>;
    async fn update_device(&self, request: &DeviceRequest) -> BeaconResult<()>;
    async fn fetch_campaigns(&self, request: &CampaignFilter) -> BeaconResult<CampaignResponse>;
    async fn server_info(&self, client_time_ms: i64) -> BeaconResult<ServerInfo>;
}

enum BaseUrl {
    Event,
    Crm,
}

/// reqwest-backed implementation of [`Api`].
pub struct HttpApi {
    http: reqwest::Client,
    config: Arc<BeaconConfig>,
}

impl HttpApi {
    pub fn new(config: Arc<BeaconConfig>) -> Self {
        Self {
            http: reqwest::Client::new(),
            config,
        }
    }

    fn url(&self, base: BaseUrl, path: &str) -> BeaconResult<reqwest::Url> {
        let host = match base {
            BaseUrl::Event => &self.config.event_base_url,
            BaseUrl::Crm => &self.config.crm_base_url,
        };
        reqwest::Url::parse(&format!("{host}{path}"))
            .map_err(|e| BeaconError::InvalidRequest(format!("{host}{path}: {e}")))
    }

    fn project_path(&self, path: &str) -> String {
        format!("{path}?project_id={}", self.config.project_id)
    }

    async fn post<B: Serialize + ?Sized>(
        &self,
        base: BaseUrl,
        path: &str,
        body: &B,
    ) -> BeaconResult<reqwest::Response> {
        let url = self.url(base, path)?;
        let body = serde_json::to_vec(body)
            .map_err(|e| BeaconError::InvalidRequest(format!("encode body: {e}")))?;
        let response = self
            .http
            .post(url)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .await
            .map_err(|e| BeaconError::transport_with("request failed", e))?;

        let status = response.status();
        if status.is_success() {
            Ok(response)
        } else {
            Err(BeaconError::ServerRejected {
                status: status.as_u16(),
            })
        }
    }

    async fn post_unit<B: Serialize + ?Sized>(
        &self,
        base: BaseUrl,
        path: &str,
        body: &B,
    ) -> BeaconResult<()> {
        self.post(base, path, body).await.map(|_| ())
    }

    async fn post_json<T: DeserializeOwned, B: Serialize + ?Sized>(
        &self,
        base: BaseUrl,
        path: &str,
        body: &B,
    ) -> BeaconResult<T> {
        let response = self.post(base, path, body).await?;
        let envelope: ServerResponse<T> = response
            .json()
            .await
            .map_err(|e| BeaconError::Decode(e.to_string()))?;
        tracing::debug!(code = envelope.code, message = %envelope.message, "api response");
        Ok(envelope.data)
    }
}

#[async_trait]
impl Api for HttpApi {
    async fn ingest_event(&self, request: &EventRequest) -> BeaconResult<()> {
        self.post_unit(
            BaseUrl::Event,
            &self.project_path("/v1/client/events"),
            request,
        )
        .await
    }

    async fn ingest_events_bulk(&self, request: &BulkEventRequest) -> BeaconResult<()> {
        self.post_unit(
            BaseUrl::Event,
            &self.project_path("/v1/client/events/bulk"),
            request,
        )
        .await
    }

    async fn update_profile(&self, request: &ProfileRequest) -> BeaconResult<()> {
        self.post_unit(
            BaseUrl::Crm,
            &self.project_path("/v1/client/profile/user"),
            request,
        )
        .await
    }

    async fn update_profiles_bulk(&self, request: &BulkProfileRequest) -> BeaconResult<()> {
        self.post_unit(
            BaseUrl::Crm,
            &self.project_path("/v1/client/profile/user/bulk"),
            request,
        )
        .await
    }

    async fn update_device(&self, request: &DeviceRequest) -> BeaconResult<()> {
        self.post_unit(
            BaseUrl::Event,
            &self.project_path("/v1/client/profile/device"),
            request,
        )
        .await
    }

    async fn fetch_campaigns(&self, request: &CampaignFilter) -> BeaconResult<CampaignResponse> {
        self.post_json(BaseUrl::Crm, "/api/v1/campaigns", request)
            .await
    }

    async fn server_info(&self, client_time_ms: i64) -> BeaconResult<ServerInfo> {
        let url = self.url(
            BaseUrl::Crm,
            &format!("/api/v1/meta/server-info?client_time={client_time_ms}"),
        )?;
        let response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| BeaconError::transport_with("request failed", e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(BeaconError::ServerRejected {
                status: status.as_u16(),
            });
        }

        let envelope: ServerResponse<ServerInfo> = response
            .json()
            .await
            .map_err(|e| BeaconError::Decode(e.to_string()))?;
        Ok(envelope.data)
    }
}
