//! Server-synchronized time.
//!
//! The offset is fetched from the server-info endpoint, RTT-adjusted, and
//! cached for five minutes. Concurrent callers coalesce on the state lock:
//! the first one fetches while the rest wait and reuse the fresh cache.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};

use crate::api::Api;

const CACHE_DURATION: Duration = Duration::from_secs(300);

struct ClockState {
    /// Server time paired with the monotonic instant it was computed at.
    last_synced: Option<(DateTime<Utc>, Instant)>,
}

pub struct ServerClock {
    api: Arc<dyn Api>,
    state: tokio::sync::Mutex<ClockState>,
}

impl ServerClock {
    pub fn new(api: Arc<dyn Api>) -> Self {
        Self {
            api,
            state: tokio::sync::Mutex::new(ClockState { last_synced: None }),
        }
    }

    /// Current server-adjusted time. Falls back to the last known offset,
    /// then to local time, when the fetch fails.
    pub async fn now(&self) -> DateTime<Utc> {
        let mut state = self.state.lock().await;

        if let Some((server, at)) = state.last_synced {
            if at.elapsed() < CACHE_DURATION {
                return server + chrono::Duration::from_std(at.elapsed()).unwrap_or_default();
            }
        }

        let started = Instant::now();
        match self.api.server_info(Utc::now().timestamp_millis()).await {
            Ok(info) => {
                let rtt_ms = started.elapsed().as_millis() as i64;
                let adjusted = Utc::now()
                    + chrono::Duration::milliseconds(info.server_time_offset - rtt_ms / 2);
                state.last_synced = Some((adjusted, Instant::now()));
                adjusted
            }
            Err(err) => {
                tracing::warn!(%err, "failed to fetch server time");
                match state.last_synced {
                    Some((server, at)) => {
                        server + chrono::Duration::from_std(at.elapsed()).unwrap_or_default()
                    }
                    None => Utc::now(),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{
        BulkEventRequest, BulkProfileRequest, CampaignFilter, CampaignResponse, EventRequest,
        ProfileRequest, ServerInfo,
    };
    use async_trait::async_trait;
    use beacon_core::{BeaconError, BeaconResult, DeviceRequest};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FixedOffsetApi {
        offset_ms: i64,
        fail: bool,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Api for FixedOffsetApi {
        async fn ingest_event(&self, _: &EventRequest) -> BeaconResult<()> {
            Ok(())
        }
        async fn ingest_events_bulk(&self, _: &BulkEventRequest) -> BeaconResult<()> {
            Ok(())
        }
        async fn update_profile(&self, _: &ProfileRequest) -> BeaconResult<()> {
            Ok(())
        }
        async fn update_profiles_bulk(&self, _: &BulkProfileRequest) -> BeaconResult<()> {
            Ok(())
        }
        async fn update_device(&self, _: &DeviceRequest) -> BeaconResult<()> {
            Ok(())
        }
        async fn fetch_campaigns(&self, _: &CampaignFilter) -> BeaconResult<CampaignResponse> {
            Ok(CampaignResponse {
                checksum: None,
                campaigns: Vec::new(),
            })
        }
        async fn server_info(&self, _: i64) -> BeaconResult<ServerInfo> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                Err(BeaconError::ServerRejected { status: 500 })
            } else {
                Ok(ServerInfo {
                    server_time_offset: self.offset_ms,
                })
            }
        }
    }

    #[tokio::test]
    async fn test_offset_is_applied() {
        let api = Arc::new(FixedOffsetApi {
            offset_ms: 60_000,
            fail: false,
            calls: AtomicUsize::new(0),
        });
        let clock = ServerClock::new(api);
        let server_now = clock.now().await;
        let skew = server_now - Utc::now();
        assert!(skew > chrono::Duration::seconds(55));
        assert!(skew < chrono::Duration::seconds(65));
    }

    #[tokio::test]
    async fn test_cache_suppresses_refetch() {
        let api = Arc::new(FixedOffsetApi {
            offset_ms: 0,
            fail: false,
            calls: AtomicUsize::new(0),
        });
        let clock = ServerClock::new(api.clone());
        clock.now().await;
        clock.now().await;
        clock.now().await;
        assert_eq!(api.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_fallback_to_local_time_on_failure() {
        let api = Arc::new(FixedOffsetApi {
            offset_ms: 0,
            fail: true,
            calls: AtomicUsize::new(0),
        });
        let clock = ServerClock::new(api);
        let before = Utc::now();
        let now = clock.now().await;
        assert!(now >= before);
        assert!(now - before < chrono::Duration::seconds(5));
    }
}
