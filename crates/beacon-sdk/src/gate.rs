//! Impression gating.
//!
//! Frequency-cap bookkeeping (sliding window over persisted impression
//! timestamps) plus the single-flight display lock: at most one campaign is
//! presented at a time, with a single pending slot while the rendering
//! surface is not yet ready.

use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};

use beacon_core::{Campaign, FrequencyCap, HideKind};

use crate::store::{keys, KeyValueStore, KeyValueStoreExt};

/// Impression timestamps retained per campaign.
const MAX_RETAINED_IMPRESSIONS: usize = 100;

/// Rendering surface collaborator. HTML rendering itself is out of scope;
/// the gate only needs readiness and a present call.
pub trait PresentationSurface: Send + Sync {
    fn is_ready(&self) -> bool;
    fn present(&self, campaign: &Campaign);
}

struct GateState {
    display_locked: bool,
    pending: Option<Campaign>,
}

pub struct ImpressionGate {
    store: Arc<dyn KeyValueStore>,
    surface: Arc<dyn PresentationSurface>,
    state: Mutex<GateState>,
}

impl ImpressionGate {
    pub fn new(store: Arc<dyn KeyValueStore>, surface: Arc<dyn PresentationSurface>) -> Self {
        Self {
            store,
            surface,
            state: Mutex::new(GateState {
                display_locked: false,
                pending: None,
            }),
        }
    }

    /// Whether the campaign may be shown right now: not hidden by a
    /// dismissal, not frequency-capped, and no other campaign displayed.
    pub fn can_show(&self, campaign: &Campaign, now: DateTime<Utc>) -> bool {
        if self.hidden_until(&campaign.id) > now.timestamp_millis() {
            return false;
        }
        if let Some(cap) = campaign.trigger_condition.frequency_cap {
            if self.impressions_within(&campaign.id, cap, now) >= cap.limit as usize {
                return false;
            }
        }
        !self.state.lock().unwrap().display_locked
    }

    /// Record an impression and take the display lock. Presents immediately
    /// when the surface is ready, otherwise parks the campaign in the single
    /// pending slot. Returns false when the gate refuses.
    pub fn try_show(&self, campaign: &Campaign, now: DateTime<Utc>) -> bool {
        if !self.can_show(campaign, now) {
            return false;
        }

        let mut state = self.state.lock().unwrap();
        if state.display_locked {
            return false;
        }
        state.display_locked = true;
        self.record_impression(&campaign.id, now);

        if self.surface.is_ready() {
            self.surface.present(campaign);
        } else {
            // The lock is held, so the slot is necessarily free; a newer
            // candidate can never evict a parked campaign.
            state.pending = Some(campaign.clone());
        }
        true
    }

    /// Surface signal: present the parked campaign, if any.
    pub fn surface_ready(&self) {
        let parked = {
            let mut state = self.state.lock().unwrap();
            state.pending.take()
        };
        if let Some(campaign) = parked {
            self.surface.present(&campaign);
        }
    }

    /// Dismissal. Clears the display lock; a positive-duration hide persists
    /// the suppression window, a zero-duration close does not.
    pub fn hide(&self, campaign_id: &str, kind: HideKind, now: DateTime<Utc>) {
        {
            let mut state = self.state.lock().unwrap();
            state.display_locked = false;
        }
        let duration = kind.hide_duration();
        if duration > chrono::Duration::zero() {
            let until = (now + duration).timestamp_millis();
            if let Err(err) = self.store.set_json(&keys::hide_campaign(campaign_id), &until) {
                tracing::warn!(campaign_id, %err, "failed to persist hide window");
            }
        }
    }

    pub fn is_display_locked(&self) -> bool {
        self.state.lock().unwrap().display_locked
    }

    fn hidden_until(&self, campaign_id: &str) -> i64 {
        self.store
            .get_json::<i64>(&keys::hide_campaign(campaign_id))
            .unwrap_or_default()
            .unwrap_or(i64::MIN)
    }

    fn impressions_within(&self, campaign_id: &str, cap: FrequencyCap, now: DateTime<Utc>) -> usize {
        let window_ms = cap.duration_minutes * 60 * 1000;
        let cutoff = now.timestamp_millis() - window_ms;
        self.load_impressions(campaign_id)
            .into_iter()
            .filter(|ts| *ts > cutoff)
            .count()
    }

    fn record_impression(&self, campaign_id: &str, now: DateTime<Utc>) {
        let mut timestamps = self.load_impressions(campaign_id);
        timestamps.push(now.timestamp_millis());
        if timestamps.len() > MAX_RETAINED_IMPRESSIONS {
            let excess = timestamps.len() - MAX_RETAINED_IMPRESSIONS;
            timestamps.drain(..excess);
        }
        if let Err(err) = self
            .store
            .set_json(&keys::impressions(campaign_id), &timestamps)
        {
            tracing::warn!(campaign_id, %err, "failed to persist impressions");
        }
    }

    fn load_impressions(&self, campaign_id: &str) -> Vec<i64> {
        self.store
            .get_json(&keys::impressions(campaign_id))
            .unwrap_or_default()
            .unwrap_or_default()
    }
}
