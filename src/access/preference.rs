//! Process-wide tracker of learned access-method preferences.
//!
//! One instance exists per process, created lazily and shared by every
//! manager. All methods take the internal mutex; concurrent writes to the
//! same key are last-write-wins. `reset_for_testing` is the only supported
//! way to clear state.

use std::collections::HashMap;

use once_cell::sync::Lazy;
use parking_lot::Mutex;
use tracing::debug;

use super::method::{AccessMethod, AccessPreference};

static GLOBAL: Lazy<AccessPreferenceTracker> = Lazy::new(AccessPreferenceTracker::new);

/// Tracks learned `(model_id, region)` access preferences.
pub struct AccessPreferenceTracker {
    preferences: Mutex<HashMap<(String, String), AccessPreference>>,
}

impl AccessPreferenceTracker {
    fn new() -> Self {
        Self {
            preferences: Mutex::new(HashMap::new()),
        }
    }

    /// The process-wide instance.
    pub fn global() -> &'static AccessPreferenceTracker {
        &GLOBAL
    }

    /// Record a successful call, preferring the method that worked.
    pub fn record_success(&self, model_id: &str, region: &str, method: AccessMethod) {
        let Some(preference) = AccessPreference::for_method(method, false) else {
            return;
        };
        self.preferences
            .lock()
            .insert((model_id.to_string(), region.to_string()), preference);
    }

    /// Record a profile-requirement error: direct access is known not to
    /// work, so prefer the regional profile (or the global one when only
    /// that is available).
    pub fn record_profile_requirement(
        &self,
        model_id: &str,
        region: &str,
        global_only: bool,
    ) {
        let method = if global_only {
            AccessMethod::GlobalCris
        } else {
            AccessMethod::RegionalCris
        };
        let Some(preference) = AccessPreference::for_method(method, true) else {
            return;
        };
        debug!(
            model_id,
            region,
            method = %method,
            "learned profile requirement from error"
        );
        self.preferences
            .lock()
            .insert((model_id.to_string(), region.to_string()), preference);
    }

    /// The learned preference for a key, if any.
    pub fn get_preference(&self, model_id: &str, region: &str) -> Option<AccessPreference> {
        self.preferences
            .lock()
            .get(&(model_id.to_string(), region.to_string()))
            .cloned()
    }

    /// True iff the learned preference says direct access should be skipped.
    pub fn requires_profile(&self, model_id: &str, region: &str) -> bool {
        self.get_preference(model_id, region)
            .is_some_and(|p| !p.prefer_direct)
    }

    /// Number of learned preferences, and how many were learned from errors.
    pub fn statistics(&self) -> (usize, usize) {
        let preferences = self.preferences.lock();
        let learned = preferences
            .values()
            .filter(|p| p.learned_from_error)
            .count();
        (preferences.len(), learned)
    }

    /// Clear all learned state. Tests only.
    pub fn reset_for_testing(&self) {
        self.preferences.lock().clear();
    }
}
