//! Process-wide tracker of `(model, region, parameter-fingerprint)`
//! compatibility.
//!
//! The retry engine consults this before dispatching so a parameter set
//! proven incompatible for a target is not sent again, and records outcomes
//! after each dispatch.

use std::collections::{BTreeSet, HashMap};

use once_cell::sync::Lazy;
use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use tracing::debug;

static GLOBAL: Lazy<ParameterCompatibilityTracker> =
    Lazy::new(ParameterCompatibilityTracker::new);

/// Stable, order-independent hash of an `additionalModelRequestFields` map.
///
/// Keys are visited in sorted order and nested values recursively; two maps
/// equal by deep value produce the same fingerprint regardless of insertion
/// order. Lists hash in element order.
pub fn parameter_fingerprint(params: &serde_json::Value) -> String {
    let mut hasher = Sha256::new();
    hash_value(params, &mut hasher);
    hasher
        .finalize()
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect()
}

fn hash_value(value: &serde_json::Value, hasher: &mut Sha256) {
    match value {
        serde_json::Value::Null => hasher.update(b"n;"),
        serde_json::Value::Bool(b) => {
            hasher.update(b"b:");
            hasher.update([u8::from(*b)]);
        }
        serde_json::Value::Number(n) => {
            hasher.update(b"#:");
            hasher.update(n.to_string().as_bytes());
            hasher.update(b";");
        }
        serde_json::Value::String(s) => {
            hasher.update(b"s:");
            hasher.update(s.len().to_le_bytes());
            hasher.update(s.as_bytes());
        }
        serde_json::Value::Array(items) => {
            hasher.update(b"[");
            for item in items {
                hash_value(item, hasher);
            }
            hasher.update(b"]");
        }
        serde_json::Value::Object(map) => {
            hasher.update(b"{");
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            for key in keys {
                hasher.update(b"k:");
                hasher.update(key.len().to_le_bytes());
                hasher.update(key.as_bytes());
                hash_value(&map[key], hasher);
            }
            hasher.update(b"}");
        }
    }
}

/// Summary counts exposed for diagnostics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompatibilityStatistics {
    pub total_combinations: usize,
    pub compatible_count: usize,
    pub incompatible_count: usize,
    pub models_tracked: Vec<String>,
    pub regions_tracked: Vec<String>,
}

/// Tracks which parameter sets are known (in)compatible per (model, region).
pub struct ParameterCompatibilityTracker {
    // (model_id, region, fingerprint) -> compatible?
    combinations: Mutex<HashMap<(String, String, String), bool>>,
}

impl ParameterCompatibilityTracker {
    fn new() -> Self {
        Self {
            combinations: Mutex::new(HashMap::new()),
        }
    }

    /// The process-wide instance.
    pub fn global() -> &'static ParameterCompatibilityTracker {
        &GLOBAL
    }

    /// Mark a combination as compatible.
    pub fn record_success(&self, model_id: &str, region: &str, params: &serde_json::Value) {
        let fingerprint = parameter_fingerprint(params);
        self.combinations.lock().insert(
            (model_id.to_string(), region.to_string(), fingerprint),
            true,
        );
    }

    /// Mark a combination as incompatible.
    pub fn record_failure(
        &self,
        model_id: &str,
        region: &str,
        params: &serde_json::Value,
        error: &str,
    ) {
        let fingerprint = parameter_fingerprint(params);
        debug!(
            model_id,
            region,
            error,
            "recorded incompatible parameter combination"
        );
        self.combinations.lock().insert(
            (model_id.to_string(), region.to_string(), fingerprint),
            false,
        );
    }

    /// True iff this exact combination was recorded as incompatible.
    /// Unknown combinations are not incompatible.
    pub fn is_known_incompatible(
        &self,
        model_id: &str,
        region: &str,
        params: &serde_json::Value,
    ) -> bool {
        let fingerprint = parameter_fingerprint(params);
        self.combinations
            .lock()
            .get(&(model_id.to_string(), region.to_string(), fingerprint))
            .is_some_and(|compatible| !compatible)
    }

    pub fn statistics(&self) -> CompatibilityStatistics {
        let combinations = self.combinations.lock();
        let incompatible_count = combinations.values().filter(|c| !**c).count();
        let models: BTreeSet<String> =
            combinations.keys().map(|(model, _, _)| model.clone()).collect();
        let regions: BTreeSet<String> =
            combinations.keys().map(|(_, region, _)| region.clone()).collect();
        CompatibilityStatistics {
            total_combinations: combinations.len(),
            compatible_count: combinations.len() - incompatible_count,
            incompatible_count,
            models_tracked: models.into_iter().collect(),
            regions_tracked: regions.into_iter().collect(),
        }
    }

    /// Clear all tracked state. Tests only.
    pub fn reset_for_testing(&self) {
        self.combinations.lock().clear();
    }
}
