//! Access method selection.
//!
//! Given a model's per-region access info and an optional learned
//! preference, picks the model id to send and the method it represents.
//! Selection is deterministic: fixed inputs always produce identical output.

use super::method::{AccessMethod, AccessPreference};
use crate::catalog::types::AccessInfo;

/// Default preference order when nothing has been learned.
const DEFAULT_ORDER: [AccessMethod; 3] = [
    AccessMethod::Direct,
    AccessMethod::RegionalCris,
    AccessMethod::GlobalCris,
];

/// Resolve one method on the access info, returning the id to send.
fn method_id(access: &AccessInfo, method: AccessMethod) -> Option<&str> {
    match method {
        AccessMethod::Direct if access.has_direct => access.direct_model_id.as_deref(),
        AccessMethod::RegionalCris if access.has_regional_profile => {
            access.regional_profile_id.as_deref()
        }
        AccessMethod::GlobalCris if access.has_global_profile => {
            access.global_profile_id.as_deref()
        }
        _ => None,
    }
}

/// Pick the best available access method.
///
/// A learned preference wins when its method is available; otherwise the
/// default order applies. Returns `None` only for an access info violating
/// its own invariant (no method available).
pub fn select(
    access: &AccessInfo,
    preference: Option<&AccessPreference>,
) -> Option<(String, AccessMethod)> {
    if let Some(preference) = preference {
        let method = preference.preferred_method();
        if let Some(id) = method_id(access, method) {
            return Some((id.to_string(), method));
        }
    }

    for method in DEFAULT_ORDER {
        if let Some(id) = method_id(access, method) {
            return Some((id.to_string(), method));
        }
    }

    None
}

/// Remaining available methods after `failed_method`, in default order.
pub fn fallback_methods(
    access: &AccessInfo,
    failed_method: AccessMethod,
) -> Vec<(String, AccessMethod)> {
    DEFAULT_ORDER
        .into_iter()
        .filter(|method| *method != failed_method)
        .filter_map(|method| method_id(access, method).map(|id| (id.to_string(), method)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn full_access() -> AccessInfo {
        AccessInfo {
            region: "us-east-1".into(),
            has_direct: true,
            has_regional_profile: true,
            has_global_profile: true,
            direct_model_id: Some("anthropic.claude-3-haiku-20240307-v1:0".into()),
            regional_profile_id: Some("us.anthropic.claude-3-haiku-20240307-v1:0".into()),
            global_profile_id: Some("global.anthropic.claude-3-haiku-20240307-v1:0".into()),
        }
    }

    fn profile_only_access() -> AccessInfo {
        AccessInfo {
            region: "us-east-1".into(),
            has_regional_profile: true,
            regional_profile_id: Some("us.anthropic.claude-opus-4-20250514-v1:0".into()),
            ..Default::default()
        }
    }

    #[test]
    fn test_default_order_prefers_direct() {
        let (id, method) = select(&full_access(), None).unwrap();
        assert_eq!(method, AccessMethod::Direct);
        assert_eq!(id, "anthropic.claude-3-haiku-20240307-v1:0");
    }

    #[test]
    fn test_default_order_falls_through() {
        let (id, method) = select(&profile_only_access(), None).unwrap();
        assert_eq!(method, AccessMethod::RegionalCris);
        assert_eq!(id, "us.anthropic.claude-opus-4-20250514-v1:0");

        let global_only = AccessInfo {
            region: "us-east-1".into(),
            has_global_profile: true,
            global_profile_id: Some("global.some-model".into()),
            ..Default::default()
        };
        let (id, method) = select(&global_only, None).unwrap();
        assert_eq!(method, AccessMethod::GlobalCris);
        assert_eq!(id, "global.some-model");
    }

    #[test]
    fn test_learned_preference_wins_when_available() {
        let preference = AccessPreference::for_method(AccessMethod::RegionalCris, true).unwrap();
        let (id, method) = select(&full_access(), Some(&preference)).unwrap();
        assert_eq!(method, AccessMethod::RegionalCris);
        assert_eq!(id, "us.anthropic.claude-3-haiku-20240307-v1:0");
    }

    #[test]
    fn test_unavailable_preference_falls_back_to_default_order() {
        let preference = AccessPreference::for_method(AccessMethod::GlobalCris, false).unwrap();
        let access = profile_only_access();
        let (_, method) = select(&access, Some(&preference)).unwrap();
        assert_eq!(method, AccessMethod::RegionalCris);
    }

    #[test]
    fn test_select_deterministic() {
        let access = full_access();
        let preference = AccessPreference::for_method(AccessMethod::GlobalCris, false);
        let first = select(&access, preference.as_ref());
        for _ in 0..10 {
            assert_eq!(select(&access, preference.as_ref()), first);
        }
    }

    #[test]
    fn test_select_none_for_empty_access() {
        let empty = AccessInfo {
            region: "us-east-1".into(),
            ..Default::default()
        };
        assert!(select(&empty, None).is_none());
    }

    #[test]
    fn test_fallback_excludes_failed_method() {
        let fallbacks = fallback_methods(&full_access(), AccessMethod::Direct);
        assert_eq!(fallbacks.len(), 2);
        assert_eq!(fallbacks[0].1, AccessMethod::RegionalCris);
        assert_eq!(fallbacks[1].1, AccessMethod::GlobalCris);
        assert!(fallbacks.iter().all(|(_, m)| *m != AccessMethod::Direct));
    }

    #[test]
    fn test_fallback_respects_availability() {
        let fallbacks = fallback_methods(&profile_only_access(), AccessMethod::RegionalCris);
        assert!(fallbacks.is_empty());

        let fallbacks = fallback_methods(&profile_only_access(), AccessMethod::Direct);
        assert_eq!(fallbacks.len(), 1);
        assert_eq!(fallbacks[0].1, AccessMethod::RegionalCris);
    }
}
