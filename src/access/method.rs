//! Access method enumeration and learned preferences.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// How a model is invoked: directly by model id, or via a cross-region
/// inference profile (regional or global).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AccessMethod {
    Direct,
    RegionalCris,
    GlobalCris,
    #[default]
    Unknown,
}

impl AccessMethod {
    /// Stable string form used in statistics and response metadata.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Direct => "direct",
            Self::RegionalCris => "regional_cris",
            Self::GlobalCris => "global_cris",
            Self::Unknown => "unknown",
        }
    }

    /// Parse from the canonical strings. The legacy spelling `"cris_only"`
    /// is accepted and mapped to [`AccessMethod::RegionalCris`].
    pub fn parse(value: &str) -> Self {
        match value {
            "direct" => Self::Direct,
            "regional_cris" | "cris_only" => Self::RegionalCris,
            "global_cris" => Self::GlobalCris,
            _ => Self::Unknown,
        }
    }

    /// Whether this method routes through an inference profile.
    pub fn is_profile(&self) -> bool {
        matches!(self, Self::RegionalCris | Self::GlobalCris)
    }
}

impl std::fmt::Display for AccessMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Learned preference for a (model, region) key. Exactly one `prefer_*`
/// flag is true.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessPreference {
    pub prefer_direct: bool,
    pub prefer_regional: bool,
    pub prefer_global: bool,
    /// True when the preference was learned from a profile-requirement error
    /// rather than from an observed success.
    pub learned_from_error: bool,
    pub last_updated: DateTime<Utc>,
}

impl AccessPreference {
    /// Build a preference for the given method. Returns `None` for
    /// [`AccessMethod::Unknown`], which expresses no preference.
    pub fn for_method(method: AccessMethod, learned_from_error: bool) -> Option<Self> {
        let (direct, regional, global) = match method {
            AccessMethod::Direct => (true, false, false),
            AccessMethod::RegionalCris => (false, true, false),
            AccessMethod::GlobalCris => (false, false, true),
            AccessMethod::Unknown => return None,
        };
        Some(Self {
            prefer_direct: direct,
            prefer_regional: regional,
            prefer_global: global,
            learned_from_error,
            last_updated: Utc::now(),
        })
    }

    /// The method this preference points at.
    pub fn preferred_method(&self) -> AccessMethod {
        if self.prefer_direct {
            AccessMethod::Direct
        } else if self.prefer_regional {
            AccessMethod::RegionalCris
        } else {
            AccessMethod::GlobalCris
        }
    }
}
