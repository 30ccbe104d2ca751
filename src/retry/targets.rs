//! Retry target assembly.
//!
//! A target is one (model, region, access-info) triple. The configured
//! retry strategy controls only the outer ordering of the target list; the
//! access-method selector governs method choice per target.

use crate::catalog::types::{AccessInfo, Catalog};
use crate::config::RetryStrategy;

/// One candidate for a dispatch, owned by the call that created it.
#[derive(Debug, Clone)]
pub struct RetryTarget {
    /// Canonical catalog name.
    pub model_name: String,
    /// Underlying service model id, used as the tracker key.
    pub model_id: String,
    pub region: String,
    pub access: AccessInfo,
}

/// Build the ordered target list for a call.
///
/// `ModelFirst` exhausts every region for the first model before moving to
/// the next model; `RegionFirst` exhausts every model in the first region
/// first. Unavailable (model, region) combinations are skipped. Ordering is
/// stable for fixed inputs.
pub fn build_retry_targets(
    catalog: &Catalog,
    model_names: &[String],
    regions: &[String],
    strategy: RetryStrategy,
) -> Vec<RetryTarget> {
    let mut targets = Vec::new();

    let mut push = |model_name: &String, region: &String| {
        let Some(entry) = catalog.get(model_name) else {
            return;
        };
        let Some(access) = entry.access_in(region) else {
            return;
        };
        targets.push(RetryTarget {
            model_name: entry.canonical_name.clone(),
            model_id: entry.model_id.clone(),
            region: region.clone(),
            access: access.clone(),
        });
    };

    match strategy {
        RetryStrategy::ModelFirst => {
            for model_name in model_names {
                for region in regions {
                    push(model_name, region);
                }
            }
        }
        RetryStrategy::RegionFirst => {
            for region in regions {
                for model_name in model_names {
                    push(model_name, region);
                }
            }
        }
    }

    targets
}
