//! Access methods: selection between direct invocation and inference
//! profiles, plus the process-wide learned-preference and
//! parameter-compatibility trackers.

pub mod method;
pub mod parameters;
pub mod preference;
pub mod selector;

pub use method::{AccessMethod, AccessPreference};
pub use parameters::{parameter_fingerprint, ParameterCompatibilityTracker};
pub use preference::AccessPreferenceTracker;
pub use selector::{fallback_methods, select};
