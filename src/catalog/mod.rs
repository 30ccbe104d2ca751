//! Model catalog: entries, aliases, name resolution, caching, and the
//! multi-source store.

pub mod aliases;
pub mod cache;
pub mod normalizer;
pub mod resolver;
pub mod store;
pub mod types;

pub use normalizer::normalize_model_name;
pub use resolver::{MatchType, NameResolution, NameResolver};
pub use store::{CatalogFetcher, CatalogStore};
pub use types::{AccessInfo, Catalog, CatalogMetadata, CatalogSource, ModelEntry};
