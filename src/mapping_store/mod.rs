mod models;
mod schema;
mod store;
mod trait_def;

pub use models::{CompletionMarker, IdentifierMapping};
pub use schema::MAPPING_VERSIONED_SCHEMAS;
pub use store::SqliteMappingStore;
pub use trait_def::MappingStore;
