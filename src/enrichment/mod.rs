//! The three enrichment phases and what varies between job kinds.

mod mapping_builder;
mod profile;
mod progress;
mod record_updater;
mod reference_cache;

pub use mapping_builder::MappingBuilder;
pub use profile::{profile_for, AuthorProfile, CoverProfile, EnrichmentProfile};
pub use progress::{checkpoint_progress, counters_summary, format_duration, overall_progress};
pub use record_updater::RecordUpdater;
pub use reference_cache::ReferenceCache;
