//! What each job kind extracts from dumps and writes back.

use crate::config::EnrichmentSettings;
use crate::dump::{DumpRecord, KeyRef, RecordType};
use crate::identifiers::{identifier_from_source_record, normalize_isbn};
use crate::job_store::JobKind;
use crate::mapping_store::IdentifierMapping;
use crate::target_store::TargetAttribute;

pub trait EnrichmentProfile: Send + Sync {
    fn kind(&self) -> JobKind;

    /// Mapping namespace of this kind.
    fn namespace(&self) -> &'static str {
        self.kind().as_str()
    }

    fn attribute(&self) -> TargetAttribute;

    /// Appends the identifier mappings a mapping-dump record contributes.
    fn extract_mappings(&self, record: &DumpRecord, out: &mut Vec<IdentifierMapping>);

    /// The reference key and display value a reference-dump record contributes.
    fn extract_reference(&self, record: &DumpRecord) -> Option<(String, String)>;

    /// Combines the distinct resolved values into the attribute value.
    fn join_values(&self, values: &[String]) -> Option<String>;
}

pub fn profile_for(kind: JobKind, settings: &EnrichmentSettings) -> Box<dyn EnrichmentProfile> {
    match kind {
        JobKind::AuthorEnrichment => Box::new(AuthorProfile {
            separator: settings.author_separator.clone(),
        }),
        JobKind::CoverEnrichment => Box::new(CoverProfile),
    }
}

/// Distinct non-empty keys, in first-seen order.
fn distinct_keys(refs: &[KeyRef]) -> Vec<String> {
    let mut keys: Vec<String> = Vec::with_capacity(refs.len());
    for key in refs.iter().map(|r| r.key().trim()) {
        if !key.is_empty() && !keys.iter().any(|k| k == key) {
            keys.push(key.to_string());
        }
    }
    keys
}

/// Maps every valid ISBN of a book record to `keys`.
fn push_book_identifiers(record: &DumpRecord, keys: Vec<String>, out: &mut Vec<IdentifierMapping>) {
    if keys.is_empty() {
        return;
    }
    let mut seen: Vec<String> = Vec::new();
    for isbn in record.payload.identifiers().filter_map(normalize_isbn) {
        if !seen.contains(&isbn) {
            seen.push(isbn.clone());
            out.push(IdentifierMapping::new(isbn, keys.clone()));
        }
    }
}

pub struct AuthorProfile {
    separator: String,
}

impl EnrichmentProfile for AuthorProfile {
    fn kind(&self) -> JobKind {
        JobKind::AuthorEnrichment
    }

    fn attribute(&self) -> TargetAttribute {
        TargetAttribute::Author
    }

    fn extract_mappings(&self, record: &DumpRecord, out: &mut Vec<IdentifierMapping>) {
        match record.record_type {
            RecordType::Author => {
                for isbn in record
                    .payload
                    .source_records
                    .iter()
                    .filter_map(|s| identifier_from_source_record(s))
                {
                    out.push(IdentifierMapping::new(isbn, vec![record.key.clone()]));
                }
            }
            RecordType::Edition => {
                push_book_identifiers(record, distinct_keys(&record.payload.authors), out)
            }
            _ => {}
        }
    }

    fn extract_reference(&self, record: &DumpRecord) -> Option<(String, String)> {
        if record.record_type != RecordType::Author {
            return None;
        }
        let name = record.payload.display_name()?;
        Some((record.key.clone(), name.to_string()))
    }

    fn join_values(&self, values: &[String]) -> Option<String> {
        (!values.is_empty()).then(|| values.join(&self.separator))
    }
}

/// Edition ISBN -> work keys, then work key -> first cover id.
pub struct CoverProfile;

impl EnrichmentProfile for CoverProfile {
    fn kind(&self) -> JobKind {
        JobKind::CoverEnrichment
    }

    fn attribute(&self) -> TargetAttribute {
        TargetAttribute::CoverId
    }

    fn extract_mappings(&self, record: &DumpRecord, out: &mut Vec<IdentifierMapping>) {
        if record.record_type == RecordType::Edition {
            push_book_identifiers(record, distinct_keys(&record.payload.works), out);
        }
    }

    fn extract_reference(&self, record: &DumpRecord) -> Option<(String, String)> {
        if record.record_type != RecordType::Work {
            return None;
        }
        let cover = record.payload.first_cover()?;
        Some((record.key.clone(), cover.to_string()))
    }

    fn join_values(&self, values: &[String]) -> Option<String> {
        values.first().cloned()
    }
}
