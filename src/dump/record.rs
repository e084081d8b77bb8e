//! Typed view of one dump line.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer};
use serde_json::Value;
use std::fmt;
use thiserror::Error;

/// Minimum number of tab-separated fields a dump line must carry.
pub const MIN_FIELDS: usize = 5;

#[derive(Debug, Error)]
pub enum DumpParseError {
    #[error("line is not valid UTF-8")]
    InvalidEncoding,
    #[error("expected at least {MIN_FIELDS} tab-separated fields, found {found}")]
    MissingFields { found: usize },
    #[error("invalid revision '{0}'")]
    InvalidRevision(String),
    #[error("invalid payload: {0}")]
    InvalidPayload(#[from] serde_json::Error),
}

impl DumpParseError {
    /// Short label used for metrics and dropped-line breakdowns.
    pub fn kind(&self) -> &'static str {
        match self {
            DumpParseError::InvalidEncoding => "encoding",
            DumpParseError::MissingFields { .. } => "fields",
            DumpParseError::InvalidRevision(_) => "revision",
            DumpParseError::InvalidPayload(_) => "payload",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordType {
    Author,
    Edition,
    Work,
    Other(String),
}

impl RecordType {
    /// Accepts both `/type/author` and bare `author` spellings.
    pub fn parse(s: &str) -> Self {
        match s.strip_prefix("/type/").unwrap_or(s) {
            "author" => RecordType::Author,
            "edition" | "book" => RecordType::Edition,
            "work" => RecordType::Work,
            other => RecordType::Other(other.to_string()),
        }
    }
}

impl fmt::Display for RecordType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordType::Author => write!(f, "/type/author"),
            RecordType::Edition => write!(f, "/type/edition"),
            RecordType::Work => write!(f, "/type/work"),
            RecordType::Other(s) => write!(f, "/type/{}", s),
        }
    }
}

/// A reference to another record, in any of the shapes dumps use.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum KeyRef {
    Plain(String),
    Keyed { key: String },
    Nested { author: KeyedRef },
}

#[derive(Debug, Clone, Deserialize)]
pub struct KeyedRef {
    pub key: String,
}

impl KeyRef {
    pub fn key(&self) -> &str {
        match self {
            KeyRef::Plain(key) => key,
            KeyRef::Keyed { key } => key,
            KeyRef::Nested { author } => &author.key,
        }
    }
}

/// Reads a list field, treating `null` as empty and a lone scalar as a
/// one-element list. Elements of the wrong shape are skipped.
fn lenient_list<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    let items = match Value::deserialize(deserializer)? {
        Value::Null => Vec::new(),
        Value::Array(items) => items,
        single => vec![single],
    };
    Ok(items
        .into_iter()
        .filter_map(|item| serde_json::from_value(item).ok())
        .collect())
}

/// Reads a text field, treating anything but a string as absent.
fn lenient_text<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::String(text) => Some(text),
        _ => None,
    })
}

/// The subset of the JSON payload the enrichment profiles read.
///
/// Fields are read leniently so one malformed field never costs the rest
/// of the record.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RecordPayload {
    #[serde(deserialize_with = "lenient_text")]
    pub name: Option<String>,
    #[serde(deserialize_with = "lenient_text")]
    pub personal_name: Option<String>,
    #[serde(deserialize_with = "lenient_list")]
    pub isbn_10: Vec<String>,
    #[serde(deserialize_with = "lenient_list")]
    pub isbn_13: Vec<String>,
    #[serde(deserialize_with = "lenient_list")]
    pub isbns: Vec<String>,
    #[serde(deserialize_with = "lenient_list")]
    pub authors: Vec<KeyRef>,
    #[serde(deserialize_with = "lenient_list")]
    pub source_records: Vec<String>,
    #[serde(deserialize_with = "lenient_list")]
    pub works: Vec<KeyRef>,
    #[serde(deserialize_with = "lenient_list")]
    pub covers: Vec<Option<i64>>,
}

impl RecordPayload {
    pub fn identifiers(&self) -> impl Iterator<Item = &str> {
        self.isbn_13
            .iter()
            .chain(self.isbn_10.iter())
            .chain(self.isbns.iter())
            .map(String::as_str)
    }

    pub fn display_name(&self) -> Option<&str> {
        [self.name.as_deref(), self.personal_name.as_deref()]
            .into_iter()
            .flatten()
            .map(str::trim)
            .find(|s| !s.is_empty())
    }

    pub fn first_cover(&self) -> Option<i64> {
        self.covers.iter().flatten().copied().find(|id| *id > 0)
    }
}

#[derive(Debug, Clone)]
pub struct DumpRecord {
    pub record_type: RecordType,
    pub key: String,
    pub revision: i64,
    pub last_modified: String,
    pub payload: RecordPayload,
}

impl DumpRecord {
    /// Parses `type \t key \t revision \t last_modified \t ... \t payload`.
    pub fn parse(line: &str) -> Result<Self, DumpParseError> {
        let mut head = line.splitn(MIN_FIELDS, '\t');
        let record_type = head.next().unwrap_or_default();
        let key = head.next();
        let revision = head.next();
        let last_modified = head.next();
        let rest = head.next();

        let (Some(key), Some(revision), Some(last_modified), Some(rest)) =
            (key, revision, last_modified, rest)
        else {
            return Err(DumpParseError::MissingFields {
                found: line.split('\t').count(),
            });
        };

        let revision = revision
            .trim()
            .parse::<i64>()
            .map_err(|_| DumpParseError::InvalidRevision(revision.to_string()))?;

        // Extra fields before the payload are tolerated; the payload is always last.
        let payload_text = rest.rsplit('\t').next().unwrap_or(rest);
        let payload: RecordPayload = serde_json::from_str(payload_text)?;

        Ok(DumpRecord {
            record_type: RecordType::parse(record_type.trim()),
            key: key.trim().to_string(),
            revision,
            last_modified: last_modified.trim().to_string(),
            payload,
        })
    }
}
