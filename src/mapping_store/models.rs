use serde::{Deserialize, Serialize};

/// A normalized identifier and the reference keys first observed for it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentifierMapping {
    pub identifier: String,
    pub reference_keys: Vec<String>,
}

impl IdentifierMapping {
    pub fn new(identifier: String, reference_keys: Vec<String>) -> Self {
        Self {
            identifier,
            reference_keys,
        }
    }
}

/// Value of the `complete` marker in `mapping_state`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionMarker {
    pub job_id: String,
    pub lines: u64,
    pub mappings: usize,
    pub completed_at: String,
}
