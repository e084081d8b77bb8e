use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct FileConfig {
    // Core settings (can override CLI)
    pub db_dir: Option<String>,
    pub target_db: Option<String>,

    // Feature configs
    pub enrichment: Option<EnrichmentConfig>,
    pub author: Option<DumpSourcesConfig>,
    pub cover: Option<DumpSourcesConfig>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct EnrichmentConfig {
    pub write_batch_size: Option<usize>,
    pub update_batch_size: Option<usize>,
    pub checkpoint_interval_lines: Option<u64>,
    pub liveness_interval_lines: Option<u64>,
    pub reference_cache_max_entries: Option<usize>,
    pub author_separator: Option<String>,
    /// Author values treated as missing, e.g. "Unknown"
    pub author_placeholders: Option<Vec<String>>,
}

/// Dump files for one enrichment kind.
#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct DumpSourcesConfig {
    pub mapping_dump: Option<String>,
    pub reference_dump: Option<String>,
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        toml::from_str(&content).with_context(|| format!("Failed to parse config file: {:?}", path))
    }
}
