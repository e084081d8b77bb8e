mod file_config;

pub use file_config::{DumpSourcesConfig, EnrichmentConfig, FileConfig};

use crate::job_store::JobKind;
use anyhow::{bail, Result};
use std::collections::HashMap;
use std::path::PathBuf;

/// CLI arguments that can be used for config resolution.
/// This struct mirrors the CLI arguments that can be overridden by TOML config.
#[derive(Debug, Clone, Default)]
pub struct CliConfig {
    pub db_dir: Option<PathBuf>,
    pub target_db: Option<PathBuf>,
    /// Kind the dump arguments below belong to.
    pub kind: Option<JobKind>,
    pub mapping_dump: Option<PathBuf>,
    pub reference_dump: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    // Core settings
    pub db_dir: PathBuf,
    pub target_db: PathBuf,

    // Feature configs (with defaults)
    pub enrichment: EnrichmentSettings,
    pub author_sources: DumpSources,
    pub cover_sources: DumpSources,
}

/// Dump files a job kind reads. Either may be unset until a job needs it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DumpSources {
    pub mapping_dump: Option<PathBuf>,
    pub reference_dump: Option<PathBuf>,
}

impl AppConfig {
    /// Resolve configuration from CLI arguments and optional TOML file config.
    /// TOML values override CLI values where present.
    pub fn resolve(cli: &CliConfig, file_config: Option<FileConfig>) -> Result<Self> {
        let file = file_config.unwrap_or_default();

        // TOML overrides CLI for each field
        let db_dir = file
            .db_dir
            .map(PathBuf::from)
            .or_else(|| cli.db_dir.clone())
            .ok_or_else(|| {
                anyhow::anyhow!("db_dir must be specified via --db-dir or in config file")
            })?;

        // Validate db_dir exists
        if !db_dir.exists() {
            bail!("Database directory does not exist: {:?}", db_dir);
        }
        if !db_dir.is_dir() {
            bail!("db_dir is not a directory: {:?}", db_dir);
        }

        let target_db = file
            .target_db
            .map(PathBuf::from)
            .or_else(|| cli.target_db.clone())
            .unwrap_or_else(|| db_dir.join("books.db"));

        let enrichment = EnrichmentSettings::from_file(file.enrichment.unwrap_or_default())?;

        let author_sources =
            Self::resolve_sources(cli, JobKind::AuthorEnrichment, file.author.unwrap_or_default());
        let cover_sources =
            Self::resolve_sources(cli, JobKind::CoverEnrichment, file.cover.unwrap_or_default());

        Ok(Self {
            db_dir,
            target_db,
            enrichment,
            author_sources,
            cover_sources,
        })
    }

    fn resolve_sources(cli: &CliConfig, kind: JobKind, file: DumpSourcesConfig) -> DumpSources {
        // CLI dump paths only apply to the kind selected on the command line
        let (cli_mapping, cli_reference) = if cli.kind == Some(kind) {
            (cli.mapping_dump.clone(), cli.reference_dump.clone())
        } else {
            (None, None)
        };
        DumpSources {
            mapping_dump: file.mapping_dump.map(PathBuf::from).or(cli_mapping),
            reference_dump: file.reference_dump.map(PathBuf::from).or(cli_reference),
        }
    }

    pub fn sources(&self, kind: JobKind) -> &DumpSources {
        match kind {
            JobKind::AuthorEnrichment => &self.author_sources,
            JobKind::CoverEnrichment => &self.cover_sources,
        }
    }

    pub fn sources_by_kind(&self) -> HashMap<JobKind, DumpSources> {
        JobKind::ALL
            .iter()
            .map(|kind| (*kind, self.sources(*kind).clone()))
            .collect()
    }

    pub fn jobs_db_path(&self) -> PathBuf {
        self.db_dir.join("jobs.db")
    }

    pub fn mapping_db_path(&self) -> PathBuf {
        self.db_dir.join("mapping.db")
    }
}

#[derive(Debug, Clone)]
pub struct EnrichmentSettings {
    /// Mappings buffered before a flush.
    pub write_batch_size: usize,
    /// Primary-store records fetched per page.
    pub update_batch_size: usize,
    pub checkpoint_interval_lines: u64,
    /// Lines between liveness checks when no flush happened.
    pub liveness_interval_lines: u64,
    pub reference_cache_max_entries: usize,
    pub author_separator: String,
    pub author_placeholders: Vec<String>,
}

impl Default for EnrichmentSettings {
    fn default() -> Self {
        Self {
            write_batch_size: 10_000,
            update_batch_size: 1_000,
            checkpoint_interval_lines: 1_000_000,
            liveness_interval_lines: 100_000,
            reference_cache_max_entries: 5_000_000,
            author_separator: ", ".to_string(),
            author_placeholders: vec!["Unknown".to_string(), "Unknown Author".to_string()],
        }
    }
}

impl EnrichmentSettings {
    fn from_file(file: EnrichmentConfig) -> Result<Self> {
        let defaults = Self::default();
        let settings = Self {
            write_batch_size: file.write_batch_size.unwrap_or(defaults.write_batch_size),
            update_batch_size: file.update_batch_size.unwrap_or(defaults.update_batch_size),
            checkpoint_interval_lines: file
                .checkpoint_interval_lines
                .unwrap_or(defaults.checkpoint_interval_lines),
            liveness_interval_lines: file
                .liveness_interval_lines
                .unwrap_or(defaults.liveness_interval_lines),
            reference_cache_max_entries: file
                .reference_cache_max_entries
                .unwrap_or(defaults.reference_cache_max_entries),
            author_separator: file.author_separator.unwrap_or(defaults.author_separator),
            author_placeholders: file
                .author_placeholders
                .unwrap_or(defaults.author_placeholders),
        };

        if settings.write_batch_size == 0 || settings.update_batch_size == 0 {
            bail!("Batch sizes must be greater than zero");
        }
        if settings.checkpoint_interval_lines == 0 || settings.liveness_interval_lines == 0 {
            bail!("Checkpoint and liveness intervals must be greater than zero");
        }
        Ok(settings)
    }
}
