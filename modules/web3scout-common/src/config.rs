use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::Deserialize;

use crate::retry::RetryPolicy;

// =============================================================================
// Secrets (environment)
// =============================================================================

/// API keys. Loaded from the environment (and `.env` when present); never
/// read from the TOML file.
#[derive(Debug, Clone, Default)]
pub struct Secrets {
    pub hunter_api_key: Option<String>,
    pub snov_api_key: Option<String>,
    pub serper_api_key: Option<String>,
}

impl Secrets {
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();
        Self {
            hunter_api_key: non_empty_env("HUNTER_IO_API_KEY"),
            snov_api_key: non_empty_env("SNOV_IO_API_KEY"),
            serper_api_key: non_empty_env("SERPER_API_KEY"),
        }
    }
}

fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

// =============================================================================
// FileConfig (TOML)
// =============================================================================

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct FileConfig {
    pub storage: StorageConfig,
    pub concurrency: ConcurrencyConfig,
    pub retry: RetryConfig,
    pub orchestrator: OrchestratorConfig,
    pub http: HttpConfig,
    pub enrichment: EnrichmentConfig,
    pub collectors: Vec<CollectorSettings>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageBackend {
    #[default]
    Jsonl,
    GoogleSheets,
    Airtable,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    pub path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::Jsonl,
            path: PathBuf::from("data/projects.jsonl"),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct ConcurrencyConfig {
    pub collectors: usize,
    pub enrichment: usize,
}

impl Default for ConcurrencyConfig {
    fn default() -> Self {
        Self {
            collectors: 3,
            enrichment: 5,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub multiplier: f64,
    pub max_delay_ms: u64,
    pub jitter_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 500,
            multiplier: 2.0,
            max_delay_ms: 8_000,
            jitter_ms: 250,
        }
    }
}

impl RetryConfig {
    pub fn to_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            base_delay: Duration::from_millis(self.base_delay_ms),
            multiplier: self.multiplier,
            max_delay: Duration::from_millis(self.max_delay_ms),
            jitter: Duration::from_millis(self.jitter_ms),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct OrchestratorConfig {
    pub collector_timeout_secs: u64,
    pub min_launch_delay_ms: u64,
    pub max_launch_delay_ms: u64,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            collector_timeout_secs: 120,
            min_launch_delay_ms: 500,
            max_launch_delay_ms: 2_000,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct HttpConfig {
    pub request_timeout_secs: u64,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            request_timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmailService {
    #[default]
    Hunter,
    Snov,
    None,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct EnrichmentConfig {
    pub email_service: EmailService,
    pub scan_website_for_email: bool,
    pub linkedin_search: bool,
    /// Finder calls allowed per run. 0 = unlimited.
    pub max_email_lookups: u64,
    pub call_timeout_secs: u64,
}

impl Default for EnrichmentConfig {
    fn default() -> Self {
        Self {
            email_service: EmailService::Hunter,
            scan_website_for_email: false,
            linkedin_search: true,
            max_email_lookups: 0,
            call_timeout_secs: 20,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CollectorKind {
    #[default]
    ListingPage,
}

fn default_true() -> bool {
    true
}

fn default_max_pages() -> u32 {
    1
}

fn default_min_delay_ms() -> u64 {
    2_000
}

fn default_max_delay_ms() -> u64 {
    10_000
}

/// One `[[collectors]]` entry.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CollectorSettings {
    pub name: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub kind: CollectorKind,
    /// Listing URL. `{page}` is replaced by the page number when present.
    pub url: String,
    /// Substring a resolved link must contain to count as a project link.
    #[serde(default)]
    pub link_pattern: Option<String>,
    #[serde(default = "default_max_pages")]
    pub max_pages: u32,
    #[serde(default = "default_min_delay_ms")]
    pub min_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

impl CollectorSettings {
    pub fn new(name: &str, url: &str) -> Self {
        Self {
            name: name.to_string(),
            enabled: true,
            kind: CollectorKind::ListingPage,
            url: url.to_string(),
            link_pattern: None,
            max_pages: 1,
            min_delay_ms: 0,
            max_delay_ms: 0,
            timeout_secs: None,
        }
    }
}

// =============================================================================
// Config
// =============================================================================

#[derive(Debug, Clone, Default)]
pub struct Config {
    pub secrets: Secrets,
    pub file: FileConfig,
}

impl Config {
    /// Secrets from the environment plus the TOML file at `path`. A missing
    /// file falls back to built-in defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let file = if path.exists() {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;
            parse_file_config(&content)
                .with_context(|| format!("Failed to parse config file: {}", path.display()))?
        } else {
            tracing::warn!(path = %path.display(), "Config file not found, using defaults");
            FileConfig::default()
        };

        let config = Self {
            secrets: Secrets::from_env(),
            file,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let f = &self.file;

        if f.concurrency.collectors == 0 || f.concurrency.enrichment == 0 {
            bail!("concurrency.collectors and concurrency.enrichment must be at least 1");
        }
        if f.retry.max_attempts == 0 {
            bail!("retry.max_attempts must be at least 1");
        }
        if !(f.retry.multiplier.is_finite() && f.retry.multiplier >= 1.0) {
            bail!("retry.multiplier must be a finite number >= 1.0");
        }
        if f.retry.base_delay_ms > f.retry.max_delay_ms {
            bail!("retry.base_delay_ms exceeds retry.max_delay_ms");
        }
        if f.orchestrator.min_launch_delay_ms > f.orchestrator.max_launch_delay_ms {
            bail!("orchestrator.min_launch_delay_ms exceeds max_launch_delay_ms");
        }
        if f.storage.backend != StorageBackend::Jsonl {
            bail!(
                "storage.backend {:?} is not built in; only \"jsonl\" is available",
                f.storage.backend
            );
        }

        for c in &f.collectors {
            if c.name.trim().is_empty() {
                bail!("collector with url {} has no name", c.url);
            }
            if c.min_delay_ms > c.max_delay_ms {
                bail!("collector {}: min_delay_ms exceeds max_delay_ms", c.name);
            }
            if c.max_pages == 0 {
                bail!("collector {}: max_pages must be at least 1", c.name);
            }
        }
        let mut names: Vec<&str> = f.collectors.iter().map(|c| c.name.as_str()).collect();
        names.sort_unstable();
        if let Some(w) = names.windows(2).find(|w| w[0] == w[1]) {
            bail!("duplicate collector name: {}", w[0]);
        }

        Ok(())
    }

    /// The key for the selected email service is present. Only commands
    /// that call out to the service need this.
    pub fn validate_credentials(&self) -> Result<()> {
        match self.file.enrichment.email_service {
            EmailService::Hunter if self.secrets.hunter_api_key.is_none() => {
                bail!("enrichment.email_service = \"hunter\" requires HUNTER_IO_API_KEY")
            }
            EmailService::Snov if self.secrets.snov_api_key.is_none() => {
                bail!("enrichment.email_service = \"snov\" requires SNOV_IO_API_KEY")
            }
            _ => Ok(()),
        }
    }

    pub fn enabled_collectors(&self) -> impl Iterator<Item = &CollectorSettings> {
        self.file.collectors.iter().filter(|c| c.enabled)
    }

    pub fn log_redacted(&self) {
        fn preview(val: &Option<String>) -> String {
            match val {
                Some(v) => {
                    let n = v.chars().take(5).map(char::len_utf8).sum::<usize>();
                    format!("{}...({} chars)", &v[..n], v.len())
                }
                None => "<not set>".to_string(),
            }
        }

        let f = &self.file;
        tracing::info!("Config loaded:");
        tracing::info!("  HUNTER_IO_API_KEY: {}", preview(&self.secrets.hunter_api_key));
        tracing::info!("  SNOV_IO_API_KEY: {}", preview(&self.secrets.snov_api_key));
        tracing::info!("  SERPER_API_KEY: {}", preview(&self.secrets.serper_api_key));
        tracing::info!(
            backend = ?f.storage.backend,
            path = %f.storage.path.display(),
            "  storage"
        );
        tracing::info!(
            collectors = f.concurrency.collectors,
            enrichment = f.concurrency.enrichment,
            "  concurrency"
        );
        tracing::info!(
            email_service = ?f.enrichment.email_service,
            linkedin_search = f.enrichment.linkedin_search,
            max_email_lookups = f.enrichment.max_email_lookups,
            "  enrichment"
        );
        tracing::info!(
            configured = f.collectors.len(),
            enabled = self.enabled_collectors().count(),
            "  collectors"
        );
    }
}

/// Parse a TOML config body. Unknown keys are rejected.
pub fn parse_file_config(content: &str) -> Result<FileConfig> {
    let config: FileConfig = toml::from_str(content)?;
    Ok(config)
}
