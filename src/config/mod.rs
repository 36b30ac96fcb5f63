pub mod regions;

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Environment switch that forces grade collection outside the month gate.
pub const FORCE_GRADE_ENV: &str = "FORCE_GRADE_COLLECTION";

/// Top-level application configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct AppConfig {
    pub scraper: ScraperConfig,
    pub pipeline: PipelineConfig,
    pub storage: StorageConfig,
    pub grades: GradeConfig,
}

/// Portal endpoints and per-request behaviour
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ScraperConfig {
    pub branch_list_url: String,
    pub rates_url: String,
    pub grade_url: String,
    pub grade_referer: String,
    pub timeout_secs: u64,
    /// Retries after the first attempt.
    pub max_retries: u32,
    /// Linear backoff base: retry `n` waits `retry_delay_ms * n`.
    pub retry_delay_ms: u64,
    pub user_agent: String,
    pub accept_language: String,
}

/// Worker pool sizes and progress cadence
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub discovery_workers: usize,
    pub rate_workers: usize,
    pub discovery_progress_every: usize,
    pub rate_progress_every: usize,
}

/// Snapshot store layout and retention
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct StorageConfig {
    pub data_dir: PathBuf,
    /// Rate snapshots with more branch records than this are compressed.
    pub compress_threshold: usize,
    pub backup_retention_days: i64,
    pub summary_window_days: i64,
}

/// Yearly management-evaluation grade collection
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct GradeConfig {
    pub enabled: bool,
    pub evaluation_year: i32,
    pub evaluation_month: u32,
    /// Months (1-12) in which a scheduled run collects grades.
    pub collection_months: Vec<u32>,
    pub workers: usize,
    pub force: bool,
}

// ── Defaults ─────────────────────────────────────────────────────────────────

impl Default for ScraperConfig {
    fn default() -> Self {
        Self {
            branch_list_url: "https://www.kfcc.co.kr/map/list.do".to_string(),
            rates_url: "https://www.kfcc.co.kr/map/goods_19.do".to_string(),
            grade_url: "https://www.kfcc.co.kr/gumgo/regulardisclosure.do".to_string(),
            grade_referer: "https://www.kfcc.co.kr/gumgo/regulardisclosure.do".to_string(),
            timeout_secs: 15,
            max_retries: 2,
            retry_delay_ms: 1000,
            user_agent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36".to_string(),
            accept_language: "ko-KR,ko;q=0.9,en;q=0.8".to_string(),
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            discovery_workers: 5,
            rate_workers: 10,
            discovery_progress_every: 10,
            rate_progress_every: 20,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            compress_threshold: 100,
            backup_retention_days: 7,
            summary_window_days: 90,
        }
    }
}

impl Default for GradeConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            evaluation_year: 2024,
            evaluation_month: 12,
            collection_months: vec![7],
            workers: 5,
            force: false,
        }
    }
}

impl GradeConfig {
    /// Evaluation period in the portal's `YYYYMM` form.
    pub fn period(&self) -> String {
        format!("{}{:02}", self.evaluation_year, self.evaluation_month)
    }
}

// ── Loader ───────────────────────────────────────────────────────────────────

impl AppConfig {
    /// Load configuration from file + environment overrides
    pub fn load() -> Result<Self> {
        dotenv::dotenv().ok();

        let cfg = config::Config::builder()
            .add_source(
                config::File::with_name("config/default")
                    .required(false)
                    .format(config::FileFormat::Toml),
            )
            .add_source(
                config::File::with_name("config/local")
                    .required(false)
                    .format(config::FileFormat::Toml),
            )
            .add_source(
                config::Environment::with_prefix("KFCC")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("grades.collection_months")
                    .try_parsing(true),
            )
            .build()
            .context("Failed to assemble configuration sources")?;

        let mut app_cfg: AppConfig = cfg
            .try_deserialize()
            .context("Invalid configuration")?;

        if force_flag_set(std::env::var(FORCE_GRADE_ENV).ok().as_deref()) {
            app_cfg.grades.force = true;
        }

        app_cfg.validate()?;
        Ok(app_cfg)
    }

    /// Reject values no run could use.
    pub fn validate(&self) -> Result<()> {
        let s = &self.storage;
        if s.backup_retention_days < 1 {
            bail!("storage.backup_retention_days must be at least 1 (got {})", s.backup_retention_days);
        }
        if s.summary_window_days < 0 {
            bail!("storage.summary_window_days must not be negative (got {})", s.summary_window_days);
        }
        let p = &self.pipeline;
        if p.discovery_workers == 0 || p.rate_workers == 0 || self.grades.workers == 0 {
            bail!("worker pool sizes must be at least 1");
        }
        if !(1..=12).contains(&self.grades.evaluation_month) {
            bail!("grades.evaluation_month must be 1-12 (got {})", self.grades.evaluation_month);
        }
        Ok(())
    }
}

fn force_flag_set(value: Option<&str>) -> bool {
    value
        .map(|v| v.trim().eq_ignore_ascii_case("true"))
        .unwrap_or(false)
}
