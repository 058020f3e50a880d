//! Configuration management, layered over `prefer` + `dotenvy` the way
//! `monokrome-foiacquire/src/config.rs` layers its own `Settings` (SPEC_FULL §3).

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::models::{EnvironmentName, JobKind};

fn default_poll_interval_ms() -> u64 {
    10_000
}
fn default_ocr_pool_size() -> u32 {
    4
}
fn default_min_workers() -> u32 {
    1
}
fn default_dead_threshold_ms() -> u64 {
    180_000
}
fn default_heartbeat_interval_ms() -> u64 {
    30_000
}
fn default_s3_region() -> String {
    "us-east-1".to_string()
}

/// Configuration for one independent deployment environment (spec §6).
#[derive(Debug, Clone, Serialize, Deserialize, prefer::FromValue)]
pub struct EnvironmentConfig {
    pub database_url: String,
    pub service_key: String,
    pub anon_key: String,

    /// Personal/movable-rights site login (spec §6).
    pub rdprm_username: String,
    pub rdprm_password: String,
    pub rdprm_security_answer: String,

    /// Vision model API endpoint, shared by every key in `vision_api_keys`
    /// (spec §4.9 step 3).
    pub vision_endpoint: String,

    /// Vision model API keys, keyed by provider name (e.g. "primary", "secondary"
    /// for the line-count consensus pair in spec §4.9 step 3). The key
    /// doubles as the model identifier sent upstream and as the rate
    /// limiter's per-model bucket name.
    #[serde(default)]
    #[prefer(default)]
    pub vision_api_keys: HashMap<String, String>,

    /// Redis URL backing the shared cross-process rate-limit counter (spec §4.11).
    pub rate_limit_endpoint: String,

    /// S3-compatible object storage backing this environment's buckets (spec §6).
    pub s3_endpoint: String,
    #[serde(default = "default_s3_region")]
    #[prefer(default = "us-east-1")]
    pub s3_region: String,
    pub s3_access_key_id: String,
    pub s3_secret_access_key: String,

    #[serde(default = "default_poll_interval_ms")]
    #[prefer(default = "10000")]
    pub worker_poll_interval_ms: u64,
    #[serde(default = "default_ocr_pool_size")]
    #[prefer(default = "4")]
    pub ocr_worker_pool_size: u32,
    #[serde(default = "default_min_workers")]
    #[prefer(default = "1")]
    pub ocr_min_index_workers: u32,
    #[serde(default = "default_min_workers")]
    #[prefer(default = "1")]
    pub ocr_min_deed_workers: u32,
    pub server_max_cpu: f64,
    pub server_max_ram_bytes: u64,
    #[serde(default = "default_dead_threshold_ms")]
    #[prefer(default = "180000")]
    pub dead_worker_threshold_ms: u64,
    #[serde(default = "default_heartbeat_interval_ms")]
    #[prefer(default = "30000")]
    pub heartbeat_interval_ms: u64,
}

/// Bucket names per document kind plus the personal-rights bucket (spec §6).
#[derive(Debug, Clone, Serialize, Deserialize, prefer::FromValue)]
#[serde(default)]
pub struct BucketNames {
    pub index: String,
    pub actes: String,
    pub plans_cadastraux: String,
    pub rdprm_documents: String,
}

impl Default for BucketNames {
    fn default() -> Self {
        Self {
            index: "index".to_string(),
            actes: "actes".to_string(),
            plans_cadastraux: "plans-cadastraux".to_string(),
            rdprm_documents: "rdprm-documents".to_string(),
        }
    }
}

impl BucketNames {
    pub fn for_kind(&self, kind: JobKind) -> &str {
        match kind {
            JobKind::Index => &self.index,
            JobKind::Deed => &self.actes,
            JobKind::CadastralPlan => &self.plans_cadastraux,
        }
    }
}

/// OCR pipeline tunables (spec §4.9).
#[derive(Debug, Clone, Serialize, Deserialize, prefer::FromValue)]
#[serde(default)]
pub struct OcrPipelineConfig {
    pub dpi: u32,
    pub max_upscale_factor: f32,
    pub max_lines_per_page: u32,
    pub window_size: u32,
    pub coherence_check_enabled: bool,
    pub max_retries: u32,
    pub boost_enabled: bool,
    pub request_timeout_ms: u64,
}

impl Default for OcrPipelineConfig {
    fn default() -> Self {
        Self {
            dpi: 300,
            max_upscale_factor: 3.0,
            max_lines_per_page: 60,
            window_size: 25,
            coherence_check_enabled: true,
            max_retries: 2,
            boost_enabled: true,
            request_timeout_ms: 300_000,
        }
    }
}

/// Shared RPM/TPM budget per vision model (spec §4.11).
#[derive(Debug, Clone, Serialize, Deserialize, prefer::FromValue)]
pub struct RateLimitConfig {
    pub rpm_limit: u32,
    pub tpm_limit: u32,
}

fn default_shutdown_deadline_ms() -> u64 {
    30_000
}
fn default_browser_idle_timeout_ms() -> u64 {
    300_000
}

/// Top-level application configuration (SPEC_FULL §3).
#[derive(Debug, Clone, Serialize, Deserialize, prefer::FromValue)]
pub struct AppConfig {
    pub environments: HashMap<String, EnvironmentConfig>,

    #[serde(default)]
    #[prefer(default)]
    pub environment_priority: Vec<String>,

    #[serde(default)]
    #[prefer(default)]
    pub buckets: BucketNames,

    #[serde(default)]
    #[prefer(default)]
    pub ocr: OcrPipelineConfig,

    pub rate_limits: HashMap<String, RateLimitConfig>,

    /// How long a polite shutdown waits before abandoning the in-flight job
    /// (spec §4.4).
    #[serde(default = "default_shutdown_deadline_ms")]
    #[prefer(default = "30000")]
    pub shutdown_hard_deadline_ms: u64,

    /// How long a browser session may sit idle before teardown (spec §4.6).
    #[serde(default = "default_browser_idle_timeout_ms")]
    #[prefer(default = "300000")]
    pub browser_idle_timeout_ms: u64,
}

impl AppConfig {
    /// Resolved claim order: configured priority, falling back to the spec
    /// default `prod > staging > dev` (spec §4.2).
    pub fn environment_order(&self) -> Vec<EnvironmentName> {
        if self.environment_priority.is_empty() {
            vec![
                EnvironmentName::Prod,
                EnvironmentName::Staging,
                EnvironmentName::Dev,
            ]
        } else {
            self.environment_priority
                .iter()
                .filter_map(|s| EnvironmentName::parse(s))
                .collect()
        }
    }

    /// Load configuration from `GREFFIER_CONFIG` (a TOML file), after loading
    /// a `.env` file if present — the same ordering as
    /// `monokrome-foiacquire::config::Config::load_from_path`.
    pub fn load() -> anyhow::Result<Self> {
        let _ = dotenvy::dotenv();

        let config_path =
            std::env::var("GREFFIER_CONFIG").unwrap_or_else(|_| "greffier.toml".to_string());

        let raw = std::fs::read_to_string(&config_path)
            .map_err(|e| anyhow::anyhow!("failed to read config file {config_path}: {e}"))?;

        let config: AppConfig = toml::from_str(&raw)
            .map_err(|e| anyhow::anyhow!("failed to parse config file {config_path}: {e}"))?;

        Ok(config)
    }
}
