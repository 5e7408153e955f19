//! Follow-up daemon configuration loader.
//!
//! TOML file, then environment overrides, then validation.

use crate::availability::BusinessHours;
use chrono::NaiveTime;
use chrono_tz::Tz;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct FollowUpConfig {
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub keys: KeysConfig,
    #[serde(default)]
    pub business: BusinessConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub dispatch: DispatchConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LlmConfig {
    #[serde(default = "default_llm_enabled")]
    pub enabled: bool,
    #[serde(default = "default_model")]
    pub model: String,
    /// Endpoint root override for OpenAI-compatible gateways.
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default = "default_llm_timeout_seconds")]
    pub timeout_seconds: u64,
    #[serde(default = "default_classifier_temperature")]
    pub classifier_temperature: f32,
    #[serde(default = "default_classifier_max_tokens")]
    pub classifier_max_tokens: u32,
    #[serde(default = "default_answer_temperature")]
    pub answer_temperature: f32,
    #[serde(default = "default_answer_max_tokens")]
    pub answer_max_tokens: u32,
}

fn default_llm_enabled() -> bool {
    true
}

fn default_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_llm_timeout_seconds() -> u64 {
    20
}

fn default_classifier_temperature() -> f32 {
    0.1
}

fn default_classifier_max_tokens() -> u32 {
    150
}

fn default_answer_temperature() -> f32 {
    0.5
}

fn default_answer_max_tokens() -> u32 {
    200
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            enabled: default_llm_enabled(),
            model: default_model(),
            base_url: None,
            timeout_seconds: default_llm_timeout_seconds(),
            classifier_temperature: default_classifier_temperature(),
            classifier_max_tokens: default_classifier_max_tokens(),
            answer_temperature: default_answer_temperature(),
            answer_max_tokens: default_answer_max_tokens(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct KeysConfig {
    pub openai_api_key: Option<String>,
    pub anthropic_api_key: Option<String>,
}

/// Operator availability window, all clock times in `timezone`.
#[derive(Debug, Clone, Deserialize)]
pub struct BusinessConfig {
    #[serde(default = "default_timezone")]
    pub timezone: String,
    #[serde(default = "default_open_at")]
    pub open_at: String,
    #[serde(default = "default_close_at")]
    pub close_at: String,
    #[serde(default = "default_lunch_start")]
    pub lunch_start: String,
    #[serde(default = "default_lunch_end")]
    pub lunch_end: String,
    /// Promised return time for messages that arrive during lunch.
    #[serde(default = "default_lunch_return")]
    pub lunch_return: String,
}

fn default_timezone() -> String {
    "Europe/Berlin".to_string()
}

fn default_open_at() -> String {
    "08:00".to_string()
}

fn default_close_at() -> String {
    "18:00".to_string()
}

fn default_lunch_start() -> String {
    "12:00".to_string()
}

fn default_lunch_end() -> String {
    "13:00".to_string()
}

fn default_lunch_return() -> String {
    "13:30".to_string()
}

impl Default for BusinessConfig {
    fn default() -> Self {
        Self {
            timezone: default_timezone(),
            open_at: default_open_at(),
            close_at: default_close_at(),
            lunch_start: default_lunch_start(),
            lunch_end: default_lunch_end(),
            lunch_return: default_lunch_return(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SchedulerConfig {
    #[serde(default = "default_scheduler_enabled")]
    pub enabled: bool,
    #[serde(default = "default_interval_seconds")]
    pub interval_seconds: u64,
    /// Start the loop when the server boots.
    #[serde(default = "default_autostart")]
    pub autostart: bool,
}

fn default_scheduler_enabled() -> bool {
    true
}

fn default_interval_seconds() -> u64 {
    60
}

fn default_autostart() -> bool {
    true
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            enabled: default_scheduler_enabled(),
            interval_seconds: default_interval_seconds(),
            autostart: default_autostart(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DispatchConfig {
    #[serde(default = "default_batch_limit")]
    pub batch_limit: usize,
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    #[serde(default = "default_claim_lease_seconds")]
    pub claim_lease_seconds: u64,
}

fn default_batch_limit() -> usize {
    50
}

fn default_concurrency() -> usize {
    4
}

fn default_claim_lease_seconds() -> u64 {
    300
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            batch_limit: default_batch_limit(),
            concurrency: default_concurrency(),
            claim_lease_seconds: default_claim_lease_seconds(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct StorageConfig {
    /// SQLite file. Default: `~/.followup/data/followup.db`
    #[serde(default)]
    pub database_path: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
    #[serde(default = "default_http_timeout_seconds")]
    pub http_timeout_seconds: u64,
    #[serde(default = "default_http_max_in_flight")]
    pub http_max_in_flight: usize,
    /// Bearer token required on mutating admin routes when set.
    #[serde(default)]
    pub admin_token: Option<String>,
}

fn default_bind_addr() -> String {
    "127.0.0.1:8787".to_string()
}

fn default_http_timeout_seconds() -> u64 {
    30
}

fn default_http_max_in_flight() -> usize {
    64
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            http_timeout_seconds: default_http_timeout_seconds(),
            http_max_in_flight: default_http_max_in_flight(),
            admin_token: None,
        }
    }
}

impl FollowUpConfig {
    pub async fn load(path: Option<PathBuf>) -> anyhow::Result<Self> {
        let path = path.unwrap_or_else(default_config_path);
        let contents = tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| anyhow::anyhow!("read config {}: {e}", path.display()))?;

        let mut cfg: FollowUpConfig = toml::from_str(&contents)
            .map_err(|e| anyhow::anyhow!("parse config {}: {e}", path.display()))?;

        cfg.apply_env_overrides();
        cfg.validate()?;
        Ok(cfg)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("FOLLOWUP_MODEL") {
            if !v.trim().is_empty() {
                self.llm.model = v;
            }
        }
        if let Ok(v) = std::env::var("OPENAI_API_KEY") {
            if !v.trim().is_empty() {
                self.keys.openai_api_key = Some(v);
            }
        }
        if let Ok(v) = std::env::var("ANTHROPIC_API_KEY") {
            if !v.trim().is_empty() {
                self.keys.anthropic_api_key = Some(v);
            }
        }
        if let Ok(v) = std::env::var("FOLLOWUP_DATABASE_PATH") {
            if !v.trim().is_empty() {
                self.storage.database_path = Some(v);
            }
        }
        if let Ok(v) = std::env::var("FOLLOWUP_BIND_ADDR") {
            if !v.trim().is_empty() {
                self.server.bind_addr = v;
            }
        }
        if let Ok(v) = std::env::var("FOLLOWUP_TIMEZONE") {
            if !v.trim().is_empty() {
                self.business.timezone = v;
            }
        }
        if let Ok(v) = std::env::var("FOLLOWUP_ADMIN_TOKEN") {
            if !v.trim().is_empty() {
                self.server.admin_token = Some(v);
            }
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.llm.model.trim().is_empty() {
            return Err(anyhow::anyhow!("llm.model is required"));
        }
        if self.llm.timeout_seconds == 0 {
            return Err(anyhow::anyhow!("llm.timeout_seconds must be > 0"));
        }
        if self.scheduler.interval_seconds == 0 {
            return Err(anyhow::anyhow!("scheduler.interval_seconds must be > 0"));
        }
        if self.dispatch.batch_limit == 0 {
            return Err(anyhow::anyhow!("dispatch.batch_limit must be > 0"));
        }
        if self.dispatch.concurrency == 0 {
            return Err(anyhow::anyhow!("dispatch.concurrency must be > 0"));
        }
        if self.dispatch.claim_lease_seconds == 0 {
            return Err(anyhow::anyhow!("dispatch.claim_lease_seconds must be > 0"));
        }
        if self.server.http_max_in_flight == 0 {
            return Err(anyhow::anyhow!("server.http_max_in_flight must be > 0"));
        }
        self.business_hours()?;
        Ok(())
    }

    pub fn business_hours(&self) -> anyhow::Result<BusinessHours> {
        let b = &self.business;
        let timezone: Tz = b
            .timezone
            .trim()
            .parse()
            .map_err(|e| anyhow::anyhow!("business.timezone {:?}: {e}", b.timezone))?;
        let hours = BusinessHours {
            timezone,
            open_at: parse_clock("business.open_at", &b.open_at)?,
            close_at: parse_clock("business.close_at", &b.close_at)?,
            lunch_start: parse_clock("business.lunch_start", &b.lunch_start)?,
            lunch_end: parse_clock("business.lunch_end", &b.lunch_end)?,
            lunch_return: parse_clock("business.lunch_return", &b.lunch_return)?,
        };

        if hours.open_at >= hours.close_at {
            return Err(anyhow::anyhow!(
                "business.open_at must be before business.close_at"
            ));
        }
        if hours.lunch_start >= hours.lunch_end
            || hours.lunch_start < hours.open_at
            || hours.lunch_end > hours.close_at
        {
            return Err(anyhow::anyhow!(
                "business lunch window must lie inside opening hours"
            ));
        }
        if hours.lunch_return < hours.lunch_end || hours.lunch_return >= hours.close_at {
            return Err(anyhow::anyhow!(
                "business.lunch_return must be between lunch_end and close_at"
            ));
        }
        Ok(hours)
    }

    /// Key for the configured model's provider, if the LLM path is enabled.
    pub fn api_key_for_model(&self) -> Option<String> {
        if !self.llm.enabled {
            return None;
        }
        let model = self.llm.model.to_ascii_lowercase();
        if model.starts_with("claude-") {
            return self
                .keys
                .anthropic_api_key
                .clone()
                .filter(|s| !s.trim().is_empty());
        }
        self.keys
            .openai_api_key
            .clone()
            .filter(|s| !s.trim().is_empty())
    }

    pub fn database_path(&self) -> PathBuf {
        match self.storage.database_path.as_deref() {
            Some(p) if !p.trim().is_empty() => expand_home(p.trim()),
            _ => default_data_dir().join("followup.db"),
        }
    }

    pub fn llm_timeout(&self) -> Duration {
        Duration::from_secs(self.llm.timeout_seconds)
    }
}

fn parse_clock(field: &str, value: &str) -> anyhow::Result<NaiveTime> {
    NaiveTime::parse_from_str(value.trim(), "%H:%M")
        .map_err(|e| anyhow::anyhow!("{field} {value:?} must be HH:MM: {e}"))
}

fn home_dir() -> PathBuf {
    PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| ".".to_string()))
}

fn expand_home(path: &str) -> PathBuf {
    match path.strip_prefix("~/") {
        Some(rest) => home_dir().join(rest),
        None if path == "~" => home_dir(),
        None => PathBuf::from(path),
    }
}

pub fn default_config_path() -> PathBuf {
    Path::new(&home_dir()).join(".followup").join("config.toml")
}

pub fn default_data_dir() -> PathBuf {
    Path::new(&home_dir()).join(".followup").join("data")
}
