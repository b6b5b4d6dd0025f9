//! Configuration loading from TOML files
//!
//! Config file is selected via:
//! 1. --config <path> command line argument
//! 2. CONFIG_FILE environment variable
//! 3. Default: config/dev.toml
//!
//! `SUPABASE_URL` and `SUPABASE_ANON_KEY` override the backend section so
//! secrets can stay out of the file.

use anyhow::Context;
use serde::Deserialize;
use std::env;
use std::fs;
use std::path::Path;

use crate::domain::booking::{SlotSchedule, TimeSlot};

#[derive(Debug, Clone, Deserialize)]
pub struct SiteConfig {
    /// Identifier reported in logs and metrics
    #[serde(default = "default_site_id")]
    pub id: String,
}

impl Default for SiteConfig {
    fn default() -> Self {
        Self { id: default_site_id() }
    }
}

fn default_site_id() -> String {
    "salon-booking".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    #[serde(default = "default_server_port")]
    pub port: u16,
    /// Origin used when building booking links for QR codes
    #[serde(default = "default_public_base_url")]
    pub public_base_url: String,
    /// Sessions unused for this long are dropped
    #[serde(default = "default_session_idle_secs")]
    pub session_idle_secs: u64,
    /// Signed-in sessions re-confirm their token with the identity provider
    /// after this long
    #[serde(default = "default_session_recheck_secs")]
    pub session_recheck_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            port: default_server_port(),
            public_base_url: default_public_base_url(),
            session_idle_secs: default_session_idle_secs(),
            session_recheck_secs: default_session_recheck_secs(),
        }
    }
}

fn default_session_idle_secs() -> u64 {
    1800
}

fn default_session_recheck_secs() -> u64 {
    300
}

fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}

fn default_server_port() -> u16 {
    8080
}

fn default_public_base_url() -> String {
    "http://localhost:8080".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct SupabaseConfig {
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub anon_key: String,
    /// Elevated key for server-side writes; the anon key is used when absent
    #[serde(default)]
    pub service_key: Option<String>,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for SupabaseConfig {
    fn default() -> Self {
        Self { url: String::new(), anon_key: String::new(), service_key: None, timeout_ms: default_timeout_ms() }
    }
}

fn default_timeout_ms() -> u64 {
    10_000
}

#[derive(Debug, Clone, Deserialize)]
pub struct BookingConfig {
    #[serde(default = "default_slot_start")]
    pub slot_start: String,
    #[serde(default = "default_slot_end")]
    pub slot_end: String,
    #[serde(default = "default_slot_interval")]
    pub slot_interval_minutes: u32,
}

impl Default for BookingConfig {
    fn default() -> Self {
        Self {
            slot_start: default_slot_start(),
            slot_end: default_slot_end(),
            slot_interval_minutes: default_slot_interval(),
        }
    }
}

fn default_slot_start() -> String {
    "09:00".to_string()
}

fn default_slot_end() -> String {
    "17:00".to_string()
}

fn default_slot_interval() -> u32 {
    30
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    /// Serve `/metrics` in the Prometheus text format
    #[serde(default = "default_metrics_enabled")]
    pub enabled: bool,
    /// Seconds between summary log lines
    #[serde(default = "default_log_interval")]
    pub log_interval_secs: u64,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self { enabled: default_metrics_enabled(), log_interval_secs: default_log_interval() }
    }
}

fn default_metrics_enabled() -> bool {
    true
}

fn default_log_interval() -> u64 {
    60
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct TomlConfig {
    #[serde(default)]
    pub site: SiteConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub supabase: SupabaseConfig,
    #[serde(default)]
    pub booking: BookingConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Main configuration struct used throughout the application
#[derive(Debug, Clone)]
pub struct Config {
    site_id: String,
    bind_address: String,
    server_port: u16,
    public_base_url: String,
    session_idle_secs: u64,
    session_recheck_secs: u64,
    supabase_url: String,
    supabase_anon_key: String,
    supabase_service_key: Option<String>,
    supabase_timeout_ms: u64,
    slot_schedule: SlotSchedule,
    metrics_enabled: bool,
    metrics_log_interval_secs: u64,
    config_file: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            site_id: default_site_id(),
            bind_address: default_bind_address(),
            server_port: default_server_port(),
            public_base_url: default_public_base_url(),
            session_idle_secs: default_session_idle_secs(),
            session_recheck_secs: default_session_recheck_secs(),
            supabase_url: String::new(),
            supabase_anon_key: String::new(),
            supabase_service_key: None,
            supabase_timeout_ms: default_timeout_ms(),
            slot_schedule: SlotSchedule::default(),
            metrics_enabled: true,
            metrics_log_interval_secs: default_log_interval(),
            config_file: "default".to_string(),
        }
    }
}

fn parse_slot(field: &str, raw: &str) -> anyhow::Result<TimeSlot> {
    raw.parse::<TimeSlot>()
        .map_err(|_| anyhow::anyhow!("booking.{field} must be HH:MM, got {raw:?}"))
}

impl Config {
    /// Determine config file path from args or environment
    pub fn resolve_config_path(args: &[String]) -> String {
        for (i, arg) in args.iter().enumerate() {
            if arg == "--config" {
                if let Some(path) = args.get(i + 1) {
                    return path.clone();
                }
            }
            if let Some(path) = arg.strip_prefix("--config=") {
                return path.to_string();
            }
        }

        if let Ok(path) = env::var("CONFIG_FILE") {
            return path;
        }

        "config/dev.toml".to_string()
    }

    /// Build from already-parsed TOML
    pub fn from_toml(toml_config: TomlConfig, config_file: &str) -> anyhow::Result<Self> {
        let booking = toml_config.booking;
        let slot_schedule = SlotSchedule::new(
            parse_slot("slot_start", &booking.slot_start)?,
            parse_slot("slot_end", &booking.slot_end)?,
            booking.slot_interval_minutes,
        )
        .map_err(|e| anyhow::anyhow!("invalid booking schedule: {e}"))?;

        Ok(Self {
            site_id: toml_config.site.id,
            bind_address: toml_config.server.bind_address,
            server_port: toml_config.server.port,
            public_base_url: toml_config.server.public_base_url,
            session_idle_secs: toml_config.server.session_idle_secs.max(1),
            session_recheck_secs: toml_config.server.session_recheck_secs,
            supabase_url: toml_config.supabase.url,
            supabase_anon_key: toml_config.supabase.anon_key,
            supabase_service_key: toml_config.supabase.service_key.filter(|k| !k.is_empty()),
            supabase_timeout_ms: toml_config.supabase.timeout_ms,
            slot_schedule,
            metrics_enabled: toml_config.metrics.enabled,
            metrics_log_interval_secs: toml_config.metrics.log_interval_secs.max(1),
            config_file: config_file.to_string(),
        })
    }

    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;

        let toml_config: TomlConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;

        Self::from_toml(toml_config, &path.display().to_string())
            .with_context(|| format!("Invalid config file {}", path.display()))
    }

    /// Load configuration - tries TOML file first, falls back to defaults
    pub fn load(args: &[String]) -> Self {
        Self::load_from_path(&Self::resolve_config_path(args))
    }

    /// Load from an explicit path, falling back to defaults, then apply env overrides
    pub fn load_from_path(path: &str) -> Self {
        let config = match Self::from_file(path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("Warning: {:#}. Using defaults.", e);
                Self::default()
            }
        };
        config.with_env_overrides(|key| env::var(key).ok())
    }

    /// Apply `SUPABASE_URL` / `SUPABASE_ANON_KEY` from the given lookup
    pub fn with_env_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(url) = lookup("SUPABASE_URL").filter(|v| !v.is_empty()) {
            self.supabase_url = url;
        }
        if let Some(key) = lookup("SUPABASE_ANON_KEY").filter(|v| !v.is_empty()) {
            self.supabase_anon_key = key;
        }
        self
    }

    /// True once both the backend URL and key are known
    pub fn has_backend(&self) -> bool {
        !self.supabase_url.is_empty() && !self.supabase_anon_key.is_empty()
    }

    pub fn site_id(&self) -> &str {
        &self.site_id
    }

    pub fn bind_address(&self) -> &str {
        &self.bind_address
    }

    pub fn server_port(&self) -> u16 {
        self.server_port
    }

    pub fn public_base_url(&self) -> &str {
        &self.public_base_url
    }

    pub fn session_idle_secs(&self) -> u64 {
        self.session_idle_secs
    }

    pub fn session_recheck_secs(&self) -> u64 {
        self.session_recheck_secs
    }

    pub fn supabase_url(&self) -> &str {
        &self.supabase_url
    }

    pub fn supabase_anon_key(&self) -> &str {
        &self.supabase_anon_key
    }

    pub fn supabase_service_key(&self) -> Option<&str> {
        self.supabase_service_key.as_deref()
    }

    pub fn supabase_timeout_ms(&self) -> u64 {
        self.supabase_timeout_ms
    }

    pub fn slot_schedule(&self) -> &SlotSchedule {
        &self.slot_schedule
    }

    pub fn metrics_enabled(&self) -> bool {
        self.metrics_enabled
    }

    pub fn metrics_log_interval_secs(&self) -> u64 {
        self.metrics_log_interval_secs
    }

    pub fn config_file(&self) -> &str {
        &self.config_file
    }

    /// Builder method for tests to point at a local backend
    #[cfg(test)]
    pub fn with_supabase(mut self, url: &str, anon_key: &str) -> Self {
        self.supabase_url = url.to_string();
        self.supabase_anon_key = anon_key.to_string();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.server_port(), 8080);
        assert_eq!(config.bind_address(), "0.0.0.0");
        assert_eq!(config.supabase_timeout_ms(), 10_000);
        assert_eq!(config.slot_schedule().slots().len(), 17);
        assert!(config.metrics_enabled());
        assert!(!config.has_backend());
    }

    #[test]
    fn test_resolve_config_path_default() {
        let args: Vec<String> = vec!["salon-booking".to_string()];
        if env::var("CONFIG_FILE").is_err() {
            assert_eq!(Config::resolve_config_path(&args), "config/dev.toml");
        }
    }

    #[test]
    fn test_resolve_config_path_from_arg() {
        let args: Vec<String> = vec![
            "salon-booking".to_string(),
            "--config".to_string(),
            "config/prod.toml".to_string(),
        ];
        assert_eq!(Config::resolve_config_path(&args), "config/prod.toml");
    }

    #[test]
    fn test_resolve_config_path_from_arg_equals() {
        let args: Vec<String> =
            vec!["salon-booking".to_string(), "--config=config/staging.toml".to_string()];
        assert_eq!(Config::resolve_config_path(&args), "config/staging.toml");
    }

    #[test]
    fn test_partial_toml_keeps_section_defaults() {
        let parsed: TomlConfig = toml::from_str(
            r#"
[server]
port = 9000

[booking]
slot_end = "12:00"
"#,
        )
        .unwrap();
        let config = Config::from_toml(parsed, "inline").unwrap();
        assert_eq!(config.server_port(), 9000);
        assert_eq!(config.public_base_url(), "http://localhost:8080");
        // 09:00 .. 12:00 every 30 minutes
        assert_eq!(config.slot_schedule().slots().len(), 7);
    }

    #[test]
    fn test_bad_slot_is_rejected() {
        let parsed: TomlConfig = toml::from_str("[booking]\nslot_start = \"nine\"\n").unwrap();
        assert!(Config::from_toml(parsed, "inline").is_err());
    }

    #[test]
    fn test_env_overrides_replace_backend() {
        let config = Config::default().with_supabase("https://file.supabase.co", "file-key");
        let overridden = config.with_env_overrides(|key| match key {
            "SUPABASE_URL" => Some("https://env.supabase.co".to_string()),
            "SUPABASE_ANON_KEY" => Some(String::new()),
            _ => None,
        });
        assert_eq!(overridden.supabase_url(), "https://env.supabase.co");
        // empty values do not clobber
        assert_eq!(overridden.supabase_anon_key(), "file-key");
    }
}
