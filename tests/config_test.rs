//! Integration tests for configuration loading

use salon_booking::domain::TimeSlot;
use salon_booking::infra::Config;
use std::io::Write;
use tempfile::NamedTempFile;

fn write_config(content: &str) -> NamedTempFile {
    let mut temp_file = NamedTempFile::new().unwrap();
    temp_file.write_all(content.as_bytes()).unwrap();
    temp_file.flush().unwrap();
    temp_file
}

#[test]
fn test_load_config_from_file() {
    let temp_file = write_config(
        r#"
[site]
id = "test-salon"

[server]
bind_address = "127.0.0.1"
port = 9000
public_base_url = "https://book.example.com/"
session_idle_secs = 600
session_recheck_secs = 0

[supabase]
url = "https://abc.supabase.co"
anon_key = "anon"
timeout_ms = 2500

[booking]
slot_start = "10:00"
slot_end = "12:00"
slot_interval_minutes = 60

[metrics]
enabled = false
log_interval_secs = 15
"#,
    );

    let config = Config::from_file(temp_file.path()).unwrap();

    assert_eq!(config.site_id(), "test-salon");
    assert_eq!(config.bind_address(), "127.0.0.1");
    assert_eq!(config.server_port(), 9000);
    assert_eq!(config.public_base_url(), "https://book.example.com/");
    assert_eq!(config.session_idle_secs(), 600);
    assert_eq!(config.session_recheck_secs(), 0);
    assert_eq!(config.supabase_url(), "https://abc.supabase.co");
    assert_eq!(config.supabase_timeout_ms(), 2500);
    assert!(config.has_backend());
    assert!(!config.metrics_enabled());
    assert_eq!(config.metrics_log_interval_secs(), 15);

    let slots: Vec<String> = config.slot_schedule().slots().iter().map(TimeSlot::to_string).collect();
    assert_eq!(slots, vec!["10:00", "11:00", "12:00"]);
}

#[test]
fn test_missing_sections_get_defaults() {
    let temp_file = write_config("[site]\nid = \"only-site\"\n");
    let config = Config::from_file(temp_file.path()).unwrap();

    assert_eq!(config.site_id(), "only-site");
    assert_eq!(config.server_port(), 8080);
    assert_eq!(config.session_idle_secs(), 1800);
    assert_eq!(config.session_recheck_secs(), 300);
    assert!(!config.has_backend());
    assert_eq!(config.slot_schedule().slots().len(), 17);
}

#[test]
fn test_bad_slot_is_rejected() {
    let temp_file = write_config("[booking]\nslot_start = \"nine\"\n");
    let err = Config::from_file(temp_file.path()).unwrap_err();
    assert!(format!("{err:#}").contains("slot_start"));
}

#[test]
fn test_env_overrides_fill_backend() {
    let config = Config::default().with_env_overrides(|key| match key {
        "SUPABASE_URL" => Some("https://env.supabase.co".to_string()),
        "SUPABASE_ANON_KEY" => Some("env-key".to_string()),
        _ => None,
    });
    assert_eq!(config.supabase_url(), "https://env.supabase.co");
    assert_eq!(config.supabase_anon_key(), "env-key");
    assert!(config.has_backend());

    let untouched = Config::default().with_env_overrides(|_| Some(String::new()));
    assert!(!untouched.has_backend());
}

#[test]
fn test_load_from_path_fallback() {
    let config = Config::load_from_path("/nonexistent/config.toml");
    assert_eq!(config.config_file(), "default");
    assert_eq!(config.server_port(), 8080);
    assert_eq!(config.slot_schedule().slots().len(), 17);
}

#[test]
fn test_resolve_config_path_prefers_flag() {
    let args = vec!["salon-booking".to_string(), "--config".to_string(), "custom.toml".to_string()];
    assert_eq!(Config::resolve_config_path(&args), "custom.toml");
    let args = vec!["salon-booking".to_string(), "--config=other.toml".to_string()];
    assert_eq!(Config::resolve_config_path(&args), "other.toml");
}
