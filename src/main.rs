//! Salon booking service
//!
//! Serves the booking wizard, QR resolution and the role dashboards as a JSON
//! HTTP API in front of a Supabase backend.
//!
//! Module structure:
//! - `domain/` - Records, wizard state machine, QR payloads
//! - `io/` - Backend clients, in-memory backend, HTTP API
//! - `services/` - Sessions, wizard, QR resolver, auth, dashboards
//! - `infra/` - Config, Metrics

use std::sync::Arc;

use clap::Parser;
use salon_booking::infra::{Config, Metrics};
use salon_booking::io::gotrue::GoTrueConfig;
use salon_booking::io::postgrest::PostgrestConfig;
use salon_booking::io::{
    start_api_server, AppState, Gateway, GoTrueClient, Identity, MemoryGateway, MemoryIdentity,
    PostgrestGateway,
};
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::EnvFilter;

/// Salon booking service
#[derive(Parser, Debug)]
#[command(name = "salon-booking", version, about)]
struct Args {
    /// Path to TOML configuration file (default: $CONFIG_FILE, then config/dev.toml)
    #[arg(short, long)]
    config: Option<String>,

    /// Run against the in-process backend instead of Supabase
    #[arg(long)]
    memory: bool,

    /// Emit logs as JSON lines
    #[arg(long)]
    log_json: bool,
}

fn init_tracing(json: bool) {
    // Default: INFO, use RUST_LOG=debug for per-request logs
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(UtcTime::rfc_3339())
        .with_target(false);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

type Backend = (Arc<dyn Gateway>, Arc<dyn Identity>);

fn memory_backend() -> Backend {
    let gateway: Arc<dyn Gateway> = Arc::new(MemoryGateway::new());
    let identity: Arc<dyn Identity> = Arc::new(MemoryIdentity::new());
    (gateway, identity)
}

fn supabase_backend(
    config: &Config,
    metrics: &Arc<Metrics>,
) -> Result<Backend, Box<dyn std::error::Error>> {
    let gateway: Arc<dyn Gateway> = Arc::new(
        PostgrestGateway::new(PostgrestConfig::from_config(config))?.with_metrics(metrics.clone()),
    );
    let identity: Arc<dyn Identity> = Arc::new(GoTrueClient::new(GoTrueConfig::from_config(config))?);
    Ok((gateway, identity))
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    init_tracing(args.log_json);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        git_hash = env!("GIT_HASH"),
        profile = env!("BUILD_PROFILE"),
        "salon-booking starting"
    );

    let config = Config::load_from_path(
        &args.config.clone().unwrap_or_else(|| Config::resolve_config_path(&[])),
    );
    info!(
        config_file = %config.config_file(),
        site = %config.site_id(),
        bind_address = %config.bind_address(),
        port = %config.server_port(),
        public_base_url = %config.public_base_url(),
        supabase_url = %config.supabase_url(),
        slot_count = config.slot_schedule().slots().len(),
        metrics_enabled = config.metrics_enabled(),
        session_idle_secs = config.session_idle_secs(),
        "config_loaded"
    );

    let metrics = Arc::new(Metrics::new());

    let (gateway, identity) = if args.memory {
        info!("backend_in_memory");
        memory_backend()
    } else if config.has_backend() {
        info!(url = %config.supabase_url(), "backend_supabase");
        supabase_backend(&config, &metrics)?
    } else {
        warn!("supabase url or key missing, falling back to in-memory backend");
        memory_backend()
    };

    let state = Arc::new(AppState::new(&config, gateway, identity, metrics.clone()));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // Start metrics reporter
    if config.metrics_enabled() {
        let metrics_clone = metrics.clone();
        let metrics_interval = config.metrics_log_interval_secs().max(1);
        let mut reporter_shutdown = shutdown_rx.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(std::time::Duration::from_secs(metrics_interval));
            interval.tick().await;
            loop {
                tokio::select! {
                    _ = interval.tick() => metrics_clone.report().log(),
                    _ = reporter_shutdown.changed() => break,
                }
            }
        });
    }

    // Drop idle sessions
    {
        let state = state.clone();
        let sweep_every = (config.session_idle_secs() / 4).clamp(1, 60);
        let mut sweeper_shutdown = shutdown_rx.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(std::time::Duration::from_secs(sweep_every));
            interval.tick().await;
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        state.sweep_idle_sessions();
                    }
                    _ = sweeper_shutdown.changed() => break,
                }
            }
        });
    }

    // Handle shutdown on Ctrl+C
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("shutdown_signal_received");
        let _ = shutdown_tx.send(true);
    });

    start_api_server(state, config.bind_address(), config.server_port(), shutdown_rx)
        .await
        .map_err(|e| -> Box<dyn std::error::Error> {
            tracing::error!(error = %e, "http_api_error");
            e
        })?;

    info!("salon-booking shutdown complete");
    Ok(())
}
