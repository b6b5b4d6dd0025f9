//! QR payload checker
//!
//! Runs a scanned payload through extraction and validation, and optionally
//! resolves it against the configured backend.
//!
//! Usage:
//!   cargo run --bin qr-check -- 'SALONPRO-BUSINESS-f47ac10b-...'
//!   cargo run --bin qr-check -- --manual f47ac10b-...
//!   cargo run --bin qr-check -- --resolve --config config/dev.toml '<payload>'
//!   cargo run --bin qr-check -- --generate f47ac10b-...

use std::sync::Arc;

use clap::Parser;
use salon_booking::domain::qr::{is_uuid_shape, QrPayloads, ScannedIdentifier};
use salon_booking::domain::BusinessId;
use salon_booking::infra::{Config, Metrics};
use salon_booking::io::postgrest::{PostgrestConfig, PostgrestGateway};
use salon_booking::services::session::SessionEntry;
use salon_booking::services::{QrResolver, WizardService};

#[derive(Parser, Debug)]
#[command(name = "qr-check", about = "Validate and resolve salon QR payloads")]
struct Args {
    /// Scanned payload, or a business id with --manual / --generate
    input: String,

    /// Treat the input as a typed-in business id
    #[arg(long)]
    manual: bool,

    /// Look the business up in the configured backend
    #[arg(long)]
    resolve: bool,

    /// Print the QR payloads for a business id instead of checking one
    #[arg(long, conflicts_with_all = ["manual", "resolve"])]
    generate: bool,

    /// Path to TOML configuration file (default: $CONFIG_FILE, then config/dev.toml)
    #[arg(short, long)]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let config = Config::load_from_path(
        &args.config.clone().unwrap_or_else(|| Config::resolve_config_path(&[])),
    );

    if args.generate {
        let business_id = BusinessId::new(args.input.trim().to_ascii_lowercase());
        if !is_uuid_shape(business_id.as_str()) {
            return Err(format!("'{}' is not a business id", args.input).into());
        }
        let payloads = QrPayloads::for_business(&business_id, config.public_base_url());
        println!("{}", serde_json::to_string_pretty(&payloads)?);
        return Ok(());
    }

    let identifier = if args.manual {
        ScannedIdentifier::from_manual(&args.input)
    } else {
        ScannedIdentifier::from_scan(&args.input)
    };
    println!("source:    {:?}", identifier.source());
    println!("candidate: {}", identifier.candidate());
    println!("uuid shape: {}", is_uuid_shape(identifier.candidate()));

    if !args.resolve {
        return match identifier.into_business_id() {
            Ok(id) => {
                println!("business:  {id}");
                Ok(())
            }
            Err(e) => Err(e.user_message().into()),
        };
    }

    if !config.has_backend() {
        return Err("--resolve needs [supabase] url and anon_key (or SUPABASE_URL / SUPABASE_ANON_KEY)".into());
    }

    let metrics = Arc::new(Metrics::new());
    let gateway = Arc::new(
        PostgrestGateway::new(PostgrestConfig::from_config(&config))?.with_metrics(metrics.clone()),
    );
    let wizards = Arc::new(WizardService::new(
        gateway.clone(),
        metrics.clone(),
        config.slot_schedule().clone(),
    ));
    let resolver = QrResolver::new(gateway, metrics.clone(), wizards);

    let mut session = SessionEntry::default();
    match resolver.resolve(identifier, &mut session).await {
        Ok(outcome) => {
            println!("{}", serde_json::to_string_pretty(&outcome)?);
            let summary = metrics.report();
            println!("gateway round trip: {} ms", summary.gateway_latency_max_ms);
            Ok(())
        }
        Err(e) => Err(format!("{} ({})", e.user_message(), e.kind()).into()),
    }
}
