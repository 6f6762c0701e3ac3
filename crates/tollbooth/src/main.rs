//! tollbooth - authenticating reverse-proxy gateway
//!
//! Configuration starts from compiled defaults, merges the machine, user,
//! and working-directory TOML tiers (`--config` replaces the last one), and
//! finally applies `TOLLBOOTH_*` environment overrides. `--show-config`
//! prints the effective result and exits.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use tollbooth::mail::{Mailer, NoopMailer, SmtpMailer};
use tollbooth::store::{HeartbeatStore, MemStore, PgStore, Store};
use tollbooth::{build_router, AppState};
use tollconf::{TelemetryConfig, TollConfig};
use tollcore::{
    HeartbeatComponent, HeartbeatOptions, HttpServerComponent, Kernel, MetricsServerComponent,
    SignalComponent,
};

const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

/// Authenticating reverse-proxy gateway
#[derive(Parser)]
#[command(name = "tollbooth")]
#[command(about = "Authenticating reverse-proxy gateway")]
#[command(version)]
struct Cli {
    /// Path to config file (overrides ./tollbooth.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Show loaded configuration and exit
    #[arg(long)]
    show_config: bool,

    /// Storage backend
    #[arg(long, value_enum, default_value_t = StoreKind::Postgres)]
    store: StoreKind,
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
enum StoreKind {
    Postgres,
    Memory,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let (config, sources) = TollConfig::load_with_sources_from(cli.config.as_deref())
        .context("Failed to load configuration")?;

    if cli.show_config {
        for path in &sources.files {
            println!("# merged {}", path.display());
        }
        for var in &sources.env_overrides {
            println!("# overridden by {var}");
        }
        print!("{}", config.to_toml());
        return Ok(());
    }

    init_tracing(&config.telemetry);

    info!(
        files = ?sources.files,
        env_overrides = ?sources.env_overrides,
        "configuration loaded"
    );

    let store: Arc<dyn Store> = match cli.store {
        StoreKind::Postgres => {
            let url = config.database.connection_url();
            Arc::new(
                PgStore::connect(&url)
                    .await
                    .context("Failed to connect to postgres")?,
            )
        }
        StoreKind::Memory => {
            warn!("using the in-memory store; all state is lost on exit");
            Arc::new(MemStore::new())
        }
    };

    let mailer: Arc<dyn Mailer> = if config.mail.enabled() {
        Arc::new(
            SmtpMailer::new(
                &config.mail.smtp_host,
                config.mail.smtp_port,
                &config.mail.sender_email,
                &config.mail.sender_password,
            )
            .context("Failed to build mail client")?,
        )
    } else {
        Arc::new(NoopMailer)
    };

    let state = AppState::new(&config, store.clone(), mailer);
    let router = build_router(state);

    let mut kernel = Kernel::new();
    kernel.register(HttpServerComponent::new(
        "gateway",
        config.http.bind_addr(),
        router,
    ));
    kernel.register(MetricsServerComponent::new(config.metrics.bind_addr()));
    kernel.register(HeartbeatComponent::new(
        HeartbeatOptions {
            interval: config.heartbeat.interval(),
            error_increment: config.heartbeat.error_increment(),
            health_path: config.heartbeat.health_path.clone(),
            client_timeout: config.heartbeat.client_timeout(),
        },
        Arc::new(HeartbeatStore(store)),
    ));
    kernel.register(SignalComponent);

    let shutdown = CancellationToken::new();
    let (started, failed) = kernel.start(shutdown.clone())?;

    tokio::spawn(async move {
        if started.wait().await.is_ok() {
            info!("all components started");
        }
    });

    if let Some(err) = failed.wait().await {
        if err.is_signal() {
            info!(reason = %err, "shutting down");
        } else {
            error!(error = %err, "shutting down");
        }
    }

    kernel.shutdown(SHUTDOWN_GRACE).await?;
    info!("shutdown complete");
    Ok(())
}

fn init_tracing(telemetry: &TelemetryConfig) {
    let filter =
        EnvFilter::try_new(&telemetry.log_level).unwrap_or_else(|_| EnvFilter::new("info"));

    if telemetry.log_format == "pretty" {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init();
    }
}
