//! QLink Bridge Server
//!
//! Serves the HTTP/WebSocket bridge in front of a Vantage IP-Enabler and
//! runs the configured monitor loop alongside it.

use anyhow::{Context, Result};
use clap::Parser;
use qlink_bridge::{monitor, BridgeContext, HubHandle, MonitorMode, Settings, SettingsFile};
use qlink_core::Terminator;
use qlink_transport::QlinkClient;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "qlink-bridge")]
#[command(about = "HTTP/WebSocket bridge for Vantage QLink controllers")]
#[command(version)]
struct Cli {
    /// Controller IP address
    #[arg(long, env = "VANTAGE_IP")]
    vantage_ip: Option<String>,

    /// Controller TCP port
    #[arg(long, env = "VANTAGE_PORT")]
    vantage_port: Option<u16>,

    /// Line terminator (CR or CRLF)
    #[arg(long, env = "Q_LINK_EOL")]
    eol: Option<Terminator>,

    /// Command timeout in seconds
    #[arg(long, env = "QLINK_TIMEOUT")]
    timeout: Option<f64>,

    /// Default fade time in seconds
    #[arg(long, env = "QLINK_FADE")]
    fade: Option<String>,

    /// Total connection attempts per command
    #[arg(long, env = "QLINK_MAX_RETRIES")]
    max_retries: Option<u32>,

    /// Base retry delay in seconds
    #[arg(long, env = "QLINK_RETRY_BASE_SEC")]
    retry_base: Option<f64>,

    /// Monitor mode (events, poll, off)
    #[arg(long, env = "QLINK_MONITOR_MODE")]
    monitor_mode: Option<MonitorMode>,

    /// Poll interval in seconds
    #[arg(long, env = "QLINK_POLL_INTERVAL")]
    poll_interval: Option<f64>,

    /// Persisted settings file
    #[arg(long, env = "QLINK_SETTINGS_FILE", default_value = "config/settings.toml")]
    settings_file: PathBuf,

    /// Directory holding loads.json and the station tables
    #[arg(long, env = "QLINK_CONFIG_DIR", default_value = "config")]
    config_dir: PathBuf,

    /// HTTP listen address
    #[arg(short, long, env = "QLINK_BIND")]
    bind: Option<SocketAddr>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Output logs as JSON
    #[arg(long)]
    json_logs: bool,
}

impl Cli {
    /// Overlay command line and environment values onto `settings`
    fn apply(&self, settings: &mut Settings) -> Result<()> {
        if let Some(ip) = &self.vantage_ip {
            settings.vantage_ip = ip.clone();
        }
        if let Some(port) = self.vantage_port {
            settings.vantage_port = port;
        }
        if let Some(eol) = self.eol {
            settings.terminator = eol;
        }
        if let Some(secs) = self.timeout {
            settings.timeout = seconds(secs).context("invalid --timeout")?;
        }
        if let Some(fade) = &self.fade {
            settings.fade = fade.clone();
        }
        if let Some(retries) = self.max_retries {
            settings.max_retries = retries.max(1);
        }
        if let Some(secs) = self.retry_base {
            settings.retry_base = seconds(secs).context("invalid --retry-base")?;
        }
        if let Some(mode) = self.monitor_mode {
            settings.monitor_mode = mode;
        }
        if let Some(secs) = self.poll_interval {
            settings.poll_interval = seconds(secs).context("invalid --poll-interval")?;
        }
        if let Some(bind) = self.bind {
            settings.bind = bind;
        }
        Ok(())
    }
}

fn seconds(secs: f64) -> Result<Duration> {
    Duration::try_from_secs_f64(secs).context("expected a non-negative number of seconds")
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    setup_logging(&cli.log_level, cli.json_logs)?;

    let mut settings = Settings::default();
    cli.apply(&mut settings)?;

    let settings_file = SettingsFile::new(&cli.settings_file);
    if let Err(e) = settings_file.load_into(&mut settings).await {
        warn!("Ignoring settings file: {}", e);
    }

    info!("Starting QLink bridge");
    info!(
        "Controller {} (terminator {}, timeout {:?}, {} attempts)",
        settings.controller_addr(),
        settings.terminator,
        settings.timeout,
        settings.max_retries
    );

    let client = Arc::new(QlinkClient::new(
        settings.controller_addr(),
        settings.client_options(),
    ));
    let (hub, _hub_task) = HubHandle::spawn();
    let bind = settings.bind;

    let ctx = Arc::new(
        BridgeContext::new(settings, client, hub)
            .with_config_dir(&cli.config_dir)
            .with_settings_file(settings_file),
    );

    let _monitor = monitor::spawn(ctx.clone());

    qlink_bridge::serve(ctx, bind, shutdown_signal())
        .await
        .context("HTTP server failed")?;

    Ok(())
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_ok() {
        info!("Received shutdown signal");
    }
}

fn setup_logging(level: &str, json: bool) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .context("Failed to parse log level")?;

    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(false).compact())
            .init();
    }

    Ok(())
}
