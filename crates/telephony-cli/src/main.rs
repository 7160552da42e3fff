//! Stdio front end for the telephony backend
//!
//! Reads one JSON request per line from stdin and writes replies and
//! notifications as JSON lines to stdout. Logs go to stderr.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tracing::{info, warn};
use xwalk_telephony_core::logging::{log_welcome, setup_logging};
use xwalk_telephony_core::provider::memory::InMemoryProvider;
use xwalk_telephony_core::{spawn_backend, OutboundMessage, ProviderEvent, TelephonyConfig, TelephonyProvider, VERSION};

/// Modem installed by `--simulate`
const SIMULATED_MODEM: &str = "/phonesim";

#[derive(Parser, Debug)]
#[command(name = "xwalk-telephony")]
#[command(about = "Crosswalk telephony backend speaking JSON lines over stdio")]
#[command(version)]
pub struct Args {
    /// TOML configuration file
    #[arg(short, long, env = "XWALK_TELEPHONY_CONFIG")]
    pub config: Option<PathBuf>,

    /// Use an in-memory modem instead of oFono
    #[arg(long)]
    pub simulate: bool,

    /// Log level, overriding the configuration
    #[arg(short, long)]
    pub log_level: Option<String>,

    /// Log as JSON
    #[arg(long)]
    pub json_logs: bool,

    /// Post notifications before the page enables them
    #[arg(long)]
    pub notifications: bool,
}

impl Args {
    fn apply(&self, config: &mut TelephonyConfig) {
        if let Some(level) = &self.log_level {
            config.logging.level = level.clone();
        }
        if self.json_logs {
            config.logging.json = true;
        }
        if self.notifications {
            config.notifications_enabled = true;
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = TelephonyConfig::load(args.config.as_deref()).context("Failed to load configuration")?;
    args.apply(&mut config);
    setup_logging(&config.logging)?;
    log_welcome("xwalk-telephony", VERSION);

    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let provider = if args.simulate {
        info!("Using simulated modem {}", SIMULATED_MODEM);
        simulated_provider(events_tx)
    } else {
        ofono_provider(&config, events_tx).await?
    };

    let runtime = spawn_backend(provider, events_rx, &config);
    let writer = tokio::spawn(write_outbound(runtime.outbound));
    let handle = runtime.handle;

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = tokio::select! {
            line = lines.next_line() => line.context("Failed to read stdin")?,
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                None
            }
        };
        let Some(line) = line else {
            break;
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        match serde_json::from_str(line) {
            Ok(message) => handle.post(message).await?,
            Err(e) => warn!("Ignoring malformed input line: {}", e),
        }
    }

    handle.shutdown().await?;
    runtime.task.await.context("Backend task panicked")?;
    writer.await.context("Output task panicked")??;
    Ok(())
}

/// Write every outbound message as one JSON line
async fn write_outbound(mut outbound: mpsc::UnboundedReceiver<OutboundMessage>) -> Result<()> {
    let mut stdout = tokio::io::stdout();
    while let Some(message) = outbound.recv().await {
        let mut line = serde_json::to_vec(&message)?;
        line.push(b'\n');
        stdout.write_all(&line).await?;
        stdout.flush().await?;
    }
    Ok(())
}

fn simulated_provider(events: mpsc::UnboundedSender<ProviderEvent>) -> Arc<dyn TelephonyProvider> {
    let provider = InMemoryProvider::with_events(events);
    provider.add_modem(SIMULATED_MODEM, InMemoryProvider::modem_properties("phonesim"));
    provider.set_emergency_numbers(&["112", "911"]);
    Arc::new(provider)
}

#[cfg(feature = "ofono")]
async fn ofono_provider(
    config: &TelephonyConfig,
    events: mpsc::UnboundedSender<ProviderEvent>,
) -> Result<Arc<dyn TelephonyProvider>> {
    use xwalk_telephony_core::provider::ofono::OfonoProvider;

    let provider = OfonoProvider::connect(&config.ofono)
        .await
        .context("Failed to connect to oFono")?;
    let subscriptions = provider
        .subscribe(events)
        .await
        .context("Failed to subscribe to oFono signals")?;
    info!("Listening to {} oFono signal streams", subscriptions.len());
    Ok(Arc::new(provider))
}

#[cfg(not(feature = "ofono"))]
async fn ofono_provider(
    _config: &TelephonyConfig,
    _events: mpsc::UnboundedSender<ProviderEvent>,
) -> Result<Arc<dyn TelephonyProvider>> {
    anyhow::bail!("Built without oFono support; rebuild with the `ofono` feature or pass --simulate")
}
