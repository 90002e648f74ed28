//! termbridge-relay binary.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;

use termbridge_common::BridgeError;
use termbridge_config::{load_config, RelayConfig};
use termbridge_relay::{server, MemoryIdentityStore, Relay, RelaySettings, TokenValidator};

#[derive(Parser)]
#[command(name = "termbridge-relay", about = "WebSocket pairing relay for remote terminals")]
struct Args {
    /// Config file (defaults to the platform config dir).
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Port to listen on, overriding the config file.
    #[arg(short, long)]
    port: Option<u16>,

    /// Address to bind, overriding the config file.
    #[arg(long)]
    bind: Option<String>,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    let config = match load_config(args.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            init_tracing(&RelayConfig::default());
            tracing::error!(error = %e, "Failed to load config");
            std::process::exit(1);
        }
    };
    init_tracing(&config);

    if let Err(e) = run(config, args).await {
        tracing::error!(error = %e, "Relay stopped");
        std::process::exit(1);
    }
}

fn init_tracing(config: &RelayConfig) {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.logging.level.filter_directive().into()),
        )
        .init();
}

async fn run(mut config: RelayConfig, args: Args) -> Result<(), BridgeError> {
    if let Some(port) = args.port {
        config.server.port = port;
    }
    if let Some(bind) = args.bind {
        config.server.bind = bind;
    }

    let store = MemoryIdentityStore::new(config.auth.identities.iter().cloned());
    let validator = Arc::new(TokenValidator::new(&config.auth.token_secret, store));
    let relay = Relay::new(validator, RelaySettings::from_config(&config));

    tracing::info!(
        identities = config.auth.identities.len(),
        handshake_timeout_secs = config.handshake.timeout_secs,
        "Relay configured"
    );

    let listener = server::bind(&config.server).await?;
    let upgrade_timeout = Duration::from_secs(u64::from(config.server.upgrade_timeout_secs));
    server::serve(listener, relay, upgrade_timeout).await;
    Ok(())
}
