//! Switchboard PBX
//!
//! Runs the call engine until interrupted:
//! 1. Loads the TOML configuration (defaults when no file is given)
//! 2. Sets up logging
//! 3. Binds signaling and answers calls
//! 4. Optionally places one outbound call at startup

use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use tracing::{error, info};

use switchboard_call_engine::prelude::*;
use switchboard_infra_common::{log_welcome, setup_logging};

#[derive(Parser, Debug)]
#[command(author, version, about = "SIP switchboard with an AI attendant", long_about = None)]
struct Args {
    /// Configuration file (TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log level, overriding the configuration
    #[arg(short, long)]
    log_level: Option<String>,

    /// Signaling bind address, overriding the configuration
    #[arg(short, long)]
    bind: Option<SocketAddr>,

    /// Emit JSON log lines
    #[arg(long)]
    json: bool,

    /// Place a call to this target once started
    #[arg(long)]
    call: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => ServerConfig::load(path).with_context(|| format!("loading {}", path.display()))?,
        None => ServerConfig::default(),
    };
    if let Some(level) = args.log_level {
        config.logging.level = level;
    }
    if let Some(bind) = args.bind {
        config.signaling.bind_addr = bind;
    }
    config.logging.json |= args.json;

    setup_logging(config.logging.clone()).context("setting up logging")?;
    log_welcome(&config.logging.app_name, env!("CARGO_PKG_VERSION"));

    let server = SwitchboardServerBuilder::new()
        .with_config(config)
        .build()
        .await
        .context("starting switchboard")?;
    let calls = server.controller();
    let mut running = tokio::spawn(server.run());

    if let Some(target) = args.call {
        match calls.originate(&target).await {
            Ok(call_id) => info!("Placed call {} to {}", call_id, target),
            Err(e) => error!("Could not call {}: {}", target, e),
        }
    }

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Interrupted, shutting down");
            calls.shutdown().await?;
            running.await??;
        }
        result = &mut running => result??,
    }
    Ok(())
}
