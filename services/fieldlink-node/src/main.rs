//! FieldLink field unit node.
//!
//! Connects to the configured servers, beacons presence, and bridges
//! chat between the network and the operator console: inbound messages
//! print to stdout, stdin lines broadcast to the shared chatroom.
//! `/report` prints the compiled peer position report; `exit` or `quit`
//! stops the session.

use anyhow::{bail, Context, Result};
use fieldlink_client::{
    logging, Config, CsvSnapshotSource, SessionManager, StaticSource, TcpConnector,
    TelemetrySource,
};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    logging::init();

    let args: Vec<String> = std::env::args().collect();
    let config_path = parse_config_path(&args)?;
    let config = Config::from_file(&config_path)
        .with_context(|| format!("loading config from {}", config_path.display()))?;

    let telemetry: Arc<dyn TelemetrySource> = match &config.telemetry.csv_path {
        Some(path) => Arc::new(CsvSnapshotSource::new(path.clone())),
        None => Arc::new(StaticSource::default()),
    };

    info!(
        uid = %config.identity.uid,
        callsign = %config.identity.callsign,
        "starting fieldlink node"
    );
    let manager = SessionManager::new(config, TcpConnector, telemetry);
    let mut handle = manager.start().await.context("initial connect failed")?;

    if let Some(mut inbox) = handle.take_inbox() {
        tokio::spawn(async move {
            while let Some(msg) = inbox.recv().await {
                let tag = if msg.directed { "direct" } else { &msg.chatroom };
                println!("[CHAT][{}] {}: {}", tag, msg.sender_callsign, msg.text);
            }
        });
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if line.eq_ignore_ascii_case("exit") || line.eq_ignore_ascii_case("quit") {
            break;
        }
        if line == "/report" {
            println!("{}", handle.compile_report());
            continue;
        }
        if let Err(e) = handle.send_chat(line) {
            warn!(error = %e, "message not sent");
        }
    }

    handle.stop().await;
    info!("fieldlink node stopped");
    Ok(())
}

const DEFAULT_CONFIG_PATH: &str = "fieldlink.toml";

fn parse_config_path(args: &[String]) -> Result<PathBuf> {
    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        if arg == "--config" {
            match iter.next() {
                Some(path) => return Ok(PathBuf::from(path)),
                None => bail!("--config was provided without a path"),
            }
        }
    }
    Ok(PathBuf::from(DEFAULT_CONFIG_PATH))
}
