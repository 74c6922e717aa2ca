// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Scanwerk daemon — registers scan destinations on an HP LEDM device and
// receives walk-up scans into batch directories.
//
// Entry point: initialises logging, merges CLI flags over the JSON config,
// locates the device (configured URL or mDNS probe), then keeps a controller
// running. A power-down or transport error parks the daemon until the device
// answers again; Ctrl-C exits.

mod batch;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use scanwerk_core::config::AppConfig;
use scanwerk_core::error::{Result, ScanwerkError};
use scanwerk_core::types::{ColorSpace, DestinationSettings};
use scanwerk_ledm::{discovery, ControllerConfig, DeviceClient, ScanController};

use batch::FileBatchFactory;

/// Delay between online probes while the device is away.
const ONLINE_PROBE_DELAY: Duration = Duration::from_secs(10);

#[derive(Parser, Debug)]
#[command(
    name = "scanwerk",
    about = "Receive walk-up scans from an HP LEDM multifunction device",
    version
)]
struct Cli {
    /// Device base URL, e.g. http://192.168.1.50:8080 (mDNS probe when omitted)
    #[arg(long)]
    device_url: Option<String>,

    /// Hostname shown on the device front panel (local hostname when omitted)
    #[arg(long)]
    hostname: Option<String>,

    /// Directory that document batches are written into
    #[arg(long)]
    output_dir: Option<PathBuf>,

    /// Path to a JSON configuration file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Extra destination as NAME[:DPI[:gray|color]], repeatable
    #[arg(long = "destination", value_parser = parse_destination)]
    destinations: Vec<DestinationSettings>,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    if let Err(e) = run(Cli::parse()).await {
        error!(error = %e, "scanwerk exited with an error");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let mut config = match &cli.config {
        Some(path) => AppConfig::load(path)?,
        None => AppConfig::default(),
    };
    if let Some(url) = cli.device_url {
        config.device_url = Some(url);
    }
    if let Some(hostname) = cli.hostname {
        config.hostname = Some(hostname);
    }
    if let Some(output_dir) = cli.output_dir {
        config.output_dir = output_dir;
    }
    config.destinations.extend(cli.destinations);
    if config.destinations.is_empty() {
        info!("no destinations configured; registering a default \"Documents\" destination");
        config.destinations.push(DestinationSettings {
            name: "Documents".into(),
            file_pattern: None,
            ocr: false,
            verso: false,
            resolution: 300,
            color_space: ColorSpace::Gray,
        });
    }

    let hostname = config.hostname.clone().unwrap_or_else(|| {
        whoami::fallible::hostname().unwrap_or_else(|_| "scanwerk".into())
    });

    let device_url = match config.device_url.clone() {
        Some(url) => url,
        None => {
            info!("no device URL configured; probing the network via mDNS");
            tokio::task::spawn_blocking(|| discovery::locate_device(None))
                .await
                .map_err(|e| {
                    ScanwerkError::transport_from("app.locate", "mDNS probe task failed", e)
                })??
        }
    };

    let client = DeviceClient::with_connect_timeout(&device_url, config.connect_timeout())?;
    client.is_online().await?;
    match client.discovery_tree().await {
        Ok(tree) => {
            let revision = tree.version.map(|v| v.revision).unwrap_or_default();
            info!(device = %device_url, revision = %revision, "device online");
        }
        Err(e) => warn!(error = %e, "device online but discovery tree unreadable"),
    }

    tokio::fs::create_dir_all(&config.output_dir).await?;
    let factory = Arc::new(FileBatchFactory::new(config.output_dir.clone()));
    let controller_config = ControllerConfig::from(&config);

    loop {
        let controller = ScanController::new(
            client.clone(),
            factory.clone(),
            hostname.clone(),
            config.destinations.clone(),
            controller_config.clone(),
        );
        info!(
            hostname = %hostname,
            destinations = config.destinations.len(),
            "controller starting"
        );
        tokio::select! {
            result = controller.run() => match result {
                Ok(()) => break,
                Err(ScanwerkError::PowerDown) => {
                    info!("device powered down; waiting for it to return");
                }
                Err(e) => error!(error = %e, "controller stopped"),
            },
            _ = tokio::signal::ctrl_c() => {
                info!("interrupt received; shutting down");
                break;
            }
        }
        tokio::select! {
            () = wait_for_device(&client) => {}
            _ = tokio::signal::ctrl_c() => {
                info!("interrupt received; shutting down");
                break;
            }
        }
    }
    Ok(())
}

/// Probe until the device answers on its management port again.
async fn wait_for_device(client: &DeviceClient) {
    loop {
        tokio::time::sleep(ONLINE_PROBE_DELAY).await;
        match client.is_online().await {
            Ok(()) => {
                info!("device is back online");
                return;
            }
            Err(e) => debug!(error = %e, "device still unreachable"),
        }
    }
}

/// Parse a `NAME[:DPI[:gray|color]]` destination flag.
fn parse_destination(spec: &str) -> std::result::Result<DestinationSettings, String> {
    let mut parts = spec.split(':');
    let name = parts.next().unwrap_or_default();
    if name.is_empty() {
        return Err("destination name must not be empty".into());
    }
    let resolution = match parts.next() {
        Some(dpi) => dpi
            .parse::<u32>()
            .map_err(|_| format!("invalid resolution {dpi:?}"))?,
        None => 300,
    };
    let color_space = match parts.next() {
        Some("color") => ColorSpace::Color,
        Some("gray") | None => ColorSpace::Gray,
        Some(other) => return Err(format!("invalid colour space {other:?} (gray|color)")),
    };
    if let Some(extra) = parts.next() {
        return Err(format!("unexpected trailing field {extra:?}"));
    }
    Ok(DestinationSettings {
        name: name.to_owned(),
        file_pattern: None,
        ocr: false,
        verso: false,
        resolution,
        color_space,
    })
}
