//! Camlink path diagnostic
//!
//! Probes the configured candidate paths to the appliance, prints which
//! one would carry media, and optionally warms up a set of streams
//! through the registry to verify the full WHEP handshake end to end.

use camlink_media::{
    EndpointConfig, MediaClientConfig, ProbeStyle, StreamRegistry,
};
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "camlink-pathcheck")]
#[command(about = "Probe appliance paths and optionally warm up streams")]
struct Args {
    /// Direct device base URL (e.g. http://192.168.8.10:8889)
    #[arg(long, env = "CAMLINK_DIRECT_URL")]
    direct: Option<String>,

    /// VPN-mesh base URL (e.g. http://100.74.21.5:8889)
    #[arg(long, env = "CAMLINK_MESH_URL")]
    mesh: Option<String>,

    /// Relay/tunnel base URL (e.g. https://cam.example.com)
    #[arg(long, env = "CAMLINK_RELAY_URL")]
    relay: Option<String>,

    /// Probe GET /health instead of OPTIONS on the base URL
    #[arg(long)]
    health_probe: bool,

    /// Stream ids to warm up after probing (repeatable)
    #[arg(long = "stream")]
    streams: Vec<String>,

    /// Load streams one at a time even on a good path
    #[arg(long)]
    sequential: bool,

    /// Print the probe report as JSON
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    let mut config = MediaClientConfig {
        endpoints: EndpointConfig {
            direct: args.direct,
            vpn_mesh: args.mesh,
            relay: args.relay,
            fallback_base: None,
        },
        ..Default::default()
    };
    if args.health_probe {
        config.probe.style = ProbeStyle::Health;
    }
    config.loader.force_sequential = args.sequential;

    let registry = StreamRegistry::new(config)?;

    let results = registry.prober().probe().await;
    if args.json {
        let rows: Vec<serde_json::Value> = results
            .iter()
            .map(|r| {
                serde_json::json!({
                    "path": r.path.to_string(),
                    "base_url": r.base_url,
                    "latency_ms": r.latency.as_millis(),
                    "success": r.success,
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&rows)?);
    } else {
        for r in &results {
            println!(
                "{:<12} {:<40} {:>6}ms  {}",
                r.path.to_string(),
                r.base_url,
                r.latency.as_millis(),
                if r.success { "reachable" } else { "unreachable" }
            );
        }
    }

    match registry.prober().select().await {
        Ok(selected) => info!("selected {} path: {}", selected.path, selected.base_url),
        Err(e) => {
            eprintln!("no usable path: {}", e);
            std::process::exit(1);
        }
    }

    if !args.streams.is_empty() {
        let report = registry.preload(&args.streams).await;
        for outcome in &report.outcomes {
            println!(
                "{:<12} {}",
                outcome.id,
                if outcome.ready {
                    format!("ready ({})", outcome.state)
                } else {
                    format!("not ready ({})", outcome.state)
                }
            );
        }
        for outcome in &report.outcomes {
            registry.release(&outcome.id).await;
        }
        if !report.all_ready() {
            std::process::exit(2);
        }
    }

    Ok(())
}
