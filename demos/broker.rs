//! Bus proxy
//!
//! Run with: cargo run --example broker
//!
//! Every option can also be set from the environment, see `--help`:
//! BROKER_BIND_HOST, PUB_PORT, SUB_PORT, XPUB_VERBOSE, SEND_HWM and
//! STATS_INTERVAL.

use std::time::Duration;

use clap::Parser;
use framebus::bus::{BusProxy, ProxyArgs, ProxyConfig};

#[derive(Debug, Parser)]
#[command(name = "broker", about = "Topic-filtered frame bus proxy")]
struct Cli {
    #[command(flatten)]
    proxy: ProxyArgs,

    /// Seconds between stats lines, 0 disables
    #[arg(long, env = "STATS_INTERVAL", default_value_t = 10)]
    stats_interval: u64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("framebus=info".parse()?)
                .add_directive("broker=info".parse()?),
        )
        .init();

    let cli = Cli::parse();
    let stats_interval = cli.stats_interval;
    let config = ProxyConfig::from(cli.proxy);

    let proxy = BusProxy::bind(config).await?;
    tracing::info!(
        ingress = %proxy.ingress_addr()?,
        egress = %proxy.egress_addr()?,
        "Broker ready"
    );

    let stats = proxy.stats().clone();
    if stats_interval > 0 {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(stats_interval));
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let s = stats.snapshot();
                tracing::info!(
                    producers = s.producers,
                    consumers = s.consumers,
                    frames_in = s.frames_in,
                    frames_out = s.frames_out,
                    dropped = s.dropped_frames,
                    malformed = s.malformed_frames,
                    forward_mean_us = s.frame_forward_latency.mean().as_micros() as u64,
                    "Broker stats"
                );
            }
        });
    }

    proxy
        .run_until(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;

    tracing::info!("Broker stopped");
    Ok(())
}
