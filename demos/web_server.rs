//! MJPEG web server fed from the bus
//!
//! Run with: cargo run --example web_server
//!
//! Options fall back to BROKER_HOST, SUB_PORT, SUB_TOPIC, HTTP_HOST,
//! HTTP_PORT and FRAME_CONTENT_TYPE, see `--help`.
//!
//! Then open http://localhost:8000/ or point an <img> at /stream.mjpg.

use std::sync::Arc;

use clap::Parser;
use framebus::broadcast::Broadcaster;
use framebus::feed::{FeedArgs, FeedConfig, FrameFeed};
use framebus::http::{self, AppState, HttpArgs, HttpConfig};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Parser)]
#[command(name = "web_server", about = "MJPEG web server fed from the frame bus")]
struct Cli {
    #[command(flatten)]
    feed: FeedArgs,

    #[command(flatten)]
    http: HttpArgs,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("framebus=info".parse()?)
                .add_directive("web_server=info".parse()?),
        )
        .init();

    let cli = Cli::parse();
    let feed_config = FeedConfig::from(cli.feed);
    let http_config = HttpConfig::from(cli.http);

    let broadcaster = Arc::new(Broadcaster::new());
    let state = AppState::new(Arc::clone(&broadcaster), &http_config)?;
    let shutdown = CancellationToken::new();

    let feed = FrameFeed::new(feed_config, broadcaster);
    let feed_task = {
        let shutdown = shutdown.clone();
        tokio::spawn(async move { feed.run_until(shutdown).await })
    };

    let listener = TcpListener::bind(&http_config.bind_addr).await?;
    tracing::info!(addr = %listener.local_addr()?, "Open /stream.mjpg to watch");

    let server = tokio::spawn(http::serve(listener, state, shutdown.clone()));

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutting down");
    shutdown.cancel();

    server.await??;
    feed_task.await??;
    Ok(())
}
