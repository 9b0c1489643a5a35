//! Synthetic frame source
//!
//! Publishes small SVG frames showing a counter and timestamp, so the whole
//! pipeline can be watched in a browser without a camera:
//!
//!   cargo run --example broker
//!   FRAME_CONTENT_TYPE=image/svg+xml BROKER_HOST=127.0.0.1 cargo run --example web_server
//!   BROKER_HOST=127.0.0.1 cargo run --example test_source

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use clap::Parser;
use framebus::broadcast::FrameMetadata;
use framebus::client::Producer;
use framebus::protocol::constants::DEFAULT_INGRESS_PORT;
use framebus::protocol::Frame;

#[derive(Debug, Parser)]
#[command(name = "test_source", about = "Publish synthetic SVG frames to the bus")]
struct Cli {
    /// Proxy host
    #[arg(long, env = "BROKER_HOST", default_value = "broker")]
    broker_host: String,

    /// Proxy producer port
    #[arg(
        long,
        env = "PUB_PORT",
        default_value_t = DEFAULT_INGRESS_PORT,
        value_parser = clap::value_parser!(u16).range(1..)
    )]
    pub_port: u16,

    /// Topic to publish on
    #[arg(long, env = "PUB_TOPIC", default_value = "processed")]
    pub_topic: String,

    /// Frames per second
    #[arg(
        long,
        env = "FPS",
        default_value_t = 10,
        value_parser = clap::value_parser!(u64).range(1..=1000)
    )]
    fps: u64,
}

const WIDTH: u32 = 320;
const HEIGHT: u32 = 180;

fn render(frame_id: u64) -> Bytes {
    let hue = (frame_id * 7) % 360;
    Bytes::from(format!(
        r#"<svg xmlns="http://www.w3.org/2000/svg" width="{w}" height="{h}"><rect width="100%" height="100%" fill="hsl({hue},60%,35%)"/><text x="16" y="{y}" font-family="monospace" font-size="32" fill="white">frame {id}</text></svg>"#,
        w = WIDTH,
        h = HEIGHT,
        hue = hue,
        y = HEIGHT / 2,
        id = frame_id,
    ))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("framebus=info".parse()?)
                .add_directive("test_source=info".parse()?),
        )
        .init();

    let cli = Cli::parse();
    let topic = cli.pub_topic;
    let fps = cli.fps;

    let endpoint = format!("{}:{}", cli.broker_host, cli.pub_port);
    let mut producer = Producer::connect(endpoint.as_str()).await?;
    tracing::info!(endpoint = %endpoint, topic = %topic, fps, "Publishing");

    let mut ticker = tokio::time::interval(Duration::from_millis(1000 / fps));
    let mut frame_id = 0u64;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let ts = SystemTime::now().duration_since(UNIX_EPOCH)?.as_secs_f64();
                let metadata = FrameMetadata {
                    frame_id: Some(frame_id),
                    ts_capture: Some(ts),
                    ts_processed: Some(ts),
                    w: Some(WIDTH),
                    h: Some(HEIGHT),
                    encoding: Some("svg".into()),
                    ..Default::default()
                };
                let frame = Frame::data(topic.clone(), metadata.to_json()?, render(frame_id));
                producer.send(frame).await?;
                frame_id += 1;
            }
            intent = producer.next_intent() => {
                let Some(intent) = intent else {
                    tracing::warn!("Proxy closed the connection");
                    return Ok(());
                };
                tracing::info!(
                    action = intent.action.as_str(),
                    prefix = %intent.prefix_lossy(),
                    interested = producer.has_interest(topic.as_bytes()).await,
                    "Subscription changed"
                );
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!(frames = frame_id, "Stopping");
                return Ok(());
            }
        }
    }
}
