//! End-to-end relay tests over loopback TCP

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use framebus::broadcast::Broadcaster;
use framebus::bus::{BusProxy, ProxyConfig, ProxyHandle};
use framebus::client::{Consumer, Producer};
use framebus::feed::{FeedConfig, FrameFeed};
use framebus::protocol::{Action, Frame, FrameCodec};
use futures::StreamExt;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_util::codec::FramedRead;
use tokio_util::sync::CancellationToken;

const WAIT: Duration = Duration::from_secs(5);

async fn start(config: ProxyConfig) -> ProxyHandle {
    BusProxy::start(config).await.unwrap()
}

fn loopback() -> ProxyConfig {
    ProxyConfig::new("127.0.0.1:0", "127.0.0.1:0")
}

async fn attach(proxy: &ProxyHandle) -> (Producer, Consumer) {
    let producer = Producer::connect(proxy.ingress_addr().unwrap()).await.unwrap();
    let consumer = Consumer::connect(proxy.egress_addr().unwrap()).await.unwrap();
    (producer, consumer)
}

/// Poll `check` until it holds or `WAIT` elapses
async fn eventually(mut check: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + WAIT;
    while tokio::time::Instant::now() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    check()
}

#[tokio::test]
async fn test_three_segment_frame_is_byte_identical() {
    let proxy = start(loopback()).await;
    let (mut producer, mut consumer) = attach(&proxy).await;

    consumer.subscribe("processed").await.unwrap();
    let intent = timeout(WAIT, producer.next_intent()).await.unwrap().unwrap();
    assert_eq!(intent.action, Action::Subscribe);

    let payload = Bytes::from((0..=255u8).cycle().take(100_000).collect::<Vec<_>>());
    let sent = Frame::data("processed", r#"{"frame_id":1}"#, payload);
    producer.send(sent.clone()).await.unwrap();

    let received = timeout(WAIT, consumer.recv()).await.unwrap().unwrap().unwrap();
    assert_eq!(received.segments(), sent.segments());

    proxy.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_intent_reaches_producer_unmodified() {
    let proxy = start(loopback()).await;
    let (mut producer, mut consumer) = attach(&proxy).await;
    let raw = TcpStream::connect(proxy.ingress_addr().unwrap()).await.unwrap();
    let mut upstream = FramedRead::new(raw, FrameCodec::new());
    assert!(eventually(|| proxy.stats().producers.get() == 2).await);

    consumer
        .send_raw(Frame::from_segments(vec![Bytes::from_static(b"\x01x")]))
        .await
        .unwrap();

    let received = timeout(WAIT, upstream.next()).await.unwrap().unwrap().unwrap();
    assert_eq!(received.segments(), &[Bytes::from_static(b"\x01x")][..]);

    timeout(WAIT, producer.next_intent()).await.unwrap().unwrap();
    assert!(producer.has_interest(b"xyz").await);

    proxy.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_unmatched_topic_not_delivered() {
    let proxy = start(loopback()).await;
    let (mut producer, mut consumer) = attach(&proxy).await;

    consumer.subscribe("processed").await.unwrap();
    timeout(WAIT, producer.next_intent()).await.unwrap().unwrap();

    producer
        .send(Frame::data("raw", "{}", Bytes::from_static(b"a")))
        .await
        .unwrap();
    producer
        .send(Frame::data("processed", "{}", Bytes::from_static(b"b")))
        .await
        .unwrap();

    let received = timeout(WAIT, consumer.recv()).await.unwrap().unwrap().unwrap();
    assert_eq!(&received.topic().unwrap()[..], b"processed");

    proxy.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_zero_segment_frame_dropped_and_loop_survives() {
    let proxy = start(loopback()).await;
    let (mut producer, mut consumer) = attach(&proxy).await;

    consumer.subscribe("").await.unwrap();
    timeout(WAIT, producer.next_intent()).await.unwrap().unwrap();

    producer.send(Frame::empty()).await.unwrap();
    producer
        .send(Frame::data("after", "{}", Bytes::from_static(b"ok")))
        .await
        .unwrap();

    let received = timeout(WAIT, consumer.recv()).await.unwrap().unwrap().unwrap();
    assert_eq!(&received.topic().unwrap()[..], b"after");

    let stats = Arc::clone(proxy.stats());
    assert!(eventually(|| stats.malformed_frames.get() == 1).await);
    assert!(!proxy.is_finished());

    proxy.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_consumer_disconnect_unsubscribes_upstream() {
    let proxy = start(loopback()).await;
    let (mut producer, mut consumer) = attach(&proxy).await;

    consumer.subscribe("cam").await.unwrap();
    timeout(WAIT, producer.next_intent()).await.unwrap().unwrap();
    assert!(producer.has_interest(b"cam0").await);

    drop(consumer);

    let intent = timeout(WAIT, producer.next_intent()).await.unwrap().unwrap();
    assert_eq!(intent.action, Action::Unsubscribe);
    assert_eq!(&intent.prefix[..], b"cam");
    assert!(!producer.has_interest(b"cam0").await);

    proxy.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_slow_consumer_drops_without_stalling_others() {
    let proxy = start(loopback().send_hwm(2)).await;
    let (mut producer, mut slow) = attach(&proxy).await;
    let mut fast = Consumer::connect(proxy.egress_addr().unwrap()).await.unwrap();

    slow.subscribe("").await.unwrap();
    fast.subscribe("done").await.unwrap();
    for _ in 0..2 {
        timeout(WAIT, producer.next_intent()).await.unwrap().unwrap();
    }

    let chunk = Bytes::from(vec![0u8; 1024 * 1024]);
    for i in 0..64u32 {
        producer
            .send(Frame::data("bulk", i.to_string(), chunk.clone()))
            .await
            .unwrap();
    }
    producer
        .send(Frame::data("done", "{}", Bytes::from_static(b"fin")))
        .await
        .unwrap();

    let received = timeout(WAIT, fast.recv()).await.unwrap().unwrap().unwrap();
    assert_eq!(&received.topic().unwrap()[..], b"done");

    let stats = Arc::clone(proxy.stats());
    assert!(eventually(|| stats.dropped_frames.get() > 0).await);

    drop(slow);
    proxy.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_proxy_feed_broadcaster_pipeline() {
    let proxy = start(loopback()).await;
    let mut producer = Producer::connect(proxy.ingress_addr().unwrap()).await.unwrap();

    let broadcaster = Arc::new(Broadcaster::new());
    let feed = Arc::new(FrameFeed::new(
        FeedConfig::new(proxy.egress_addr().unwrap().to_string(), "processed"),
        Arc::clone(&broadcaster),
    ));
    let shutdown = CancellationToken::new();
    let runner = {
        let feed = Arc::clone(&feed);
        let shutdown = shutdown.clone();
        tokio::spawn(async move { feed.run_until(shutdown).await })
    };
    timeout(WAIT, producer.next_intent()).await.unwrap().unwrap();

    let mut cursor = broadcaster.subscribe();
    for id in 1..=5u64 {
        let meta = format!(r#"{{"frame_id":{},"ts_capture":1.0,"processed":"grayscale"}}"#, id);
        producer
            .send(Frame::data("processed", meta, Bytes::from(vec![id as u8; 16])))
            .await
            .unwrap();
    }

    let mut last = None;
    while last.as_ref().map_or(true, |l: &Arc<framebus::Latest>| l.metadata.frame_id != Some(5)) {
        last = Some(timeout(WAIT, cursor.next()).await.unwrap().unwrap());
    }
    let last = last.unwrap();
    assert_eq!(&last.frame[..], &[5u8; 16][..]);
    assert_eq!(last.metadata.processed.as_deref(), Some("grayscale"));
    assert_eq!(feed.stats().published.get(), 5);

    shutdown.cancel();
    runner.await.unwrap().unwrap();
    proxy.shutdown().await.unwrap();
}
