// End-to-end tests: real TCP servers registered in an in-process ensemble,
// a channel balancing RPCs across them by advertised load.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use roster_client::{ChannelSettings, RosterChannel};
use roster_common::protocol::error::{Result, RosterError};
use roster_server::{RosterServer, RpcService, ServerSettings};
use roster_store::MemoryEnsemble;
use serde_json::{json, Value};

const PATH: &str = "/grpc/balancing_test";

/// Service that reports which server answered.
struct TagService {
    tag: &'static str,
}

#[async_trait]
impl RpcService for TagService {
    fn name(&self) -> &str {
        "Echo"
    }

    async fn call(&self, method: &str, args: Value) -> Result<Value> {
        match method {
            "who" => Ok(json!(self.tag)),
            "echo" => Ok(args),
            other => Err(RosterError::Service(format!("unknown method '{}'", other))),
        }
    }
}

fn init_logging() {
    let _ = tracing_subscriber::fmt().with_env_filter("info").try_init();
}

async fn start_server(ensemble: &MemoryEnsemble, tag: &'static str) -> RosterServer {
    let settings = ServerSettings::new(PATH, "127.0.0.1", 0, Arc::new(ensemble.client()))
        .add_service(Arc::new(TagService { tag }))
        .with_load_update_interval(Duration::from_millis(25));
    RosterServer::start(settings).await.unwrap()
}

async fn open_channel(ensemble: &MemoryEnsemble) -> RosterChannel {
    RosterChannel::of(ChannelSettings::new(PATH, Arc::new(ensemble.client())))
        .await
        .unwrap()
}

/// Time for debounced publications and watch events to propagate.
async fn settle() {
    tokio::time::sleep(Duration::from_millis(250)).await;
}

async fn tally(channel: &RosterChannel, calls: usize) -> HashMap<String, usize> {
    let mut counts = HashMap::new();
    for _ in 0..calls {
        let served_by = channel.call("Echo/who", json!({})).await.unwrap();
        let tag = served_by.as_str().expect("tag is a string").to_string();
        *counts.entry(tag).or_insert(0) += 1;
    }
    counts
}

#[tokio::test]
async fn test_least_busy_server_takes_the_traffic() {
    init_logging();
    let ensemble = MemoryEnsemble::new();
    let s1 = start_server(&ensemble, "s1").await;
    let s2 = start_server(&ensemble, "s2").await;

    s1.assign_load(1);
    s2.assign_load(5);
    settle().await;

    let channel = open_channel(&ensemble).await;
    settle().await;

    let counts = tally(&channel, 100).await;
    assert!(
        counts.get("s1").copied().unwrap_or(0) >= 95,
        "expected s1 to serve at least 95 of 100, got {:?}",
        counts
    );

    channel.shutdown().await;
    s1.shutdown().await;
    s2.shutdown().await;
}

#[tokio::test]
async fn test_late_joiner_at_zero_load_absorbs_traffic() {
    init_logging();
    let ensemble = MemoryEnsemble::new();
    let s1 = start_server(&ensemble, "s1").await;
    let s2 = start_server(&ensemble, "s2").await;
    s1.assign_load(5);
    s2.assign_load(9);
    settle().await;

    let channel = open_channel(&ensemble).await;
    settle().await;
    // Warm traffic against the loaded pair.
    tally(&channel, 50).await;

    let s3 = start_server(&ensemble, "s3").await;
    settle().await;

    let counts = tally(&channel, 300).await;
    assert!(
        counts.get("s3").copied().unwrap_or(0) >= 240,
        "expected the idle joiner to serve at least 80%, got {:?}",
        counts
    );

    channel.shutdown().await;
    for server in [s1, s2, s3] {
        server.shutdown().await;
    }
}

#[tokio::test]
async fn test_quarantine_hides_host_until_released() {
    init_logging();
    let ensemble = MemoryEnsemble::new();
    let s1 = start_server(&ensemble, "s1").await;
    let s2 = start_server(&ensemble, "s2").await;
    let s3 = start_server(&ensemble, "s3").await;
    s1.assign_load(5);
    s2.assign_load(9);
    settle().await;

    let channel = open_channel(&ensemble).await;
    settle().await;

    // Steady state: s3 at load 0 takes everything.
    let counts = tally(&channel, 100).await;
    assert!(counts.get("s3").copied().unwrap_or(0) >= 80, "{:?}", counts);

    s3.enter_quarantine().await.unwrap();
    settle().await;

    let counts = tally(&channel, 200).await;
    assert_eq!(
        counts.get("s3").copied().unwrap_or(0),
        0,
        "quarantined host served traffic: {:?}",
        counts
    );

    s3.exit_quarantine().await.unwrap();
    settle().await;

    let counts = tally(&channel, 200).await;
    assert!(
        counts.get("s3").copied().unwrap_or(0) >= 160,
        "released host did not resume serving: {:?}",
        counts
    );

    channel.shutdown().await;
    for server in [s1, s2, s3] {
        server.shutdown().await;
    }
}

#[tokio::test]
async fn test_server_shutdown_drains_its_membership() {
    init_logging();
    let ensemble = MemoryEnsemble::new();
    let s1 = start_server(&ensemble, "s1").await;
    let s2 = start_server(&ensemble, "s2").await;

    let channel = open_channel(&ensemble).await;
    settle().await;

    s2.shutdown().await;
    settle().await;

    let counts = tally(&channel, 50).await;
    assert_eq!(counts.get("s2"), None, "{:?}", counts);
    assert_eq!(counts.get("s1").copied().unwrap_or(0), 50);

    channel.shutdown().await;
    s1.shutdown().await;
}

#[tokio::test]
async fn test_empty_pool_fails_fast_with_no_ready_endpoint() {
    init_logging();
    let ensemble = MemoryEnsemble::new();
    let channel = open_channel(&ensemble).await;
    settle().await;

    let err = channel.call("Echo/who", json!({})).await.unwrap_err();
    assert!(matches!(err, RosterError::NoReadyEndpoint));

    channel.shutdown().await;
}

#[tokio::test]
async fn test_max_message_size_boundary() {
    init_logging();
    let ensemble = MemoryEnsemble::new();
    let settings = ServerSettings::new(PATH, "127.0.0.1", 0, Arc::new(ensemble.client()))
        .add_service(Arc::new(TagService { tag: "s1" }))
        .with_load_update_interval(Duration::from_millis(25))
        .with_max_message_size(10_000_000);
    let server = RosterServer::start(settings).await.unwrap();

    let payload = json!({"blob": "x".repeat(8 * 1_000_000)});

    // A channel raised to 10 MB round-trips the 8 MB payload.
    let roomy = RosterChannel::of(
        ChannelSettings::new(PATH, Arc::new(ensemble.client())).with_max_message_size(10_000_000),
    )
    .await
    .unwrap();
    settle().await;
    let echoed = roomy.call("Echo/echo", payload.clone()).await.unwrap();
    assert_eq!(echoed, payload);
    roomy.shutdown().await;

    // The default 4 MiB limit rejects it with a size-limit error.
    let strict = open_channel(&ensemble).await;
    settle().await;
    let err = strict.call("Echo/echo", payload).await.unwrap_err();
    assert!(matches!(err, RosterError::MessageTooLarge { .. }), "{}", err);
    strict.shutdown().await;

    server.shutdown().await;
}

#[tokio::test]
async fn test_channel_shutdown_stops_owned_store_client() {
    init_logging();
    let ensemble = MemoryEnsemble::new();
    let server = start_server(&ensemble, "s1").await;

    let store_client = ensemble.client();
    let channel = RosterChannel::of(
        ChannelSettings::new(PATH, Arc::new(store_client.clone())).with_owned_store(),
    )
    .await
    .unwrap();
    settle().await;

    channel.call("Echo/who", json!({})).await.unwrap();
    channel.shutdown().await;

    assert!(store_client.is_stopped());
    server.shutdown().await;
}

#[tokio::test]
async fn test_ties_spread_across_equally_loaded_servers() {
    init_logging();
    let ensemble = MemoryEnsemble::new();
    let s1 = start_server(&ensemble, "s1").await;
    let s2 = start_server(&ensemble, "s2").await;

    // Both stay at their registration load of 0.
    let channel = open_channel(&ensemble).await;
    settle().await;

    let counts = tally(&channel, 40).await;
    assert!(counts.get("s1").copied().unwrap_or(0) >= 10, "{:?}", counts);
    assert!(counts.get("s2").copied().unwrap_or(0) >= 10, "{:?}", counts);

    channel.shutdown().await;
    s1.shutdown().await;
    s2.shutdown().await;
}
