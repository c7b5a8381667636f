//! Path prober behavior against live mock endpoints

mod support;

use camlink_media::{EndpointConfig, MediaClientConfig, PathKind, PathProber};
use std::sync::Arc;
use std::time::Duration;
use support::MockDeviceBuilder;

fn config_with(endpoints: EndpointConfig) -> Arc<MediaClientConfig> {
    Arc::new(MediaClientConfig {
        endpoints,
        ..Default::default()
    })
}

#[tokio::test]
async fn direct_wins_even_when_relay_answers_faster() {
    // The direct device answers its probe slowly; the relay is instant.
    // Selection must still prefer the direct path.
    let direct = MockDeviceBuilder::new()
        .probe_delay(Duration::from_millis(150))
        .start()
        .await;
    let relay = MockDeviceBuilder::new().start().await;

    let prober = PathProber::new(config_with(EndpointConfig {
        direct: Some(direct.base_url.clone()),
        relay: Some(relay.base_url.clone()),
        ..Default::default()
    }))
    .unwrap();

    let selected = prober.select().await.unwrap();
    assert_eq!(selected.path, PathKind::Direct);
    assert_eq!(selected.base_url, direct.base_url);
}

#[tokio::test]
async fn probes_run_in_parallel() {
    let direct = MockDeviceBuilder::new()
        .probe_delay(Duration::from_millis(200))
        .start()
        .await;
    let mesh = MockDeviceBuilder::new()
        .probe_delay(Duration::from_millis(200))
        .start()
        .await;

    let prober = PathProber::new(config_with(EndpointConfig {
        direct: Some(direct.base_url.clone()),
        vpn_mesh: Some(mesh.base_url.clone()),
        ..Default::default()
    }))
    .unwrap();

    let started = std::time::Instant::now();
    let results = prober.probe().await;
    let elapsed = started.elapsed();

    assert_eq!(results.len(), 2);
    assert!(results.iter().all(|r| r.success));
    // Sequential probes would take at least 400ms
    assert!(
        elapsed < Duration::from_millis(390),
        "probes took {:?}, expected parallel execution",
        elapsed
    );
}

#[tokio::test]
async fn failed_round_retains_known_good_direct_path() {
    let direct = MockDeviceBuilder::new().start().await;

    let prober = PathProber::new(config_with(EndpointConfig {
        direct: Some(direct.base_url.clone()),
        ..Default::default()
    }))
    .unwrap();

    let first = prober.select().await.unwrap();
    assert_eq!(first.path, PathKind::Direct);

    // The device goes away; the next round fails entirely but the prober
    // must keep the previously-known-good base URL
    direct.stop();
    tokio::time::sleep(Duration::from_millis(50)).await;

    let second = prober.select().await.unwrap();
    assert_eq!(second.path, PathKind::Direct);
    assert_eq!(second.base_url, direct.base_url);
}

#[tokio::test]
async fn unreachable_direct_falls_through_to_relay() {
    let relay = MockDeviceBuilder::new().start().await;

    let prober = PathProber::new(config_with(EndpointConfig {
        // Nothing listens here; connection is refused immediately
        direct: Some("http://127.0.0.1:9".to_string()),
        relay: Some(relay.base_url.clone()),
        ..Default::default()
    }))
    .unwrap();

    let selected = prober.select().await.unwrap();
    assert_eq!(selected.path, PathKind::Relay);
}

#[tokio::test]
async fn no_path_and_no_history_is_an_error() {
    let prober = PathProber::new(config_with(EndpointConfig {
        direct: Some("http://127.0.0.1:9".to_string()),
        ..Default::default()
    }))
    .unwrap();

    assert!(prober.select().await.is_err());
    assert!(prober.last_good().await.is_none());
}
