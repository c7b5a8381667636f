//! WHEP signaling client against a mock endpoint

mod support;

use camlink_media::{Error, HandshakeConfig, WhepClient};
use std::time::Duration;
use support::MockDeviceBuilder;

const OFFER: &str = "v=0\r\no=- 1 1 IN IP4 0.0.0.0\r\ns=-\r\nt=0 0\r\n";

#[tokio::test]
async fn negotiate_returns_answer_body() {
    let answer = "v=0\r\no=- 2 2 IN IP4 10.0.0.1\r\ns=answer\r\nt=0 0\r\n";
    let device = MockDeviceBuilder::new()
        .whep_status(201)
        .whep_body(answer)
        .start()
        .await;

    let client = WhepClient::new(&HandshakeConfig::default()).unwrap();
    let endpoint = WhepClient::endpoint_url(&device.base_url, "cam0");

    let got = client.negotiate(&endpoint, OFFER).await.unwrap();
    assert_eq!(got, answer);
    assert_eq!(device.whep_posts(), 1);
}

#[tokio::test]
async fn negotiate_accepts_plain_200() {
    let device = MockDeviceBuilder::new().whep_status(200).start().await;

    let client = WhepClient::new(&HandshakeConfig::default()).unwrap();
    let endpoint = WhepClient::endpoint_url(&device.base_url, "cam0");
    assert!(client.negotiate(&endpoint, OFFER).await.is_ok());
}

#[tokio::test]
async fn negotiate_rejects_error_status() {
    let device = MockDeviceBuilder::new().whep_status(404).start().await;

    let client = WhepClient::new(&HandshakeConfig::default()).unwrap();
    let endpoint = WhepClient::endpoint_url(&device.base_url, "cam0");

    let err = client.negotiate(&endpoint, OFFER).await.unwrap_err();
    assert!(matches!(err, Error::HandshakeStatus(404)));
    assert!(err.is_retryable());
}

#[tokio::test]
async fn negotiate_rejects_empty_answer() {
    let device = MockDeviceBuilder::new()
        .whep_status(201)
        .whep_body("")
        .start()
        .await;

    let client = WhepClient::new(&HandshakeConfig::default()).unwrap();
    let endpoint = WhepClient::endpoint_url(&device.base_url, "cam0");

    let err = client.negotiate(&endpoint, OFFER).await.unwrap_err();
    assert!(matches!(err, Error::Handshake(_)));
}

#[tokio::test]
async fn negotiate_times_out_on_slow_endpoint() {
    let device = MockDeviceBuilder::new()
        .whep_delay(Duration::from_millis(800))
        .start()
        .await;

    let config = HandshakeConfig {
        fetch_timeout_ms: 150,
        ..Default::default()
    };
    let client = WhepClient::new(&config).unwrap();
    let endpoint = WhepClient::endpoint_url(&device.base_url, "cam0");

    let err = client.negotiate(&endpoint, OFFER).await.unwrap_err();
    assert!(matches!(err, Error::Timeout(_)));
    assert!(err.is_retryable());
}
