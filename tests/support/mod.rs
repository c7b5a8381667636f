//! In-process mock appliance for integration tests
//!
//! Serves the three endpoints the connection layer talks to: an OPTIONS
//! probe on the base URL, `GET /health`, and the WHEP offer endpoint.

#![allow(dead_code)]

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, options, post};
use axum::Router;
use std::future::IntoFuture;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

pub struct DeviceState {
    pub whep_posts: AtomicUsize,
    pub probe_hits: AtomicUsize,
    whep_status: u16,
    whep_body: String,
    whep_delay: Duration,
    probe_delay: Duration,
}

pub struct MockDevice {
    pub base_url: String,
    pub state: Arc<DeviceState>,
    server: tokio::task::JoinHandle<()>,
}

pub struct MockDeviceBuilder {
    whep_status: u16,
    whep_body: String,
    whep_delay: Duration,
    probe_delay: Duration,
}

impl MockDeviceBuilder {
    pub fn new() -> Self {
        Self {
            whep_status: 201,
            whep_body: "v=0\r\no=- 0 0 IN IP4 127.0.0.1\r\ns=-\r\nt=0 0\r\n".to_string(),
            whep_delay: Duration::ZERO,
            probe_delay: Duration::ZERO,
        }
    }

    pub fn whep_status(mut self, status: u16) -> Self {
        self.whep_status = status;
        self
    }

    pub fn whep_body(mut self, body: &str) -> Self {
        self.whep_body = body.to_string();
        self
    }

    pub fn whep_delay(mut self, delay: Duration) -> Self {
        self.whep_delay = delay;
        self
    }

    pub fn probe_delay(mut self, delay: Duration) -> Self {
        self.probe_delay = delay;
        self
    }

    pub async fn start(self) -> MockDevice {
        let state = Arc::new(DeviceState {
            whep_posts: AtomicUsize::new(0),
            probe_hits: AtomicUsize::new(0),
            whep_status: self.whep_status,
            whep_body: self.whep_body,
            whep_delay: self.whep_delay,
            probe_delay: self.probe_delay,
        });

        let app = Router::new()
            .route("/", options(probe))
            .route("/health", get(health))
            .route("/:stream/whep", post(whep))
            .with_state(Arc::clone(&state));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind mock device");
        let addr = listener.local_addr().expect("mock device addr");

        let server = tokio::spawn(async move {
            let _ = axum::serve(listener, app).into_future().await;
        });

        MockDevice {
            base_url: format!("http://{}", addr),
            state,
            server,
        }
    }
}

impl MockDevice {
    pub fn whep_posts(&self) -> usize {
        self.state.whep_posts.load(Ordering::SeqCst)
    }

    pub fn probe_hits(&self) -> usize {
        self.state.probe_hits.load(Ordering::SeqCst)
    }

    /// Stop serving; subsequent requests are refused
    pub fn stop(&self) {
        self.server.abort();
    }
}

impl Drop for MockDevice {
    fn drop(&mut self) {
        self.server.abort();
    }
}

async fn probe(State(state): State<Arc<DeviceState>>) -> StatusCode {
    state.probe_hits.fetch_add(1, Ordering::SeqCst);
    tokio::time::sleep(state.probe_delay).await;
    StatusCode::NO_CONTENT
}

async fn health() -> StatusCode {
    StatusCode::OK
}

async fn whep(
    State(state): State<Arc<DeviceState>>,
    Path(_stream): Path<String>,
) -> (StatusCode, String) {
    state.whep_posts.fetch_add(1, Ordering::SeqCst);
    tokio::time::sleep(state.whep_delay).await;
    (
        StatusCode::from_u16(state.whep_status).expect("valid status"),
        state.whep_body.clone(),
    )
}
