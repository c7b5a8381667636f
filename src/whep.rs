//! WHEP signaling client
//!
//! WHEP exchanges a single offer/answer pair over plain HTTP: the client
//! POSTs its SDP offer to `<base>/<stream>/whep` and the device answers
//! with the remote description in the response body. There is no trickle
//! stage here; the offer already carries the gathered candidates.

use crate::config::HandshakeConfig;
use crate::{Error, Result};
use tracing::{debug, warn};

const SDP_CONTENT_TYPE: &str = "application/sdp";

/// HTTP client for the WHEP offer/answer exchange
#[derive(Clone)]
pub struct WhepClient {
    http: reqwest::Client,
}

impl WhepClient {
    /// Create a client whose requests are bounded by the handshake fetch
    /// timeout
    pub fn new(handshake: &HandshakeConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(handshake.fetch_timeout())
            .build()
            .map_err(Error::Http)?;

        Ok(Self { http })
    }

    /// WHEP endpoint URL for a stream id
    pub fn endpoint_url(base: &str, stream_id: &str) -> String {
        format!("{}/{}/whep", base.trim_end_matches('/'), stream_id)
    }

    /// HTTP-streaming playlist URL for the same stream id
    pub fn playlist_url(base: &str, stream_id: &str) -> String {
        format!("{}/{}/index.m3u8", base.trim_end_matches('/'), stream_id)
    }

    /// Send an SDP offer and return the answering SDP
    ///
    /// Any status other than `200`/`201` is a handshake failure; the
    /// reconnect machinery decides what to do with it.
    pub async fn negotiate(&self, endpoint: &str, offer_sdp: &str) -> Result<String> {
        debug!("sending WHEP offer to {}", endpoint);

        let response = self
            .http
            .post(endpoint)
            .header(reqwest::header::CONTENT_TYPE, SDP_CONTENT_TYPE)
            .body(offer_sdp.to_string())
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    Error::Timeout(format!("WHEP offer to {} timed out", endpoint))
                } else {
                    Error::Http(e)
                }
            })?;

        let status = response.status();
        if status.as_u16() != 200 && status.as_u16() != 201 {
            warn!("WHEP endpoint {} rejected offer: {}", endpoint, status);
            return Err(Error::HandshakeStatus(status.as_u16()));
        }

        let answer = response.text().await.map_err(Error::Http)?;
        if answer.trim().is_empty() {
            return Err(Error::Handshake(format!(
                "WHEP endpoint {} returned an empty answer",
                endpoint
            )));
        }

        debug!("received WHEP answer from {} ({} bytes)", endpoint, answer.len());
        Ok(answer)
    }
}
