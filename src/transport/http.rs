//! HTTP peer client

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::{Client, StatusCode};
use tracing::{debug, instrument, warn};

use super::{peer_path, ErrorCode, PeerTransport, TransportConfig, ERROR_HEADER, OWNER_HEADER};
use crate::cluster::Peer;
use crate::error::{Error, Result};

/// [`PeerTransport`] over a pooled reqwest client
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
    fetch_timeout_ms: u64,
}

impl HttpTransport {
    /// Create a new HTTP transport
    pub fn new(config: &TransportConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.fetch_timeout)
            .pool_idle_timeout(config.pool_idle_timeout)
            .build()
            .map_err(|e| Error::Internal(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            fetch_timeout_ms: config.fetch_timeout.as_millis() as u64,
        })
    }

    fn url(peer: &Peer, group: &str, key: &str) -> String {
        format!("http://{}{}", peer, peer_path(group, key))
    }

    fn request_error(&self, peer: &Peer, e: reqwest::Error) -> Error {
        if e.is_timeout() {
            Error::Timeout {
                peer: peer.to_string(),
                timeout_ms: self.fetch_timeout_ms,
            }
        } else {
            Error::Transport {
                peer: peer.to_string(),
                reason: e.to_string(),
            }
        }
    }

    /// Turn a non-2xx response into the error the peer reported
    async fn response_error(
        peer: &Peer,
        group: &str,
        key: &str,
        response: reqwest::Response,
    ) -> Error {
        let status = response.status();
        let header = |name: &str| {
            response
                .headers()
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
        };
        let code = header(ERROR_HEADER).and_then(|c| ErrorCode::parse(&c));
        let owner = header(OWNER_HEADER);
        let message = response.text().await.unwrap_or_default();

        match code {
            Some(code) => code.into_error(peer, group, key, owner, message),
            None => Error::Transport {
                peer: peer.to_string(),
                reason: format!("unexpected status {}", status),
            },
        }
    }
}

#[async_trait]
impl PeerTransport for HttpTransport {
    #[instrument(skip(self), fields(peer = %peer))]
    async fn fetch(&self, peer: &Peer, group: &str, key: &str) -> Result<Bytes> {
        let response = self
            .client
            .get(Self::url(peer, group, key))
            .send()
            .await
            .map_err(|e| self.request_error(peer, e))?;

        if response.status() != StatusCode::OK {
            let err = Self::response_error(peer, group, key, response).await;
            debug!("Peer fetch failed: {}", err);
            return Err(err);
        }

        response.bytes().await.map_err(|e| self.request_error(peer, e))
    }

    #[instrument(skip(self), fields(peer = %peer))]
    async fn remove(&self, peer: &Peer, group: &str, key: &str) -> Result<()> {
        let response = self
            .client
            .delete(Self::url(peer, group, key))
            .send()
            .await
            .map_err(|e| self.request_error(peer, e))?;

        if response.status().is_success() {
            return Ok(());
        }

        let err = Self::response_error(peer, group, key, response).await;
        warn!("Peer removal rejected: {}", err);
        Err(err)
    }
}

// =============================================================================
// Tests
// =============================================================================
