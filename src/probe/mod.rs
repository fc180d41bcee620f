//! Probe module for reachability checks.
//!
//! A probe is a single bounded-timeout HTTP GET. The client is stateless and
//! shared by the scheduled loops and by manual pings.

mod http;

pub use http::*;

use std::time::Duration;
use thiserror::Error;

/// Probe error types.
///
/// Only used to log why a probe failed; callers of [`ProbeClient::probe`]
/// see a plain success flag.
#[derive(Error, Debug)]
pub enum ProbeError {
    #[error("probe timed out after {0:?}")]
    Timeout(Duration),
    #[error("network error: {0}")]
    Network(String),
    #[error("unexpected status code: {0}")]
    Status(u16),
    #[error("invalid configuration: {0}")]
    Config(String),
}

/// Shared HTTP probe client.
#[derive(Debug, Clone)]
pub struct ProbeClient {
    http: reqwest::Client,
}

impl Default for ProbeClient {
    fn default() -> Self {
        Self::new()
    }
}

impl ProbeClient {
    pub fn new() -> Self {
        Self {
            http: reqwest::Client::new(),
        }
    }

    /// Wrap an already configured reqwest client.
    pub fn with_client(http: reqwest::Client) -> Self {
        Self { http }
    }

    /// Probe `url`, returning the status code on success.
    pub async fn check(&self, url: &str, timeout: Duration) -> Result<u16, ProbeError> {
        run_http_probe(&self.http, url, timeout).await
    }

    /// Probe `url` and classify the result as up or down.
    pub async fn probe(&self, url: &str, timeout: Duration) -> bool {
        match self.check(url, timeout).await {
            Ok(_) => true,
            Err(e) => {
                tracing::debug!("Probe failed for {}: {}", url, e);
                false
            }
        }
    }
}
