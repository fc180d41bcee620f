//! HTTP probe implementation.

use std::time::Duration;
use super::ProbeError;

/// Returns true when `status` counts as the target being up.
pub fn is_up_status(status: u16) -> bool {
    (200..400).contains(&status)
}

/// Parse `address` as an absolute http/https URL.
pub fn parse_probe_url(address: &str) -> Result<reqwest::Url, ProbeError> {
    let url = reqwest::Url::parse(address.trim())
        .map_err(|e| ProbeError::Config(format!("invalid url {:?}: {}", address, e)))?;

    match url.scheme() {
        "http" | "https" => Ok(url),
        other => Err(ProbeError::Config(format!("unsupported scheme: {}", other))),
    }
}

/// Run an HTTP probe against the given address.
///
/// Only the status line and headers are awaited; the body is never read.
/// Returns the status code when it falls in [200, 400).
pub async fn run_http_probe(
    client: &reqwest::Client,
    address: &str,
    timeout: Duration,
) -> Result<u16, ProbeError> {
    let url = parse_probe_url(address)?;

    let response = client
        .get(url)
        .timeout(timeout)
        .send()
        .await
        .map_err(|e| {
            if e.is_timeout() {
                ProbeError::Timeout(timeout)
            } else {
                ProbeError::Network(e.to_string())
            }
        })?;

    let status = response.status().as_u16();
    if is_up_status(status) {
        Ok(status)
    } else {
        Err(ProbeError::Status(status))
    }
}
