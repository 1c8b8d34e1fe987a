//! HTTP probe implementation.

use super::{ProbeError, ProbeResult};
use crate::db::Checkpoint;

use std::error::Error as StdError;
use std::time::{Duration, Instant};

/// HTTP prober. Any completed response counts as reachable.
#[derive(Clone)]
pub struct HttpProber {
    client: reqwest::Client,
}

impl HttpProber {
    pub fn new() -> Result<Self, ProbeError> {
        // A redirect is already an answer from the device, so never follow it.
        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| ProbeError::Config(e.to_string()))?;

        Ok(Self { client })
    }

    /// Probe one checkpoint and classify the outcome.
    pub async fn probe(&self, checkpoint: &Checkpoint, timeout: Duration) -> ProbeResult {
        match run_http_probe(&self.client, &checkpoint.address, timeout).await {
            Ok((latency, status)) => ProbeResult::reachable(checkpoint, latency, status),
            Err(e) => {
                tracing::debug!("Probe failed for {}: {}", checkpoint.name, e);
                ProbeResult::unreachable(checkpoint, e.reason())
            }
        }
    }
}

/// Run an HTTP probe against the given address.
///
/// Returns the time to the response headers and the status code.
pub async fn run_http_probe(
    client: &reqwest::Client,
    address: &str,
    timeout: Duration,
) -> Result<(Duration, u16), ProbeError> {
    let url = probe_url(address);
    let start = Instant::now();

    // The client timeout covers the request; the outer one also bounds name
    // resolution stalls inside the connector.
    let request = client.get(&url).timeout(timeout).send();
    let response = tokio::time::timeout(timeout, request)
        .await
        .map_err(|_| ProbeError::Timeout(timeout))?
        .map_err(|e| classify_error(&e, timeout))?;

    Ok((start.elapsed(), response.status().as_u16()))
}

/// Normalize a checkpoint address into a URL.
pub fn probe_url(address: &str) -> String {
    let address = address.trim();
    if address.starts_with("http://") || address.starts_with("https://") {
        address.to_string()
    } else {
        format!("http://{}", address)
    }
}

fn classify_error(err: &reqwest::Error, timeout: Duration) -> ProbeError {
    if err.is_timeout() {
        return ProbeError::Timeout(timeout);
    }

    let mut chain = err.to_string();
    let mut refused = false;
    let mut source = err.source();
    while let Some(cause) = source {
        if let Some(io) = cause.downcast_ref::<std::io::Error>() {
            match io.kind() {
                std::io::ErrorKind::ConnectionRefused => refused = true,
                std::io::ErrorKind::TimedOut => return ProbeError::Timeout(timeout),
                _ => {}
            }
        }
        chain.push_str(": ");
        chain.push_str(&cause.to_string());
        source = cause.source();
    }

    let lower = chain.to_lowercase();
    if refused || lower.contains("connection refused") {
        ProbeError::ConnectionRefused
    } else if lower.contains("dns error")
        || lower.contains("failed to lookup address")
        || lower.contains("name or service not known")
    {
        ProbeError::Dns(chain)
    } else if lower.contains("certificate") || lower.contains("tls") || lower.contains("ssl") {
        ProbeError::Tls(chain)
    } else if err.is_builder() {
        ProbeError::Config(chain)
    } else if err.is_connect() {
        ProbeError::Connect(chain)
    } else {
        ProbeError::Request(chain)
    }
}
