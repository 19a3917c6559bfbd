//! HTTP plumbing shared by the adapters

use std::time::Duration;

use reqwest::{Client as HttpClient, RequestBuilder};
use serde::de::DeserializeOwned;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::{Error, ProviderError, Result};

/// Upper bound on establishing a connection.
///
/// The overall deadline belongs to the router's per-attempt timeout.
const CONNECT_TIMEOUT_SECS: u64 = 10;

pub(crate) fn http_client() -> Result<HttpClient> {
    HttpClient::builder()
        .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
        .build()
        .map_err(Error::Network)
}

/// Send a request and decode a JSON body, classifying every failure.
///
/// Dropping the exchange on cancellation aborts the underlying connection.
pub(crate) async fn send_json<T: DeserializeOwned>(
    request: RequestBuilder,
    cancel: &CancellationToken,
) -> std::result::Result<T, ProviderError> {
    let exchange = async {
        let response = request
            .send()
            .await
            .map_err(|e| ProviderError::from_reqwest(&e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            debug!(status = status.as_u16(), "Provider returned error status");
            return Err(ProviderError::from_status(status.as_u16(), &body));
        }

        response.json::<T>().await.map_err(|e| {
            ProviderError::empty(format!("Failed to parse response: {}", e))
                .with_status(status.as_u16())
        })
    };

    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(ProviderError::cancelled()),
        result = exchange => result,
    }
}

/// Trimmed text, or an `Empty` error when nothing usable came back
pub(crate) fn non_empty(
    text: Option<String>,
    provider: &str,
) -> std::result::Result<String, ProviderError> {
    match text.map(|t| t.trim().to_string()) {
        Some(t) if !t.is_empty() => Ok(t),
        _ => Err(ProviderError::empty(format!("Empty response from {}", provider))),
    }
}
