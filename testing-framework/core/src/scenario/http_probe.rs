use std::time::Duration;

use reqwest::{Client as ReqwestClient, StatusCode};
use thiserror::Error;
use tracing::{debug, info};
use url::Url;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Observed HTTP behaviour did not match what the scenario expected.
#[derive(Debug, Error)]
pub enum AssertionError {
    #[error("invalid probe url for {host}:{port}{path}: {source}")]
    Url {
        host: String,
        port: u16,
        path: String,
        #[source]
        source: url::ParseError,
    },
    #[error("GET {url} failed: {source}")]
    Request {
        url: Url,
        #[source]
        source: reqwest::Error,
    },
    #[error("GET {url}: expected status {expected}, got {actual}")]
    Status {
        url: Url,
        expected: StatusCode,
        actual: StatusCode,
    },
    #[error("GET {url}: expected body containing {expected:?}, got {actual:?}")]
    Body {
        url: Url,
        expected: String,
        actual: String,
    },
}

/// Response captured by a probe.
#[derive(Clone, Debug)]
pub struct ProbeResponse {
    pub url: Url,
    pub status: StatusCode,
    pub body: String,
}

/// Client used for direct assertions against a deployment.
#[must_use]
pub fn probe_client() -> ReqwestClient {
    ReqwestClient::builder()
        .timeout(REQUEST_TIMEOUT)
        .build()
        .unwrap_or_else(|_| ReqwestClient::new())
}

/// Build `http://{host}:{port}{path}`.
pub fn probe_url(host: &str, port: u16, path: &str) -> Result<Url, AssertionError> {
    Url::parse(&format!("http://{host}:{port}{path}")).map_err(|source| AssertionError::Url {
        host: host.to_owned(),
        port,
        path: path.to_owned(),
        source,
    })
}

/// Issue a GET and capture status and body.
pub async fn get(client: &ReqwestClient, url: &Url) -> Result<ProbeResponse, AssertionError> {
    debug!(%url, "probing HTTP endpoint");
    let request_error = |source| AssertionError::Request {
        url: url.clone(),
        source,
    };
    let response = client
        .get(url.clone())
        .send()
        .await
        .map_err(request_error)?;
    let status = response.status();
    let body = response.text().await.map_err(request_error)?;
    Ok(ProbeResponse {
        url: url.clone(),
        status,
        body,
    })
}

/// GET `url` and require `expected` status.
pub async fn expect_status(
    client: &ReqwestClient,
    url: &Url,
    expected: StatusCode,
) -> Result<ProbeResponse, AssertionError> {
    let response = get(client, url).await?;
    if response.status != expected {
        return Err(AssertionError::Status {
            url: url.clone(),
            expected,
            actual: response.status,
        });
    }
    info!(%url, status = %response.status, "status assertion passed");
    Ok(response)
}

/// GET `url`, require `expected` status and a body containing `marker`.
pub async fn expect_body_contains(
    client: &ReqwestClient,
    url: &Url,
    expected: StatusCode,
    marker: &str,
) -> Result<ProbeResponse, AssertionError> {
    let response = expect_status(client, url, expected).await?;
    if !response.body.contains(marker) {
        return Err(AssertionError::Body {
            url: url.clone(),
            expected: marker.to_owned(),
            actual: response.body,
        });
    }
    info!(%url, marker, "body assertion passed");
    Ok(response)
}
