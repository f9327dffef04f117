//! Request forwarding to auxiliary devices.
//!
//! Method, headers and body go upstream as received; status, headers and body
//! come back as the device sent them. Only connection-level headers are
//! dropped in either direction.

use crate::device::Device;
use crate::registry::Registered;
use axum::http::{header, HeaderMap, HeaderName, Method, StatusCode};
use bytes::Bytes;
use std::time::Duration;
use thiserror::Error;

const UPSTREAM_TIMEOUT: Duration = Duration::from_secs(30);

/// Headers that describe a single connection, never forwarded
const HOP_BY_HOP: [HeaderName; 8] = [
    header::CONNECTION,
    header::HOST,
    header::CONTENT_LENGTH,
    header::PROXY_AUTHENTICATE,
    header::PROXY_AUTHORIZATION,
    header::TE,
    header::TRANSFER_ENCODING,
    header::UPGRADE,
];

#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("failed to build HTTP client: {0}")]
    Client(String),
    #[error("upstream request to {url} failed: {source}")]
    Upstream {
        url: String,
        #[source]
        source: reqwest::Error,
    },
}

/// Response relayed back from a device
#[derive(Debug)]
pub struct ProxyResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

pub struct DeviceProxy {
    client: reqwest::Client,
}

impl DeviceProxy {
    pub fn new() -> Result<Self, ProxyError> {
        let client = reqwest::Client::builder()
            .timeout(UPSTREAM_TIMEOUT)
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| ProxyError::Client(e.to_string()))?;
        Ok(Self { client })
    }

    /// Forward one request to `device`. `endpoint` is the upstream path,
    /// including any query string.
    pub async fn forward(
        &self,
        device: &Device,
        method: Method,
        headers: &HeaderMap,
        body: Bytes,
        endpoint: &str,
    ) -> Result<ProxyResponse, ProxyError> {
        let url = device.url_for(endpoint);
        log::debug!("[{}] {} {} ({} bytes)", device.name(), method, url, body.len());

        let response = self
            .client
            .request(method.clone(), &url)
            .headers(strip_hop_by_hop(headers))
            .body(body)
            .send()
            .await
            .map_err(|source| ProxyError::Upstream {
                url: url.clone(),
                source,
            })?;

        let status = response.status();
        let headers = strip_hop_by_hop(response.headers());
        let body = response
            .bytes()
            .await
            .map_err(|source| ProxyError::Upstream {
                url: url.clone(),
                source,
            })?;

        log::info!("[{}] {} {} -> {}", device.name(), method, url, status);
        Ok(ProxyResponse {
            status,
            headers,
            body,
        })
    }
}

fn strip_hop_by_hop(headers: &HeaderMap) -> HeaderMap {
    let mut out = headers.clone();
    for name in HOP_BY_HOP.iter() {
        out.remove(name);
    }
    out.remove("keep-alive");
    out
}
