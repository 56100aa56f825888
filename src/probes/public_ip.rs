//! Public IP discovery through an ipify-style JSON endpoint.

use reqwest::{Client, Url};
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, warn};

use super::UNAVAILABLE;

#[derive(Debug, Deserialize)]
struct IpResponse {
    ip: String,
}

/// Extract the `ip` field from a lookup response body.
pub fn parse_ip_response(body: &str) -> Option<String> {
    let parsed: IpResponse = serde_json::from_str(body).ok()?;
    let ip = parsed.ip.trim();
    if ip.is_empty() {
        None
    } else {
        Some(ip.to_string())
    }
}

/// Look up the public IP, returning [`UNAVAILABLE`] on any failure.
pub async fn lookup(client: &Client, url: &Url, timeout: Duration) -> String {
    let body = match client.get(url.clone()).timeout(timeout).send().await {
        Ok(resp) if resp.status().is_success() => resp.text().await,
        Ok(resp) => {
            warn!(%url, status = resp.status().as_u16(), "public IP lookup rejected");
            return UNAVAILABLE.to_string();
        }
        Err(e) => Err(e),
    };

    match body {
        Ok(body) => parse_ip_response(&body).unwrap_or_else(|| {
            warn!(%url, "public IP lookup returned an unexpected body");
            UNAVAILABLE.to_string()
        }),
        Err(e) => {
            debug!(%url, error = %e, "public IP lookup failed");
            UNAVAILABLE.to_string()
        }
    }
}
