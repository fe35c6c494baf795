//! Public IP discovery

use std::net::IpAddr;
use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use crate::error::{HubError, HubResult};

/// Echo service answering with the caller's address as plain text
pub const DEFAULT_IP_SERVICE_URL: &str = "https://api.ipify.org";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Finds the address other hubs can reach us at
#[async_trait]
pub trait IpDiscovery: Send + Sync {
    async fn public_ip(&self) -> HubResult<IpAddr>;
}

/// Asks a plain-text HTTP echo service
pub struct HttpIpDiscovery {
    client: reqwest::Client,
    url: String,
}

impl Default for HttpIpDiscovery {
    fn default() -> Self {
        Self::new(DEFAULT_IP_SERVICE_URL)
    }
}

impl HttpIpDiscovery {
    pub fn new(url: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self {
            client,
            url: url.into(),
        }
    }
}

/// Parse a service response body
pub(crate) fn parse_ip_response(body: &str) -> HubResult<IpAddr> {
    let text = body.trim();
    text.parse()
        .map_err(|_| HubError::parse_failure(format!("not an ip address: {:?}", text)))
}

#[async_trait]
impl IpDiscovery for HttpIpDiscovery {
    async fn public_ip(&self) -> HubResult<IpAddr> {
        debug!(url = %self.url, "Looking up public ip");
        let response = self
            .client
            .get(&self.url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| HubError::network(format!("ip lookup failed: {}", e)))?;
        let body = response
            .text()
            .await
            .map_err(|e| HubError::network(format!("ip lookup failed: {}", e)))?;
        parse_ip_response(&body)
    }
}
