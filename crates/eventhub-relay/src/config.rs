// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::time::Duration;
use url::Url;

use crate::error::RelayError;

pub const DEFAULT_PORT: u16 = 443;
pub const DEFAULT_MAX_SOCKETS: usize = 10;
pub const DEFAULT_HIGH_WATER_MARK: usize = 500;
/// Matches the `timeout=60` query parameter sent to the ingestion endpoint.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

const MESSAGES_QUERY: &str = "timeout=60&api-version=2014-01";

/// Destination and Shared Access Signature shared by every request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryCredentials {
    /// Event Hub host, e.g. `my-ns.servicebus.windows.net`. A leading
    /// `http://` or `https://` selects the scheme; a bare host means https.
    pub host: String,
    /// Event Hub name.
    pub entity_path: String,
    /// Percent-encoded URI the signature was computed for (`sr`).
    pub resource_uri: String,
    /// Percent-encoded signature (`sig`).
    pub signature: String,
    /// Signature expiry in unix seconds (`se`).
    pub expiry: u64,
    /// Shared access policy name (`skn`).
    pub policy_name: String,
}

impl DeliveryCredentials {
    /// Value of the `Authorization` header.
    #[must_use]
    pub fn authorization(&self) -> String {
        format!(
            "SharedAccessSignature sr={}&sig={}&se={}&skn={}",
            self.resource_uri, self.signature, self.expiry, self.policy_name
        )
    }

    /// Full URL of the `messages` endpoint on `port`.
    pub fn messages_url(&self, port: u16) -> Result<Url, RelayError> {
        let base = if self.host.starts_with("https://") || self.host.starts_with("http://") {
            self.host.clone()
        } else {
            format!("https://{}", self.host)
        };
        let mut url = Url::parse(&base)
            .map_err(|e| RelayError::InvalidConfig(format!("invalid host '{}': {e}", self.host)))?;
        url.set_port(Some(port))
            .map_err(|()| RelayError::InvalidConfig(format!("invalid port {port}")))?;
        url.set_path(&format!("/{}/messages", self.entity_path.trim_matches('/')));
        url.set_query(Some(MESSAGES_QUERY));
        Ok(url)
    }
}

/// Fully resolved configuration of one relay pipeline.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub credentials: DeliveryCredentials,
    /// Destination port
    pub port: u16,
    /// Maximum number of concurrent requests (and pooled connections)
    pub max_sockets: usize,
    /// Maximum number of queued records, and so the largest batch
    pub high_water_mark: usize,
    pub request_timeout: Duration,
    /// HTTPS proxy URL
    pub https_proxy: Option<String>,
}

impl RelayConfig {
    /// Configuration with default limits for the given credentials.
    #[must_use]
    pub fn new(credentials: DeliveryCredentials) -> Self {
        Self {
            credentials,
            port: DEFAULT_PORT,
            max_sockets: DEFAULT_MAX_SOCKETS,
            high_water_mark: DEFAULT_HIGH_WATER_MARK,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            https_proxy: None,
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), RelayError> {
        let credentials = &self.credentials;

        if credentials.host.trim().is_empty() {
            return Err(RelayError::InvalidConfig("host cannot be empty".to_string()));
        }
        if credentials.entity_path.trim_matches('/').is_empty() {
            return Err(RelayError::InvalidConfig(
                "entity path cannot be empty".to_string(),
            ));
        }
        if self.max_sockets == 0 {
            return Err(RelayError::InvalidConfig(
                "max sockets must be greater than 0".to_string(),
            ));
        }
        if self.high_water_mark == 0 {
            return Err(RelayError::InvalidConfig(
                "high-water mark must be greater than 0".to_string(),
            ));
        }

        if credentials.resource_uri.is_empty() {
            return Err(RelayError::InvalidCredentials(
                "signed resource URI is empty".to_string(),
            ));
        }
        if credentials.signature.is_empty() {
            return Err(RelayError::InvalidCredentials("signature is empty".to_string()));
        }
        if credentials.policy_name.is_empty() {
            return Err(RelayError::InvalidCredentials(
                "policy name is empty".to_string(),
            ));
        }

        self.credentials.messages_url(self.port).map(|_| ())
    }
}
