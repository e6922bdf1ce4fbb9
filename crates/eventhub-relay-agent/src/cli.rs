// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use clap::Parser;
use eventhub_relay::config::{DEFAULT_HIGH_WATER_MARK, DEFAULT_MAX_SOCKETS, DEFAULT_PORT};
use eventhub_relay::signer::{create_signature, encode_uri_component};
use eventhub_relay::{DeliveryCredentials, RelayConfig, RelayError};

use crate::connection_string::ConnectionString;

const HOST_SUFFIX: &str = "servicebus.windows.net";
const DEFAULT_SIGNATURE_LIFETIME_SECS: u64 = 365 * 24 * 3600;

/// Relays newline-delimited log lines from stdin to an Azure Event Hub.
///
/// Every option can also be set through its environment variable. A
/// connection string (`--url`) fills in whatever is not given explicitly.
#[derive(Debug, Clone, Default, Parser)]
#[command(name = "eventhub-relay", version, about)]
pub struct Args {
    /// Event Hub namespace
    #[arg(short = 's', long, env = "PINO_EVENT_HUB_NAMESPACE")]
    pub event_hub_namespace: Option<String>,

    /// Event Hub name
    #[arg(short = 'e', long, env = "EVENT_HUB_NAME")]
    pub event_hub: Option<String>,

    /// Shared access policy name
    #[arg(short = 'n', long, env = "PINO_SHARED_ACCESS_POLICY_NAME")]
    pub shared_access_policy_name: Option<String>,

    /// Shared access policy key, used to sign requests
    #[arg(short = 'k', long, env = "PINO_SHARED_ACCESS_POLICY_KEY", hide_env_values = true)]
    pub shared_access_policy_key: Option<String>,

    /// Pre-computed shared access signature, used instead of signing
    #[arg(short = 'a', long, env = "PINO_SHARED_ACCESS_SIGNATURE", hide_env_values = true)]
    pub sas: Option<String>,

    /// Signature expiry as a unix timestamp (default: one year from now)
    #[arg(short = 'x', long, env = "PINO_SAS_EXPIRY")]
    pub expiry: Option<u64>,

    /// Event Hub connection string
    #[arg(short = 'u', long, env = "EVENT_HUB_URL", hide_env_values = true)]
    pub url: Option<String>,

    /// Maximum number of records sent in one bulk request
    #[arg(short = 'b', long, default_value_t = DEFAULT_HIGH_WATER_MARK)]
    pub bulk_size: usize,

    /// Destination port
    #[arg(short = 'p', long, default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// Maximum number of concurrent connections
    #[arg(short = 'm', long, default_value_t = DEFAULT_MAX_SOCKETS)]
    pub max: usize,

    /// HTTPS proxy URL
    #[arg(long, env = "HTTPS_PROXY")]
    pub https_proxy: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum ArgsError {
    #[error("1 or more missing required parameters 'event-hub-namespace', 'event-hub', 'shared-access-policy-name' and 'sas' (or 'url' containing all parameters).")]
    MissingParameters,

    #[error(transparent)]
    Relay(#[from] RelayError),
}

impl Args {
    /// Resolves the arguments into a pipeline configuration, signing with the
    /// policy key unless a signature was supplied. `now` is in unix seconds.
    pub fn into_config(mut self, now: u64) -> Result<RelayConfig, ArgsError> {
        self.fill_from_connection_string();

        let (Some(namespace), Some(event_hub), Some(policy_name)) = (
            non_empty(self.event_hub_namespace),
            non_empty(self.event_hub),
            non_empty(self.shared_access_policy_name),
        ) else {
            return Err(ArgsError::MissingParameters);
        };

        let host = format!("{namespace}.{HOST_SUFFIX}");
        let resource_uri = encode_uri_component(&format!("https://{host}/{event_hub}"));
        let expiry = self
            .expiry
            .unwrap_or(now + DEFAULT_SIGNATURE_LIFETIME_SECS);

        let signature = match (non_empty(self.sas), non_empty(self.shared_access_policy_key)) {
            (Some(sas), _) => sas,
            (None, Some(key)) => create_signature(&resource_uri, expiry, key)?,
            (None, None) => return Err(ArgsError::MissingParameters),
        };

        let mut config = RelayConfig::new(DeliveryCredentials {
            host,
            entity_path: event_hub,
            resource_uri,
            signature,
            expiry,
            policy_name,
        });
        config.port = self.port;
        config.max_sockets = self.max;
        config.high_water_mark = self.bulk_size;
        config.https_proxy = non_empty(self.https_proxy);
        Ok(config)
    }

    fn fill_from_connection_string(&mut self) {
        let Some(parsed) = self.url.as_deref().and_then(ConnectionString::parse) else {
            return;
        };
        self.event_hub_namespace.get_or_insert(parsed.namespace);
        if let Some(entity_path) = parsed.entity_path {
            self.event_hub.get_or_insert(entity_path);
        }
        self.shared_access_policy_name.get_or_insert(parsed.key_name);
        if self.sas.is_none() {
            self.shared_access_policy_key.get_or_insert(parsed.key);
        }
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.is_empty())
}
