// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Authenticated POSTs to the Event Hub `messages` endpoint.
//!
//! A [`Delivery`] owns the HTTP client (and with it the keep-alive connection
//! pool) plus a semaphore that bounds the number of exchanges in flight. A
//! request can only be sent through a [`Slot`], so the bound holds for every
//! caller sharing the same `Delivery`.

use reqwest::header::{HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::StatusCode;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, error};
use url::Url;

use crate::config::RelayConfig;
use crate::error::RelayError;
use crate::framer::Record;
use crate::tls;

pub const SINGLE_CONTENT_TYPE: &str = "application/atom+xml;type=entry;charset=utf-8";
pub const BULK_CONTENT_TYPE: &str = "application/vnd.microsoft.servicebus.json";

const POOL_IDLE_TIMEOUT: Duration = Duration::from_secs(270);
const TCP_KEEPALIVE: Duration = Duration::from_secs(120);

/// Body of one outbound request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    /// One record sent as a raw Atom entry.
    Single(Record),
    /// Several records sent as one JSON array of `{"Body": ...}` events.
    Bulk(Vec<Record>),
}

#[derive(Serialize)]
struct BulkEvent<'a> {
    #[serde(rename = "Body")]
    body: &'a str,
}

impl Payload {
    /// Picks the wire format for a batch. Returns `None` for an empty batch.
    #[must_use]
    pub fn from_batch(mut records: Vec<Record>) -> Option<Self> {
        match records.len() {
            0 => None,
            1 => records.pop().map(Payload::Single),
            _ => Some(Payload::Bulk(records)),
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Payload::Single(_) => 1,
            Payload::Bulk(records) => records.len(),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    pub fn content_type(&self) -> &'static str {
        match self {
            Payload::Single(_) => SINGLE_CONTENT_TYPE,
            Payload::Bulk(_) => BULK_CONTENT_TYPE,
        }
    }

    pub fn to_body(&self) -> Result<Vec<u8>, RelayError> {
        match self {
            Payload::Single(record) => Ok(record.as_str().as_bytes().to_vec()),
            Payload::Bulk(records) => {
                let events: Vec<BulkEvent<'_>> = records
                    .iter()
                    .map(|record| BulkEvent {
                        body: record.as_str(),
                    })
                    .collect();
                Ok(serde_json::to_vec(&events)?)
            }
        }
    }
}

/// HTTP client for one Event Hub, bounded to `max_sockets` concurrent requests.
#[derive(Debug, Clone)]
pub struct Delivery {
    client: reqwest::Client,
    url: Url,
    authorization: HeaderValue,
    slots: Arc<Semaphore>,
}

impl Delivery {
    pub fn new(config: &RelayConfig) -> Result<Self, RelayError> {
        let url = config.credentials.messages_url(config.port)?;

        let mut authorization = HeaderValue::from_str(&config.credentials.authorization())
            .map_err(|e| RelayError::InvalidCredentials(format!("authorization header: {e}")))?;
        authorization.set_sensitive(true);

        let mut builder = tls::client_builder()
            .map_err(|e| RelayError::InvalidConfig(format!("TLS setup failed: {e}")))?
            .timeout(config.request_timeout)
            .pool_max_idle_per_host(config.max_sockets)
            .pool_idle_timeout(Some(POOL_IDLE_TIMEOUT))
            .tcp_keepalive(Some(TCP_KEEPALIVE));

        if let Some(proxy) = &config.https_proxy {
            let proxy = reqwest::Proxy::https(proxy)
                .map_err(|e| RelayError::InvalidConfig(format!("invalid HTTPS proxy: {e}")))?;
            builder = builder.proxy(proxy);
        }

        let client = builder
            .build()
            .map_err(|e| RelayError::InvalidConfig(format!("HTTP client: {e}")))?;

        Ok(Self {
            client,
            url,
            authorization,
            slots: Arc::new(Semaphore::new(config.max_sockets)),
        })
    }

    /// Number of slots not currently held.
    #[must_use]
    pub fn available_slots(&self) -> usize {
        self.slots.available_permits()
    }

    /// Waits until a request slot is free.
    ///
    /// Returns `None` only if the slot semaphore has been closed.
    pub async fn reserve(&self) -> Option<Slot> {
        let permit = Arc::clone(&self.slots).acquire_owned().await.ok()?;
        Some(Slot {
            delivery: self.clone(),
            _permit: permit,
        })
    }

    async fn post(&self, payload: &Payload) -> Result<(), RelayError> {
        let body = payload.to_body()?;
        let response = self
            .client
            .post(self.url.clone())
            .header(AUTHORIZATION, self.authorization.clone())
            .header(CONTENT_TYPE, payload.content_type())
            .body(body)
            .send()
            .await
            .map_err(|e| {
                error!("EVENTHUB | Request error: {e}");
                RelayError::TransportFailure(e)
            })?;

        let status = response.status();
        debug!("EVENTHUB | Response status {status}");

        // The body is always read to the end so the connection returns to the pool.
        match response.bytes().await {
            Ok(body) if !body.is_empty() => {
                debug!("EVENTHUB | Response body {}", String::from_utf8_lossy(&body));
            }
            Ok(_) => {}
            Err(e) if status == StatusCode::CREATED => {
                error!("EVENTHUB | Failed to read response body: {e}");
                return Err(RelayError::TransportFailure(e));
            }
            Err(e) => debug!("EVENTHUB | Failed to read response body: {e}"),
        }

        if status != StatusCode::CREATED {
            return Err(RelayError::DeliveryRejected { status });
        }
        Ok(())
    }
}

/// A reserved request slot. Dropping it frees the slot.
#[derive(Debug)]
pub struct Slot {
    delivery: Delivery,
    _permit: OwnedSemaphorePermit,
}

impl Slot {
    /// Sends `payload` and releases the slot once the response is fully read.
    pub async fn send(self, payload: &Payload) -> Result<(), RelayError> {
        self.delivery.post(payload).await
    }
}
