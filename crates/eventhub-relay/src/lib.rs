// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Relays newline-delimited log records to an Azure Event Hub.
//!
//! Records are framed from an input stream, queued up to a high-water mark,
//! and sent over a bounded pool of keep-alive HTTPS connections, either one
//! record per request or as a bulk JSON array when several are waiting.
//! Requests are authenticated with a Shared Access Signature.

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

pub mod config;
pub mod delivery;
pub mod error;
pub mod framer;
pub mod pipeline;
pub mod signer;
pub mod sink;
mod tls;

pub use config::{DeliveryCredentials, RelayConfig};
pub use error::RelayError;
pub use framer::Record;
pub use pipeline::{Pipeline, PipelineSummary};
pub use signer::create_signature;
