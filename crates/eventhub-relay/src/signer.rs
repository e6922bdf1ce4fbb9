// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Shared Access Signature generation.
//!
//! A signature proves possession of a shared access key for one resource URI
//! until an expiry instant. The signed string is `<resource-uri>\n<expiry>`,
//! the MAC is HMAC-SHA256 and the result is base64 then percent-encoded so it
//! can be placed directly in an `Authorization` header.

use base64::{engine::general_purpose::STANDARD, Engine};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use url::form_urlencoded;

use crate::error::RelayError;

type HmacSha256 = Hmac<Sha256>;

/// Computes the percent-encoded signature for `resource_uri` valid until
/// `expiry` (unix seconds).
///
/// `resource_uri` is expected to be percent-encoded already, see
/// [`encode_uri_component`].
pub fn create_signature(
    resource_uri: &str,
    expiry: u64,
    shared_secret: impl AsRef<[u8]>,
) -> Result<String, RelayError> {
    let shared_secret = shared_secret.as_ref();
    if shared_secret.is_empty() {
        return Err(RelayError::InvalidCredentials(
            "shared access key is empty".to_string(),
        ));
    }
    if resource_uri.is_empty() {
        return Err(RelayError::InvalidCredentials(
            "signed resource URI is empty".to_string(),
        ));
    }

    let mut mac = HmacSha256::new_from_slice(shared_secret)
        .map_err(|e| RelayError::InvalidCredentials(e.to_string()))?;
    mac.update(resource_uri.as_bytes());
    mac.update(b"\n");
    mac.update(expiry.to_string().as_bytes());
    let digest = STANDARD.encode(mac.finalize().into_bytes());

    Ok(encode_uri_component(&digest))
}

/// Percent-encodes `value` with `application/x-www-form-urlencoded` rules:
/// ASCII alphanumerics and `*-._` are kept, a space becomes `+`, every other
/// byte becomes `%XX`. For base64 text and Event Hub URIs the output equals
/// JavaScript's `encodeURIComponent`.
#[must_use]
pub fn encode_uri_component(value: &str) -> String {
    form_urlencoded::byte_serialize(value.as_bytes()).collect()
}
