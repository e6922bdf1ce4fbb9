// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use reqwest::ClientBuilder;
use std::error::Error;
#[cfg(feature = "fips")]
use tracing::debug;

/// Client builder using reqwest's bundled rustls configuration.
#[cfg(not(feature = "fips"))]
pub fn client_builder() -> Result<ClientBuilder, Box<dyn Error + Send + Sync>> {
    Ok(reqwest::Client::builder().use_rustls_tls())
}

/// Client builder restricted to a FIPS-validated rustls provider and the
/// platform's native root certificates.
///
/// The process must install the provider first, e.g. with
/// `rustls::crypto::default_fips_provider().install_default()`.
#[cfg(feature = "fips")]
pub fn client_builder() -> Result<ClientBuilder, Box<dyn Error + Send + Sync>> {
    let provider =
        rustls::crypto::CryptoProvider::get_default().ok_or("no crypto provider installed")?;
    if !provider.fips() {
        return Err("installed crypto provider is not FIPS-compliant".into());
    }

    let mut roots = rustls::RootCertStore::empty();
    let native = rustls_native_certs::load_native_certs();
    let (added, ignored) = roots.add_parsable_certificates(native.certs);
    debug!("Loaded {added} native root certificates ({ignored} ignored)");
    if added == 0 {
        return Err("no usable certificate in the native root store".into());
    }

    let tls = rustls::ClientConfig::builder_with_provider(provider.clone())
        .with_protocol_versions(rustls::ALL_VERSIONS)
        .map_err(|e| format!("unsupported protocol versions: {e}"))?
        .with_root_certificates(roots)
        .with_no_client_auth();
    if !tls.fips() {
        return Err("TLS configuration is not FIPS-compliant".into());
    }

    Ok(reqwest::Client::builder().use_preconfigured_tls(tls))
}
