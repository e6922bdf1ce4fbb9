// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use reqwest::StatusCode;

/// Errors surfaced by the relay pipeline and its components.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("Invalid credentials: {0}")]
    InvalidCredentials(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// The destination answered with something other than `201 Created`.
    #[error("{status}")]
    DeliveryRejected { status: StatusCode },

    #[error("Transport failure: {0}")]
    TransportFailure(#[source] reqwest::Error),

    #[error("Failed to serialize payload: {0}")]
    Payload(#[from] serde_json::Error),

    /// The input stream failed before reaching its end.
    #[error("Input stream aborted: {0}")]
    StreamFramingAbort(#[source] std::io::Error),
}

impl RelayError {
    /// Numeric status code of a rejected delivery, if this is one.
    #[must_use]
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::DeliveryRejected { status } => Some(status.as_u16()),
            _ => None,
        }
    }

    /// True for failures of an outbound exchange, as opposed to local errors.
    #[must_use]
    pub fn is_delivery_failure(&self) -> bool {
        matches!(
            self,
            Self::DeliveryRejected { .. } | Self::TransportFailure(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejected_display_is_status_code() {
        let error = RelayError::DeliveryRejected {
            status: StatusCode::UNAUTHORIZED,
        };
        assert!(error.to_string().starts_with("401"));
        assert_eq!(error.status_code(), Some(401));
        assert!(error.is_delivery_failure());
    }

    #[test]
    fn test_local_errors_are_not_delivery_failures() {
        let error = RelayError::InvalidCredentials("empty shared secret".into());
        assert_eq!(error.to_string(), "Invalid credentials: empty shared secret");
        assert_eq!(error.status_code(), None);
        assert!(!error.is_delivery_failure());

        let error = RelayError::StreamFramingAbort(std::io::Error::new(
            std::io::ErrorKind::UnexpectedEof,
            "premature close",
        ));
        assert_eq!(error.to_string(), "Input stream aborted: premature close");
        assert!(!error.is_delivery_failure());
    }
}
