// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Error types for the `upgw` library.
//!
//! Lower layers (shadow sessions, the credential store, the service API)
//! return their own error types unwrapped. The [`Client`](crate::Client) is
//! the single place where they are translated into [`Error::Client`] or
//! [`Error::Authentication`] carrying the name of the affected device.

use thiserror::Error;

/// The main error type for this library.
#[derive(Debug, Error)]
pub enum Error {
    /// The identity provider rejected the supplied credentials.
    #[error("failed to authenticate {username}")]
    Authentication {
        /// The user name that was rejected.
        username: String,
        /// The underlying identity failure.
        #[source]
        source: IdentityError,
    },

    /// An operation of the client failed.
    ///
    /// The context names the operation and, where applicable, the device.
    #[error("{context}")]
    Client {
        /// Human readable description of the failed operation.
        context: String,
        /// The originating cause.
        #[source]
        source: Box<Error>,
    },

    /// Error occurred during protocol communication.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Error occurred while parsing service data.
    #[error("parse error: {0}")]
    Parse(#[from] ParseError),

    /// Error reported by the identity provider.
    #[error("identity error: {0}")]
    Identity(#[from] IdentityError),

    /// The client was built with an invalid configuration.
    #[error("invalid configuration: {0}")]
    Configuration(String),

    /// No device with the given codes is managed by the client.
    #[error("device {device_code} not found under gateway {gateway_code}")]
    DeviceNotFound {
        /// Code of the gateway that was searched.
        gateway_code: String,
        /// Code of the missing device.
        device_code: String,
    },

    /// The client has been closed.
    #[error("client is closed")]
    Closed,
}

impl Error {
    /// Wraps `source` into an [`Error::Client`] with the given context.
    pub(crate) fn client(context: impl Into<String>, source: impl Into<Error>) -> Self {
        Self::Client {
            context: context.into(),
            source: Box::new(source.into()),
        }
    }

    /// Returns `true` if this is an authentication failure.
    #[must_use]
    pub fn is_authentication(&self) -> bool {
        matches!(self, Self::Authentication { .. })
    }

    /// Returns `true` if this error, or its cause, is a request timeout.
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        match self {
            Self::Protocol(ProtocolError::Timeout(_)) => true,
            Self::Client { source, .. } => source.is_timeout(),
            _ => false,
        }
    }

    /// Returns `true` if this error, or its cause, is a request rejected by the server.
    #[must_use]
    pub fn is_rejected(&self) -> bool {
        match self {
            Self::Protocol(ProtocolError::Rejected { .. }) => true,
            Self::Client { source, .. } => source.is_rejected(),
            _ => false,
        }
    }
}

/// Errors related to protocol communication (MQTT shadows and HTTP).
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// HTTP request failed.
    #[cfg(feature = "http")]
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// MQTT client request failed.
    #[cfg(feature = "mqtt")]
    #[error("MQTT error: {0}")]
    Mqtt(#[from] rumqttc::ClientError),

    /// Connection to the broker failed.
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// No response arrived in time.
    #[error("request timed out after {0} ms")]
    Timeout(u64),

    /// The server rejected a shadow request.
    #[error("request rejected: {message} ({code:?})")]
    Rejected {
        /// Error code reported by the server, if any.
        code: Option<i64>,
        /// Error message reported by the server.
        message: String,
    },

    /// The session is closed or has no live connection.
    #[error("not connected")]
    NotConnected,

    /// A shadow document had an unexpected shape.
    #[error("invalid shadow document: {0}")]
    InvalidDocument(String),

    /// Internal channel was closed.
    #[error("channel closed: {0}")]
    ChannelClosed(String),

    /// Transport credentials could not be obtained.
    #[error("credentials unavailable: {0}")]
    Credentials(String),

    /// A payload could not be serialized.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Errors related to parsing service data.
#[derive(Debug, Error)]
pub enum ParseError {
    /// JSON parsing failed.
    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    /// Expected field is missing from the response.
    #[error("missing field in response: {0}")]
    MissingField(String),

    /// Unexpected response format.
    #[error("unexpected response format: {0}")]
    UnexpectedFormat(String),

    /// Failed to parse a specific value.
    #[error("failed to parse {field}: {message}")]
    InvalidValue {
        /// The field that failed to parse.
        field: String,
        /// Description of the parsing failure.
        message: String,
    },
}

/// Errors reported by an [`IdentityProvider`](crate::api::IdentityProvider).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum IdentityError {
    /// The identity provider refused the credentials or token.
    #[error("not authorized: {0}")]
    NotAuthorized(String),

    /// Any other identity failure.
    #[error("{0}")]
    Other(String),
}

/// A specialized Result type for this library.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn authentication_error_display() {
        let err = Error::Authentication {
            username: "user@example.com".to_string(),
            source: IdentityError::NotAuthorized("Incorrect password".to_string()),
        };
        assert_eq!(err.to_string(), "failed to authenticate user@example.com");
        assert!(err.is_authentication());
    }

    #[test]
    fn client_error_keeps_cause() {
        let err = Error::client("failed to refresh Bedroom", ProtocolError::Timeout(60_000));
        assert_eq!(err.to_string(), "failed to refresh Bedroom");
        assert!(err.is_timeout());

        let source = std::error::Error::source(&err).unwrap();
        assert_eq!(source.to_string(), "protocol error: request timed out after 60000 ms");
    }

    #[test]
    fn rejected_display() {
        let err = ProtocolError::Rejected {
            code: Some(400),
            message: "Missing required node: state".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "request rejected: Missing required node: state (Some(400))"
        );
        assert!(Error::client("failed to update TH1", err).is_rejected());
    }

    #[test]
    fn parse_error_display() {
        let err = ParseError::MissingField("gateway.device_code".to_string());
        assert_eq!(err.to_string(), "missing field in response: gateway.device_code");
    }

    #[test]
    fn error_from_identity_error() {
        let err: Error = IdentityError::Other("network down".to_string()).into();
        assert!(matches!(err, Error::Identity(IdentityError::Other(_))));
        assert!(!err.is_authentication());
    }
}
