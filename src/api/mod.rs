// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Collaborators of the client: the identity provider and the REST service API.
//!
//! - [`IdentityProvider`] - authentication, token renewal and transport credentials
//! - [`ServiceApi`] - listing gateways and their device trees
//! - [`HttpServiceApi`] - the HTTP implementation of [`ServiceApi`]
//! - [`tree`] - parsing the device tree into attribute records

#[cfg(feature = "http")]
mod service;
pub mod tree;

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::credentials::CredentialsProvider;
use crate::error::{IdentityError, ProtocolError};

#[cfg(feature = "http")]
pub use service::HttpServiceApi;

/// Tokens identifying an authenticated user to the service API.
#[derive(Clone, PartialEq, Eq)]
pub struct Tokens {
    /// Identity token, sent as `x-auth-token`.
    pub id_token: String,
    /// Access token, sent as `x-access-token`.
    pub access_token: String,
}

impl std::fmt::Debug for Tokens {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tokens").finish_non_exhaustive()
    }
}

/// The identity provider of the cloud service.
///
/// Every method may block on network I/O; the client calls them from
/// blocking threads.
pub trait IdentityProvider: Send + Sync {
    /// Authenticates the user.
    ///
    /// # Errors
    ///
    /// Returns [`IdentityError::NotAuthorized`] if the credentials are
    /// rejected, or another error if authentication fails otherwise.
    fn authenticate(&self, username: &str, password: &str) -> Result<Tokens, IdentityError>;

    /// Renews the session token if it is about to expire.
    ///
    /// Returns `true` if the token was renewed.
    ///
    /// # Errors
    ///
    /// Returns an error if renewal fails.
    fn check_token(&self) -> Result<bool, IdentityError>;

    /// Returns the current tokens.
    ///
    /// # Errors
    ///
    /// Returns an error if the user is not authenticated.
    fn tokens(&self) -> Result<Tokens, IdentityError>;

    /// Issues a transport credentials provider for a cloud identity.
    ///
    /// # Errors
    ///
    /// Returns an error if the identity cannot be resolved.
    fn credentials_provider(
        &self,
        identity_id: &str,
    ) -> Result<Arc<dyn CredentialsProvider>, IdentityError>;
}

/// The REST service API listing gateways and devices.
#[async_trait]
pub trait ServiceApi: Send + Sync {
    /// Fetches `occupants/slider_list`.
    async fn slider_list(&self, tokens: &Tokens) -> Result<Value, ProtocolError>;

    /// Fetches `occupants/slider_details` for one slider entry.
    async fn slider_details(
        &self,
        id: &str,
        kind: &str,
        tokens: &Tokens,
    ) -> Result<Value, ProtocolError>;
}
