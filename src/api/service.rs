// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! HTTP implementation of the service API.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;

use crate::api::{ServiceApi, Tokens};
use crate::config::ClientConfig;
use crate::error::ProtocolError;

/// Service API client over HTTPS.
///
/// Every request carries the `x-auth-token`, `x-access-token` and
/// `x-company-code` headers.
///
/// # Examples
///
/// ```
/// use upgw::api::HttpServiceApi;
///
/// # fn example() -> Result<(), upgw::ProtocolError> {
/// let api = HttpServiceApi::new("https://service-api.purmo.uleeco.com/api/v1/", "purmo")?;
/// assert_eq!(api.base_url(), "https://service-api.purmo.uleeco.com/api/v1");
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct HttpServiceApi {
    base_url: String,
    company: String,
    client: Client,
}

impl HttpServiceApi {
    /// Default request timeout.
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

    /// Creates a client for the service at `base_url`.
    ///
    /// # Errors
    ///
    /// Returns error if the HTTP client cannot be created.
    pub fn new(
        base_url: impl Into<String>,
        company: impl Into<String>,
    ) -> Result<Self, ProtocolError> {
        let client = Client::builder()
            .timeout(Self::DEFAULT_TIMEOUT)
            .build()
            .map_err(ProtocolError::Http)?;

        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            company: company.into(),
            client,
        })
    }

    /// Creates a client from the service settings of `config`.
    ///
    /// # Errors
    ///
    /// Returns error if the HTTP client cannot be created.
    pub fn from_config(config: &ClientConfig) -> Result<Self, ProtocolError> {
        Self::new(&config.service_api_base_url, &config.service_api_company)
    }

    /// Returns the base URL of the service.
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn get(&self, endpoint: &str, tokens: &Tokens) -> Result<Value, ProtocolError> {
        let url = format!("{}/{endpoint}", self.base_url);

        tracing::debug!(url = %url, "Sending service API request");

        let response = self
            .client
            .get(&url)
            .header("x-auth-token", &tokens.id_token)
            .header("x-access-token", &tokens.access_token)
            .header("x-company-code", &self.company)
            .send()
            .await
            .map_err(ProtocolError::Http)?;

        if !response.status().is_success() {
            return Err(ProtocolError::ConnectionFailed(format!(
                "HTTP {} - {}",
                response.status().as_u16(),
                response.status().canonical_reason().unwrap_or("Unknown")
            )));
        }

        let body: Value = response.json().await.map_err(ProtocolError::Http)?;

        tracing::debug!(url = %url, body = %body, "Received service API response");

        Ok(body)
    }
}

#[async_trait]
impl ServiceApi for HttpServiceApi {
    async fn slider_list(&self, tokens: &Tokens) -> Result<Value, ProtocolError> {
        self.get("occupants/slider_list", tokens).await
    }

    async fn slider_details(
        &self,
        id: &str,
        kind: &str,
        tokens: &Tokens,
    ) -> Result<Value, ProtocolError> {
        let endpoint = format!(
            "occupants/slider_details?id={}&type={}",
            urlencoding::encode(id),
            urlencoding::encode(kind)
        );
        self.get(&endpoint, tokens).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_url_trailing_slash_trimmed() {
        let api = HttpServiceApi::new("http://localhost:8080/api/v1/", "purmo").unwrap();
        assert_eq!(api.base_url(), "http://localhost:8080/api/v1");
    }

    #[test]
    fn from_config_uses_service_settings() {
        let config = ClientConfig::default().with_service_api_base_url("http://127.0.0.1:9/api");
        let api = HttpServiceApi::from_config(&config).unwrap();
        assert_eq!(api.base_url(), "http://127.0.0.1:9/api");
        assert_eq!(api.company, "purmo");
    }
}
