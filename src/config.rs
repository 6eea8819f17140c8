// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Client configuration.
//!
//! [`ClientConfig`] collects the service endpoints and the timing parameters
//! of shadow sessions. Defaults match the production cloud service, and
//! [`ClientConfig::from_env`] lets deployments override the endpoints.
//!
//! # Examples
//!
//! ```
//! use std::time::Duration;
//! use upgw::config::{ClientConfig, ReconnectionPolicy};
//!
//! let config = ClientConfig::default()
//!     .with_publish_timeout(Duration::from_secs(30))
//!     .with_reconnection(ReconnectionPolicy::disabled());
//!
//! assert_eq!(config.publish_timeout, Duration::from_secs(30));
//! ```

use std::time::Duration;

/// Default AWS region of the cloud service.
pub const DEFAULT_AWS_REGION: &str = "eu-central-1";

/// Default AWS IoT data endpoint of the cloud service.
pub const DEFAULT_AWS_IOT_ENDPOINT: &str = "a1b4blxx3o9kj3-ats.iot.eu-central-1.amazonaws.com";

/// Default base URL of the REST service API.
pub const DEFAULT_SERVICE_API_BASE_URL: &str = "https://service-api.purmo.uleeco.com/api/v1";

/// Default company code sent to the REST service API.
pub const DEFAULT_SERVICE_API_COMPANY: &str = "purmo";

/// Configuration shared by the client and its shadow sessions.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// AWS region used for signing the MQTT handshake.
    pub aws_region: String,
    /// AWS IoT data endpoint host name.
    pub aws_iot_endpoint: String,
    /// Base URL of the REST service API.
    pub service_api_base_url: String,
    /// Company code sent in the `x-company-code` header.
    pub service_api_company: String,
    /// Maximum time to wait for the response to a shadow request.
    pub publish_timeout: Duration,
    /// Maximum time to establish a session, including subscriptions.
    pub connection_timeout: Duration,
    /// MQTT keep-alive interval.
    pub keep_alive: Duration,
    /// Reconnection behaviour after an unexpected disconnect.
    pub reconnection: ReconnectionPolicy,
}

impl ClientConfig {
    /// Creates a configuration with default settings.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a configuration from the process environment.
    ///
    /// Reads `UPGW_AWS_REGION`, `UPGW_AWS_IOT_ENDPOINT`,
    /// `UPGW_SERVICE_API_BASE_URL` and `UPGW_SERVICE_API_COMPANY`. Variables
    /// that are unset or empty keep their default value.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let read = |key: &str, default: &str| {
            lookup(key)
                .filter(|value| !value.is_empty())
                .unwrap_or_else(|| default.to_string())
        };

        Self {
            aws_region: read("UPGW_AWS_REGION", DEFAULT_AWS_REGION),
            aws_iot_endpoint: read("UPGW_AWS_IOT_ENDPOINT", DEFAULT_AWS_IOT_ENDPOINT),
            service_api_base_url: read("UPGW_SERVICE_API_BASE_URL", DEFAULT_SERVICE_API_BASE_URL),
            service_api_company: read("UPGW_SERVICE_API_COMPANY", DEFAULT_SERVICE_API_COMPANY),
            ..Self::default()
        }
    }

    /// Sets the AWS region.
    #[must_use]
    pub fn with_aws_region(mut self, region: impl Into<String>) -> Self {
        self.aws_region = region.into();
        self
    }

    /// Sets the AWS IoT data endpoint.
    #[must_use]
    pub fn with_aws_iot_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.aws_iot_endpoint = endpoint.into();
        self
    }

    /// Sets the base URL of the REST service API.
    #[must_use]
    pub fn with_service_api_base_url(mut self, url: impl Into<String>) -> Self {
        self.service_api_base_url = url.into();
        self
    }

    /// Sets the company code of the REST service API.
    #[must_use]
    pub fn with_service_api_company(mut self, company: impl Into<String>) -> Self {
        self.service_api_company = company.into();
        self
    }

    /// Sets the shadow request timeout (default: 60 seconds).
    #[must_use]
    pub fn with_publish_timeout(mut self, timeout: Duration) -> Self {
        self.publish_timeout = timeout;
        self
    }

    /// Sets the session establishment timeout (default: 10 seconds).
    #[must_use]
    pub fn with_connection_timeout(mut self, timeout: Duration) -> Self {
        self.connection_timeout = timeout;
        self
    }

    /// Sets the MQTT keep-alive interval (default: 30 seconds).
    #[must_use]
    pub fn with_keep_alive(mut self, keep_alive: Duration) -> Self {
        self.keep_alive = keep_alive;
        self
    }

    /// Sets the reconnection policy.
    #[must_use]
    pub fn with_reconnection(mut self, policy: ReconnectionPolicy) -> Self {
        self.reconnection = policy;
        self
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            aws_region: DEFAULT_AWS_REGION.to_string(),
            aws_iot_endpoint: DEFAULT_AWS_IOT_ENDPOINT.to_string(),
            service_api_base_url: DEFAULT_SERVICE_API_BASE_URL.to_string(),
            service_api_company: DEFAULT_SERVICE_API_COMPANY.to_string(),
            publish_timeout: Duration::from_secs(60),
            connection_timeout: Duration::from_secs(10),
            keep_alive: Duration::from_secs(30),
            reconnection: ReconnectionPolicy::default(),
        }
    }
}

/// Configuration for reconnecting a shadow session after an interruption.
///
/// The delay before attempt `n` (counting from zero) is
/// `initial_delay + n * delay_increment`, capped at `max_delay`. Attempts
/// continue until one succeeds or the session is closed.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use upgw::config::ReconnectionPolicy;
///
/// let policy = ReconnectionPolicy::default();
/// assert_eq!(policy.delay_for_attempt(0), Duration::from_secs(60));
/// assert_eq!(policy.delay_for_attempt(1), Duration::from_secs(120));
/// assert_eq!(policy.delay_for_attempt(9), Duration::from_secs(300));
///
/// let quick = ReconnectionPolicy::new()
///     .with_initial_delay(Duration::from_millis(10))
///     .with_delay_increment(Duration::ZERO);
/// assert_eq!(quick.delay_for_attempt(5), Duration::from_millis(10));
/// ```
#[derive(Debug, Clone)]
pub struct ReconnectionPolicy {
    /// Whether automatic reconnection is enabled.
    pub enabled: bool,
    /// Delay before the first attempt.
    pub initial_delay: Duration,
    /// Amount added to the delay after every failed attempt.
    pub delay_increment: Duration,
    /// Upper bound of the delay between attempts.
    pub max_delay: Duration,
    /// How long a session may stay interrupted before its devices are
    /// reported unavailable (`None` never reports them).
    pub unavailable_after: Option<Duration>,
}

impl ReconnectionPolicy {
    /// Creates a new reconnection policy with default settings.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a disabled reconnection policy.
    #[must_use]
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }

    /// Sets the delay before the first attempt.
    #[must_use]
    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Sets the amount added to the delay after every failed attempt.
    #[must_use]
    pub fn with_delay_increment(mut self, increment: Duration) -> Self {
        self.delay_increment = increment;
        self
    }

    /// Sets the maximum delay between attempts.
    #[must_use]
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Sets the grace period before devices are reported unavailable.
    #[must_use]
    pub fn with_unavailable_after(mut self, grace: Option<Duration>) -> Self {
        self.unavailable_after = grace;
        self
    }

    /// Calculates the delay before a given attempt.
    #[must_use]
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        self.delay_increment
            .checked_mul(attempt)
            .and_then(|extra| self.initial_delay.checked_add(extra))
            .map_or(self.max_delay, |delay| delay.min(self.max_delay))
    }
}

impl Default for ReconnectionPolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            initial_delay: Duration::from_secs(60),
            delay_increment: Duration::from_secs(60),
            max_delay: Duration::from_secs(300),
            unavailable_after: Some(Duration::from_secs(60)),
        }
    }
}
