// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! MQTT transport based on `rumqttc`.
//!
//! The production service is reached over MQTT on a WebSocket to
//! `wss://<endpoint>/mqtt`, with the WebSocket handshake signed using the
//! occupant's AWS credentials. Signing itself is delegated to a
//! [`HandshakeSigner`]. A plain TCP connector is available for local brokers.
//!
//! # Examples
//!
//! ```no_run
//! use upgw::transport::MqttConnector;
//!
//! // Local broker, no signing
//! let connector = MqttConnector::tcp("127.0.0.1", 1883);
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use rumqttc::{Client, Connection, Event, MqttOptions, Outgoing, Packet, QoS, SubscribeFilter};

use crate::config::ClientConfig;
use crate::credentials::AwsCredentials;
use crate::error::ProtocolError;
use crate::transport::{ConnectOptions, Connector, EventSource, Link, LinkEvent, LinkPair};

/// Capacity of the request queue between a link and its event loop.
const REQUEST_CAPACITY: usize = 10;

/// Pause between reconnection attempts of the event loop itself.
const RETRY_DELAY: Duration = Duration::from_secs(5);

/// Signs the WebSocket upgrade request of a connection attempt.
///
/// Called on the connection's network thread before every handshake,
/// including reconnections performed by the event loop.
pub trait HandshakeSigner: Send + Sync {
    /// Adds authentication to `request` (e.g. a `SigV4` presigned query).
    ///
    /// # Errors
    ///
    /// Returns error if the request cannot be signed.
    fn sign(
        &self,
        request: &mut http::Request<()>,
        credentials: &AwsCredentials,
        region: &str,
    ) -> Result<(), ProtocolError>;
}

#[derive(Clone)]
enum Endpoint {
    WebSocket {
        host: String,
        region: String,
        signer: Arc<dyn HandshakeSigner>,
    },
    Tcp {
        host: String,
        port: u16,
    },
}

/// [`Connector`] opening `rumqttc` connections.
#[derive(Clone)]
pub struct MqttConnector {
    endpoint: Endpoint,
}

impl MqttConnector {
    /// Creates a connector for the AWS IoT endpoint `host` over WebSockets.
    #[must_use]
    pub fn websocket(
        host: impl Into<String>,
        region: impl Into<String>,
        signer: Arc<dyn HandshakeSigner>,
    ) -> Self {
        Self {
            endpoint: Endpoint::WebSocket {
                host: host.into(),
                region: region.into(),
                signer,
            },
        }
    }

    /// Creates a connector for the endpoint and region of `config`.
    #[must_use]
    pub fn from_config(config: &ClientConfig, signer: Arc<dyn HandshakeSigner>) -> Self {
        Self::websocket(&config.aws_iot_endpoint, &config.aws_region, signer)
    }

    /// Creates a connector for a plain TCP broker.
    #[must_use]
    pub fn tcp(host: impl Into<String>, port: u16) -> Self {
        Self {
            endpoint: Endpoint::Tcp {
                host: host.into(),
                port,
            },
        }
    }

    fn mqtt_options(&self, options: &ConnectOptions) -> MqttOptions {
        match &self.endpoint {
            Endpoint::Tcp { host, port } => MqttOptions::new(&options.client_id, host, *port),
            Endpoint::WebSocket {
                host,
                region,
                signer,
            } => {
                let mut mqtt_options =
                    MqttOptions::new(&options.client_id, format!("wss://{host}/mqtt"), 443);
                mqtt_options.set_transport(rumqttc::Transport::wss_with_default_config());

                let credentials = Arc::clone(&options.credentials);
                let signer = Arc::clone(signer);
                let region = region.clone();
                mqtt_options.set_request_modifier(move |mut request: http::Request<()>| {
                    let credentials = Arc::clone(&credentials);
                    let signer = Arc::clone(&signer);
                    let region = region.clone();
                    async move {
                        match credentials.credentials() {
                            Ok(credentials) => {
                                if let Err(e) = signer.sign(&mut request, &credentials, &region) {
                                    tracing::warn!(error = %e, "Failed to sign MQTT handshake");
                                }
                            }
                            Err(e) => {
                                tracing::warn!(error = %e, "Failed to obtain MQTT credentials");
                            }
                        }
                        request
                    }
                });
                mqtt_options
            }
        }
    }
}

impl std::fmt::Debug for MqttConnector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.endpoint {
            Endpoint::WebSocket { host, region, .. } => f
                .debug_struct("MqttConnector")
                .field("host", host)
                .field("region", region)
                .finish_non_exhaustive(),
            Endpoint::Tcp { host, port } => f
                .debug_struct("MqttConnector")
                .field("host", host)
                .field("port", port)
                .finish(),
        }
    }
}

impl Connector for MqttConnector {
    fn connect(&self, options: ConnectOptions) -> Result<LinkPair, ProtocolError> {
        let mut mqtt_options = self.mqtt_options(&options);
        mqtt_options.set_keep_alive(options.keep_alive);
        // The service keeps subscriptions of persistent sessions across
        // reconnects of the same client id.
        mqtt_options.set_clean_session(false);

        tracing::debug!(client_id = %options.client_id, connector = ?self, "Opening MQTT connection");

        let (client, connection) = Client::new(mqtt_options, REQUEST_CAPACITY);
        let closing = Arc::new(AtomicBool::new(false));

        let link = MqttLink {
            client,
            closing: Arc::clone(&closing),
        };
        let events = MqttEventSource {
            connection,
            closing,
            connected: false,
            interrupted: false,
            retry_pending: false,
        };
        Ok((Arc::new(link), Box::new(events)))
    }
}

struct MqttLink {
    client: Client,
    closing: Arc<AtomicBool>,
}

impl Link for MqttLink {
    fn subscribe(&self, filters: &[String]) -> Result<(), ProtocolError> {
        let filters = filters
            .iter()
            .map(|filter| SubscribeFilter::new(filter.clone(), QoS::AtLeastOnce));
        self.client
            .subscribe_many(filters)
            .map_err(ProtocolError::Mqtt)
    }

    fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), ProtocolError> {
        self.client
            .publish(topic, QoS::AtLeastOnce, false, payload)
            .map_err(ProtocolError::Mqtt)
    }

    fn disconnect(&self) -> Result<(), ProtocolError> {
        self.closing.store(true, Ordering::Release);
        self.client.try_disconnect().map_err(ProtocolError::Mqtt)
    }
}

struct MqttEventSource {
    connection: Connection,
    closing: Arc<AtomicBool>,
    connected: bool,
    interrupted: bool,
    retry_pending: bool,
}

impl MqttEventSource {
    fn is_closing(&self) -> bool {
        self.closing.load(Ordering::Acquire)
    }

    /// Sleeps for [`RETRY_DELAY`], returning early when the link closes.
    fn pause_before_retry(&self) {
        let step = Duration::from_millis(100);
        let mut waited = Duration::ZERO;
        while waited < RETRY_DELAY && !self.is_closing() {
            std::thread::sleep(step);
            waited += step;
        }
    }
}

impl EventSource for MqttEventSource {
    fn next_event(&mut self) -> Option<LinkEvent> {
        loop {
            if self.is_closing() {
                return None;
            }
            if self.retry_pending {
                self.retry_pending = false;
                self.pause_before_retry();
                continue;
            }

            match self.connection.recv() {
                Err(_) => return None,
                Ok(Ok(Event::Incoming(Packet::ConnAck(connack)))) => {
                    tracing::debug!(?connack, "MQTT connected");
                    let event = if self.connected && self.interrupted {
                        LinkEvent::Resumed
                    } else {
                        LinkEvent::Connected
                    };
                    self.connected = true;
                    self.interrupted = false;
                    return Some(event);
                }
                Ok(Ok(Event::Incoming(Packet::SubAck(suback)))) => {
                    tracing::debug!(?suback, "MQTT subscription acknowledged");
                    return Some(LinkEvent::Subscribed);
                }
                Ok(Ok(Event::Incoming(Packet::Publish(publish)))) => {
                    return Some(LinkEvent::Message {
                        topic: publish.topic,
                        payload: publish.payload.to_vec(),
                    });
                }
                Ok(Ok(Event::Outgoing(Outgoing::Disconnect))) if self.is_closing() => {
                    return None;
                }
                Ok(Ok(_)) => {}
                Ok(Err(e)) => {
                    if self.is_closing() {
                        return None;
                    }
                    self.retry_pending = true;
                    if !self.interrupted {
                        self.interrupted = true;
                        tracing::warn!(error = %e, "MQTT connection interrupted");
                        return Some(LinkEvent::Interrupted {
                            reason: e.to_string(),
                        });
                    }
                    tracing::debug!(error = %e, "MQTT reconnection attempt failed");
                }
            }
        }
    }
}
