// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Publish/subscribe transport used by shadow sessions.
//!
//! A [`Connector`] opens one connection and returns two halves:
//!
//! - a [`Link`] to subscribe, publish and disconnect, shareable across tasks
//! - an [`EventSource`] yielding [`LinkEvent`]s, driven by a dedicated thread
//!
//! All calls are blocking. Shadow sessions call them from blocking threads
//! and bridge events into the async runtime over a channel.
//!
//! The MQTT implementation is in [`mqtt`] (feature `mqtt`).

#[cfg(feature = "mqtt")]
pub mod mqtt;

use std::sync::Arc;
use std::time::Duration;

use crate::credentials::CredentialsProvider;
use crate::error::ProtocolError;

#[cfg(feature = "mqtt")]
pub use mqtt::{HandshakeSigner, MqttConnector};

/// Parameters of one connection attempt.
#[derive(Clone)]
pub struct ConnectOptions {
    /// Client id, unique per attempt.
    pub client_id: String,
    /// Keep-alive interval.
    pub keep_alive: Duration,
    /// Credentials used to sign the handshake.
    pub credentials: Arc<dyn CredentialsProvider>,
}

impl std::fmt::Debug for ConnectOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectOptions")
            .field("client_id", &self.client_id)
            .field("keep_alive", &self.keep_alive)
            .finish_non_exhaustive()
    }
}

/// An event reported by a connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    /// The initial handshake completed.
    Connected,
    /// One subscribe request was acknowledged.
    Subscribed,
    /// A message arrived.
    Message {
        /// Topic of the message.
        topic: String,
        /// Raw payload.
        payload: Vec<u8>,
    },
    /// The connection was lost. The transport may recover on its own.
    Interrupted {
        /// Description of the failure.
        reason: String,
    },
    /// The transport re-established the connection after an interruption.
    Resumed,
}

/// Sending half of a connection.
pub trait Link: Send + Sync {
    /// Subscribes to `filters` with one subscribe request.
    ///
    /// Acknowledgement arrives as a single [`LinkEvent::Subscribed`].
    ///
    /// # Errors
    ///
    /// Returns error if the request cannot be queued.
    fn subscribe(&self, filters: &[String]) -> Result<(), ProtocolError>;

    /// Publishes `payload` on `topic`.
    ///
    /// # Errors
    ///
    /// Returns error if the message cannot be queued.
    fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), ProtocolError>;

    /// Requests the connection to close.
    ///
    /// Must not block. The paired [`EventSource`] returns `None` once the
    /// connection is closed.
    ///
    /// # Errors
    ///
    /// Returns error if the request cannot be queued.
    fn disconnect(&self) -> Result<(), ProtocolError>;
}

/// Receiving half of a connection.
pub trait EventSource: Send {
    /// Blocks until the next event. Returns `None` once the connection has
    /// been closed through [`Link::disconnect`] and will yield no more events.
    fn next_event(&mut self) -> Option<LinkEvent>;
}

/// A connection returned by a [`Connector`].
pub type LinkPair = (Arc<dyn Link>, Box<dyn EventSource>);

/// Opens connections to the shadow service.
pub trait Connector: Send + Sync {
    /// Opens a connection.
    ///
    /// The handshake may complete after this returns; the event source then
    /// reports [`LinkEvent::Connected`].
    ///
    /// # Errors
    ///
    /// Returns error if the connection cannot be set up.
    fn connect(&self, options: ConnectOptions) -> Result<LinkPair, ProtocolError>;
}
