// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! One live transport connection of a shadow session.
//!
//! Establishing a connection opens it through the [`Connector`], starts the
//! network thread that drives its [`EventSource`], waits for the handshake
//! and subscribes to the response topics of every thing. The connection is
//! only handed out once every subscription is acknowledged.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::error::ProtocolError;
use crate::transport::{ConnectOptions, Connector, EventSource, Link, LinkEvent};

/// AWS IoT accepts at most 8 topic filters per SUBSCRIBE.
pub(crate) const MAX_FILTERS_PER_SUBSCRIBE: usize = 8;

/// Upper bound for waiting on the network thread after a disconnect.
const THREAD_JOIN_TIMEOUT: Duration = Duration::from_secs(30);

/// A connection together with its event stream.
pub(crate) struct Established {
    pub(crate) connection: Arc<Connection>,
    pub(crate) events: mpsc::UnboundedReceiver<LinkEvent>,
    /// Messages that arrived during the handshake, in arrival order.
    pub(crate) early_messages: Vec<LinkEvent>,
}

/// A transport connection and the thread driving it.
pub(crate) struct Connection {
    client_id: String,
    link: Arc<dyn Link>,
    thread: Mutex<Option<JoinHandle<()>>>,
    retired: AtomicBool,
}

impl Connection {
    pub(crate) fn client_id(&self) -> &str {
        &self.client_id
    }

    pub(crate) fn link(&self) -> Arc<dyn Link> {
        Arc::clone(&self.link)
    }

    /// Disconnects and waits for the network thread to finish.
    ///
    /// Only the first call has an effect.
    pub(crate) async fn shutdown(&self) -> Result<(), ProtocolError> {
        if self.retired.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        tracing::debug!(client_id = %self.client_id, "Disconnecting shadow connection");
        let disconnected = self.link.disconnect();
        if let Err(e) = &disconnected {
            tracing::debug!(client_id = %self.client_id, error = %e, "Disconnect request failed");
        }

        let thread = self.thread.lock().take();
        if let Some(thread) = thread {
            let join = tokio::task::spawn_blocking(move || thread.join());
            match tokio::time::timeout(THREAD_JOIN_TIMEOUT, join).await {
                Ok(Ok(Ok(()))) => {}
                Ok(Ok(Err(_))) => {
                    tracing::error!(client_id = %self.client_id, "Network thread panicked");
                }
                Ok(Err(e)) => {
                    tracing::warn!(client_id = %self.client_id, error = %e, "Failed to join network thread");
                }
                Err(_) => {
                    tracing::warn!(
                        client_id = %self.client_id,
                        "Network thread did not stop in time, detaching"
                    );
                }
            }
        }

        disconnected
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        if !self.retired.load(Ordering::Acquire) {
            let _ = self.link.disconnect();
        }
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("client_id", &self.client_id)
            .field("retired", &self.retired.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

/// Opens a connection and subscribes to `filters`, all within `timeout`.
///
/// On failure the partially opened connection is shut down.
pub(crate) async fn establish(
    connector: Arc<dyn Connector>,
    options: ConnectOptions,
    filters: Vec<String>,
    timeout: Duration,
) -> Result<Established, ProtocolError> {
    let client_id = options.client_id.clone();
    let deadline = tokio::time::Instant::now() + timeout;
    tracing::debug!(client_id = %client_id, filters = filters.len(), "Establishing shadow connection");

    let opening = async {
        let (link, source) = tokio::task::spawn_blocking(move || connector.connect(options))
            .await
            .map_err(|e| ProtocolError::ConnectionFailed(format!("connect task failed: {e}")))??;

        let (tx, events) = mpsc::unbounded_channel();
        let thread = match std::thread::Builder::new()
            .name(format!("shadow-{client_id}"))
            .spawn(move || drive(source, &tx))
        {
            Ok(thread) => thread,
            Err(e) => {
                let _ = link.disconnect();
                return Err(ProtocolError::ConnectionFailed(format!(
                    "failed to spawn network thread: {e}"
                )));
            }
        };

        let connection = Arc::new(Connection {
            client_id: client_id.clone(),
            link,
            thread: Mutex::new(Some(thread)),
            retired: AtomicBool::new(false),
        });
        Ok::<_, ProtocolError>((connection, events))
    };

    let (connection, mut events) = tokio::time::timeout_at(deadline, opening)
        .await
        .map_err(|_| timed_out(timeout))??;

    match tokio::time::timeout_at(deadline, handshake(&connection, &mut events, &filters)).await {
        Ok(Ok(early_messages)) => {
            tracing::info!(client_id = %connection.client_id, "Shadow connection established");
            Ok(Established {
                connection,
                events,
                early_messages,
            })
        }
        Ok(Err(e)) => {
            let _ = connection.shutdown().await;
            Err(e)
        }
        Err(_) => {
            let _ = connection.shutdown().await;
            Err(timed_out(timeout))
        }
    }
}

fn timed_out(timeout: Duration) -> ProtocolError {
    ProtocolError::Timeout(u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX))
}

/// Forwards events into the runtime until the source ends or nobody listens.
fn drive(mut source: Box<dyn EventSource>, tx: &mpsc::UnboundedSender<LinkEvent>) {
    while let Some(event) = source.next_event() {
        if tx.send(event).is_err() {
            break;
        }
    }
    tracing::debug!("Network thread finished");
}

async fn handshake(
    connection: &Connection,
    events: &mut mpsc::UnboundedReceiver<LinkEvent>,
    filters: &[String],
) -> Result<Vec<LinkEvent>, ProtocolError> {
    let mut early_messages = Vec::new();

    loop {
        match next(events).await? {
            LinkEvent::Connected | LinkEvent::Resumed => break,
            LinkEvent::Interrupted { reason } => return Err(ProtocolError::ConnectionFailed(reason)),
            message @ LinkEvent::Message { .. } => early_messages.push(message),
            LinkEvent::Subscribed => {}
        }
    }

    let batches: Vec<Vec<String>> = filters
        .chunks(MAX_FILTERS_PER_SUBSCRIBE)
        .map(<[String]>::to_vec)
        .collect();
    let expected = batches.len();

    for batch in batches {
        let link = connection.link();
        tokio::task::spawn_blocking(move || link.subscribe(&batch))
            .await
            .map_err(|e| ProtocolError::ConnectionFailed(format!("subscribe task failed: {e}")))??;
    }

    let mut acknowledged = 0;
    while acknowledged < expected {
        match next(events).await? {
            LinkEvent::Subscribed => acknowledged += 1,
            LinkEvent::Interrupted { reason } => return Err(ProtocolError::ConnectionFailed(reason)),
            message @ LinkEvent::Message { .. } => early_messages.push(message),
            LinkEvent::Connected | LinkEvent::Resumed => {}
        }
    }

    tracing::debug!(
        client_id = %connection.client_id,
        subscriptions = expected,
        "Shadow subscriptions acknowledged"
    );
    Ok(early_messages)
}

async fn next(events: &mut mpsc::UnboundedReceiver<LinkEvent>) -> Result<LinkEvent, ProtocolError> {
    events.recv().await.ok_or_else(|| {
        ProtocolError::ConnectionFailed("connection closed during handshake".to_string())
    })
}
