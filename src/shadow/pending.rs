// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Correlation of shadow requests and responses.
//!
//! Every request carries a fresh `clientToken`. The token maps to a one-shot
//! slot that is removed exactly once: when the response is resolved, or when
//! the waiting request is dropped (timeout or cancellation).

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::oneshot;
use uuid::Uuid;

use crate::error::ProtocolError;

/// Result delivered to a waiting request.
pub(crate) type Reply = Result<Value, ProtocolError>;

/// Pending requests of one session, keyed by client token.
#[derive(Debug, Default)]
pub(crate) struct PendingRequests {
    slots: Mutex<HashMap<String, oneshot::Sender<Reply>>>,
}

impl PendingRequests {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Registers a new request under a fresh token.
    pub(crate) fn register(self: &Arc<Self>) -> PendingRequest {
        let token = Uuid::new_v4().to_string();
        let (tx, rx) = oneshot::channel();
        self.slots.lock().insert(token.clone(), tx);

        PendingRequest {
            token,
            rx,
            owner: Arc::clone(self),
        }
    }

    /// Delivers `reply` to the request registered under `token`.
    ///
    /// Returns `false` if no such request is pending, e.g. because it already
    /// timed out.
    pub(crate) fn resolve(&self, token: &str, reply: Reply) -> bool {
        let Some(tx) = self.slots.lock().remove(token) else {
            return false;
        };
        // The receiver may be dropping concurrently; the slot is gone either way.
        let _ = tx.send(reply);
        true
    }

    /// Returns `true` if a request is pending under `token`.
    #[cfg(test)]
    pub(crate) fn contains(&self, token: &str) -> bool {
        self.slots.lock().contains_key(token)
    }

    /// Fails every pending request with [`ProtocolError::NotConnected`].
    pub(crate) fn cancel_all(&self) {
        let slots: Vec<_> = self.slots.lock().drain().collect();
        for (_, tx) in slots {
            let _ = tx.send(Err(ProtocolError::NotConnected));
        }
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.slots.lock().len()
    }
}

/// A registered request waiting for its response.
///
/// Dropping it removes the slot if it is still pending.
#[derive(Debug)]
pub(crate) struct PendingRequest {
    token: String,
    rx: oneshot::Receiver<Reply>,
    owner: Arc<PendingRequests>,
}

impl PendingRequest {
    pub(crate) fn token(&self) -> &str {
        &self.token
    }

    /// Waits for the response.
    pub(crate) async fn wait(&mut self) -> Reply {
        (&mut self.rx)
            .await
            .unwrap_or_else(|_| Err(ProtocolError::ChannelClosed("shadow session closed".to_string())))
    }
}

impl Drop for PendingRequest {
    fn drop(&mut self) {
        self.owner.slots.lock().remove(&self.token);
    }
}
