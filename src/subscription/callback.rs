// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Callback management for subscriptions.
//!
//! - [`SubscriptionId`] - Unique identifier for unsubscribing
//! - [`CallbackList`] - Ordered, thread-safe list of callbacks

use std::collections::BTreeMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;

/// Process-wide counter, so identifiers never collide between lists.
static NEXT_SUBSCRIPTION_ID: AtomicU64 = AtomicU64::new(1);

/// Unique identifier for a subscription.
///
/// Returned when registering a callback and used to remove it later.
/// Identifiers increase monotonically, so ordering them gives registration
/// order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SubscriptionId(u64);

impl SubscriptionId {
    fn next() -> Self {
        Self(NEXT_SUBSCRIPTION_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Returns the raw ID value.
    #[must_use]
    pub fn value(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Sub({})", self.0)
    }
}

/// An ordered list of callbacks of type `F`.
///
/// Callbacks are invoked in registration order. The list is snapshotted
/// before invocation, so a callback may register or remove callbacks
/// without deadlocking. A panicking callback is logged and skipped; the
/// remaining callbacks still run.
pub struct CallbackList<F: ?Sized> {
    callbacks: RwLock<BTreeMap<SubscriptionId, Arc<F>>>,
}

impl<F: ?Sized> CallbackList<F> {
    /// Creates an empty list.
    #[must_use]
    pub fn new() -> Self {
        Self {
            callbacks: RwLock::new(BTreeMap::new()),
        }
    }

    /// Adds a callback and returns its identifier.
    pub fn add(&self, callback: Arc<F>) -> SubscriptionId {
        let id = SubscriptionId::next();
        self.callbacks.write().insert(id, callback);
        id
    }

    /// Removes a callback. Returns `true` if it was registered.
    pub fn remove(&self, id: SubscriptionId) -> bool {
        self.callbacks.write().remove(&id).is_some()
    }

    /// Removes every callback.
    pub fn clear(&self) {
        self.callbacks.write().clear();
    }

    /// Returns the number of registered callbacks.
    #[must_use]
    pub fn len(&self) -> usize {
        self.callbacks.read().len()
    }

    /// Returns `true` if no callback is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.callbacks.read().is_empty()
    }

    /// Invokes `call` for every callback in registration order.
    pub fn dispatch(&self, call: impl Fn(&F)) {
        let snapshot: Vec<(SubscriptionId, Arc<F>)> = self
            .callbacks
            .read()
            .iter()
            .map(|(id, callback)| (*id, Arc::clone(callback)))
            .collect();

        for (id, callback) in snapshot {
            if catch_unwind(AssertUnwindSafe(|| call(&callback))).is_err() {
                tracing::error!(subscription = %id, "Subscriber callback panicked");
            }
        }
    }
}

impl<F: ?Sized> Default for CallbackList<F> {
    fn default() -> Self {
        Self::new()
    }
}

impl<F: ?Sized> std::fmt::Debug for CallbackList<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallbackList")
            .field("len", &self.len())
            .finish()
    }
}
