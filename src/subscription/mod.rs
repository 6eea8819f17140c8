// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Subscription system for state changes.
//!
//! Devices notify subscribers when their attributes change, and the
//! [`SessionManager`](crate::shadow::SessionManager) notifies observers of
//! shadow updates, reconnections and unavailability. Both use a
//! [`CallbackList`] and hand out [`SubscriptionId`]s for removal.
//!
//! # Usage
//!
//! ```
//! use std::sync::Arc;
//! use upgw::subscription::CallbackList;
//!
//! let list: CallbackList<dyn Fn(&str) + Send + Sync> = CallbackList::new();
//! let id = list.add(Arc::new(|name: &str| println!("{name} changed")));
//!
//! list.dispatch(|callback| callback("Bedroom"));
//! list.remove(id);
//! ```

mod callback;

pub use callback::{CallbackList, SubscriptionId};
