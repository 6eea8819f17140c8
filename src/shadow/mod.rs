// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! AWS IoT device shadows.
//!
//! - [`codec`] - attribute changes to and from shadow documents
//! - [`topic`] - shadow request and response topics
//! - [`ShadowSession`] - one connection per gateway, request correlation
//!   and reconnection
//! - [`SessionManager`] - lazily created sessions shared by gateway code

pub mod codec;
mod connection;
mod manager;
mod pending;
mod session;
pub mod topic;

pub use manager::{GatewayCallback, SessionManager, UpdateCallback};
pub use session::{SessionHandlers, SessionParams, ShadowSession};
