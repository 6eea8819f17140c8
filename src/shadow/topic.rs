// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! AWS IoT classic shadow topics.
//!
//! - Requests: `$aws/things/<thing>/shadow/<operation>`
//! - Responses: `$aws/things/<thing>/shadow/<operation>/<outcome>`

use std::fmt;

const PREFIX: &str = "$aws/things/";

/// A shadow operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    /// Read the shadow document.
    Get,
    /// Change the desired state.
    Update,
}

impl Operation {
    fn as_str(self) -> &'static str {
        match self {
            Self::Get => "get",
            Self::Update => "update",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s {
            "get" => Some(Self::Get),
            "update" => Some(Self::Update),
            _ => None,
        }
    }
}

/// Outcome of a shadow operation reported by the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Outcome {
    /// The request was accepted.
    Accepted,
    /// The request was rejected.
    Rejected,
}

impl Outcome {
    fn as_str(self) -> &'static str {
        match self {
            Self::Accepted => "accepted",
            Self::Rejected => "rejected",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s {
            "accepted" => Some(Self::Accepted),
            "rejected" => Some(Self::Rejected),
            _ => None,
        }
    }
}

/// A parsed or constructed shadow topic.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ShadowTopic {
    /// The thing name (device code).
    pub thing: String,
    /// The shadow operation.
    pub operation: Operation,
    /// The response outcome, `None` for request topics.
    pub outcome: Option<Outcome>,
}

impl ShadowTopic {
    /// Creates a request topic.
    #[must_use]
    pub fn request(thing: impl Into<String>, operation: Operation) -> Self {
        Self {
            thing: thing.into(),
            operation,
            outcome: None,
        }
    }

    /// Creates a response topic.
    #[must_use]
    pub fn response(thing: impl Into<String>, operation: Operation, outcome: Outcome) -> Self {
        Self {
            thing: thing.into(),
            operation,
            outcome: Some(outcome),
        }
    }

    /// Parses a topic string. Returns `None` for anything that is not a
    /// classic shadow topic.
    #[must_use]
    pub fn parse(topic: &str) -> Option<Self> {
        let rest = topic.strip_prefix(PREFIX)?;
        let mut parts = rest.split('/');

        let thing = parts.next().filter(|thing| !thing.is_empty())?;
        if parts.next()? != "shadow" {
            return None;
        }
        let operation = Operation::parse(parts.next()?)?;
        let outcome = match parts.next() {
            Some(outcome) => Some(Outcome::parse(outcome)?),
            None => None,
        };
        if parts.next().is_some() {
            return None;
        }

        Some(Self {
            thing: thing.to_string(),
            operation,
            outcome,
        })
    }

    /// Returns the four response topics a session subscribes to for `thing`.
    #[must_use]
    pub fn response_filters(thing: &str) -> [String; 4] {
        [
            Self::response(thing, Operation::Get, Outcome::Accepted).to_string(),
            Self::response(thing, Operation::Get, Outcome::Rejected).to_string(),
            Self::response(thing, Operation::Update, Outcome::Accepted).to_string(),
            Self::response(thing, Operation::Update, Outcome::Rejected).to_string(),
        ]
    }
}

impl fmt::Display for ShadowTopic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{PREFIX}{}/shadow/{}", self.thing, self.operation.as_str())?;
        if let Some(outcome) = self.outcome {
            write!(f, "/{}", outcome.as_str())?;
        }
        Ok(())
    }
}
