// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::borrow::Borrow;
use std::fmt;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;

use crate::errors::RegistrationError;
use crate::history::History;
use crate::slot::{Batch, NotificationSlot};

/// Name a producer registered under, trimmed of surrounding whitespace.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ChannelKey(String);

impl ChannelKey {
    /// Builds a key from a raw registration payload.
    pub fn parse(raw: &str) -> Result<Self, RegistrationError> {
        let key = raw.trim();
        if key.is_empty() {
            return Err(RegistrationError::Rejected);
        }
        Ok(Self(key.to_string()))
    }

    /// Reverses the URL encoding of a key, where `/` is written as `-`.
    #[must_use]
    pub fn decode_url_segment(segment: &str) -> String {
        segment.replace('-', "/")
    }

    /// Writes `key` as a single URL path segment.
    #[must_use]
    pub fn encode_url_segment(key: &str) -> String {
        key.replace('/', "-")
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ChannelKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Borrow<str> for ChannelKey {
    fn borrow(&self) -> &str {
        &self.0
    }
}

/// Identifies one producer connection, unique for the lifetime of a registry.
pub type ConnectionId = u64;

#[derive(Debug)]
struct ChannelState {
    history: History,
    slot: Arc<NotificationSlot>,
}

/// An active channel: its history, its current notification slot and the handle that
/// closes the owning producer connection.
#[derive(Debug)]
pub struct Channel {
    key: ChannelKey,
    connection: ConnectionId,
    closer: CancellationToken,
    state: Mutex<ChannelState>,
}

impl Channel {
    pub(crate) fn new(key: ChannelKey, connection: ConnectionId, closer: CancellationToken) -> Self {
        Self {
            key,
            connection,
            closer,
            state: Mutex::new(ChannelState {
                history: History::default(),
                slot: Arc::new(NotificationSlot::new()),
            }),
        }
    }

    #[must_use]
    pub fn key(&self) -> &ChannelKey {
        &self.key
    }

    #[must_use]
    pub fn connection_id(&self) -> ConnectionId {
        self.connection
    }

    /// Token cancelled when the producer connection must be closed.
    #[must_use]
    pub fn closer(&self) -> &CancellationToken {
        &self.closer
    }

    #[must_use]
    pub fn history(&self) -> Vec<String> {
        #[allow(clippy::expect_used)]
        let state = self.state.lock().expect("lock poisoned");
        state.history.snapshot()
    }

    /// The slot that will carry the next batch. Waiters must keep this exact instance.
    #[must_use]
    pub fn current_slot(&self) -> Arc<NotificationSlot> {
        #[allow(clippy::expect_used)]
        let state = self.state.lock().expect("lock poisoned");
        Arc::clone(&state.slot)
    }

    /// Appends `lines` to the history, resolves the current slot with them and installs a
    /// fresh slot, all under the channel lock.
    pub fn publish(&self, lines: Vec<String>) -> Batch {
        let batch: Batch = lines.into();

        #[allow(clippy::expect_used)]
        let mut state = self.state.lock().expect("lock poisoned");
        state.history.extend(batch.iter().cloned());

        let resolved = std::mem::replace(&mut state.slot, Arc::new(NotificationSlot::new()));
        if resolved.resolve(Arc::clone(&batch)).is_err() {
            tracing::warn!("Notification slot for channel {} was already resolved", self.key);
        }

        batch
    }

    pub(crate) fn take_history(&self) -> History {
        #[allow(clippy::expect_used)]
        let mut state = self.state.lock().expect("lock poisoned");
        std::mem::take(&mut state.history)
    }
}

/// Marker left behind when a channel's producer goes away.
#[derive(Debug, Clone)]
pub struct LostChannel {
    pub since: DateTime<Utc>,
    pub history: History,
    /// Position in the order channels were lost, used for eviction.
    pub(crate) order: u64,
}
