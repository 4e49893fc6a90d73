// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Error types for the channel registry, notification slots and producer connections.

use chrono::{DateTime, Utc};

/// Failure to turn a fresh producer connection into a registered channel.
#[derive(Debug, thiserror::Error)]
pub enum RegistrationError {
    #[error("channel name is empty or whitespace")]
    Rejected,
    #[error("connection closed before a channel name was received")]
    StreamClosed,
    #[error("transport error during registration: {0}")]
    Transport(#[from] std::io::Error),
    #[error("registration interrupted by shutdown")]
    Shutdown,
}

/// Errors returned to read-side callers.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ReadError {
    #[error("channel not found: {0}")]
    ChannelNotFound(String),
    #[error("channel {key} was lost at {since}")]
    ChannelLost { key: String, since: DateTime<Utc> },
    #[error("timed out waiting for new lines on channel {0}")]
    WaitTimedOut(String),
}

/// A second resolution of a [`NotificationSlot`](crate::slot::NotificationSlot).
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("notification slot already resolved")]
pub struct AlreadyResolved;

/// The slot was not resolved before the wait deadline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("timed out waiting for notification slot")]
pub struct WaitElapsed;
