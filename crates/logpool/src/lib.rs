// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Channel registry and notification engine of a real-time log relay.
//!
//! Producers open a TCP connection, register a channel name and stream log lines.
//! Each channel keeps a bounded history and a single-assignment notification slot
//! that lets any number of viewers wait for the next batch of lines.

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

pub mod accept;
pub mod channel;
pub mod constants;
pub mod errors;
pub mod history;
pub mod listener;
pub mod message;
pub mod registry;
pub mod slot;
pub mod supervisor;

pub use channel::{Channel, ChannelKey};
pub use errors::{AlreadyResolved, ReadError, RegistrationError, WaitElapsed};
pub use registry::ChannelRegistry;
pub use slot::{Batch, NotificationSlot};
