// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::time::Duration;

/// Number of historical lines held per channel.
pub const HISTORY_CAPACITY: usize = 600;

/// Size of a single read from a producer transport.
pub const READ_BUFFER_SIZE: usize = 4096;

/// A producer that stays silent this long is probed again rather than dropped.
pub const READ_TIMEOUT: Duration = Duration::from_secs(30);

/// Pause between two reads of the same producer.
pub const PACING_INTERVAL: Duration = Duration::from_secs(1);

/// Lost channels whose history is retained; beyond this the earliest loss is forgotten.
pub const MAX_LOST_CHANNELS: usize = 1024;

/// How long a viewer waits for the next batch of lines.
pub const POLL_TIMEOUT: Duration = Duration::from_secs(30);

/// Acknowledgement sent to a producer once its channel is registered.
pub const REGISTRATION_ACK: &[u8] = b"continue\r\n";

/// Separator between log lines within one payload.
pub const LINE_SEPARATOR: &str = "\r\n";

pub const DEFAULT_INGRESS_PORT: u16 = 23456;
pub const DEFAULT_HOST: &str = "0.0.0.0";
