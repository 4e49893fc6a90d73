// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Read-side HTTP adapter for the logpool channel registry.
//!
//! | Path | Response |
//! |------|----------|
//! | `/` | active and lost channel names |
//! | `/buffer/<channel>` | recent history of a channel |
//! | `/poll/<channel>` | next batch of lines, waiting up to 30 seconds |
//! | `/lost` | lost channels with the time they were lost |
//!
//! A `/` inside a channel name is written as `-` in the URL.

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

pub mod http_utils;
pub mod server;
