// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Single-assignment notification slot.
//!
//! A [`NotificationSlot`] represents "the next batch of lines" for one channel. It is
//! resolved at most once and every waiter sees the same batch. Once resolved, the
//! channel installs a fresh slot for the following batch, so waiters must hold on to
//! the instance they fetched instead of looking the slot up again.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

use crate::errors::{AlreadyResolved, WaitElapsed};

/// Lines published together by one read from a producer.
pub type Batch = Arc<[String]>;

#[derive(Debug)]
pub struct NotificationSlot {
    tx: watch::Sender<Option<Batch>>,
}

impl Default for NotificationSlot {
    fn default() -> Self {
        Self::new()
    }
}

impl NotificationSlot {
    #[must_use]
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(None);
        Self { tx }
    }

    /// Resolves the slot and wakes every current waiter.
    ///
    /// Only the first call succeeds; later calls leave the stored batch untouched.
    pub fn resolve(&self, batch: Batch) -> Result<(), AlreadyResolved> {
        let mut pending = Some(batch);
        let resolved = self.tx.send_if_modified(|current| {
            if current.is_some() {
                return false;
            }
            *current = pending.take();
            true
        });

        if resolved {
            Ok(())
        } else {
            Err(AlreadyResolved)
        }
    }

    #[must_use]
    pub fn is_resolved(&self) -> bool {
        self.tx.borrow().is_some()
    }

    /// Returns the batch if the slot is already resolved, without waiting.
    #[must_use]
    pub fn peek(&self) -> Option<Batch> {
        self.tx.borrow().clone()
    }

    /// Waits until the slot is resolved or `timeout` elapses.
    ///
    /// Returns immediately when the slot was resolved before the call.
    pub async fn wait(&self, timeout: Duration) -> Result<Batch, WaitElapsed> {
        let mut rx = self.tx.subscribe();
        let waited = tokio::time::timeout(timeout, async move {
            rx.wait_for(Option::is_some).await.map(|value| value.clone())
        })
        .await;

        match waited {
            Ok(Ok(Some(batch))) => Ok(batch),
            // The sender lives as long as `self`, so the receiver cannot observe a close.
            Ok(Ok(None)) | Ok(Err(_)) | Err(_) => Err(WaitElapsed),
        }
    }
}
