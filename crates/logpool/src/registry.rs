// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Channel registry shared by producer connections and read-side adapters.
//!
//! The registry maps each channel key either to an active [`Channel`] or to a
//! [`LostChannel`] marker. Producer supervisors are the only writers of a channel's
//! history and slot; readers take snapshots and never hold a lock while waiting.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::channel::{Channel, ChannelKey, LostChannel};
use crate::constants::MAX_LOST_CHANNELS;
use crate::errors::ReadError;
use crate::slot::Batch;

#[derive(Debug, Default)]
struct RegistryState {
    active: HashMap<ChannelKey, Arc<Channel>>,
    lost: HashMap<ChannelKey, LostChannel>,
    losses: u64,
}

impl RegistryState {
    /// Drops the lost markers that were recorded first until at most `capacity` remain.
    fn evict_lost(&mut self, capacity: usize) {
        while self.lost.len() > capacity {
            let Some(oldest) = self
                .lost
                .iter()
                .min_by_key(|(_, lost)| lost.order)
                .map(|(key, _)| key.clone())
            else {
                return;
            };
            self.lost.remove(&oldest);
            debug!("Forgot history of lost channel {}", oldest);
        }
    }
}

#[derive(Debug)]
pub struct ChannelRegistry {
    state: RwLock<RegistryState>,
    next_connection: AtomicU64,
    lost_capacity: usize,
}

impl Default for ChannelRegistry {
    fn default() -> Self {
        Self::with_lost_capacity(MAX_LOST_CHANNELS)
    }
}

impl ChannelRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a registry that retains the history of at most `lost_capacity` lost
    /// channels.
    #[must_use]
    pub fn with_lost_capacity(lost_capacity: usize) -> Self {
        Self {
            state: RwLock::new(RegistryState::default()),
            next_connection: AtomicU64::new(0),
            lost_capacity,
        }
    }

    /// Creates the channel for `key`, replacing any previous owner of the key and
    /// clearing its lost marker. The channel always starts with an empty history.
    pub fn register(&self, key: ChannelKey, closer: CancellationToken) -> Arc<Channel> {
        let connection = self.next_connection.fetch_add(1, Ordering::Relaxed);
        let channel = Arc::new(Channel::new(key.clone(), connection, closer));

        #[allow(clippy::expect_used)]
        let mut state = self.state.write().expect("lock poisoned");
        if state.lost.remove(&key).is_some() {
            debug!("Cleared lost marker for channel {}", key);
        }
        if let Some(previous) = state.active.insert(key.clone(), Arc::clone(&channel)) {
            debug!(
                "Channel {} taken over by connection {} from connection {}",
                key,
                connection,
                previous.connection_id()
            );
        }
        drop(state);

        info!("Registered channel {} (connection {})", key, connection);
        channel
    }

    /// Tears down `channel`: closes its connection and, if it still owns its key,
    /// replaces the registry entry with a lost marker that keeps the history.
    ///
    /// Returns `false` when the key was already taken over by a newer connection, in
    /// which case the newer registration is left untouched.
    pub fn mark_lost(&self, channel: &Channel) -> bool {
        channel.closer().cancel();

        #[allow(clippy::expect_used)]
        let mut state = self.state.write().expect("lock poisoned");
        let owns_key = state
            .active
            .get(channel.key())
            .is_some_and(|current| current.connection_id() == channel.connection_id());
        if !owns_key {
            drop(state);
            debug!(
                "Connection {} for channel {} was superseded, leaving registry as is",
                channel.connection_id(),
                channel.key()
            );
            return false;
        }

        state.active.remove(channel.key());
        let since = Utc::now();
        let order = state.losses;
        state.losses += 1;
        state.lost.insert(
            channel.key().clone(),
            LostChannel {
                since,
                history: channel.take_history(),
                order,
            },
        );
        state.evict_lost(self.lost_capacity);
        drop(state);

        info!("Lost channel {} at {}", channel.key(), since);
        true
    }

    pub fn lookup(&self, key: &str) -> Result<Arc<Channel>, ReadError> {
        #[allow(clippy::expect_used)]
        let state = self.state.read().expect("lock poisoned");
        if let Some(channel) = state.active.get(key) {
            return Ok(Arc::clone(channel));
        }
        match state.lost.get(key) {
            Some(lost) => Err(ReadError::ChannelLost {
                key: key.to_string(),
                since: lost.since,
            }),
            None => Err(ReadError::ChannelNotFound(key.to_string())),
        }
    }

    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        #[allow(clippy::expect_used)]
        let state = self.state.read().expect("lock poisoned");
        state.active.contains_key(key) || state.lost.contains_key(key)
    }

    #[must_use]
    pub fn list_active_channels(&self) -> BTreeSet<String> {
        #[allow(clippy::expect_used)]
        let state = self.state.read().expect("lock poisoned");
        state.active.keys().map(|key| key.to_string()).collect()
    }

    #[must_use]
    pub fn list_lost_channels(&self) -> BTreeMap<String, DateTime<Utc>> {
        #[allow(clippy::expect_used)]
        let state = self.state.read().expect("lock poisoned");
        state
            .lost
            .iter()
            .map(|(key, lost)| (key.to_string(), lost.since))
            .collect()
    }

    /// Snapshot of the history of an active or lost channel.
    pub fn get_buffer(&self, key: &str) -> Result<Vec<String>, ReadError> {
        #[allow(clippy::expect_used)]
        let state = self.state.read().expect("lock poisoned");
        if let Some(channel) = state.active.get(key) {
            return Ok(channel.history());
        }
        state
            .lost
            .get(key)
            .map(|lost| lost.history.snapshot())
            .ok_or_else(|| ReadError::ChannelNotFound(key.to_string()))
    }

    /// Waits for the next batch published on `key`.
    ///
    /// The slot is fetched once, before waiting, so a batch published between the
    /// lookup and the wait is still observed.
    pub async fn await_next(&self, key: &str, timeout: Duration) -> Result<Batch, ReadError> {
        let slot = self.lookup(key)?.current_slot();
        slot.wait(timeout)
            .await
            .map_err(|_| ReadError::WaitTimedOut(key.to_string()))
    }

    /// Closes every active producer connection. Their supervisors then mark the
    /// channels lost on their own.
    pub fn close_all(&self) {
        #[allow(clippy::expect_used)]
        let state = self.state.read().expect("lock poisoned");
        for channel in state.active.values() {
            channel.closer().cancel();
        }
        debug!("Closed {} producer connections", state.active.len());
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn key(name: &str) -> ChannelKey {
        ChannelKey::parse(name).unwrap()
    }

    #[test]
    fn test_register_and_lookup() {
        let registry = ChannelRegistry::new();
        let channel = registry.register(key("app-1"), CancellationToken::new());

        let found = registry.lookup("app-1").unwrap();
        assert!(Arc::ptr_eq(&channel, &found));
        assert_eq!(
            registry.list_active_channels().into_iter().collect::<Vec<_>>(),
            vec!["app-1"]
        );
        assert!(registry.list_lost_channels().is_empty());
    }

    #[test]
    fn test_unknown_key_not_found() {
        let registry = ChannelRegistry::new();
        assert_eq!(
            registry.get_buffer("ghost"),
            Err(ReadError::ChannelNotFound("ghost".to_string()))
        );
        assert!(matches!(
            registry.lookup("ghost"),
            Err(ReadError::ChannelNotFound(_))
        ));
        assert!(!registry.contains("ghost"));
    }

    #[test]
    fn test_mark_lost_keeps_history_and_closes_connection() {
        let registry = ChannelRegistry::new();
        let closer = CancellationToken::new();
        let channel = registry.register(key("svc"), closer.clone());
        channel.publish(vec!["line1".to_string()]);

        assert!(registry.mark_lost(&channel));

        assert!(closer.is_cancelled());
        assert!(registry.list_active_channels().is_empty());
        assert!(registry.list_lost_channels().contains_key("svc"));
        assert_eq!(registry.get_buffer("svc").unwrap(), vec!["line1"]);
        assert!(matches!(
            registry.lookup("svc"),
            Err(ReadError::ChannelLost { .. })
        ));
    }

    #[test]
    fn test_reregistration_clears_lost_marker_and_history() {
        let registry = ChannelRegistry::new();
        let first = registry.register(key("svc"), CancellationToken::new());
        first.publish(vec!["old".to_string()]);
        registry.mark_lost(&first);

        let second = registry.register(key("svc"), CancellationToken::new());

        assert!(registry.list_lost_channels().is_empty());
        assert!(registry.get_buffer("svc").unwrap().is_empty());
        assert_ne!(first.connection_id(), second.connection_id());
    }

    #[test]
    fn test_superseded_connection_does_not_tear_down_new_owner() {
        let registry = ChannelRegistry::new();
        let old_closer = CancellationToken::new();
        let new_closer = CancellationToken::new();
        let old = registry.register(key("svc"), old_closer.clone());
        let new = registry.register(key("svc"), new_closer.clone());
        new.publish(vec!["fresh".to_string()]);

        assert!(!registry.mark_lost(&old));

        assert!(old_closer.is_cancelled());
        assert!(!new_closer.is_cancelled());
        assert!(registry.list_lost_channels().is_empty());
        assert_eq!(registry.get_buffer("svc").unwrap(), vec!["fresh"]);
    }

    #[tokio::test]
    async fn test_await_next_unknown_key_fails_immediately() {
        let registry = ChannelRegistry::new();
        let result = tokio::time::timeout(
            Duration::from_millis(100),
            registry.await_next("ghost", Duration::from_secs(30)),
        )
        .await
        .expect("lookup of an unknown key must not wait");
        assert_eq!(result, Err(ReadError::ChannelNotFound("ghost".to_string())));
    }

    #[tokio::test]
    async fn test_await_next_receives_published_batch() {
        let registry = Arc::new(ChannelRegistry::new());
        let channel = registry.register(key("app-1"), CancellationToken::new());

        let reader = {
            let registry = Arc::clone(&registry);
            tokio::spawn(async move { registry.await_next("app-1", Duration::from_secs(5)).await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;

        channel.publish(vec!["line1".to_string(), "line2".to_string()]);

        let batch = reader.await.unwrap().unwrap();
        assert_eq!(&*batch, &["line1".to_string(), "line2".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_await_next_times_out() {
        let registry = ChannelRegistry::new();
        registry.register(key("quiet"), CancellationToken::new());

        let result = registry.await_next("quiet", Duration::from_secs(30)).await;
        assert_eq!(result, Err(ReadError::WaitTimedOut("quiet".to_string())));
    }

    #[test]
    fn test_close_all_cancels_every_connection() {
        let registry = ChannelRegistry::new();
        let a = CancellationToken::new();
        let b = CancellationToken::new();
        registry.register(key("a"), a.clone());
        registry.register(key("b"), b.clone());

        registry.close_all();

        assert!(a.is_cancelled());
        assert!(b.is_cancelled());
    }

    #[test]
    fn test_lost_channels_are_capped() {
        let registry = ChannelRegistry::with_lost_capacity(2);
        for name in ["first", "second", "third"] {
            let channel = registry.register(key(name), CancellationToken::new());
            channel.publish(vec![format!("{name} line")]);
            assert!(registry.mark_lost(&channel));
        }

        let lost = registry.list_lost_channels();
        assert_eq!(lost.keys().collect::<Vec<_>>(), vec!["second", "third"]);
        assert_eq!(
            registry.get_buffer("first"),
            Err(ReadError::ChannelNotFound("first".to_string()))
        );
        assert_eq!(registry.get_buffer("third").unwrap(), vec!["third line"]);

        // Reconnecting frees a slot without evicting anything else.
        registry.register(key("second"), CancellationToken::new());
        let fourth = registry.register(key("fourth"), CancellationToken::new());
        registry.mark_lost(&fourth);
        assert_eq!(
            registry.list_lost_channels().keys().collect::<Vec<_>>(),
            vec!["fourth", "third"]
        );
        assert!(registry.lookup("second").is_ok());
    }
}
