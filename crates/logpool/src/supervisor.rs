// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Per-connection producer supervision.
//!
//! A producer connection first goes through the registration handshake ([`register`]):
//! one untimed read carries the channel name, and the server answers with a literal
//! acknowledgement. The returned [`ConnectionSupervisor`] then drives the read loop:
//!
//! - a read that times out is a liveness probe: pause, then read again;
//! - a read with data publishes the parsed lines on the channel, then pauses;
//! - end of stream, a transport error or cancellation terminates the connection and
//!   marks the channel lost.

use std::io;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::channel::{Channel, ChannelKey};
use crate::constants::{PACING_INTERVAL, READ_BUFFER_SIZE, READ_TIMEOUT, REGISTRATION_ACK};
use crate::errors::RegistrationError;
use crate::message::{decode_payload, parse_lines, StreamDecoder};
use crate::registry::ChannelRegistry;

#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    /// Bound on a single read before the connection is probed again.
    pub read_timeout: Duration,
    /// Pause after every read cycle.
    pub pacing: Duration,
    pub read_buffer_size: usize,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            read_timeout: READ_TIMEOUT,
            pacing: PACING_INTERVAL,
            read_buffer_size: READ_BUFFER_SIZE,
        }
    }
}

enum ReadOutcome {
    Data(usize),
    TimedOut,
    EndOfStream,
    Failed(io::Error),
    Cancelled,
}

/// Runs the registration handshake on a fresh producer connection.
///
/// No registry state is created unless a non-blank channel name arrives.
pub async fn register<S>(
    registry: Arc<ChannelRegistry>,
    mut stream: S,
    closer: CancellationToken,
    config: SupervisorConfig,
) -> Result<ConnectionSupervisor<S>, RegistrationError>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    let mut buf = vec![0; config.read_buffer_size.max(1)];
    let read = tokio::select! {
        biased;
        () = closer.cancelled() => return Err(RegistrationError::Shutdown),
        read = stream.read(&mut buf) => read?,
    };
    if read == 0 {
        return Err(RegistrationError::StreamClosed);
    }

    let key = ChannelKey::parse(&decode_payload(&buf[..read]))?;
    let channel = registry.register(key, closer);

    let acked = async {
        stream.write_all(REGISTRATION_ACK).await?;
        stream.flush().await
    }
    .await;
    if let Err(e) = acked {
        warn!(
            "Failed to acknowledge registration of channel {}: {}",
            channel.key(),
            e
        );
        registry.mark_lost(&channel);
        return Err(e.into());
    }

    Ok(ConnectionSupervisor {
        registry,
        channel,
        stream,
        config,
        buf,
        decoder: StreamDecoder::new(),
    })
}

/// Runs the whole lifecycle of one producer connection: handshake, then the read loop
/// until the connection goes away. Never returns an error; failures end up as
/// registry state or log lines.
pub async fn supervise<S>(
    registry: Arc<ChannelRegistry>,
    stream: S,
    closer: CancellationToken,
    config: SupervisorConfig,
    peer: impl std::fmt::Display,
) where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    match register(registry, stream, closer, config).await {
        Ok(supervisor) => supervisor.run().await,
        Err(RegistrationError::Rejected) => {
            info!("Client {} neglected to register a channel name", peer);
        }
        Err(e) => debug!("Registration of client {} failed: {}", peer, e),
    }
}

/// Owns one registered producer connection and its channel.
pub struct ConnectionSupervisor<S> {
    registry: Arc<ChannelRegistry>,
    channel: Arc<Channel>,
    stream: S,
    config: SupervisorConfig,
    buf: Vec<u8>,
    decoder: StreamDecoder,
}

impl<S> ConnectionSupervisor<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    #[must_use]
    pub fn channel(&self) -> &Arc<Channel> {
        &self.channel
    }

    /// Polls the connection until it ends, then marks the channel lost.
    pub async fn run(mut self) {
        debug!("Polling channel {}", self.channel.key());

        loop {
            match self.read_once().await {
                ReadOutcome::TimedOut => {
                    trace!(
                        "Channel {} silent for {:?}, probing again",
                        self.channel.key(),
                        self.config.read_timeout
                    );
                }
                ReadOutcome::Data(read) => {
                    let payload = self.decoder.decode(&self.buf[..read]);
                    self.publish(&payload);
                }
                ReadOutcome::EndOfStream => {
                    debug!("Channel {} closed by producer", self.channel.key());
                    if self.decoder.has_pending() {
                        let tail = self.decoder.finish();
                        self.publish(&tail);
                    }
                    break;
                }
                ReadOutcome::Failed(e) => {
                    warn!("Read error on channel {}: {}", self.channel.key(), e);
                    break;
                }
                ReadOutcome::Cancelled => {
                    debug!("Channel {} closed by server", self.channel.key());
                    break;
                }
            }

            if !self.pace().await {
                break;
            }
        }

        self.terminate().await;
    }

    fn publish(&self, payload: &str) {
        let lines = parse_lines(payload);
        if lines.is_empty() {
            trace!("Ignoring blank payload on channel {}", self.channel.key());
            return;
        }
        let batch = self.channel.publish(lines);
        debug!(
            "Channel {} received {} lines",
            self.channel.key(),
            batch.len()
        );
    }

    async fn read_once(&mut self) -> ReadOutcome {
        let closer = self.channel.closer().clone();
        tokio::select! {
            biased;
            () = closer.cancelled() => ReadOutcome::Cancelled,
            read = tokio::time::timeout(self.config.read_timeout, self.stream.read(&mut self.buf)) => {
                match read {
                    Err(_elapsed) => ReadOutcome::TimedOut,
                    Ok(Ok(0)) => ReadOutcome::EndOfStream,
                    Ok(Ok(read)) => ReadOutcome::Data(read),
                    Ok(Err(e)) => ReadOutcome::Failed(e),
                }
            }
        }
    }

    /// Sleeps for the pacing interval. Returns `false` if the connection was closed
    /// in the meantime.
    async fn pace(&mut self) -> bool {
        tokio::select! {
            biased;
            () = self.channel.closer().cancelled() => false,
            () = tokio::time::sleep(self.config.pacing) => true,
        }
    }

    async fn terminate(mut self) {
        if let Err(e) = self.stream.shutdown().await {
            trace!(
                "Error shutting down transport of channel {}: {}",
                self.channel.key(),
                e
            );
        }
        drop(self.stream);
        self.registry.mark_lost(&self.channel);
    }
}
