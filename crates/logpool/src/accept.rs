// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Accept loop shared by the producer ingress and the viewer HTTP server.

use std::future::Future;
use std::io;
use std::net::SocketAddr;

use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

/// Accepts connections on `listener` and spawns `handle` for each of them into
/// `joinset`, until `cancel_token` fires.
///
/// Transient accept errors (aborted, reset or refused connections) are skipped.
/// Any other accept error is returned; in both cases the connection tasks are left
/// in `joinset` for the caller to drain or abort.
pub async fn accept_until_cancelled<F, Fut>(
    listener: &TcpListener,
    cancel_token: &CancellationToken,
    joinset: &mut JoinSet<()>,
    server_name: &str,
    mut handle: F,
) -> io::Result<()>
where
    F: FnMut(TcpStream, SocketAddr) -> Fut,
    Fut: Future<Output = ()> + Send + 'static,
{
    loop {
        let (stream, peer) = tokio::select! {
            biased;
            () = cancel_token.cancelled() => return Ok(()),
            accepted = listener.accept() => match accepted {
                Err(e) if is_transient(&e) => {
                    debug!("{server_name}: skipping failed accept: {e}");
                    continue;
                }
                Err(e) => {
                    error!("{server_name} error: {e}");
                    return Err(e);
                }
                Ok(accepted) => accepted,
            },
            finished = async {
                match joinset.join_next().await {
                    Some(finished) => finished,
                    None => std::future::pending().await,
                }
            } => match finished {
                // A panicking connection task only takes its own connection down.
                Err(e) if e.is_panic() => {
                    error!("{server_name}: connection task panicked: {:?}", e);
                    continue;
                }
                Ok(()) | Err(_) => continue,
            },
        };

        joinset.spawn(handle(stream, peer));
    }
}

fn is_transient(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::ConnectionAborted
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionRefused
    )
}
