// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Ingress listener accepting producer connections over TCP.
//!
//! Every accepted connection gets its own task running the registration handshake and
//! then the [`ConnectionSupervisor`](crate::supervisor::ConnectionSupervisor) read loop.
//! Each connection is closed through a child of the listener's cancellation token, so
//! cancelling the listener closes every producer transport and lets every supervisor
//! mark its channel lost before the listener returns.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::accept::accept_until_cancelled;
use crate::constants::{DEFAULT_HOST, DEFAULT_INGRESS_PORT};
use crate::registry::ChannelRegistry;
use crate::supervisor::{supervise, SupervisorConfig};

/// Configuration for the ingress listener
#[derive(Debug, Clone)]
pub struct IngressConfig {
    /// Host to bind the TCP socket to (e.g., "0.0.0.0")
    pub host: String,
    /// Port to bind the TCP socket to, 0 picks an ephemeral port
    pub port: u16,
    pub supervisor: SupervisorConfig,
}

impl Default for IngressConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_INGRESS_PORT,
            supervisor: SupervisorConfig::default(),
        }
    }
}

/// Producer-facing server: accepts connections and hands them to supervisors.
pub struct IngressListener {
    cancel_token: CancellationToken,
    registry: Arc<ChannelRegistry>,
    listener: TcpListener,
    supervisor_config: SupervisorConfig,
}

impl IngressListener {
    pub async fn bind(
        config: &IngressConfig,
        registry: Arc<ChannelRegistry>,
        cancel_token: CancellationToken,
    ) -> io::Result<IngressListener> {
        let addr = format!("{}:{}", config.host, config.port);
        let listener = TcpListener::bind(&addr).await?;
        debug!("Ingress listener bound to {}", listener.local_addr()?);

        Ok(IngressListener {
            cancel_token,
            registry,
            listener,
            supervisor_config: config.supervisor.clone(),
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accepts producer connections until cancelled, then waits for every
    /// connection task to finish.
    pub async fn spin(self) -> io::Result<()> {
        info!("Accepting producer connections on {}", self.local_addr()?);
        let mut joinset = JoinSet::new();

        let result = accept_until_cancelled(
            &self.listener,
            &self.cancel_token,
            &mut joinset,
            "Ingress listener",
            |stream, peer| {
                debug!("New producer connection from {}", peer);
                supervise(
                    Arc::clone(&self.registry),
                    stream,
                    self.cancel_token.child_token(),
                    self.supervisor_config.clone(),
                    peer,
                )
            },
        )
        .await;
        if result.is_err() {
            // Close the producers accepted so far before reporting the failure.
            self.cancel_token.cancel();
        }

        info!("Ingress listener shutting down");
        Self::drain(&mut joinset).await;
        result
    }

    async fn drain(joinset: &mut JoinSet<()>) {
        while let Some(finished) = joinset.join_next().await {
            if let Err(e) = finished {
                if e.is_panic() {
                    error!("Connection supervisor panicked: {:?}", e);
                }
            }
        }
    }
}
