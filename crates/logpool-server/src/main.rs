// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

mod config;
mod error;

use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;

use logpool::listener::IngressListener;
use logpool::ChannelRegistry;
use logpool_web::server::WebServer;

use crate::config::ServerConfig;
use crate::error::ServerError;

#[tokio::main]
pub async fn main() {
    let config = match ServerConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error creating logpool configuration: {e}");
            return;
        }
    };

    let env_filter = format!("h2=off,hyper=off,{}", config.log_level);

    #[allow(clippy::expect_used)]
    let subscriber = tracing_subscriber::fmt::Subscriber::builder()
        .with_env_filter(
            EnvFilter::try_new(env_filter).expect("could not parse log level in configuration"),
        )
        .with_level(true)
        .with_thread_names(false)
        .with_thread_ids(false)
        .with_line_number(false)
        .with_file(false)
        .with_target(true)
        .without_time()
        .finish();

    #[allow(clippy::expect_used)]
    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    debug!("Logging subsystem enabled");

    if let Err(e) = run(config).await {
        error!("logpool stopped: {e}");
    }
    info!("Exiting");
}

async fn run(config: ServerConfig) -> Result<(), ServerError> {
    let registry = Arc::new(ChannelRegistry::new());
    let cancel_token = CancellationToken::new();

    let ingress = IngressListener::bind(
        &config.ingress(),
        Arc::clone(&registry),
        cancel_token.clone(),
    )
    .await
    .map_err(|source| ServerError::Bind {
        listener: "ingress",
        source,
    })?;
    info!("ingress: starting to listen on port {}", config.ingress_port);
    let mut ingress_handle = tokio::spawn(ingress.spin());

    let mut web_handle: Option<JoinHandle<std::io::Result<()>>> = if config.use_http {
        let web = WebServer::bind(&config.web(), Arc::clone(&registry), cancel_token.clone())
            .await
            .map_err(|source| ServerError::Bind {
                listener: "http",
                source,
            })?;
        info!("http: starting to listen on port {}", config.http_port);
        Some(tokio::spawn(web.serve()))
    } else {
        info!("http disabled");
        None
    };

    let result = tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            info!("Stopping servers");
            signal.map_err(|e| {
                ServerError::Runtime(format!("failed to listen for shutdown signal: {e}"))
            })
        }
        finished = &mut ingress_handle => {
            Err(ServerError::Runtime(format!(
                "ingress listener terminated unexpectedly: {finished:?}"
            )))
        }
        finished = async {
            match web_handle.as_mut() {
                Some(handle) => handle.await,
                None => std::future::pending().await,
            }
        } => {
            Err(ServerError::Runtime(format!(
                "http server terminated unexpectedly: {finished:?}"
            )))
        }
    };

    cancel_token.cancel();
    registry.close_all();
    if !ingress_handle.is_finished() {
        if let Err(e) = ingress_handle.await {
            error!("Ingress listener task failed: {e}");
        }
    }
    if let Some(handle) = web_handle {
        if !handle.is_finished() {
            if let Err(e) = handle.await {
                error!("HTTP server task failed: {e}");
            }
        }
    }

    result
}
