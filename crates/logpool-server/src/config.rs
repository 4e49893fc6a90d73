// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use crate::error::ServerError;
use logpool::constants::{DEFAULT_HOST, DEFAULT_INGRESS_PORT};
use logpool::listener::IngressConfig;
use logpool_web::server::{WebConfig, DEFAULT_HTTP_PORT};
use std::env;

/// Configuration for the logpool servers
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Host both listeners bind to
    pub host: String,
    /// Producer ingress TCP port
    pub ingress_port: u16,
    /// Viewer HTTP port
    pub http_port: u16,
    /// Whether to serve the HTTP read endpoints
    pub use_http: bool,
    /// Log level (e.g., trace, debug, info, warn, error)
    pub log_level: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            ingress_port: DEFAULT_INGRESS_PORT,
            http_port: DEFAULT_HTTP_PORT,
            use_http: true,
            log_level: "info".to_string(),
        }
    }
}

impl ServerConfig {
    /// Create configuration from environment variables
    pub fn from_env() -> Result<Self, ServerError> {
        let defaults = Self::default();
        let host = env::var("LOGPOOL_HOST").unwrap_or(defaults.host);
        let ingress_port = env::var("LOGPOOL_INGRESS_PORT")
            .ok()
            .and_then(|port| port.parse::<u16>().ok())
            .unwrap_or(defaults.ingress_port);
        let http_port = env::var("LOGPOOL_HTTP_PORT")
            .ok()
            .and_then(|port| port.parse::<u16>().ok())
            .unwrap_or(defaults.http_port);
        let use_http = env::var("LOGPOOL_USE_HTTP")
            .map(|val| val.to_lowercase() != "false")
            .unwrap_or(defaults.use_http);
        let log_level = env::var("LOGPOOL_LOG_LEVEL")
            .map(|val| val.to_lowercase())
            .unwrap_or(defaults.log_level);

        let config = Self {
            host,
            ingress_port,
            http_port,
            use_http,
            log_level,
        };

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ServerError> {
        if self.host.trim().is_empty() {
            return Err(ServerError::InvalidConfig(
                "LOGPOOL_HOST cannot be empty".to_string(),
            ));
        }

        if self.ingress_port == 0 {
            return Err(ServerError::InvalidConfig(
                "Ingress port must be greater than 0".to_string(),
            ));
        }

        if self.use_http {
            if self.http_port == 0 {
                return Err(ServerError::InvalidConfig(
                    "HTTP port must be greater than 0".to_string(),
                ));
            }
            if self.http_port == self.ingress_port {
                return Err(ServerError::InvalidConfig(format!(
                    "HTTP port and ingress port cannot both be {}",
                    self.http_port
                )));
            }
        }

        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&self.log_level.as_str()) {
            return Err(ServerError::InvalidConfig(format!(
                "Invalid log level '{}'. Must be one of: trace, debug, info, warn, error",
                self.log_level
            )));
        }

        Ok(())
    }

    pub fn ingress(&self) -> IngressConfig {
        IngressConfig {
            host: self.host.clone(),
            port: self.ingress_port,
            ..IngressConfig::default()
        }
    }

    pub fn web(&self) -> WebConfig {
        WebConfig {
            host: self.host.clone(),
            port: self.http_port,
            ..WebConfig::default()
        }
    }
}
