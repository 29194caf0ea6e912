//! Configuration validation.
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: HarvestConfig → Result<(), Vec<ValidationError>>

use std::net::SocketAddr;

use thiserror::Error;

use crate::config::schema::HarvestConfig;

/// A single semantic problem in a loaded configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("flow.http_timeout_ms must be greater than zero")]
    ZeroHttpTimeout,

    #[error("flow.buffer_size must be greater than zero")]
    ZeroBufferSize,

    #[error("flow.max_body_bytes must be greater than zero")]
    ZeroMaxBody,

    #[error("observability.metrics_address {0:?} is not a socket address")]
    MetricsAddress(String),
}

/// Check a configuration for values serde cannot reject on its own.
pub fn validate_config(config: &HarvestConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.flow.http_timeout_ms == 0 {
        errors.push(ValidationError::ZeroHttpTimeout);
    }
    if config.flow.buffer_size == 0 {
        errors.push(ValidationError::ZeroBufferSize);
    }
    if config.flow.max_body_bytes == 0 {
        errors.push(ValidationError::ZeroMaxBody);
    }
    if config.observability.metrics_enabled
        && config
            .observability
            .metrics_address
            .parse::<SocketAddr>()
            .is_err()
    {
        errors.push(ValidationError::MetricsAddress(
            config.observability.metrics_address.clone(),
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
