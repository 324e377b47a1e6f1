//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (sniff limit > 0, addresses have host and port)
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: ProxyConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system
//! - Hostnames are allowed; DNS resolution happens at bind/connect time

use crate::config::schema::ProxyConfig;

/// A single semantic problem found in a configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// The listener bind address is not a host:port pair.
    InvalidBindAddress(String),
    /// The backend address is not a host:port pair.
    InvalidBackendAddress(String),
    /// The sniff limit is zero; no connection could ever classify.
    SniffLimitZero,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ValidationError::InvalidBindAddress(addr) => {
                write!(f, "invalid bind address '{}'", addr)
            }
            ValidationError::InvalidBackendAddress(addr) => {
                write!(f, "invalid backend address '{}'", addr)
            }
            ValidationError::SniffLimitZero => write!(f, "max_sniff_bytes must be greater than 0"),
        }
    }
}

/// Validate a configuration, collecting every error found.
pub fn validate_config(config: &ProxyConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if !is_host_port(&config.listener.bind_address) {
        errors.push(ValidationError::InvalidBindAddress(
            config.listener.bind_address.clone(),
        ));
    }
    if !is_host_port(&config.backend.address) {
        errors.push(ValidationError::InvalidBackendAddress(
            config.backend.address.clone(),
        ));
    }
    if config.listener.max_sniff_bytes == 0 {
        errors.push(ValidationError::SniffLimitZero);
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn is_host_port(addr: &str) -> bool {
    match addr.rsplit_once(':') {
        Some((host, port)) => !host.is_empty() && port.parse::<u16>().is_ok(),
        None => false,
    }
}
