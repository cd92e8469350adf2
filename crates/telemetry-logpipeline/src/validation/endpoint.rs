//! HTTP output host check

use std::net::IpAddr;
use std::sync::LazyLock;

use regex::Regex;
use thiserror::Error;

/// Why a host was rejected
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum EndpointError {
    /// Host resolved to nothing
    #[error("host must not be empty")]
    Empty,

    /// Host is neither a hostname nor an IP address
    #[error("'{0}' is not a valid hostname or IP address")]
    Malformed(String),
}

// RFC 1123 labels
static HOSTNAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-zA-Z0-9]([a-zA-Z0-9-]{0,61}[a-zA-Z0-9])?(\.[a-zA-Z0-9]([a-zA-Z0-9-]{0,61}[a-zA-Z0-9])?)*\.?$")
        .expect("failed creating regex")
});

/// Check a resolved host value
pub fn validate_host(host: &str) -> Result<(), EndpointError> {
    let host = host.trim();
    if host.is_empty() {
        return Err(EndpointError::Empty);
    }

    let bracketed = host
        .strip_prefix('[')
        .and_then(|h| h.strip_suffix(']'))
        .unwrap_or(host);
    if bracketed.parse::<IpAddr>().is_ok() {
        return Ok(());
    }

    if host.len() <= 253 && HOSTNAME.is_match(host) {
        return Ok(());
    }
    Err(EndpointError::Malformed(host.to_string()))
}
