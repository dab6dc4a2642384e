//! Probe module for site health checks.

mod http;

pub use http::*;

use async_trait::async_trait;
use thiserror::Error;

use crate::db::CheckResult;

/// Why a probe failed before a response arrived.
///
/// The `Display` text is what gets stored as the check's error message.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProbeFailure {
    #[error("Timeout after {0} seconds")]
    Timeout(u64),
    #[error("DNS resolution failed")]
    Dns,
    #[error("Connection refused")]
    ConnectionRefused,
    #[error("Connection reset")]
    ConnectionReset,
    #[error("Connection timeout")]
    ConnectTimeout,
    #[error("{0}")]
    Other(String),
}

/// A single health verification against a URL.
///
/// Implementations never fail: network errors become a `down` result.
#[async_trait]
pub trait HealthProbe: Send + Sync {
    async fn probe(&self, url: &str, timeout_seconds: u64) -> CheckResult;
}
