//! Per-attempt result taxonomy.

use std::fmt;

/// Terminal result of one update attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownloadOutcome {
    /// Image written and activated; the device restarts next
    Success,
    /// Download engine failed; the code is passed through verbatim
    TransportError(i32),
    /// No inactive firmware slot; no network I/O was performed
    NoPartition,
    /// No usable trust anchor and the policy forbids unauthenticated downloads
    CertificateUnavailable,
    /// Link not confirmed within the readiness timeout
    ConnectivityTimeout,
}

impl DownloadOutcome {
    pub const fn is_success(self) -> bool {
        matches!(self, Self::Success)
    }

    /// Short identifier for log lines.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::TransportError(_) => "transport_error",
            Self::NoPartition => "no_partition",
            Self::CertificateUnavailable => "certificate_unavailable",
            Self::ConnectivityTimeout => "connectivity_timeout",
        }
    }
}

impl fmt::Display for DownloadOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TransportError(code) => write!(f, "{} (0x{code:x})", self.as_str()),
            _ => f.write_str(self.as_str()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_success_is_success() {
        assert!(DownloadOutcome::Success.is_success());
        assert!(!DownloadOutcome::TransportError(0).is_success());
        assert!(!DownloadOutcome::NoPartition.is_success());
        assert!(!DownloadOutcome::CertificateUnavailable.is_success());
        assert!(!DownloadOutcome::ConnectivityTimeout.is_success());
    }

    #[test]
    fn test_display() {
        assert_eq!(DownloadOutcome::TransportError(0x7002).to_string(), "transport_error (0x7002)");
        assert_eq!(DownloadOutcome::NoPartition.to_string(), "no_partition");
    }
}
