//! Trust anchor preparation for the HTTPS download.
//!
//! The CA certificate is linked into the image at build time. The TLS stack
//! wants a NUL-terminated PEM string it can hold on to for the duration of the
//! transfer, so each attempt gets its own heap copy with a terminator appended.
//! The copy is released when the [`CertificateCopy`] is dropped, which covers
//! every early return in the coordinator.

use log::{debug, warn};
use std::ffi::CStr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Certificates at or above this size are treated as a build mistake.
pub const MAX_CERT_LEN: usize = 64 * 1024;

/// Result of [`CertificateProvider::acquire`].
#[derive(Debug)]
pub enum CertificateAcquisition {
    /// Copy ready to hand to the transport
    Ready(CertificateCopy),
    /// Nothing embedded; the download runs without peer verification
    Absent,
    /// Embedded blob has an implausible size; nothing was allocated
    UnexpectedSize(usize),
    /// The heap could not fit the copy
    AllocationFailed(usize),
}

/// Produces per-attempt copies of the embedded trust anchor.
#[derive(Debug, Clone)]
pub struct CertificateProvider {
    blob: &'static [u8],
    outstanding: Arc<AtomicUsize>,
}

impl CertificateProvider {
    pub fn new(blob: &'static [u8]) -> Self {
        Self {
            blob,
            outstanding: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Length of the embedded blob, without terminator.
    pub fn blob_len(&self) -> usize {
        self.blob.len()
    }

    /// Number of copies currently alive. Zero between attempts.
    pub fn outstanding(&self) -> usize {
        self.outstanding.load(Ordering::Acquire)
    }

    /// Make a NUL-terminated heap copy of the trust anchor.
    pub fn acquire(&self) -> CertificateAcquisition {
        let len = self.blob.len();

        if len == 0 {
            warn!("No embedded CA certificate found, skipping cert verification");
            return CertificateAcquisition::Absent;
        }
        if len >= MAX_CERT_LEN {
            warn!("Unexpected cert size {len}, skipping cert");
            return CertificateAcquisition::UnexpectedSize(len);
        }

        let mut pem = Vec::new();
        if pem.try_reserve_exact(len + 1).is_err() {
            warn!("Failed to allocate {} bytes for cert, continuing without cert verification", len + 1);
            return CertificateAcquisition::AllocationFailed(len);
        }
        pem.extend_from_slice(self.blob);
        pem.push(0);

        self.outstanding.fetch_add(1, Ordering::AcqRel);
        debug!("Certificate copy acquired ({len} bytes)");

        CertificateAcquisition::Ready(CertificateCopy {
            pem,
            outstanding: self.outstanding.clone(),
        })
    }

    /// Release a copy. Equivalent to dropping it.
    pub fn release(&self, copy: CertificateCopy) {
        drop(copy);
    }
}

/// Heap-owned, NUL-terminated PEM trust anchor for one attempt.
#[derive(Debug)]
pub struct CertificateCopy {
    pem: Vec<u8>,
    outstanding: Arc<AtomicUsize>,
}

impl CertificateCopy {
    /// PEM bytes without the terminator.
    pub fn as_bytes(&self) -> &[u8] {
        &self.pem[..self.pem.len() - 1]
    }

    /// PEM bytes including the trailing NUL.
    pub fn as_bytes_with_nul(&self) -> &[u8] {
        &self.pem
    }

    /// C string view for the TLS stack. Stops at the first NUL, which is the
    /// appended terminator for any well-formed PEM.
    pub fn as_c_str(&self) -> &CStr {
        // The buffer always ends with the terminator pushed in `acquire`
        CStr::from_bytes_until_nul(&self.pem).unwrap_or(c"")
    }

    /// Length without the terminator.
    pub fn len(&self) -> usize {
        self.pem.len() - 1
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Drop for CertificateCopy {
    fn drop(&mut self) {
        self.outstanding.fetch_sub(1, Ordering::AcqRel);
        debug!("Certificate copy released");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PEM: &[u8] = b"-----BEGIN CERTIFICATE-----\nMIIB\n-----END CERTIFICATE-----\n";

    fn leak(bytes: Vec<u8>) -> &'static [u8] {
        Box::leak(bytes.into_boxed_slice())
    }

    #[test]
    fn test_copy_is_terminated() {
        let provider = CertificateProvider::new(PEM);
        let CertificateAcquisition::Ready(copy) = provider.acquire() else {
            panic!("expected a certificate copy");
        };

        assert_eq!(copy.len(), PEM.len());
        assert_eq!(copy.as_bytes(), PEM);
        assert_eq!(copy.as_bytes_with_nul().len(), PEM.len() + 1);
        assert_eq!(copy.as_bytes_with_nul().last(), Some(&0));
        assert_eq!(copy.as_c_str().to_bytes(), PEM);
    }

    #[test]
    fn test_empty_blob_is_absent() {
        let provider = CertificateProvider::new(&[]);
        assert!(matches!(provider.acquire(), CertificateAcquisition::Absent));
        assert_eq!(provider.outstanding(), 0);
    }

    #[test]
    fn test_oversized_blob_rejected_without_allocating() {
        let provider = CertificateProvider::new(leak(vec![b'A'; MAX_CERT_LEN]));
        assert!(matches!(
            provider.acquire(),
            CertificateAcquisition::UnexpectedSize(MAX_CERT_LEN)
        ));
        assert_eq!(provider.outstanding(), 0);

        // One below the ceiling is accepted
        let provider = CertificateProvider::new(leak(vec![b'A'; MAX_CERT_LEN - 1]));
        assert!(matches!(provider.acquire(), CertificateAcquisition::Ready(_)));
    }

    #[test]
    fn test_release_balances_acquire() {
        let provider = CertificateProvider::new(PEM);

        let first = provider.acquire();
        assert_eq!(provider.outstanding(), 1);
        let second = provider.acquire();
        assert_eq!(provider.outstanding(), 2);

        if let CertificateAcquisition::Ready(copy) = first {
            provider.release(copy);
        }
        assert_eq!(provider.outstanding(), 1);

        drop(second);
        assert_eq!(provider.outstanding(), 0);
    }

    #[test]
    fn test_clones_share_accounting() {
        let provider = CertificateProvider::new(PEM);
        let clone = provider.clone();
        let copy = clone.acquire();
        assert_eq!(provider.outstanding(), 1);
        drop(copy);
        assert_eq!(provider.outstanding(), 0);
    }
}
