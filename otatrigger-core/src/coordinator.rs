//! Update coordinator: the task that turns a request into a download.
//!
//! One attempt walks `AwaitingConnectivity → PreparingCertificate →
//! SelectingPartition → Downloading` and ends either in `Rebooting` (success
//! only) or back in `Idle`. Attempts are strictly sequential; a press that
//! arrives mid-attempt stays pending in the [`RequestGate`] and is picked up
//! once the coordinator is idle again.

use log::{error, info, warn};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::certificate::{CertificateAcquisition, CertificateProvider};
use crate::connectivity::{Readiness, ReadinessGate};
use crate::outcome::DownloadOutcome;
use crate::partition::PartitionSelector;
use crate::request_gate::RequestGate;
use crate::transport::{DownloadAdapter, DownloadEngine};

/// Platform services the coordinator needs besides the download itself.
pub trait SystemControl {
    /// Free heap in bytes, for diagnostics.
    fn free_heap(&self) -> usize;

    /// Restart the device. Does not return on hardware.
    fn restart(&self);
}

/// Where the coordinator currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum UpdatePhase {
    Idle = 0,
    AwaitingConnectivity = 1,
    PreparingCertificate = 2,
    SelectingPartition = 3,
    Downloading = 4,
    Rebooting = 5,
}

impl UpdatePhase {
    const fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::AwaitingConnectivity,
            2 => Self::PreparingCertificate,
            3 => Self::SelectingPartition,
            4 => Self::Downloading,
            5 => Self::Rebooting,
            _ => Self::Idle,
        }
    }

    /// Any phase other than `Idle` means an attempt is under way.
    pub const fn is_active(self) -> bool {
        !matches!(self, Self::Idle)
    }
}

/// Lock-free published [`UpdatePhase`], readable from other tasks (status LED).
#[derive(Debug)]
pub struct PhaseCell(AtomicU8);

impl PhaseCell {
    pub const fn new() -> Self {
        Self(AtomicU8::new(UpdatePhase::Idle as u8))
    }

    pub fn load(&self) -> UpdatePhase {
        UpdatePhase::from_u8(self.0.load(Ordering::Relaxed))
    }

    fn store(&self, phase: UpdatePhase) {
        self.0.store(phase as u8, Ordering::Relaxed);
    }
}

impl Default for PhaseCell {
    fn default() -> Self {
        Self::new()
    }
}

pub struct UpdateCoordinator<N, P, E, S> {
    gate: Arc<RequestGate>,
    network: N,
    certificates: CertificateProvider,
    partitions: P,
    downloader: DownloadAdapter<E>,
    system: S,
    phase: Arc<PhaseCell>,
    attempts: u32,
    last_outcome: Option<DownloadOutcome>,
}

impl<N, P, E, S> UpdateCoordinator<N, P, E, S>
where
    N: ReadinessGate,
    P: PartitionSelector,
    E: DownloadEngine,
    S: SystemControl,
{
    pub fn new(
        gate: Arc<RequestGate>,
        network: N,
        certificates: CertificateProvider,
        partitions: P,
        downloader: DownloadAdapter<E>,
        system: S,
    ) -> Self {
        Self {
            gate,
            network,
            certificates,
            partitions,
            downloader,
            system,
            phase: Arc::new(PhaseCell::new()),
            attempts: 0,
            last_outcome: None,
        }
    }

    /// Shared handle to the published phase.
    pub fn phase_handle(&self) -> Arc<PhaseCell> {
        self.phase.clone()
    }

    pub fn phase(&self) -> UpdatePhase {
        self.phase.load()
    }

    /// Number of attempts started since boot.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn last_outcome(&self) -> Option<DownloadOutcome> {
        self.last_outcome
    }

    pub fn downloader(&self) -> &DownloadAdapter<E> {
        &self.downloader
    }

    fn enter(&self, phase: UpdatePhase) {
        self.phase.store(phase);
    }

    /// Serve requests until an attempt succeeds.
    ///
    /// On hardware this never returns: a successful attempt restarts the
    /// device. It only returns if [`SystemControl::restart`] does.
    pub fn run(&mut self) {
        info!("Update coordinator waiting for requests");
        loop {
            self.enter(UpdatePhase::Idle);
            self.gate.wait_and_clear(None);
            if self.process_request().is_success() {
                return;
            }
        }
    }

    /// Wait up to `timeout` for one request and process it.
    ///
    /// Returns `None` if no request arrived.
    pub fn run_once(&mut self, timeout: Duration) -> Option<DownloadOutcome> {
        if self.gate.wait_and_clear(Some(timeout)) {
            Some(self.process_request())
        } else {
            None
        }
    }

    /// Run one attempt and act on its outcome: restart on success, otherwise
    /// log and go back to idle.
    pub fn process_request(&mut self) -> DownloadOutcome {
        let outcome = self.attempt();
        self.last_outcome = Some(outcome);

        if outcome.is_success() {
            info!("OTA successful, restarting...");
            self.enter(UpdatePhase::Rebooting);
            self.system.restart();
        } else {
            warn!(
                "OTA attempt #{} ended: {outcome} (free heap {} bytes), press the button to retry",
                self.attempts,
                self.system.free_heap()
            );
            self.enter(UpdatePhase::Idle);
        }
        outcome
    }

    /// One attempt from readiness check to download result.
    ///
    /// The certificate copy lives in this scope and is released on every
    /// return path.
    pub fn attempt(&mut self) -> DownloadOutcome {
        self.attempts += 1;
        let settings = self.downloader.settings();
        let connect_timeout = settings.connect_timeout();
        let require_certificate = settings.require_certificate;

        info!("Starting OTA attempt #{}", self.attempts);
        info!("Free heap before OTA: {} bytes", self.system.free_heap());

        self.enter(UpdatePhase::AwaitingConnectivity);
        match self.network.await_connected(connect_timeout) {
            Readiness::Connected => info!("Network ready"),
            Readiness::Failed => {
                warn!("Wi-Fi reported connection failure, not starting download");
                return DownloadOutcome::ConnectivityTimeout;
            }
            Readiness::TimedOut => {
                warn!(
                    "Wi-Fi not connected within {} ms, not starting download",
                    connect_timeout.as_millis()
                );
                return DownloadOutcome::ConnectivityTimeout;
            }
        }

        self.enter(UpdatePhase::PreparingCertificate);
        let certificate = match self.certificates.acquire() {
            CertificateAcquisition::Ready(copy) => Some(copy),
            unusable => {
                if require_certificate {
                    error!("No usable CA certificate ({unusable:?}) and verification is required");
                    return DownloadOutcome::CertificateUnavailable;
                }
                warn!("Downloading without server certificate verification");
                None
            }
        };

        self.enter(UpdatePhase::SelectingPartition);
        let Some(target) = self.partitions.select_target() else {
            error!("No OTA update partition available, aborting before any network I/O");
            self.log_known_partitions();
            return DownloadOutcome::NoPartition;
        };
        info!("Update target: {target}");

        self.enter(UpdatePhase::Downloading);
        let outcome = self.downloader.run(certificate.as_ref());
        drop(certificate);

        if let DownloadOutcome::TransportError(code) = outcome {
            error!(
                "Download into {target} failed with 0x{code:x} (http timeout {} ms, buffer {} B, free heap {} bytes)",
                self.downloader.settings().http_timeout_ms,
                self.downloader.settings().buffer_size,
                self.system.free_heap()
            );
        }
        outcome
    }

    fn log_known_partitions(&self) {
        match self.partitions.known_partitions() {
            Ok(partitions) if partitions.is_empty() => warn!("Partition table lists no app partitions"),
            Ok(partitions) => {
                for partition in &partitions {
                    info!("Known app partition: {partition}");
                }
            }
            Err(e) => warn!("Could not enumerate partitions: {e}"),
        }
    }
}
