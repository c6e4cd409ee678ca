//! Button-triggered OTA update orchestration.
//!
//! This library holds the update logic of the firmware: the request gate the
//! button task signals, the readiness wait on the Wi-Fi link, trust anchor
//! preparation, update target selection, the download adapter and the
//! coordinator tying them together. It is hardware-agnostic; the firmware crate
//! supplies ESP-IDF implementations of the platform traits, and everything here
//! can be tested on the host.

pub mod certificate;
pub mod connectivity;
pub mod coordinator;
pub mod outcome;
pub mod partition;
pub mod request_gate;
pub mod settings;
pub mod transport;
pub mod trigger;

pub use certificate::{CertificateAcquisition, CertificateCopy, CertificateProvider, MAX_CERT_LEN};
pub use connectivity::{ConnectivityFlag, ConnectivityStatus, Readiness, ReadinessGate};
pub use coordinator::{PhaseCell, SystemControl, UpdateCoordinator, UpdatePhase};
pub use outcome::DownloadOutcome;
pub use partition::{PartitionError, PartitionSelector, PartitionTarget};
pub use request_gate::{GateError, RequestGate};
pub use settings::{BlinkSettings, HostVerification, UpdateSettings};
pub use transport::{
    DownloadAdapter, DownloadEngine, DownloadRequest, EngineError, LogObserver, TransportEvent,
    TransportObserver,
};
pub use trigger::Debouncer;
