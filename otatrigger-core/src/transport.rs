//! Download engine adapter.
//!
//! The engine itself (HTTPS client, TLS, flash writes) is opaque: it is handed
//! a [`DownloadRequest`] and reports one terminal result. This module owns the
//! knobs around it and turns the engine result into a [`DownloadOutcome`].

use derive_more::{Display, Error};
use log::{debug, error, info};
use std::net::IpAddr;
use std::time::Duration;

use crate::certificate::CertificateCopy;
use crate::outcome::DownloadOutcome;
use crate::settings::{HostVerification, UpdateSettings};

/// Terminal failure reported by the download engine.
///
/// `code` is passed through untouched (an `esp_err_t` on target).
#[derive(Debug, Display, Error, Clone, Copy, PartialEq, Eq)]
#[display("download engine error 0x{code:x}")]
pub struct EngineError {
    pub code: i32,
}

/// Everything the engine needs for one transfer.
#[derive(Debug)]
pub struct DownloadRequest<'a> {
    pub url: &'a str,
    /// `None` means no peer verification
    pub certificate: Option<&'a CertificateCopy>,
    pub buffer_size: usize,
    pub timeout: Duration,
    pub keep_alive: bool,
    pub skip_common_name_check: bool,
}

/// Transport events forwarded by the engine while a transfer runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Error,
    Connected,
    HeaderSent,
    Header { key: String, value: String },
    HeadersComplete,
    Data { len: usize },
    Finish,
    Disconnected,
    Redirect,
}

/// Diagnostic sink for [`TransportEvent`]s. Never influences control flow.
pub trait TransportObserver {
    fn on_event(&self, event: &TransportEvent);
}

/// Default observer: every event at debug level.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogObserver;

impl TransportObserver for LogObserver {
    fn on_event(&self, event: &TransportEvent) {
        match event {
            TransportEvent::Error => debug!("HTTP_EVENT_ERROR"),
            TransportEvent::Connected => debug!("HTTP_EVENT_ON_CONNECTED"),
            TransportEvent::HeaderSent => debug!("HTTP_EVENT_HEADER_SENT"),
            TransportEvent::Header { key, value } => {
                debug!("HTTP_EVENT_ON_HEADER, key={key}, value={value}");
            }
            TransportEvent::HeadersComplete => debug!("HTTP_EVENT_ON_HEADERS_COMPLETE"),
            TransportEvent::Data { len } => debug!("HTTP_EVENT_ON_DATA, len={len}"),
            TransportEvent::Finish => debug!("HTTP_EVENT_ON_FINISH"),
            TransportEvent::Disconnected => debug!("HTTP_EVENT_DISCONNECTED"),
            TransportEvent::Redirect => debug!("HTTP_EVENT_REDIRECT"),
        }
    }
}

/// Opaque all-or-nothing firmware download into the update partition.
pub trait DownloadEngine {
    fn download(
        &self,
        request: &DownloadRequest<'_>,
        observer: &dyn TransportObserver,
    ) -> Result<(), EngineError>;
}

/// Extract the host part of an `scheme://host[:port]/path` URL.
///
/// Bracketed IPv6 literals are returned without the brackets.
pub fn url_host(url: &str) -> Option<&str> {
    let rest = url.split_once("://").map_or(url, |(_, rest)| rest);
    let authority = rest.split(&['/', '?', '#'][..]).next()?;
    // Drop userinfo
    let authority = authority.rsplit_once('@').map_or(authority, |(_, host)| host);

    let host = if let Some(bracketed) = authority.strip_prefix('[') {
        bracketed.split_once(']')?.0
    } else {
        authority.split(':').next()?
    };

    if host.is_empty() {
        None
    } else {
        Some(host)
    }
}

/// Whether the URL addresses the server by IP rather than by name.
pub fn is_ip_literal_host(url: &str) -> bool {
    url_host(url).is_some_and(|host| host.parse::<IpAddr>().is_ok())
}

/// Builds transport configuration and runs the engine.
pub struct DownloadAdapter<E> {
    engine: E,
    settings: UpdateSettings,
    observer: Box<dyn TransportObserver + Send>,
}

impl<E: DownloadEngine> DownloadAdapter<E> {
    pub fn new(engine: E, settings: UpdateSettings) -> Self {
        Self {
            engine,
            settings,
            observer: Box::new(LogObserver),
        }
    }

    /// Replace the default logging observer.
    #[must_use]
    pub fn with_observer(mut self, observer: Box<dyn TransportObserver + Send>) -> Self {
        self.observer = observer;
        self
    }

    pub fn settings(&self) -> &UpdateSettings {
        &self.settings
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    /// Resolve the host-name verification policy for the configured URL.
    pub fn skip_common_name_check(&self) -> bool {
        match self.settings.host_verification {
            HostVerification::Always => false,
            HostVerification::Skip => true,
            HostVerification::Auto => is_ip_literal_host(&self.settings.url),
        }
    }

    /// Build the request for this attempt.
    pub fn request<'a>(&'a self, certificate: Option<&'a CertificateCopy>) -> DownloadRequest<'a> {
        DownloadRequest {
            url: &self.settings.url,
            certificate,
            buffer_size: self.settings.buffer_size,
            timeout: self.settings.http_timeout(),
            keep_alive: self.settings.keep_alive,
            skip_common_name_check: self.skip_common_name_check(),
        }
    }

    /// Run one download and map the engine result.
    pub fn run(&self, certificate: Option<&CertificateCopy>) -> DownloadOutcome {
        let request = self.request(certificate);

        info!(
            "Attempting to download update from {} (buffer={}B, timeout={}ms, cert={}, cn_check={})",
            request.url,
            request.buffer_size,
            request.timeout.as_millis(),
            request.certificate.map_or(0, CertificateCopy::len),
            !request.skip_common_name_check,
        );

        match self.engine.download(&request, self.observer.as_ref()) {
            Ok(()) => DownloadOutcome::Success,
            Err(e) => {
                error!("OTA failed. err=0x{:x}", e.code);
                DownloadOutcome::TransportError(e.code)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::certificate::{CertificateAcquisition, CertificateProvider};
    use std::sync::{Arc, Mutex};

    #[derive(Default)]
    struct RecordingEngine {
        result: Option<EngineError>,
        seen: Mutex<Vec<(String, Option<usize>, usize, bool, bool)>>,
    }

    impl DownloadEngine for RecordingEngine {
        fn download(
            &self,
            request: &DownloadRequest<'_>,
            observer: &dyn TransportObserver,
        ) -> Result<(), EngineError> {
            observer.on_event(&TransportEvent::Connected);
            observer.on_event(&TransportEvent::Data { len: 512 });
            self.seen.lock().unwrap().push((
                request.url.to_string(),
                request.certificate.map(CertificateCopy::len),
                request.buffer_size,
                request.keep_alive,
                request.skip_common_name_check,
            ));
            self.result.map_or(Ok(()), Err)
        }
    }

    struct CollectingObserver(Arc<Mutex<Vec<TransportEvent>>>);

    impl TransportObserver for CollectingObserver {
        fn on_event(&self, event: &TransportEvent) {
            self.0.lock().unwrap().push(event.clone());
        }
    }

    #[test]
    fn test_url_host() {
        assert_eq!(url_host("https://192.168.0.112/firmware.bin"), Some("192.168.0.112"));
        assert_eq!(url_host("https://jbar.dev/firmware.bin"), Some("jbar.dev"));
        assert_eq!(url_host("https://jbar.dev:8443/fw?x=1"), Some("jbar.dev"));
        assert_eq!(url_host("https://[fe80::1]:443/fw.bin"), Some("fe80::1"));
        assert_eq!(url_host("https://user@10.0.0.2/fw.bin"), Some("10.0.0.2"));
        assert_eq!(url_host("https:///fw.bin"), None);
    }

    #[test]
    fn test_ip_literal_detection() {
        assert!(is_ip_literal_host("https://192.168.0.112/firmware.bin"));
        assert!(is_ip_literal_host("https://[fe80::1]/firmware.bin"));
        assert!(!is_ip_literal_host("https://jbar.dev/firmware.bin"));
        assert!(!is_ip_literal_host("not a url"));
    }

    #[test]
    fn test_host_verification_policy() {
        let ip = DownloadAdapter::new(RecordingEngine::default(), UpdateSettings::default());
        assert!(ip.skip_common_name_check());

        let named = DownloadAdapter::new(
            RecordingEngine::default(),
            UpdateSettings::with_url("https://jbar.dev/firmware.bin"),
        );
        assert!(!named.skip_common_name_check());

        let forced = DownloadAdapter::new(
            RecordingEngine::default(),
            UpdateSettings {
                host_verification: HostVerification::Always,
                ..UpdateSettings::default()
            },
        );
        assert!(!forced.skip_common_name_check());

        let skipped = DownloadAdapter::new(
            RecordingEngine::default(),
            UpdateSettings {
                url: "https://jbar.dev/firmware.bin".to_string(),
                host_verification: HostVerification::Skip,
                ..UpdateSettings::default()
            },
        );
        assert!(skipped.skip_common_name_check());
    }

    #[test]
    fn test_run_passes_configuration_through() {
        let provider = CertificateProvider::new(b"PEM");
        let CertificateAcquisition::Ready(cert) = provider.acquire() else {
            panic!("expected certificate");
        };

        let adapter = DownloadAdapter::new(
            RecordingEngine::default(),
            UpdateSettings {
                buffer_size: 4096,
                ..UpdateSettings::default()
            },
        );

        assert_eq!(adapter.run(Some(&cert)), DownloadOutcome::Success);
        assert_eq!(adapter.run(None), DownloadOutcome::Success);

        let seen = adapter.engine().seen.lock().unwrap();
        assert_eq!(
            seen[0],
            (
                "https://192.168.0.112/firmware.bin".to_string(),
                Some(3),
                4096,
                false,
                true
            )
        );
        assert_eq!(seen[1].1, None);
    }

    #[test]
    fn test_engine_error_surfaces_code_verbatim() {
        let adapter = DownloadAdapter::new(
            RecordingEngine {
                result: Some(EngineError { code: 0x7002 }),
                ..RecordingEngine::default()
            },
            UpdateSettings::default(),
        );
        assert_eq!(adapter.run(None), DownloadOutcome::TransportError(0x7002));
    }

    #[test]
    fn test_observer_receives_engine_events() {
        let events = Arc::new(Mutex::new(Vec::new()));
        let adapter = DownloadAdapter::new(RecordingEngine::default(), UpdateSettings::default())
            .with_observer(Box::new(CollectingObserver(events.clone())));

        adapter.run(None);
        assert_eq!(
            *events.lock().unwrap(),
            vec![TransportEvent::Connected, TransportEvent::Data { len: 512 }]
        );
    }
}
