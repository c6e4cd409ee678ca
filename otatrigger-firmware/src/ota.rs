//! OTA (Over-The-Air) firmware update support.
//!
//! A button press signals the update request gate; the update task then
//! downloads the image from the configured URL with `esp_https_ota`, which
//! streams it straight into the inactive OTA partition. On success the device
//! reboots into the new image. The orchestration lives in `otatrigger-core`;
//! this module provides the ESP-IDF implementations it runs on.

use anyhow::Result;
use esp_idf_svc::ota::EspOta;
use esp_idf_svc::sys::{self, esp, esp_http_client_event_t};
use log::{info, warn};
use otatrigger_core::request_gate;
use otatrigger_core::{
    CertificateProvider, ConnectivityStatus, DownloadAdapter, DownloadEngine, DownloadRequest,
    EngineError, PartitionError, PartitionSelector, PartitionTarget, PhaseCell, SystemControl,
    TransportEvent, TransportObserver, UpdateCoordinator, UpdateSettings,
};
use std::ffi::{c_void, CStr, CString};
use std::sync::Arc;

/// Firmware version from `Cargo.toml`.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Blink count of the status LED that identifies this image.
pub const BLINK_COUNT: u8 = otatrigger_core::settings::DEFAULT_BLINK_COUNT;

/// CA certificate of the update server, embedded by `build.rs`. Empty when no
/// `certs/ca.crt` was present at build time.
static CA_CERT: &[u8] = include_bytes!(concat!(env!("OUT_DIR"), "/ca.crt"));

const OTA_TASK_STACK: usize = 8192;
const OTA_TASK_PRIORITY: u8 = 8;

/// Mark the currently running OTA slot as valid.
///
/// Must be called early in `main()` when rollback is enabled
/// (`CONFIG_BOOTLOADER_APP_ROLLBACK_ENABLE=y`). If the new firmware crashes
/// before this call, the bootloader reverts to the previous image.
pub fn mark_running_slot_valid() -> Result<()> {
    let mut ota = EspOta::new()?;
    ota.mark_running_slot_valid()?;
    info!("OTA: running slot marked valid");
    Ok(())
}

/// Full build version from `git describe`, or the package version outside a
/// git checkout.
pub const BUILD_VERSION: &str = env!("GIT_VERSION");

/// Information about the currently running firmware.
#[derive(Debug)]
pub struct FirmwareInfo {
    pub version: &'static str,
    pub build: &'static str,
    pub variant: &'static str,
    pub blink_count: u8,
}

/// Return metadata about the running firmware.
pub fn firmware_info() -> FirmwareInfo {
    FirmwareInfo {
        version: VERSION,
        build: BUILD_VERSION,
        variant: crate::FIRMWARE_VARIANT,
        blink_count: BLINK_COUNT,
    }
}

/// Log version, running slot and certificate size at boot.
pub fn log_firmware_info() {
    let fw = firmware_info();
    info!(
        "Firmware {} ({}, variant '{}', blink count {})",
        fw.version, fw.build, fw.variant, fw.blink_count
    );
    match EspOta::new().and_then(|ota| ota.get_running_slot()) {
        Ok(slot) => info!("Running from slot '{}' ({:?})", slot.label, slot.state),
        Err(e) => warn!("Could not read running slot: {e}"),
    }
    info!("Embedded CA certificate: {} bytes", CA_CERT.len());
}

fn describe(partition: &sys::esp_partition_t) -> PartitionTarget {
    // SAFETY: partition labels are NUL-terminated fixed-size arrays
    let label = unsafe { CStr::from_ptr(partition.label.as_ptr()) };
    PartitionTarget {
        label: label.to_string_lossy().into_owned(),
        address: partition.address,
        size: partition.size,
    }
}

/// Update target lookup through the ESP-IDF OTA/partition API.
pub struct EspPartitions;

impl PartitionSelector for EspPartitions {
    fn select_target(&self) -> Option<PartitionTarget> {
        // SAFETY: NULL asks for the slot after the running one; the returned
        // pointer (if any) refers to the static partition table
        let next = unsafe { sys::esp_ota_get_next_update_partition(std::ptr::null()) };
        unsafe { next.as_ref() }.map(describe)
    }

    fn known_partitions(&self) -> Result<Vec<PartitionTarget>, PartitionError> {
        // SAFETY: pointer into the static partition table or NULL
        let running = unsafe { sys::esp_ota_get_running_partition() };
        if running.is_null() {
            return Err(PartitionError::TableUnavailable);
        }

        let mut partitions = Vec::new();
        // SAFETY: iterator protocol as documented: esp_partition_next releases
        // the iterator when it returns NULL
        unsafe {
            let mut it = sys::esp_partition_find(
                sys::esp_partition_type_t_ESP_PARTITION_TYPE_APP,
                sys::esp_partition_subtype_t_ESP_PARTITION_SUBTYPE_ANY,
                std::ptr::null(),
            );
            while !it.is_null() {
                if let Some(partition) = sys::esp_partition_get(it).as_ref() {
                    partitions.push(describe(partition));
                }
                it = sys::esp_partition_next(it);
            }
        }
        Ok(partitions)
    }
}

/// Map an HTTP client event to the observer's event kinds.
fn translate(evt: &esp_http_client_event_t) -> Option<TransportEvent> {
    let event = match evt.event_id {
        sys::esp_http_client_event_id_t_HTTP_EVENT_ERROR => TransportEvent::Error,
        sys::esp_http_client_event_id_t_HTTP_EVENT_ON_CONNECTED => TransportEvent::Connected,
        sys::esp_http_client_event_id_t_HTTP_EVENT_HEADER_SENT => TransportEvent::HeaderSent,
        sys::esp_http_client_event_id_t_HTTP_EVENT_ON_HEADER => {
            let text = |ptr: *const std::ffi::c_char| {
                if ptr.is_null() {
                    String::new()
                } else {
                    // SAFETY: the client passes NUL-terminated header strings
                    unsafe { CStr::from_ptr(ptr) }.to_string_lossy().into_owned()
                }
            };
            TransportEvent::Header {
                key: text(evt.header_key.cast_const()),
                value: text(evt.header_value.cast_const()),
            }
        }
        sys::esp_http_client_event_id_t_HTTP_EVENT_ON_HEADERS_COMPLETE => {
            TransportEvent::HeadersComplete
        }
        sys::esp_http_client_event_id_t_HTTP_EVENT_ON_DATA => TransportEvent::Data {
            len: usize::try_from(evt.data_len).unwrap_or(0),
        },
        sys::esp_http_client_event_id_t_HTTP_EVENT_ON_FINISH => TransportEvent::Finish,
        sys::esp_http_client_event_id_t_HTTP_EVENT_DISCONNECTED => TransportEvent::Disconnected,
        sys::esp_http_client_event_id_t_HTTP_EVENT_REDIRECT => TransportEvent::Redirect,
        _ => return None,
    };
    Some(event)
}

/// HTTP client callback; `user_data` points at a `&dyn TransportObserver` on
/// the stack of [`EspHttpsOta::download`].
unsafe extern "C" fn http_event_handler(evt: *mut esp_http_client_event_t) -> sys::esp_err_t {
    // SAFETY: the client hands us a valid event for the duration of the call
    if let Some(evt) = unsafe { evt.as_ref() } {
        if !evt.user_data.is_null() {
            // SAFETY: set in `download`, which outlives the synchronous OTA call
            let observer = unsafe { &*(evt.user_data as *const &dyn TransportObserver) };
            if let Some(event) = translate(evt) {
                observer.on_event(&event);
            }
        }
    }
    sys::ESP_OK as sys::esp_err_t
}

/// Download engine backed by `esp_https_ota`: HTTPS GET, TLS, flash writes
/// and boot partition switch in one blocking call.
pub struct EspHttpsOta;

impl DownloadEngine for EspHttpsOta {
    fn download(
        &self,
        request: &DownloadRequest<'_>,
        observer: &dyn TransportObserver,
    ) -> Result<(), EngineError> {
        let invalid_arg = EngineError {
            code: sys::ESP_ERR_INVALID_ARG as i32,
        };
        let url = CString::new(request.url).map_err(|_| invalid_arg)?;
        let buffer_size = i32::try_from(request.buffer_size).map_err(|_| invalid_arg)?;
        let timeout_ms = i32::try_from(request.timeout.as_millis()).unwrap_or(i32::MAX);
        let observer_ref: &dyn TransportObserver = observer;

        let http_config = sys::esp_http_client_config_t {
            url: url.as_ptr(),
            cert_pem: request
                .certificate
                .map_or(std::ptr::null(), |cert| cert.as_c_str().as_ptr()),
            timeout_ms,
            buffer_size,
            buffer_size_tx: buffer_size,
            keep_alive_enable: request.keep_alive,
            skip_cert_common_name_check: request.skip_common_name_check,
            event_handler: Some(http_event_handler),
            user_data: std::ptr::from_ref(&observer_ref).cast_mut().cast::<c_void>(),
            ..Default::default()
        };
        let ota_config = sys::esp_https_ota_config_t {
            http_config: &http_config,
            ..Default::default()
        };

        // SAFETY: every pointer in the configs outlives this blocking call
        esp!(unsafe { sys::esp_https_ota(&ota_config) }).map_err(|e| EngineError { code: e.code() })
    }
}

/// Heap statistics and restart.
pub struct EspSystem;

impl SystemControl for EspSystem {
    fn free_heap(&self) -> usize {
        // SAFETY: read-only heap statistics
        unsafe { sys::esp_get_free_heap_size() as usize }
    }

    fn restart(&self) {
        esp_idf_hal::reset::restart();
    }
}

/// Bring up the update feature: create the request gate and spawn the update
/// task.
///
/// Returns the coordinator phase for the status LED. On error the feature is
/// disabled for this boot; button presses are then logged and ignored.
pub fn start(settings: UpdateSettings, network: Arc<ConnectivityStatus>) -> Result<Arc<PhaseCell>> {
    let gate = request_gate::init_global()?;

    info!(
        "OTA: image {} (connect timeout {} ms, http timeout {} ms, buffer {} B)",
        settings.url, settings.connect_timeout_ms, settings.http_timeout_ms, settings.buffer_size
    );

    let mut coordinator = UpdateCoordinator::new(
        gate,
        network,
        CertificateProvider::new(CA_CERT),
        EspPartitions,
        DownloadAdapter::new(EspHttpsOta, settings),
        EspSystem,
    );
    let phase = coordinator.phase_handle();

    crate::thread_util::spawn_named(c"ota_task", OTA_TASK_STACK, OTA_TASK_PRIORITY, move || {
        coordinator.run();
    })?;

    info!("OTA: update task started");
    Ok(phase)
}
