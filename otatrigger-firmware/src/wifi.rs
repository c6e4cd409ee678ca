//! Wi-Fi station manager.
//!
//! Runs a connect cycle of up to `max_retry` attempts and publishes the result
//! to the shared [`ConnectivityStatus`]: `Connected` once the netif has an IP,
//! `Failed` when the cycle's budget is spent. After a failed cycle it backs off
//! before the next one; on a dropped link it clears the flags and reconnects.
//! Each attempt scans first and only connects when the SSID is on the air.

use anyhow::{anyhow, Result};
use esp_idf_hal::delay::FreeRtos;
use esp_idf_hal::modem::Modem;
use esp_idf_svc::eventloop::EspSystemEventLoop;
use esp_idf_svc::nvs::EspDefaultNvsPartition;
use esp_idf_svc::wifi::{AuthMethod, BlockingWifi, ClientConfiguration, Configuration, EspWifi};
use log::{debug, info, warn};
use otatrigger_core::{ConnectivityFlag, ConnectivityStatus};
use std::sync::Arc;
use std::time::Duration;

use crate::config::WifiConfig;
use crate::watchdog::WatchdogHandle;

const WIFI_TASK_STACK: usize = 6144;
const WIFI_TASK_PRIORITY: u8 = 5;

/// Pause between attempts within a cycle
const RETRY_DELAY_MS: u32 = 1000;

/// Pause after a failed cycle before starting over
const FAILED_BACKOFF: Duration = Duration::from_secs(10);

/// Link check interval while connected
const MONITOR_INTERVAL_MS: u32 = 1000;

/// Longest unfed block in a cycle: `BlockingWifi::connect` waits this long
/// for the association event
const CONNECT_BLOCK_SECS: u32 = 15;
const _: () = assert!(
    CONNECT_BLOCK_SECS < esp_idf_svc::sys::CONFIG_ESP_TASK_WDT_TIMEOUT_S,
    "task watchdog timeout must exceed the Wi-Fi connect wait"
);

/// IP wait slice; the watchdog is fed between slices
const IP_WAIT_SLICE: Duration = Duration::from_secs(3);
const IP_WAIT_SLICES: u32 = 5;

/// Configure the station interface, start the driver and spawn the manager
/// task. The returned status is shared with the update coordinator.
pub fn start(
    modem: Modem,
    sys_loop: EspSystemEventLoop,
    nvs: EspDefaultNvsPartition,
    config: &WifiConfig,
) -> Result<Arc<ConnectivityStatus>> {
    let password = config.password.clone().unwrap_or_default();
    let auth_method = if password.is_empty() {
        AuthMethod::None
    } else {
        AuthMethod::WPA2Personal
    };

    let mut wifi = BlockingWifi::wrap(
        EspWifi::new(modem, sys_loop.clone(), Some(nvs))?,
        sys_loop,
    )?;
    wifi.set_configuration(&Configuration::Client(ClientConfiguration {
        ssid: config
            .ssid
            .as_str()
            .try_into()
            .map_err(|_| anyhow!("SSID '{}' is too long", config.ssid))?,
        password: password
            .as_str()
            .try_into()
            .map_err(|_| anyhow!("WiFi password is too long"))?,
        auth_method,
        ..Default::default()
    }))?;
    wifi.start()?;
    info!("WiFi started in STA mode for '{}'", config.ssid);

    let status = Arc::new(ConnectivityStatus::new());
    let manager = StationManager {
        wifi,
        status: status.clone(),
        ssid: config.ssid.clone(),
        max_retry: config.max_retry,
    };
    crate::thread_util::spawn_named(c"wifi_manager", WIFI_TASK_STACK, WIFI_TASK_PRIORITY, move || {
        manager.run();
    })?;

    Ok(status)
}

struct StationManager {
    wifi: BlockingWifi<EspWifi<'static>>,
    status: Arc<ConnectivityStatus>,
    ssid: String,
    max_retry: u32,
}

impl StationManager {
    fn run(mut self) {
        let watchdog = WatchdogHandle::register_or_log(c"wifi_manager");
        let feed = || {
            if let Some(watchdog) = &watchdog {
                watchdog.feed();
            }
        };

        loop {
            feed();
            if self.connect_cycle(&feed) {
                self.status.set(ConnectivityFlag::Connected);
                self.monitor(&feed);
                warn!("WiFi: disconnected from '{}', reconnecting", self.ssid);
                self.status.clear();
            } else {
                warn!(
                    "WiFi: could not connect to '{}' after {} attempts, retrying in {}s",
                    self.ssid,
                    self.max_retry,
                    FAILED_BACKOFF.as_secs()
                );
                self.status.set(ConnectivityFlag::Failed);
                for _ in 0..FAILED_BACKOFF.as_secs() {
                    FreeRtos::delay_ms(1000);
                    feed();
                }
                self.status.clear();
            }
        }
    }

    /// Up to `max_retry` connection attempts. Returns `true` once the station
    /// has an IP address.
    ///
    /// `connect` is only called once a scan has seen the SSID: it blocks for
    /// the driver's connect timeout when the access point is absent, longer
    /// than the watchdog allows without a feed.
    fn connect_cycle(&mut self, feed: &impl Fn()) -> bool {
        for attempt in 1..=self.max_retry {
            feed();
            if self.target_visible() {
                feed();
                debug!("WiFi: connecting to '{}' ({attempt}/{})", self.ssid, self.max_retry);
                match self.wifi.connect() {
                    Ok(()) => {
                        if self.wait_for_ip(feed) {
                            return true;
                        }
                        warn!("WiFi: no IP from '{}' (attempt {attempt})", self.ssid);
                        // Non-blocking: the next attempt scans again anyway
                        if let Err(e) = self.wifi.wifi_mut().disconnect() {
                            debug!("WiFi: disconnect after failed attempt: {e:?}");
                        }
                    }
                    Err(e) => warn!("WiFi: connect attempt {attempt} failed: {e:?}"),
                }
            } else {
                debug!("WiFi: '{}' not visible (attempt {attempt})", self.ssid);
            }
            feed();
            FreeRtos::delay_ms(RETRY_DELAY_MS);
        }
        false
    }

    fn target_visible(&mut self) -> bool {
        match self.wifi.scan() {
            Ok(networks) => {
                let found = networks.iter().any(|ap| ap.ssid.as_str() == self.ssid);
                if !found {
                    debug!(
                        "Target network '{}' not found ({} networks seen)",
                        self.ssid,
                        networks.len()
                    );
                }
                found
            }
            Err(e) => {
                warn!("WiFi scan failed: {e:?}");
                false
            }
        }
    }

    fn wait_for_ip(&self, feed: &impl Fn()) -> bool {
        for _ in 0..IP_WAIT_SLICES {
            feed();
            let result = self
                .wifi
                .ip_wait_while(|| self.wifi.is_up().map(|up| !up), Some(IP_WAIT_SLICE));
            if result.is_ok() {
                match self.wifi.wifi().sta_netif().get_ip_info() {
                    Ok(ip_info) => {
                        info!("WiFi: connected to '{}' with IP {}", self.ssid, ip_info.ip);
                        return true;
                    }
                    Err(e) => warn!("WiFi: netif up but no IP info: {e:?}"),
                }
            }
        }
        false
    }

    /// Block while the link stays up.
    fn monitor(&self, feed: &impl Fn()) {
        loop {
            FreeRtos::delay_ms(MONITOR_INTERVAL_MS);
            feed();
            if !self.wifi.is_connected().unwrap_or(false) {
                return;
            }
        }
    }
}
