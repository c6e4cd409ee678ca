use anyhow::{anyhow, Result};
use esp_idf_svc::nvs::{EspNvs, EspNvsPartition, NvsDefault};
use log::{debug, info, warn, LevelFilter};
use serde::{Deserialize, Serialize};
use std::sync::Mutex;

pub use otatrigger_core::{BlinkSettings, UpdateSettings};

/// Build-time defaults. Override with `WIFI_SSID=... WIFI_PASS=... OTA_URL=... cargo build`.
const DEFAULT_WIFI_SSID: &str = match option_env!("WIFI_SSID") {
    Some(ssid) if !ssid.is_empty() => ssid,
    _ => "otatrigger",
};
const DEFAULT_WIFI_PASS: Option<&str> = option_env!("WIFI_PASS");
const DEFAULT_OTA_URL: &str = match option_env!("OTA_URL") {
    Some(url) if !url.is_empty() => url,
    _ => otatrigger_core::settings::DEFAULT_URL,
};

/// Configurable log level
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Off,
    Error,
    Warn,
    #[default]
    Info,
    Debug,
}

impl LogLevel {
    #[must_use]
    pub const fn as_level_filter(self) -> LevelFilter {
        match self {
            Self::Off => LevelFilter::Off,
            Self::Error => LevelFilter::Error,
            Self::Warn => LevelFilter::Warn,
            Self::Info => LevelFilter::Info,
            Self::Debug => LevelFilter::Debug,
        }
    }
}

const NVS_NAMESPACE: &str = "otatrigger";
const NVS_CONFIG_KEY: &str = "config";

// Global NVS handle - initialized once in main
static NVS: Mutex<Option<EspNvs<NvsDefault>>> = Mutex::new(None);

pub fn init_nvs(nvs_partition: EspNvsPartition<NvsDefault>) -> Result<()> {
    debug!("Initializing NVS namespace: {NVS_NAMESPACE}");
    let nvs = EspNvs::new(nvs_partition, NVS_NAMESPACE, true)?;
    *NVS.lock().unwrap() = Some(nvs);
    info!("NVS initialized");
    Ok(())
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WifiConfig {
    pub ssid: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    /// Connection attempts per cycle before the link is reported as failed
    #[serde(default = "default_max_retry")]
    pub max_retry: u32,
}

const fn default_max_retry() -> u32 {
    5
}

impl Default for WifiConfig {
    fn default() -> Self {
        Self {
            ssid: DEFAULT_WIFI_SSID.to_string(),
            password: DEFAULT_WIFI_PASS.map(str::to_string),
            max_retry: default_max_retry(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub wifi: WifiConfig,
    #[serde(default = "default_update")]
    pub update: UpdateSettings,
    #[serde(default)]
    pub log_level: LogLevel,
    /// Active-low update button
    #[serde(default = "default_button_gpio")]
    pub button_gpio: u8,
    #[serde(default = "default_led_gpio")]
    pub led_gpio: u8,
    #[serde(default)]
    pub blink: BlinkSettings,
}

fn default_update() -> UpdateSettings {
    UpdateSettings::with_url(DEFAULT_OTA_URL)
}

const fn default_button_gpio() -> u8 {
    0
}

const fn default_led_gpio() -> u8 {
    40
}

impl Default for Config {
    fn default() -> Self {
        Self {
            wifi: WifiConfig::default(),
            update: default_update(),
            log_level: LogLevel::default(),
            button_gpio: default_button_gpio(),
            led_gpio: default_led_gpio(),
            blink: BlinkSettings::default(),
        }
    }
}

impl Config {
    /// Clamp values to valid ranges and fix invalid values
    pub fn validate(&mut self) {
        if self.wifi.ssid.is_empty() {
            warn!("WiFi SSID is empty, resetting to default");
            self.wifi = WifiConfig::default();
        }
        if self.wifi.max_retry == 0 {
            warn!("WiFi max_retry is 0, resetting to default");
            self.wifi.max_retry = default_max_retry();
        }
        if self.button_gpio == self.led_gpio {
            warn!(
                "Button and LED share GPIO {}, resetting both to defaults",
                self.button_gpio
            );
            self.button_gpio = default_button_gpio();
            self.led_gpio = default_led_gpio();
        }
        self.blink.validate();
        self.update.validate();
    }

    pub fn load_or_default() -> Self {
        match Self::load() {
            Ok(mut config) => {
                info!("Loaded config from NVS");
                config.validate();
                config
            }
            Err(e) => {
                warn!("Failed to load config from NVS: {e}, using defaults");
                // Build-time values go through the same checks as stored ones
                let mut config = Self::default();
                config.validate();
                // Persist so the next boot (and anyone reading NVS) sees the same values
                if let Err(e) = config.save() {
                    warn!("Failed to save default config: {e}");
                }
                config
            }
        }
    }

    pub fn load() -> Result<Self> {
        debug!("Loading config from NVS");
        let nvs_guard = NVS.lock().unwrap();
        let nvs = nvs_guard.as_ref().ok_or_else(|| anyhow!("NVS not initialized"))?;

        // Get the blob length first
        let len = nvs.blob_len(NVS_CONFIG_KEY)?;
        if let Some(len) = len {
            debug!("Config blob size: {len} bytes");
            let mut buf = vec![0u8; len];
            nvs.get_blob(NVS_CONFIG_KEY, &mut buf)?;
            let config: Config = serde_json::from_slice(&buf)?;
            debug!(
                "Config parsed: wifi.ssid={:?}, update.url={:?}, log_level={:?}",
                config.wifi.ssid, config.update.url, config.log_level
            );
            Ok(config)
        } else {
            Err(anyhow!("No config found in NVS"))
        }
    }

    pub fn save(&self) -> Result<()> {
        debug!("Saving config to NVS");
        let mut nvs_guard = NVS.lock().unwrap();
        let nvs = nvs_guard.as_mut().ok_or_else(|| anyhow!("NVS not initialized"))?;

        let json = serde_json::to_vec(self)?;
        debug!("Config JSON size: {} bytes", json.len());
        nvs.set_blob(NVS_CONFIG_KEY, &json)?;
        info!("Config saved to NVS");
        Ok(())
    }
}
