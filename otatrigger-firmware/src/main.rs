use anyhow::Result;
use esp_idf_hal::delay::FreeRtos;
use esp_idf_hal::prelude::*;
use esp_idf_svc::eventloop::EspSystemEventLoop;
use esp_idf_svc::nvs::EspDefaultNvsPartition;
use log::{error, info, warn};

mod button;
mod config;
mod ota;
mod status_led;
mod thread_util;
mod watchdog;
mod wifi;

use config::Config;
use status_led::StatusLed;

/// Build flavour reported at boot
pub const FIRMWARE_VARIANT: &str = "release";

fn main() -> Result<()> {
    // It is necessary to call this function once. Otherwise some patches to the runtime
    // implemented by esp-idf-sys might not link properly. See https://github.com/esp-rs/esp-idf-template/issues/71
    esp_idf_svc::sys::link_patches();

    // Bind the log crate to the ESP Logging facilities
    esp_idf_svc::log::EspLogger::initialize_default();

    info!("Starting otatrigger firmware...");

    // Confirm this image before anything else can crash it
    if let Err(e) = ota::mark_running_slot_valid() {
        warn!("Failed to mark running slot valid: {e}");
    }
    ota::log_firmware_info();

    let peripherals = Peripherals::take()?;
    let sys_loop = EspSystemEventLoop::take()?;
    let nvs = EspDefaultNvsPartition::take()?;

    // Initialize NVS for config storage
    config::init_nvs(nvs.clone())?;
    let config = Config::load_or_default();

    // Apply configured log level
    let level = config.log_level.as_level_filter();
    // Set for all targets (use "*" for global)
    if let Err(e) = esp_idf_svc::log::set_target_level("*", level) {
        warn!("Failed to set log level: {e}");
    } else {
        info!("Log level set to {:?}", config.log_level);
    }

    let status_led = match StatusLed::new(config.led_gpio, config.blink.clone()) {
        Ok(led) => Some(led),
        Err(e) => {
            warn!("Status LED unavailable on GPIO {}: {e}", config.led_gpio);
            None
        }
    };

    info!("Initializing WiFi...");
    let network = wifi::start(peripherals.modem, sys_loop, nvs, &config.wifi)?;

    // A failed update setup leaves the rest of the firmware running
    let phase = match ota::start(config.update.clone(), network) {
        Ok(phase) => Some(phase),
        Err(e) => {
            error!("OTA disabled for this boot: {e:?}");
            None
        }
    };

    if let Some(led) = status_led {
        let led = match phase {
            Some(phase) => led.with_phase(phase),
            None => led,
        };
        if let Err(e) = led.spawn() {
            warn!("Failed to start status LED task: {e:?}");
        }
    }

    button::start(config.button_gpio)?;

    info!("All systems running! Press the button to update.");

    // Main loop - keep alive
    loop {
        FreeRtos::delay_ms(1000);
    }
}
