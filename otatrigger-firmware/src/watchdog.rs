//! Task watchdog integration for the polling tasks.
//!
//! The button and Wi-Fi tasks wake at least every few seconds, so they
//! register with ESP-IDF's Task Watchdog Timer (TWDT). The update task does not:
//! it blocks indefinitely on the request gate and then inside the download.

use esp_idf_svc::sys::{
    esp, esp_task_wdt_add_user, esp_task_wdt_delete_user, esp_task_wdt_reset_user,
    esp_task_wdt_user_handle_t, EspError,
};
use log::{debug, error};
use std::ffi::CStr;

/// A registered watchdog user. Unregisters on drop.
pub struct WatchdogHandle {
    handle: esp_task_wdt_user_handle_t,
    name: &'static CStr,
}

impl WatchdogHandle {
    /// Register a watchdog user, e.g. `c"button"`.
    pub fn register(name: &'static CStr) -> Result<Self, EspError> {
        let mut handle: esp_task_wdt_user_handle_t = std::ptr::null_mut();
        // SAFETY: `name` is 'static and `handle` outlives the call
        esp!(unsafe { esp_task_wdt_add_user(name.as_ptr(), &mut handle) })?;
        debug!("Watchdog: registered user {name:?}");
        Ok(Self { handle, name })
    }

    /// Register, or run unsupervised if the TWDT is unavailable.
    pub fn register_or_log(name: &'static CStr) -> Option<Self> {
        Self::register(name)
            .inspect_err(|e| error!("Watchdog: failed to register {name:?}: {e}"))
            .ok()
    }

    /// Feed the watchdog. Must be called within the TWDT timeout.
    pub fn feed(&self) {
        // SAFETY: handle came from a successful esp_task_wdt_add_user
        let result = unsafe { esp_task_wdt_reset_user(self.handle) };
        if result != 0 {
            error!("Watchdog: failed to feed {:?}", self.name);
        }
    }
}

impl Drop for WatchdogHandle {
    fn drop(&mut self) {
        debug!("Watchdog: unregistering user {:?}", self.name);
        // SAFETY: handle is still registered, it is only deleted here
        let result = unsafe { esp_task_wdt_delete_user(self.handle) };
        if result != 0 {
            error!(
                "Watchdog: failed to unregister {:?}: error code {result}",
                self.name
            );
        }
    }
}
