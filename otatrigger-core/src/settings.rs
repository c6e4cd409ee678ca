//! Tunables for an update attempt.
//!
//! Everything that used to differ between copy-pasted OTA flows (buffer size,
//! timeouts, host-name checking) is a named field here instead.

use log::warn;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default firmware image location.
pub const DEFAULT_URL: &str = "https://192.168.0.112/firmware.bin";

/// Smallest accepted HTTP buffer. Below this the TLS record reads time out.
pub const MIN_BUFFER_SIZE: usize = 512;

/// Largest accepted HTTP buffer.
pub const MAX_BUFFER_SIZE: usize = 16 * 1024;

/// Upper bound for both timeouts (ms).
pub const MAX_TIMEOUT_MS: u64 = 300_000;

/// Whether the TLS layer checks the server certificate's common name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HostVerification {
    /// Skip the check only when the URL host is an IP literal
    #[default]
    Auto,
    /// Always verify the common name
    Always,
    /// Never verify the common name
    Skip,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateSettings {
    /// Firmware image URL
    #[serde(default = "default_url")]
    pub url: String,
    /// How long to wait for the Wi-Fi link before giving up (ms)
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    /// HTTP client network timeout (ms)
    #[serde(default = "default_http_timeout_ms")]
    pub http_timeout_ms: u64,
    /// HTTP receive/transmit buffer size. Smaller saves heap, larger is more
    /// tolerant of slow links.
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,
    /// Keep the connection alive after the transfer
    #[serde(default)]
    pub keep_alive: bool,
    #[serde(default)]
    pub host_verification: HostVerification,
    /// Abort instead of downloading unauthenticated when no certificate is usable
    #[serde(default)]
    pub require_certificate: bool,
}

fn default_url() -> String {
    DEFAULT_URL.to_string()
}

const fn default_connect_timeout_ms() -> u64 {
    30_000
}

const fn default_http_timeout_ms() -> u64 {
    15_000
}

const fn default_buffer_size() -> usize {
    2048
}

impl Default for UpdateSettings {
    fn default() -> Self {
        Self {
            url: default_url(),
            connect_timeout_ms: default_connect_timeout_ms(),
            http_timeout_ms: default_http_timeout_ms(),
            buffer_size: default_buffer_size(),
            keep_alive: false,
            host_verification: HostVerification::default(),
            require_certificate: false,
        }
    }
}

impl UpdateSettings {
    /// Settings with a custom image URL and defaults for everything else.
    pub fn with_url(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Self::default()
        }
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_millis(self.http_timeout_ms)
    }

    /// Clamp values to valid ranges and fix invalid values
    pub fn validate(&mut self) {
        if self.url.trim().is_empty() {
            warn!("Update URL is empty, resetting to default");
            self.url = default_url();
        }
        let clamped = self.buffer_size.clamp(MIN_BUFFER_SIZE, MAX_BUFFER_SIZE);
        if clamped != self.buffer_size {
            warn!("Clamping buffer_size from {} to {clamped}", self.buffer_size);
            self.buffer_size = clamped;
        }
        if self.connect_timeout_ms == 0 || self.connect_timeout_ms > MAX_TIMEOUT_MS {
            warn!(
                "connect_timeout_ms {} out of range, resetting to default",
                self.connect_timeout_ms
            );
            self.connect_timeout_ms = default_connect_timeout_ms();
        }
        if self.http_timeout_ms == 0 || self.http_timeout_ms > MAX_TIMEOUT_MS {
            warn!(
                "http_timeout_ms {} out of range, resetting to default",
                self.http_timeout_ms
            );
            self.http_timeout_ms = default_http_timeout_ms();
        }
    }
}

/// Blinks per idle group. Bump it together with the firmware version so the
/// running image can be told apart by eye after an update.
pub const DEFAULT_BLINK_COUNT: u8 = 2;

/// Idle pattern of the status LED: `count` blinks of `on_ms`, then `off_ms` dark.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlinkSettings {
    /// LED on (and off) time for each blink (ms)
    #[serde(default = "default_blink_on_ms")]
    pub on_ms: u32,
    /// Pause after a group of blinks (ms)
    #[serde(default = "default_blink_off_ms")]
    pub off_ms: u32,
    /// Blinks per group; zero leaves the LED dark while idle
    #[serde(default = "default_blink_count")]
    pub count: u8,
}

const fn default_blink_on_ms() -> u32 {
    300
}

const fn default_blink_off_ms() -> u32 {
    1000
}

const fn default_blink_count() -> u8 {
    DEFAULT_BLINK_COUNT
}

impl Default for BlinkSettings {
    fn default() -> Self {
        Self {
            on_ms: default_blink_on_ms(),
            off_ms: default_blink_off_ms(),
            count: default_blink_count(),
        }
    }
}

impl BlinkSettings {
    /// Reset zero durations. The LED task sleeps for these, so every idle
    /// group takes at least `off_ms` even with `count == 0`.
    pub fn validate(&mut self) {
        if self.on_ms == 0 {
            warn!("Blink on_ms is 0, resetting to default");
            self.on_ms = default_blink_on_ms();
        }
        if self.off_ms == 0 {
            warn!("Blink off_ms is 0, resetting to default");
            self.off_ms = default_blink_off_ms();
        }
    }

    /// Duration of one idle group.
    pub fn group_period(&self) -> Duration {
        Duration::from_millis(
            2 * u64::from(self.on_ms) * u64::from(self.count) + u64::from(self.off_ms),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let settings = UpdateSettings::default();
        assert_eq!(settings.url, DEFAULT_URL);
        assert_eq!(settings.connect_timeout(), Duration::from_secs(30));
        assert_eq!(settings.buffer_size, 2048);
        assert!(!settings.keep_alive);
        assert_eq!(settings.host_verification, HostVerification::Auto);
        assert!(!settings.require_certificate);
    }

    #[test]
    fn test_missing_fields_use_defaults() {
        let settings: UpdateSettings =
            serde_json::from_str(r#"{"url":"https://example.com/fw.bin","buffer_size":4096}"#)
                .unwrap();
        assert_eq!(settings.url, "https://example.com/fw.bin");
        assert_eq!(settings.buffer_size, 4096);
        assert_eq!(settings.http_timeout_ms, 15_000);
        assert_eq!(settings.host_verification, HostVerification::Auto);
    }

    #[test]
    fn test_host_verification_serialized_lowercase() {
        let settings = UpdateSettings {
            host_verification: HostVerification::Skip,
            ..UpdateSettings::default()
        };
        let json = serde_json::to_string(&settings).unwrap();
        assert!(json.contains(r#""host_verification":"skip""#));
    }

    #[test]
    fn test_validate_clamps_and_resets() {
        let mut settings = UpdateSettings {
            url: "  ".to_string(),
            buffer_size: 64,
            connect_timeout_ms: 0,
            http_timeout_ms: MAX_TIMEOUT_MS + 1,
            ..UpdateSettings::default()
        };
        settings.validate();

        assert_eq!(settings.url, DEFAULT_URL);
        assert_eq!(settings.buffer_size, MIN_BUFFER_SIZE);
        assert_eq!(settings.connect_timeout_ms, 30_000);
        assert_eq!(settings.http_timeout_ms, 15_000);

        settings.buffer_size = 1 << 20;
        settings.validate();
        assert_eq!(settings.buffer_size, MAX_BUFFER_SIZE);
    }

    #[test]
    fn test_validate_keeps_sane_values() {
        let mut settings = UpdateSettings::with_url("https://jbar.dev/firmware.bin");
        settings.buffer_size = 4096;
        let before = settings.clone();
        settings.validate();
        assert_eq!(settings, before);
    }

    #[test]
    fn test_blink_defaults() {
        let blink: BlinkSettings = serde_json::from_str("{}").unwrap();
        assert_eq!(blink, BlinkSettings::default());
        assert_eq!(blink.count, DEFAULT_BLINK_COUNT);
        assert_eq!(blink.group_period(), Duration::from_millis(2 * 300 * 2 + 1000));
    }

    #[test]
    fn test_blink_validate_never_leaves_a_zero_period() {
        let mut blink = BlinkSettings {
            on_ms: 0,
            off_ms: 0,
            count: 0,
        };
        assert_eq!(blink.group_period(), Duration::ZERO);

        blink.validate();
        assert_eq!(blink.on_ms, 300);
        assert_eq!(blink.off_ms, 1000);
        assert_eq!(blink.count, 0);
        assert_eq!(blink.group_period(), Duration::from_millis(1000));
    }

    #[test]
    fn test_blink_validate_keeps_custom_pattern() {
        let mut blink = BlinkSettings {
            on_ms: 100,
            off_ms: 2500,
            count: 5,
        };
        blink.validate();
        assert_eq!(
            blink,
            BlinkSettings {
                on_ms: 100,
                off_ms: 2500,
                count: 5,
            }
        );
    }

    #[test]
    fn test_validate_replaces_empty_url() {
        let mut settings = UpdateSettings::with_url("");
        settings.validate();
        assert_eq!(settings.url, DEFAULT_URL);

        let mut settings = UpdateSettings::with_url("   ");
        settings.validate();
        assert_eq!(settings.url, DEFAULT_URL);
    }
}
