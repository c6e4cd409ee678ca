//! Status LED task.
//!
//! Idle pattern: `count` blinks of `on_ms`, then a pause of `off_ms`. The count
//! is the firmware's blink count, so after an update the running image can be
//! told apart by eye. While an update attempt is under way the LED blinks
//! rapidly instead.

use anyhow::Result;
use esp_idf_hal::delay::FreeRtos;
use esp_idf_hal::gpio::{AnyOutputPin, Output, PinDriver};
use log::{debug, info, warn};
use otatrigger_core::{PhaseCell, UpdatePhase};
use std::sync::Arc;

use crate::config::BlinkSettings;

const LED_TASK_STACK: usize = 3072;
const LED_TASK_PRIORITY: u8 = 2;

/// Half period of the rapid blink during an update
const ACTIVE_BLINK_MS: u32 = 100;

pub struct StatusLed {
    pin: PinDriver<'static, AnyOutputPin, Output>,
    blink: BlinkSettings,
    phase: Option<Arc<PhaseCell>>,
}

impl StatusLed {
    pub fn new(led_gpio: u8, blink: BlinkSettings) -> Result<Self> {
        debug!("Creating status LED on GPIO {led_gpio}");
        // SAFETY: We trust the user-configured GPIO pin number is valid for this board
        let pin = unsafe { AnyOutputPin::new(i32::from(led_gpio)) };
        let mut pin = PinDriver::output(pin)?;
        pin.set_low()?;
        Ok(Self {
            pin,
            blink,
            phase: None,
        })
    }

    /// Follow the coordinator phase. Without it only the idle pattern is shown.
    pub fn with_phase(mut self, phase: Arc<PhaseCell>) -> Self {
        self.phase = Some(phase);
        self
    }

    fn phase(&self) -> UpdatePhase {
        self.phase.as_ref().map_or(UpdatePhase::Idle, |p| p.load())
    }

    fn set(&mut self, on: bool) {
        let result = if on {
            self.pin.set_high()
        } else {
            self.pin.set_low()
        };
        if let Err(e) = result {
            warn!("Status LED: failed to drive pin: {e:?}");
        }
    }

    /// One blink group, or one rapid blink while an update is active.
    fn cycle(&mut self) {
        if self.phase().is_active() {
            self.set(true);
            FreeRtos::delay_ms(ACTIVE_BLINK_MS);
            self.set(false);
            FreeRtos::delay_ms(ACTIVE_BLINK_MS);
            return;
        }

        for _ in 0..self.blink.count {
            self.set(true);
            FreeRtos::delay_ms(self.blink.on_ms);
            self.set(false);
            FreeRtos::delay_ms(self.blink.on_ms);
            if self.phase().is_active() {
                return;
            }
        }
        FreeRtos::delay_ms(self.blink.off_ms);
    }

    /// Move the LED into its own task.
    pub fn spawn(mut self) -> Result<()> {
        info!(
            "Status LED: {} blinks of {} ms every {} ms",
            self.blink.count,
            self.blink.on_ms,
            self.blink.group_period().as_millis()
        );
        crate::thread_util::spawn_named(c"status_led", LED_TASK_STACK, LED_TASK_PRIORITY, move || {
            loop {
                self.cycle();
            }
        })?;
        Ok(())
    }
}
