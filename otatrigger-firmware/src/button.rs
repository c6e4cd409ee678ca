//! Update button task.
//!
//! The button connects the GPIO to GND when pressed; the internal pull-up holds
//! it high otherwise. A falling-edge interrupt wakes the task early, but presses
//! are confirmed by sampling the level through the core [`Debouncer`], so the
//! task also polls every [`POLL_INTERVAL`] to see the level settle.
//!
//! Each confirmed press raises the global update request gate. Presses while a
//! request is already pending coalesce into it.

use anyhow::Result;
use core::num::NonZero;
use esp_idf_hal::delay::TickType;
use esp_idf_hal::gpio::{AnyIOPin, Input, InterruptType, PinDriver, Pull};
use esp_idf_hal::task::notification::Notification;
use log::{debug, info, warn};
use otatrigger_core::request_gate;
use otatrigger_core::trigger::{DEBOUNCE, POLL_INTERVAL};
use otatrigger_core::Debouncer;
use std::time::Instant;

use crate::watchdog::WatchdogHandle;

const BUTTON_TASK_STACK: usize = 4096;
const BUTTON_TASK_PRIORITY: u8 = 6;

fn init_button(button_gpio: u8) -> Result<PinDriver<'static, AnyIOPin, Input>> {
    // SAFETY: We trust the user-configured GPIO pin number is valid
    let pin = unsafe { AnyIOPin::new(i32::from(button_gpio)) };
    let mut button = PinDriver::input(pin)?;
    button.set_pull(Pull::Up)?;
    button.set_interrupt_type(InterruptType::NegEdge)?;
    Ok(button)
}

/// Configure the button GPIO and spawn the button task.
pub fn start(button_gpio: u8) -> Result<()> {
    info!("Initializing update button on GPIO {button_gpio}...");
    let button = init_button(button_gpio)?;
    crate::thread_util::spawn_named(c"button", BUTTON_TASK_STACK, BUTTON_TASK_PRIORITY, move || {
        button_task(button);
    })?;
    Ok(())
}

#[allow(clippy::needless_pass_by_value)] // driver is intentionally moved into this task
fn button_task(mut button: PinDriver<'static, AnyIOPin, Input>) {
    let watchdog = WatchdogHandle::register_or_log(c"button");
    let notification = Notification::new();
    let poll_ticks = TickType::from(POLL_INTERVAL).ticks();

    let mut debouncer = Debouncer::new(button.is_high(), DEBOUNCE);
    if debouncer.is_held() {
        warn!("Button: held at boot, release it to arm");
    }
    info!("Button task started");

    loop {
        if let Some(watchdog) = &watchdog {
            watchdog.feed();
        }

        // The ISR disables the interrupt after it fires, so re-arm every pass
        let waker = notification.notifier();
        // SAFETY: The callback only notifies, no unsafe operations
        let subscribed = unsafe {
            button.subscribe_nonstatic(move || {
                waker.notify(NonZero::<u32>::MIN);
            })
        };
        match subscribed {
            Ok(()) => {
                if let Err(e) = button.enable_interrupt() {
                    debug!("Button: failed to enable interrupt: {e:?}");
                }
            }
            Err(e) => debug!("Button: failed to subscribe: {e:?}"),
        }

        if notification.wait(poll_ticks).is_some() {
            debug!("Button: edge interrupt");
        }

        if debouncer.update(button.is_high(), Instant::now()) {
            match request_gate::signal_global() {
                Ok(true) => info!("Button: update requested"),
                Ok(false) => info!("Button: update already pending"),
                Err(e) => warn!("Button: press ignored, updates unavailable ({e})"),
            }
        }
    }
}
