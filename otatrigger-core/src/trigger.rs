//! Debounced falling-edge detector for an active-low push button.
//!
//! The button task samples the pin level periodically and feeds each sample
//! (with its timestamp) into [`Debouncer::update`]. A press is reported once the
//! level has gone high → low and is still low after the debounce interval.
//! Holding the button does not repeat; it must be released first.

use std::time::{Duration, Instant};

/// Time the input must stay low after a falling edge to count as a press.
pub const DEBOUNCE: Duration = Duration::from_millis(50);

/// Interval at which the button task samples the input.
pub const POLL_INTERVAL: Duration = Duration::from_millis(20);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ButtonState {
    Released,
    /// Falling edge seen at the given instant, waiting out the bounce
    Settling(Instant),
    /// Press reported, waiting for release
    Held,
}

#[derive(Debug, Clone)]
pub struct Debouncer {
    state: ButtonState,
    last_high: bool,
    debounce: Duration,
}

impl Debouncer {
    /// `initial_high` is the pin level at startup. Starting with the button
    /// held down does not produce a press.
    pub fn new(initial_high: bool, debounce: Duration) -> Self {
        Self {
            state: if initial_high {
                ButtonState::Released
            } else {
                ButtonState::Held
            },
            last_high: initial_high,
            debounce,
        }
    }

    /// Feed one sample. Returns `true` exactly once per confirmed press.
    pub fn update(&mut self, high: bool, now: Instant) -> bool {
        let falling_edge = self.last_high && !high;
        self.last_high = high;

        match self.state {
            ButtonState::Released => {
                if falling_edge {
                    self.state = ButtonState::Settling(now);
                }
                false
            }
            ButtonState::Settling(since) => {
                if now.duration_since(since) < self.debounce {
                    return false;
                }
                if high {
                    // Bounce or glitch, not a press
                    self.state = ButtonState::Released;
                    false
                } else {
                    self.state = ButtonState::Held;
                    true
                }
            }
            ButtonState::Held => {
                if high {
                    self.state = ButtonState::Released;
                }
                false
            }
        }
    }

    /// Whether a press was reported and the button is still down.
    pub fn is_held(&self) -> bool {
        self.state == ButtonState::Held
    }
}

impl Default for Debouncer {
    fn default() -> Self {
        Self::new(true, DEBOUNCE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Feed `(offset_ms, level_high)` samples, return the offsets that reported a press.
    fn run(debouncer: &mut Debouncer, samples: &[(u64, bool)]) -> Vec<u64> {
        let base = Instant::now();
        samples
            .iter()
            .filter(|(t, high)| debouncer.update(*high, base + Duration::from_millis(*t)))
            .map(|(t, _)| *t)
            .collect()
    }

    #[test]
    fn test_clean_press_reported_after_debounce() {
        let mut debouncer = Debouncer::default();
        let presses = run(
            &mut debouncer,
            &[(0, true), (20, false), (40, false), (60, false), (80, false)],
        );
        assert_eq!(presses, vec![80]);
        assert!(debouncer.is_held());
    }

    #[test]
    fn test_holding_does_not_repeat() {
        let mut debouncer = Debouncer::default();
        let mut samples = vec![(0, true)];
        samples.extend((1..100).map(|i| (i * 20, false)));
        assert_eq!(run(&mut debouncer, &samples).len(), 1);
    }

    #[test]
    fn test_bounce_is_filtered() {
        let mut debouncer = Debouncer::default();
        // Short low pulse that is high again when the debounce interval expires
        let presses = run(
            &mut debouncer,
            &[(0, true), (20, false), (40, true), (80, true), (100, true)],
        );
        assert!(presses.is_empty());
        assert!(!debouncer.is_held());
    }

    #[test]
    fn test_release_then_press_again() {
        let mut debouncer = Debouncer::default();
        let presses = run(
            &mut debouncer,
            &[
                (0, true),
                (20, false),
                (80, false),
                (100, true),
                (120, true),
                (140, false),
                (200, false),
            ],
        );
        assert_eq!(presses, vec![80, 200]);
    }

    #[test]
    fn test_button_held_at_boot_needs_release() {
        let mut debouncer = Debouncer::new(false, DEBOUNCE);
        let presses = run(&mut debouncer, &[(0, false), (100, false), (200, false)]);
        assert!(presses.is_empty());

        let presses = run(&mut debouncer, &[(0, true), (20, false), (100, false)]);
        assert_eq!(presses, vec![100]);
    }
}
