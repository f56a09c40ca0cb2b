//! Scanner configuration parameters.

use embassy_time::Duration;

/// Configuration handed to [`Keypad::new`](crate::Keypad::new).
///
/// The defaults reproduce the usual electrical characteristics of a small
/// mechanical keypad: a 1 kHz scan tick, 20 ms press / 50 ms release
/// debounce, and a 5 s stuck-key timeout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Config {
    /// Interval between scan ticks. One row is sampled per tick, so a full
    /// matrix pass takes four intervals.
    pub scan_interval: Duration,
    /// Delay between asserting a row and sampling the columns, to let the
    /// lines settle electrically.
    pub settle_time: Duration,
    /// How long a raw press must persist before a `Pressed` event fires.
    pub debounce_press: Duration,
    /// How long a raw release must persist before a `Released` event fires.
    pub debounce_release: Duration,
    /// Continuous hold time after which a key is reported as stuck.
    pub stuck_timeout: Duration,
    /// Whether suspected ghost presses are vetoed.
    pub ghost_detection: bool,
    /// Whether stuck keys are reported.
    pub stuck_detection: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            scan_interval: Duration::from_micros(1000),
            settle_time: Duration::from_micros(1),
            debounce_press: Duration::from_millis(20),
            debounce_release: Duration::from_millis(50),
            stuck_timeout: Duration::from_millis(5000),
            ghost_detection: true,
            stuck_detection: true,
        }
    }
}

impl Config {
    /// Checks the parameters for combinations the scanner cannot honor.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.scan_interval.as_ticks() == 0 {
            return Err(ConfigError::ZeroScanInterval);
        }
        if self.debounce_press.as_ticks() == 0 || self.debounce_release.as_ticks() == 0 {
            return Err(ConfigError::ZeroDebounce);
        }
        if self.stuck_timeout <= self.debounce_press {
            return Err(ConfigError::StuckTimeoutTooShort);
        }
        Ok(())
    }
}

/// A configuration rejected at driver construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigError {
    /// The scan interval must be non-zero.
    ZeroScanInterval,
    /// Debounce thresholds must be non-zero.
    ZeroDebounce,
    /// The stuck-key timeout must exceed the press debounce threshold.
    StuckTimeoutTooShort,
}
