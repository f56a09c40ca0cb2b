//! Function-key overlay for hex keypads.
//!
//! A static dispatch layer applications can run key events through before
//! interpreting them as plain input. Key `0xF` toggles between normal
//! entry and function mode; while in function mode, keys `0x0..=0xE`
//! invoke registered handlers instead of being passed through. The overlay
//! has no timing behavior and never touches the scanner.

use log::{debug, info};

/// Number of mappable function slots. `0xF` is reserved for the toggle.
pub const FUNCTION_KEYS: usize = 15;

const MODE_TOGGLE_KEY: u8 = 0xF;

/// Whether keys are currently interpreted as input or as functions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperatingMode {
    /// Keys pass through to the application.
    Normal,
    /// Keys dispatch to their registered handlers.
    Function,
}

/// Handler invoked with the key value that triggered it.
pub type KeyActionFn = fn(u8);

/// The function-mode dispatch table.
pub struct FunctionKeys {
    mode: OperatingMode,
    table: [Option<KeyActionFn>; FUNCTION_KEYS],
}

impl FunctionKeys {
    pub const fn new() -> Self {
        Self {
            mode: OperatingMode::Normal,
            table: [None; FUNCTION_KEYS],
        }
    }

    /// The current operating mode.
    pub fn mode(&self) -> OperatingMode {
        self.mode
    }

    /// Runs a pressed key through the overlay.
    ///
    /// Returns `true` when the key was consumed (the mode toggle, or any
    /// key while in function mode) and `false` when the application should
    /// handle it as normal input.
    pub fn process(&mut self, key: u8) -> bool {
        if key == MODE_TOGGLE_KEY {
            self.mode = match self.mode {
                OperatingMode::Normal => OperatingMode::Function,
                OperatingMode::Function => OperatingMode::Normal,
            };
            info!("keypad function mode: {:?}", self.mode);
            return true;
        }

        if self.mode == OperatingMode::Function {
            match self.table.get(key as usize).copied().flatten() {
                Some(action) => {
                    debug!("dispatching function key {key:#x}");
                    action(key);
                }
                None => debug!("no function mapped to key {key:#x}"),
            }
            // Consumed either way; function mode never leaks key input.
            return true;
        }

        false
    }

    /// Maps `key` (`0x0..=0xE`) to a handler. Out-of-range keys are
    /// ignored.
    pub fn set_function(&mut self, key: u8, action: KeyActionFn) {
        if let Some(slot) = self.table.get_mut(key as usize) {
            *slot = Some(action);
        }
    }

    /// Removes the handler for `key`, if any.
    pub fn clear_function(&mut self, key: u8) {
        if let Some(slot) = self.table.get_mut(key as usize) {
            *slot = None;
        }
    }
}

impl Default for FunctionKeys {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use core::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    static LAST_DISPATCHED: AtomicU32 = AtomicU32::new(u32::MAX);

    fn record_key(key: u8) {
        LAST_DISPATCHED.store(key as u32, Ordering::Relaxed);
    }

    #[test]
    fn toggle_key_switches_modes_and_is_consumed() {
        let mut overlay = FunctionKeys::new();
        assert_eq!(overlay.mode(), OperatingMode::Normal);

        assert!(overlay.process(0xF));
        assert_eq!(overlay.mode(), OperatingMode::Function);

        assert!(overlay.process(0xF));
        assert_eq!(overlay.mode(), OperatingMode::Normal);
    }

    #[test]
    fn normal_mode_passes_keys_through() {
        let mut overlay = FunctionKeys::new();
        overlay.set_function(0x1, record_key);
        assert!(!overlay.process(0x1));
    }

    #[test]
    fn function_mode_dispatches_mapped_keys() {
        let mut overlay = FunctionKeys::new();
        overlay.set_function(0x5, record_key);
        overlay.process(0xF);

        assert!(overlay.process(0x5));
        assert_eq!(LAST_DISPATCHED.load(Ordering::Relaxed), 0x5);
    }

    #[test]
    fn function_mode_consumes_unmapped_keys() {
        let mut overlay = FunctionKeys::new();
        overlay.process(0xF);
        assert!(overlay.process(0xA));
    }

    #[test]
    fn cleared_keys_are_no_longer_dispatched_but_still_consumed() {
        let mut overlay = FunctionKeys::new();
        overlay.set_function(0x2, record_key);
        overlay.clear_function(0x2);
        overlay.process(0xF);
        assert!(overlay.process(0x2));
    }

    #[test]
    fn the_toggle_slot_cannot_be_remapped() {
        let mut overlay = FunctionKeys::new();
        overlay.set_function(0xF, record_key);
        overlay.process(0xF);
        assert_eq!(overlay.mode(), OperatingMode::Function);
    }
}
