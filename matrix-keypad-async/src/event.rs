//! Key and error event types produced by the scanner.

use embassy_time::Instant;

use crate::{MATRIX_COLS, MATRIX_ROWS};

/// Confirmed logical state of one key position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyState {
    /// Not pressed (or pressed but not yet debounced).
    Idle,
    /// A debounced press has been confirmed.
    Pressed,
    /// The key was still down on a scan after the press was confirmed.
    Held,
}

/// The edge reported by a [`KeyEvent`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyAction {
    /// A debounced press.
    Pressed,
    /// A debounced release.
    Released,
}

/// A debounced key event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyEvent {
    /// The mapped key value, `keymap[row][col]`.
    pub key: u8,
    /// Whether the key was pressed or released.
    pub action: KeyAction,
    /// Physical row (0-3).
    pub row: u8,
    /// Physical column (0-3).
    pub col: u8,
    /// When the edge was confirmed.
    pub timestamp: Instant,
}

/// The kind of matrix anomaly reported by an [`ErrorEvent`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// A press was vetoed because it completed a rectangle of pressed keys.
    GhostKey,
    /// A key has been held longer than the stuck-key timeout.
    StuckKey,
}

/// A scanning anomaly. Advisory only; the driver keeps scanning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ErrorEvent {
    /// What was detected.
    pub kind: ErrorKind,
    /// Physical row (0-3).
    pub row: u8,
    /// Physical column (0-3).
    pub col: u8,
    /// When the anomaly was observed.
    pub timestamp: Instant,
}

/// Maps a (row, col) position to the key value reported in events.
pub type Keymap = [[u8; MATRIX_COLS]; MATRIX_ROWS];

/// Default mapping for a 4x4 hex keypad in the common calculator layout.
pub const DEFAULT_KEYMAP: Keymap = [
    [0x1, 0x2, 0x3, 0xA],
    [0x4, 0x5, 0x6, 0xB],
    [0x7, 0x8, 0x9, 0xC],
    [0x0, 0xF, 0xE, 0xD],
];

/// Callback invoked for each key event instead of queueing it.
///
/// Runs in the scan context: it must be short and must not block.
pub type KeyEventCallback = fn(KeyEvent);

/// Callback invoked for each error event instead of queueing it.
///
/// Runs in the scan context: it must be short and must not block.
pub type ErrorEventCallback = fn(ErrorEvent);
