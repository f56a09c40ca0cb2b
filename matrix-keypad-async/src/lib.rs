//! An asynchronous, `no_std` driver for 4x4 matrix keypads.
//!
//! This driver scans a row/column key matrix over plain GPIO, debounces
//! the raw line readings into timestamped press and release events, and
//! watches for two classes of matrix anomalies: ghost keys (a false
//! detection completing a rectangle of real presses) and stuck keys.
//! Events and errors are delivered through bounded queues polled by the
//! application, or through optional callbacks. The driver also keeps scan
//! statistics and supports a low-power mode that reuses the column lines
//! as wake sources.
//!
//! It is platform-agnostic: rows are any `embedded-hal` `OutputPin`s and
//! columns any `InputPin + Wait`, so it runs on any HAL with async GPIO
//! support. There are no globals; every driver instance is an explicit
//! [`KeypadState`]/[`Keypad`] pair, and multiple independent instances can
//! coexist.
//!
//! # Usage
//!
//! ```ignore
//! use embassy_executor::Spawner;
//! use esp_hal::gpio::{Input, InputConfig, Level, Output, OutputConfig, Pull};
//! use matrix_keypad_async::{Config, Keypad, KeypadState};
//!
//! static KEYPAD: KeypadState = KeypadState::new();
//!
//! #[esp_hal_embassy::main]
//! async fn main(spawner: Spawner) {
//!     let peripherals = esp_hal::init(esp_hal::Config::default());
//!
//!     let out = OutputConfig::default();
//!     let rows = [
//!         Output::new(peripherals.GPIO2, Level::High, out),
//!         Output::new(peripherals.GPIO3, Level::High, out),
//!         Output::new(peripherals.GPIO4, Level::High, out),
//!         Output::new(peripherals.GPIO5, Level::High, out),
//!     ];
//!     let pulled_up = InputConfig::default().with_pull(Pull::Up);
//!     let cols = [
//!         Input::new(peripherals.GPIO6, pulled_up),
//!         Input::new(peripherals.GPIO7, pulled_up),
//!         Input::new(peripherals.GPIO8, pulled_up),
//!         Input::new(peripherals.GPIO9, pulled_up),
//!     ];
//!
//!     let keypad = Keypad::new(&KEYPAD, rows, cols, Config::default()).unwrap();
//!     spawner.spawn(scan(keypad)).unwrap();
//!
//!     KEYPAD.start();
//!     loop {
//!         while let Some(event) = KEYPAD.poll_event() {
//!             log::info!("key event: {event:?}");
//!         }
//!         while let Some(error) = KEYPAD.poll_error() {
//!             log::warn!("keypad anomaly: {error:?}");
//!         }
//!         embassy_time::Timer::after_millis(10).await;
//!     }
//! }
//!
//! #[embassy_executor::task]
//! async fn scan(keypad: Keypad<'static, Output<'static>, Input<'static>>) {
//!     if let Err(err) = keypad.run().await {
//!         log::error!("keypad scan failed: {err:?}");
//!     }
//! }
//! ```

#![cfg_attr(not(test), no_std)]

pub mod config;
pub mod event;
pub mod funckeys;
pub mod stats;

mod engine;
mod queue;
mod scanner;

pub use config::{Config, ConfigError};
pub use event::{
    ErrorEvent, ErrorEventCallback, ErrorKind, KeyAction, KeyEvent, KeyEventCallback, KeyState,
    Keymap, DEFAULT_KEYMAP,
};
pub use scanner::{Error, Keypad, KeypadState, ScanMode};
pub use stats::ScanStatistics;

/// Number of matrix rows.
pub const MATRIX_ROWS: usize = 4;
/// Number of matrix columns.
pub const MATRIX_COLS: usize = 4;
/// Capacity of the key event queue.
pub const EVENT_QUEUE_DEPTH: usize = 32;
/// Capacity of the error event queue.
pub const ERROR_QUEUE_DEPTH: usize = 8;
