//! The keypad driver: shared driver state, the application control surface,
//! and the scan task.
//!
//! The driver is split in two halves. [`KeypadState`] is the shared half:
//! the scan engine behind a critical-section mutex plus a control signal.
//! It is `const`-constructible so it can live in a `static`, and all
//! application-facing operations (polling, configuration, power control)
//! are methods on it. [`Keypad`] is the scanning half: it owns the row and
//! column pins and drives the engine from [`Keypad::run`], which is meant
//! to be spawned as a task.
//!
//! The matrix is wired active-low: rows are driven low to select them and
//! columns are read with pull-ups, so a pressed key reads low.

use core::cell::RefCell;
use core::convert::Infallible;
use core::fmt::{self, Debug};

use critical_section::Mutex;
use embassy_futures::select::{select, select_array, Either};
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::signal::Signal;
use embassy_time::{Duration, Instant, Ticker, Timer};
use embedded_hal::digital::{InputPin, OutputPin};
use embedded_hal_async::digital::Wait;

use crate::engine::ScanEngine;
use crate::event::{ErrorEvent, ErrorEventCallback, KeyEvent, KeyEventCallback, Keymap};
use crate::stats::ScanStatistics;
use crate::{Config, ConfigError, MATRIX_COLS, MATRIX_ROWS};

/// The scanning mode of a driver instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanMode {
    /// No scanning; the scan task is parked.
    Stopped,
    /// The matrix is scanned periodically.
    Active,
    /// Scanning is stopped and the column lines arm a wake on key press.
    LowPower,
}

/// A GPIO operation failed during scanning.
pub enum Error<TPINERR> {
    /// An error occurred while driving a row line.
    Row(TPINERR),
    /// An error occurred while reading a column line.
    Column(TPINERR),
}

impl<TPINERR: Debug> Debug for Error<TPINERR> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Row(err) => write!(f, "Row({err:?})"),
            Self::Column(err) => write!(f, "Column({err:?})"),
        }
    }
}

struct Shared {
    engine: ScanEngine,
    mode: ScanMode,
}

/// The shared half of a keypad driver instance.
///
/// Holds everything the scan task and the application both touch. Every
/// method runs a short critical section around the scan engine; nothing
/// here blocks, so the methods are safe to call from any context.
pub struct KeypadState {
    shared: Mutex<RefCell<Shared>>,
    control: Signal<CriticalSectionRawMutex, ()>,
}

impl KeypadState {
    pub const fn new() -> Self {
        Self {
            shared: Mutex::new(RefCell::new(Shared {
                engine: ScanEngine::new(),
                mode: ScanMode::Stopped,
            })),
            control: Signal::new(),
        }
    }

    fn with_shared<R>(&self, f: impl FnOnce(&mut Shared) -> R) -> R {
        critical_section::with(|cs| f(&mut self.shared.borrow_ref_mut(cs)))
    }

    fn set_mode(&self, mode: ScanMode) -> bool {
        let changed = self.with_shared(|shared| {
            if shared.mode != mode {
                shared.mode = mode;
                true
            } else {
                false
            }
        });
        if changed {
            self.control.signal(());
        }
        changed
    }

    /// The current scanning mode.
    pub fn mode(&self) -> ScanMode {
        self.with_shared(|shared| shared.mode)
    }

    /// Begins periodic scanning.
    pub fn start(&self) {
        if self.set_mode(ScanMode::Active) {
            log::info!("keypad scanning started");
        }
    }

    /// Stops scanning. Once this returns, no further scan mutates the key
    /// table, the queues or the statistics until scanning is re-enabled.
    pub fn stop(&self) {
        if self.set_mode(ScanMode::Stopped) {
            log::info!("keypad scanning stopped");
        }
    }

    /// Stops scanning and arms the column lines as wake sources. The scan
    /// task resumes scanning on its own when a key press is detected.
    pub fn enter_low_power(&self) {
        if self.set_mode(ScanMode::LowPower) {
            log::info!("keypad entering low power (wake on key press)");
        }
    }

    /// Leaves low-power mode and resumes periodic scanning.
    pub fn exit_low_power(&self) {
        if self.set_mode(ScanMode::Active) {
            log::info!("keypad left low power");
        }
    }

    /// Called by the scan task when a column edge woke it up.
    fn wake_from_low_power(&self) -> bool {
        let woken = self.with_shared(|shared| {
            if shared.mode == ScanMode::LowPower {
                shared.mode = ScanMode::Active;
                true
            } else {
                false
            }
        });
        if woken {
            log::info!("keypad woken by key press");
        }
        woken
    }

    /// Takes the oldest key event, if any. Never blocks.
    pub fn poll_event(&self) -> Option<KeyEvent> {
        self.with_shared(|shared| shared.engine.poll_event())
    }

    /// Takes the oldest error event, if any. Never blocks.
    pub fn poll_error(&self) -> Option<ErrorEvent> {
        self.with_shared(|shared| shared.engine.poll_error())
    }

    /// Number of key events currently queued.
    pub fn event_count(&self) -> usize {
        self.with_shared(|shared| shared.engine.event_count())
    }

    /// Discards all queued key events.
    pub fn clear_events(&self) {
        self.with_shared(|shared| shared.engine.clear_events());
    }

    /// Whether any key is currently in a confirmed pressed state.
    pub fn is_any_key_pressed(&self) -> bool {
        self.with_shared(|shared| shared.engine.any_key_pressed())
    }

    /// Replaces the (row, col) to key value mapping.
    pub fn set_keymap(&self, keymap: Keymap) {
        self.with_shared(|shared| shared.engine.set_keymap(keymap));
    }

    /// Registers a callback that receives key events instead of the queue.
    ///
    /// The callback runs in the scan context and must be short and
    /// non-blocking. Pass `None` to return to queue delivery, which is the
    /// safe default.
    pub fn set_key_callback(&self, callback: Option<KeyEventCallback>) {
        self.with_shared(|shared| shared.engine.set_key_callback(callback));
    }

    /// Registers a callback that receives error events instead of the
    /// queue. Same contract as [`set_key_callback`](Self::set_key_callback).
    pub fn set_error_callback(&self, callback: Option<ErrorEventCallback>) {
        self.with_shared(|shared| shared.engine.set_error_callback(callback));
    }

    /// Enables or disables the ghost key veto.
    pub fn set_ghost_detection(&self, enabled: bool) {
        self.with_shared(|shared| shared.engine.set_ghost_detection(enabled));
    }

    /// Enables or disables stuck key reporting and sets its timeout.
    pub fn set_stuck_detection(&self, enabled: bool, timeout: Duration) {
        self.with_shared(|shared| shared.engine.set_stuck_detection(enabled, timeout));
    }

    /// A consistent snapshot of the scan statistics.
    pub fn statistics(&self) -> ScanStatistics {
        self.with_shared(|shared| shared.engine.statistics())
    }

    /// Zeroes all statistics counters.
    pub fn reset_statistics(&self) {
        self.with_shared(|shared| shared.engine.reset_statistics());
    }
}

impl Default for KeypadState {
    fn default() -> Self {
        Self::new()
    }
}

/// The scanning half of a keypad driver instance.
///
/// Owns the four row output pins and four column input pins exclusively;
/// no other code may drive or reconfigure those lines while the scan task
/// runs.
pub struct Keypad<'a, TROW, TCOL> {
    state: &'a KeypadState,
    rows: [TROW; MATRIX_ROWS],
    cols: [TCOL; MATRIX_COLS],
    scan_interval: Duration,
    settle_time: Duration,
}

impl<'a, TROW, TCOL, TPINERR> Keypad<'a, TROW, TCOL>
where
    TROW: OutputPin<Error = TPINERR>,
    TCOL: InputPin<Error = TPINERR> + Wait,
{
    /// Creates a new scanner bound to `state`.
    ///
    /// The configuration is validated up front and applied to the shared
    /// engine; an invalid combination is rejected before any pin is
    /// touched.
    ///
    /// # Arguments
    ///
    /// * `state` - The shared half the application polls.
    /// * `rows` - Row output pins, driven low to select a row.
    /// * `cols` - Column input pins with pull-ups; low means pressed.
    /// * `config` - Scan timing, debounce thresholds and detector toggles.
    pub fn new(
        state: &'a KeypadState,
        rows: [TROW; MATRIX_ROWS],
        cols: [TCOL; MATRIX_COLS],
        config: Config,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        state.with_shared(|shared| shared.engine.apply_config(&config));
        log::info!(
            "matrix keypad initialized (scan rate: {} Hz)",
            1_000_000 / config.scan_interval.as_micros().max(1)
        );
        Ok(Self {
            state,
            rows,
            cols,
            scan_interval: config.scan_interval,
            settle_time: config.settle_time,
        })
    }

    /// Drives the scanner. Spawn this as a task.
    ///
    /// Scans one row per tick while the state is [`ScanMode::Active`],
    /// parks while [`ScanMode::Stopped`], and waits for a column edge
    /// while [`ScanMode::LowPower`]. Only returns on a pin failure.
    pub async fn run(mut self) -> Result<Infallible, Error<TPINERR>> {
        loop {
            match self.state.mode() {
                ScanMode::Stopped => self.state.control.wait().await,
                ScanMode::Active => self.scan_session().await?,
                ScanMode::LowPower => self.low_power_session().await?,
            }
        }
    }

    async fn scan_session(&mut self) -> Result<(), Error<TPINERR>> {
        let mut ticker = Ticker::every(self.scan_interval);
        while self.state.mode() == ScanMode::Active {
            match select(ticker.next(), self.state.control.wait()).await {
                Either::First(()) => self.scan_once().await?,
                // Control change; the loop condition re-checks the mode.
                Either::Second(()) => {}
            }
        }
        Ok(())
    }

    /// One scheduler tick: select the active row, settle, sample all
    /// columns, feed the engine. Bounded time, no allocation.
    async fn scan_once(&mut self) -> Result<(), Error<TPINERR>> {
        let started = Instant::now();
        let row = self.state.with_shared(|shared| shared.engine.current_row());

        for pin in self.rows.iter_mut() {
            pin.set_high().map_err(Error::Row)?;
        }
        self.rows[row].set_low().map_err(Error::Row)?;
        Timer::after(self.settle_time).await;

        let mut readings = [false; MATRIX_COLS];
        for (reading, pin) in readings.iter_mut().zip(self.cols.iter_mut()) {
            *reading = pin.is_low().map_err(Error::Column)?;
        }
        self.rows[row].set_high().map_err(Error::Row)?;

        let now = Instant::now();
        self.state.with_shared(|shared| {
            // stop() may have won the race mid-scan; the mode check shares
            // the critical section with the mutation, so after stop()
            // returns no cell, queue or statistics state changes.
            if shared.mode == ScanMode::Active {
                shared.engine.process_row(readings, now);
                shared.engine.record_scan_time(started.elapsed());
            }
        });
        Ok(())
    }

    async fn low_power_session(&mut self) -> Result<(), Error<TPINERR>> {
        // With every row driven active, any key press pulls its column
        // low, so the columns double as wake lines.
        for pin in self.rows.iter_mut() {
            pin.set_low().map_err(Error::Row)?;
        }

        let woken = {
            let waits = self.cols.each_mut().map(|pin| pin.wait_for_low());
            match select(select_array(waits), self.state.control.wait()).await {
                Either::First((result, _col)) => {
                    result.map_err(Error::Column)?;
                    true
                }
                Either::Second(()) => false,
            }
        };

        for pin in self.rows.iter_mut() {
            pin.set_high().map_err(Error::Row)?;
        }

        if woken {
            self.state.wake_from_low_power();
        }
        Ok(())
    }
}
