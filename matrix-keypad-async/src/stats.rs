//! Scan statistics kept by the driver and read by the application.

/// Counters and timing aggregates, updated once per scan.
///
/// All fields are monotonically non-decreasing until
/// [`reset_statistics`](crate::KeypadState::reset_statistics) zeroes them.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanStatistics {
    /// Scans performed (one row activation each).
    pub total_scans: u32,
    /// Key events delivered to the queue or callback.
    pub total_events: u32,
    /// Error events delivered to the queue or callback.
    pub total_errors: u32,
    /// Events and errors dropped because their queue was full.
    pub queue_overflows: u32,
    /// Longest single scan, in microseconds.
    pub max_scan_time_us: u32,
    /// Running average scan time, in microseconds.
    pub avg_scan_time_us: u32,
}

impl ScanStatistics {
    pub(crate) const fn new() -> Self {
        Self {
            total_scans: 0,
            total_events: 0,
            total_errors: 0,
            queue_overflows: 0,
            max_scan_time_us: 0,
            avg_scan_time_us: 0,
        }
    }

    pub(crate) fn note_scan(&mut self) {
        self.total_scans = self.total_scans.wrapping_add(1);
    }

    /// Folds one scan duration into the max and the running average.
    ///
    /// The average uses the incremental form `avg += (sample - avg) / n`,
    /// which cannot overflow no matter how long the driver runs.
    pub(crate) fn note_scan_time(&mut self, elapsed_us: u32) {
        self.max_scan_time_us = self.max_scan_time_us.max(elapsed_us);

        let count = self.total_scans.max(1) as i64;
        let avg = self.avg_scan_time_us as i64;
        self.avg_scan_time_us = (avg + (elapsed_us as i64 - avg) / count) as u32;
    }
}
