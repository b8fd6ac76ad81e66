use core::mem;
use core::time::Duration;

use protocol::ids::IdSet;

/// Efficiently collected scheduling statistics.
///
/// Updated on the data path, reported from the main loop.
#[derive(Default)]
pub struct Stats {
    pub not_self_triggered: usize,
    pub signal_error: usize,
    pub signal_error_set: IdSet,
    pub signal_ok: usize,
    pub signal_ok_set: IdSet,
    pub timing_sum: u64,
    pub timing_count: usize,
}

impl Stats {
    /// Merge this statistics with another.
    pub fn merge(&mut self, other: &mut Self) {
        self.not_self_triggered += mem::take(&mut other.not_self_triggered);
        self.signal_error += mem::take(&mut other.signal_error);
        self.signal_error_set |= mem::take(&mut other.signal_error_set);
        self.signal_ok += mem::take(&mut other.signal_ok);
        self.signal_ok_set |= mem::take(&mut other.signal_ok_set);
        self.timing_sum += mem::take(&mut other.timing_sum);
        self.timing_count += mem::take(&mut other.timing_count);
    }

    /// Report statistics to the tracing logger and reset them.
    pub fn report(&mut self) {
        if self.not_self_triggered > 0 {
            tracing::warn!(self.not_self_triggered);
            self.not_self_triggered = 0;
        }

        if self.signal_error > 0 {
            tracing::warn!(self.signal_error, ?self.signal_error_set);
            self.signal_error = 0;
            self.signal_error_set.clear();
        }

        if self.timing_count > 0 {
            let average =
                Duration::from_nanos((self.timing_sum as f64 / self.timing_count as f64) as u64);
            tracing::debug!(self.timing_count, self.signal_ok, ?average);
            self.timing_count = 0;
            self.timing_sum = 0;
            self.signal_ok = 0;
            self.signal_ok_set.clear();
        }
    }
}
