//! Progress and ETA calculations for a batch run.
//!
//! All functions here are pure and testable without a backend or a clock.
//! The runner measures time; this module only does arithmetic on it.

use std::time::Duration;

/// Width of the text progress bar, in cells.
pub const BAR_WIDTH: usize = 40;

/// Snapshot of a run after one item has been processed.
///
/// Returned by [`BatchRunner::step`](crate::batch::BatchRunner::step) and
/// carried by progress events; nothing global is updated.
#[derive(Debug, Clone, PartialEq)]
pub struct Progress {
    /// 1-based position of the item just processed.
    pub index: usize,
    pub total: usize,
    pub completed: usize,
    pub failed: usize,
    /// Wall time of the item just processed, retries included.
    pub item_elapsed: Duration,
    /// Wall time since the run started.
    pub elapsed: Duration,
    /// Estimated time to finish the remaining items.
    pub eta: Option<Duration>,
}

impl Progress {
    pub fn new(
        index: usize,
        total: usize,
        completed: usize,
        failed: usize,
        item_elapsed: Duration,
        elapsed: Duration,
    ) -> Self {
        let done = completed + failed;
        Self {
            index,
            total,
            completed,
            failed,
            item_elapsed,
            elapsed,
            eta: eta(elapsed, done, total),
        }
    }

    /// Items processed so far, successful or not.
    pub fn done(&self) -> usize {
        self.completed + self.failed
    }

    pub fn percent(&self) -> f64 {
        percent(self.done(), self.total)
    }

    pub fn bar(&self) -> String {
        progress_bar(self.done(), self.total, BAR_WIDTH)
    }
}

/// Mean time per processed item.
///
/// Returns `None` before the first item finishes.
pub fn average(elapsed: Duration, done: usize) -> Option<Duration> {
    if done == 0 {
        return None;
    }
    Some(elapsed.div_f64(done as f64))
}

/// Remaining time, assuming every remaining item takes the running average.
///
/// `Some(0)` once everything is done; `None` before the first item finishes.
pub fn eta(elapsed: Duration, done: usize, total: usize) -> Option<Duration> {
    let avg = average(elapsed, done)?;
    let remaining = total.saturating_sub(done);
    Some(avg.mul_f64(remaining as f64))
}

/// Share of `total` that is done, 0-100.
pub fn percent(done: usize, total: usize) -> f64 {
    if total == 0 {
        return 100.0;
    }
    (done.min(total) as f64 / total as f64) * 100.0
}

/// Fixed-width bar of filled and empty cells.
///
/// ```
/// # use deck_gen::progress::progress_bar;
/// assert_eq!(progress_bar(1, 4, 8), "██░░░░░░");
/// ```
pub fn progress_bar(done: usize, total: usize, width: usize) -> String {
    let filled = if total == 0 {
        width
    } else {
        (width * done.min(total)) / total
    };
    format!("{}{}", "█".repeat(filled), "░".repeat(width - filled))
}

/// Human duration: `45s`, `3m 07s`, `1h 02m`.
pub fn format_duration(d: Duration) -> String {
    let secs = d.as_secs();
    if secs < 60 {
        format!("{}s", secs)
    } else if secs < 3600 {
        format!("{}m {:02}s", secs / 60, secs % 60)
    } else {
        format!("{}h {:02}m", secs / 3600, (secs % 3600) / 60)
    }
}
