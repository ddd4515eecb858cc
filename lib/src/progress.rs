//! Progress reporting for long-running walks, fetches and updates.
//!
//! Workers never print directly; they hand `(completed, total, label)` to a
//! [`ProgressObserver`] shared by reference.

use log::info;
use std::io::Write;
use std::sync::Mutex;

pub trait ProgressObserver: Sync {
    fn progress(&self, completed: u64, total: u64, label: &str);

    /// Called once a phase is over.
    fn finish(&self) {}
}

/// Discards every notification.
pub struct NoProgress;

impl ProgressObserver for NoProgress {
    fn progress(&self, _completed: u64, _total: u64, _label: &str) {}
}

/// Renders a single-line bar such as `[■■■■      ] fetch (2 / 10 - 20%)`.
pub fn render_bar(completed: u64, total: u64, label: &str, show_values: bool) -> String {
    let percentage = percentage(completed, total);
    let filled = (percentage * 20 / 100) as usize;
    let bar = format!("{}{}", "■".repeat(filled), " ".repeat(20 - filled));
    if show_values {
        format!("[{bar}] {label} ({completed} / {total} - {percentage}%)")
    } else {
        format!("[{bar}] {label} ({percentage}%)")
    }
}

fn percentage(completed: u64, total: u64) -> u64 {
    if total == 0 {
        100
    } else {
        (completed.min(total) * 100) / total
    }
}

/// Redraws a bar on stderr. All writers go through one mutex so bars from
/// concurrent workers never interleave.
pub struct ConsoleProgress {
    show_values: bool,
    lock: Mutex<()>,
}

impl ConsoleProgress {
    pub fn new(show_values: bool) -> Self {
        Self {
            show_values,
            lock: Mutex::new(()),
        }
    }
}

impl ProgressObserver for ConsoleProgress {
    fn progress(&self, completed: u64, total: u64, label: &str) {
        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());
        let mut err = std::io::stderr().lock();
        let _ = write!(
            err,
            "\r{}       ",
            render_bar(completed, total, label, self.show_values)
        );
        let _ = err.flush();
    }

    fn finish(&self) {
        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());
        eprintln!();
    }
}

/// Emits an `info!` line every time another tenth of the work is done.
#[derive(Default)]
pub struct LogProgress {
    last_decile: Mutex<Option<(String, u64)>>,
}

impl ProgressObserver for LogProgress {
    fn progress(&self, completed: u64, total: u64, label: &str) {
        let decile = percentage(completed, total) / 10;
        let mut last = self.last_decile.lock().unwrap_or_else(|e| e.into_inner());
        let fresh = match last.as_ref() {
            Some((l, d)) => l != label || *d != decile,
            None => true,
        };
        if fresh {
            *last = Some((label.to_string(), decile));
            info!("{}: {}/{} ({}%)", label, completed, total, decile * 10);
        }
    }
}
