use std::time::Instant;
use tracing::info;

/// A simple wall-clock timer for logging elapsed time.
pub struct Timer {
    label: String,
    start: Instant,
}

impl Timer {
    pub fn start(label: impl Into<String>) -> Self {
        let label = label.into();
        info!("⏱  Starting: {}", label);
        Self {
            label,
            start: Instant::now(),
        }
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        info!(
            "⏱  Finished: {} (took {:.2?})",
            self.label,
            self.start.elapsed()
        );
    }
}

/// Completion counter that logs every `every`th tick and on the last one.
/// Owned by the single coordinator of a stage; never shared between tasks.
pub struct Progress {
    label: &'static str,
    total: usize,
    every: usize,
    done: usize,
}

impl Progress {
    pub fn new(label: &'static str, total: usize, every: usize) -> Self {
        Self { label, total, every: every.max(1), done: 0 }
    }

    /// Record one completion. Returns `true` when a progress line was logged.
    pub fn tick(&mut self) -> bool {
        self.done += 1;
        if self.done % self.every == 0 || self.done == self.total {
            info!("{} progress: {}/{}", self.label, self.done, self.total);
            true
        } else {
            false
        }
    }
}

/// Format a byte count with a binary unit suffix.
pub fn fmt_bytes(n: u64) -> String {
    const UNITS: &[&str] = &["B", "KiB", "MiB", "GiB"];
    let mut value = n as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} {}", n, UNITS[0])
    } else {
        format!("{:.1} {}", value, UNITS[unit])
    }
}

/// Format a large integer with thousands separators.
pub fn fmt_number(n: usize) -> String {
    let s = n.to_string();
    let mut result = String::new();
    for (i, ch) in s.chars().rev().enumerate() {
        if i > 0 && i % 3 == 0 {
            result.push(',');
        }
        result.push(ch);
    }
    result.chars().rev().collect()
}
