//! Progress reporting for long-running file operations.
//!
//! Purely observational: callbacks never influence the outcome.

use std::time::Instant;

use serde::{Deserialize, Serialize};

/// One progress update, as surfaced to the presentation layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileProgress {
    pub current: usize,
    pub total: usize,
    pub percentage: f32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_file: Option<String>,
}

impl FileProgress {
    pub fn new(current: usize, total: usize, current_file: Option<String>) -> Self {
        let total_nonzero = total.max(1);
        let current = current.min(total_nonzero);
        let percentage = (current as f32 / total_nonzero as f32 * 100.0).clamp(0.0, 100.0);
        Self {
            current,
            total,
            percentage,
            current_file,
        }
    }
}

/// Callback type accepted by install and sync.
pub type ProgressFn<'a> = dyn Fn(FileProgress) + Send + Sync + 'a;

/// Throttles progress callbacks to every 50 files or 120 ms.
pub(crate) struct ProgressTracker<'a> {
    callback: Option<&'a ProgressFn<'a>>,
    done: usize,
    total: usize,
    last_report: Instant,
}

impl<'a> ProgressTracker<'a> {
    pub(crate) fn new(callback: Option<&'a ProgressFn<'a>>, total: usize) -> Self {
        Self {
            callback,
            done: 0,
            total,
            last_report: Instant::now(),
        }
    }

    pub(crate) fn bump(&mut self, file: &str) {
        self.done = self.done.saturating_add(1);
        let Some(callback) = self.callback else {
            return;
        };
        if self.done % 50 == 0 || self.last_report.elapsed().as_millis() >= 120 {
            callback(FileProgress::new(
                self.done,
                self.total,
                Some(file.to_string()),
            ));
            self.last_report = Instant::now();
        }
    }

    pub(crate) fn finish(&self) {
        if let Some(callback) = self.callback {
            callback(FileProgress::new(self.total, self.total, None));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn test_percentage() {
        let p = FileProgress::new(1, 4, None);
        assert_eq!(p.percentage, 25.0);

        let empty = FileProgress::new(0, 0, None);
        assert_eq!(empty.percentage, 0.0);
    }

    #[test]
    fn test_tracker_always_finishes_at_total() {
        let seen = Mutex::new(Vec::new());
        let callback = |p: FileProgress| seen.lock().unwrap().push(p);
        let mut tracker = ProgressTracker::new(Some(&callback), 3);
        tracker.bump("a");
        tracker.bump("b");
        tracker.bump("c");
        tracker.finish();

        let seen = seen.into_inner().unwrap();
        let last = seen.last().unwrap();
        assert_eq!(last.current, 3);
        assert_eq!(last.percentage, 100.0);
    }
}
