//! Serialized per-task progress tracking rendered through indicatif

use indicatif::{MultiProgress, ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::sync::Mutex;

/// Opaque handle to one progress entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskHandle(usize);

/// Partial update applied to one entry.
#[derive(Debug, Default)]
pub struct ProgressUpdate {
    pub total: Option<u64>,
    /// Absolute completed byte count. Decreases are ignored: completed
    /// bytes are monotone until the entry is frozen.
    pub completed: Option<u64>,
    /// Relative increment, applied after `completed`.
    pub advance: Option<u64>,
    pub description: Option<String>,
}

struct Entry {
    bar: ProgressBar,
    completed: u64,
    total: Option<u64>,
    finished: bool,
}

struct Inner {
    entries: Vec<Entry>,
    finished_count: usize,
}

/// Thread-safe aggregation of per-task progress into a renderable view.
///
/// Every mutation goes through one mutex so concurrent workers never
/// interleave partial writes to the same entry; the rendering layer
/// (indicatif) always sees consistent snapshots.
pub struct ProgressTracker {
    multi: MultiProgress,
    overall: ProgressBar,
    inner: Mutex<Inner>,
}

impl ProgressTracker {
    pub fn new(show_progress: bool) -> Self {
        let multi = if show_progress {
            MultiProgress::new()
        } else {
            MultiProgress::with_draw_target(ProgressDrawTarget::hidden())
        };

        let overall = multi.add(ProgressBar::new(0));
        overall.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} overall [{bar:40.cyan/blue}] {pos}/{len} {msg}")
                .unwrap()
                .progress_chars("#>-"),
        );

        Self {
            multi,
            overall,
            inner: Mutex::new(Inner {
                entries: Vec::new(),
                finished_count: 0,
            }),
        }
    }

    /// Register a new entry and return its handle.
    pub fn add_task(&self, label: &str, visible: bool) -> TaskHandle {
        let mut inner = self.inner.lock().unwrap();

        let bar = ProgressBar::new(0);
        bar.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} {msg:30!} [{bar:30.cyan/blue}] {bytes}/{total_bytes}")
                .unwrap()
                .progress_chars("#>-"),
        );
        bar.set_message(label.to_string());
        let bar = if visible {
            self.multi.add(bar)
        } else {
            bar.set_draw_target(ProgressDrawTarget::hidden());
            bar
        };

        inner.entries.push(Entry {
            bar,
            completed: 0,
            total: None,
            finished: false,
        });

        let handle = TaskHandle(inner.entries.len() - 1);
        self.refresh_overall(&inner);
        handle
    }

    /// Apply a partial update to an entry. Updates to a frozen entry are
    /// silently dropped.
    pub fn update(&self, handle: TaskHandle, update: ProgressUpdate) {
        let mut inner = self.inner.lock().unwrap();
        let entry = &mut inner.entries[handle.0];
        if entry.finished {
            return;
        }

        if let Some(total) = update.total {
            entry.total = Some(total);
            entry.bar.set_length(total);
        }
        if let Some(completed) = update.completed {
            entry.completed = entry.completed.max(completed);
        }
        if let Some(advance) = update.advance {
            entry.completed += advance;
        }
        entry.bar.set_position(entry.completed);
        if let Some(description) = update.description {
            entry.bar.set_message(description);
        }
    }

    /// Move an entry to its terminal state and freeze it.
    pub fn finish_task(&self, handle: TaskHandle) {
        let mut inner = self.inner.lock().unwrap();
        let entry = &mut inner.entries[handle.0];
        if entry.finished {
            return;
        }
        entry.finished = true;
        if entry.total.is_none() {
            entry.bar.set_length(entry.completed);
        }
        entry.bar.finish();
        inner.finished_count += 1;
        self.refresh_overall(&inner);
    }

    /// Snapshot of (finished, registered) task counts.
    pub fn aggregate(&self) -> (usize, usize) {
        let inner = self.inner.lock().unwrap();
        (inner.finished_count, inner.entries.len())
    }

    /// Completed bytes for one entry (used by tests and summaries).
    pub fn completed_bytes(&self, handle: TaskHandle) -> u64 {
        self.inner.lock().unwrap().entries[handle.0].completed
    }

    fn refresh_overall(&self, inner: &Inner) {
        self.overall.set_length(inner.entries.len() as u64);
        self.overall.set_position(inner.finished_count as u64);
    }

    /// Finish the aggregate bar once a batch completes.
    pub fn finish_overall(&self) {
        let inner = self.inner.lock().unwrap();
        if inner.finished_count == inner.entries.len() {
            self.overall.finish_and_clear();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_completed_is_monotone() {
        let tracker = ProgressTracker::new(false);
        let handle = tracker.add_task("song", false);

        tracker.update(
            handle,
            ProgressUpdate {
                completed: Some(100),
                ..Default::default()
            },
        );
        tracker.update(
            handle,
            ProgressUpdate {
                completed: Some(40),
                ..Default::default()
            },
        );
        assert_eq!(tracker.completed_bytes(handle), 100);

        tracker.update(
            handle,
            ProgressUpdate {
                advance: Some(50),
                ..Default::default()
            },
        );
        assert_eq!(tracker.completed_bytes(handle), 150);
    }

    #[test]
    fn test_frozen_after_finish() {
        let tracker = ProgressTracker::new(false);
        let handle = tracker.add_task("song", false);

        tracker.update(
            handle,
            ProgressUpdate {
                completed: Some(10),
                ..Default::default()
            },
        );
        tracker.finish_task(handle);
        tracker.update(
            handle,
            ProgressUpdate {
                completed: Some(999),
                ..Default::default()
            },
        );
        assert_eq!(tracker.completed_bytes(handle), 10);
    }

    #[test]
    fn test_aggregate_counts_terminal_transitions() {
        let tracker = ProgressTracker::new(false);
        let a = tracker.add_task("a", false);
        let _b = tracker.add_task("b", false);
        assert_eq!(tracker.aggregate(), (0, 2));

        tracker.finish_task(a);
        assert_eq!(tracker.aggregate(), (1, 2));

        // Finishing twice must not double-count.
        tracker.finish_task(a);
        assert_eq!(tracker.aggregate(), (1, 2));
    }
}
