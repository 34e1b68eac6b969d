use std::time::Duration;

use tokio::sync::watch;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveStatus {
    Clean,
    Dirty,
    InProgress,
}

impl SaveStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Clean => "clean",
            Self::Dirty => "dirty",
            Self::InProgress => "in_progress",
        }
    }
}

/// Three-state save indicator. Leaving `InProgress` is held back until the
/// indicator has been visible for at least `minimum_visible`.
pub struct StatusTracker {
    current: SaveStatus,
    progress_started: Option<Instant>,
    minimum_visible: Duration,
    tx: watch::Sender<SaveStatus>,
}

impl StatusTracker {
    pub fn new(minimum_visible: Duration) -> Self {
        let (tx, _rx) = watch::channel(SaveStatus::Clean);
        Self {
            current: SaveStatus::Clean,
            progress_started: None,
            minimum_visible,
            tx,
        }
    }

    pub fn current(&self) -> SaveStatus {
        self.current
    }

    pub fn subscribe(&self) -> watch::Receiver<SaveStatus> {
        self.tx.subscribe()
    }

    pub fn progress_started(&self) -> Option<Instant> {
        self.progress_started
    }

    fn set(&mut self, status: SaveStatus) {
        if self.current != status {
            self.current = status;
            self.tx.send_replace(status);
        }
    }

    /// A successful edit. `InProgress` keeps visual precedence.
    pub fn on_edit(&mut self) {
        if self.current != SaveStatus::InProgress {
            self.set(SaveStatus::Dirty);
        }
    }

    pub fn on_save_issued(&mut self, now: Instant) {
        if self.current != SaveStatus::InProgress {
            self.progress_started = Some(now);
            self.set(SaveStatus::InProgress);
        }
    }

    /// Nothing is in flight any more. Returns the remaining hold when the
    /// move to `target` has to wait out the minimum visible duration.
    pub fn on_settled(&mut self, now: Instant, target: SaveStatus) -> Option<Duration> {
        if self.current != SaveStatus::InProgress {
            self.set(target);
            return None;
        }
        let started = self.progress_started.unwrap_or(now);
        let release = started + self.minimum_visible;
        if now >= release {
            self.progress_started = None;
            self.set(target);
            None
        } else {
            Some(release - now)
        }
    }

    pub fn on_hold_elapsed(&mut self, target: SaveStatus) {
        self.progress_started = None;
        self.set(target);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn fast_save_is_held_for_minimum_duration() {
        let mut tracker = StatusTracker::new(Duration::from_millis(1000));
        let rx = tracker.subscribe();
        let start = Instant::now();

        tracker.on_edit();
        assert_eq!(*rx.borrow(), SaveStatus::Dirty);

        tracker.on_save_issued(start);
        assert_eq!(tracker.current(), SaveStatus::InProgress);

        let hold = tracker.on_settled(start + Duration::from_millis(10), SaveStatus::Clean);
        assert_eq!(hold, Some(Duration::from_millis(990)));
        assert_eq!(tracker.current(), SaveStatus::InProgress);

        tracker.on_hold_elapsed(SaveStatus::Clean);
        assert_eq!(*rx.borrow(), SaveStatus::Clean);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_save_settles_immediately() {
        let mut tracker = StatusTracker::new(Duration::from_millis(1000));
        let start = Instant::now();
        tracker.on_save_issued(start);
        let hold = tracker.on_settled(start + Duration::from_millis(1500), SaveStatus::Dirty);
        assert_eq!(hold, None);
        assert_eq!(tracker.current(), SaveStatus::Dirty);
    }

    #[tokio::test(start_paused = true)]
    async fn edits_do_not_hide_progress() {
        let mut tracker = StatusTracker::new(Duration::from_millis(1000));
        let start = Instant::now();
        tracker.on_save_issued(start);
        tracker.on_edit();
        assert_eq!(tracker.current(), SaveStatus::InProgress);

        // A second save while showing progress keeps the first start time.
        tracker.on_save_issued(start + Duration::from_millis(400));
        assert_eq!(tracker.progress_started(), Some(start));
    }
}
