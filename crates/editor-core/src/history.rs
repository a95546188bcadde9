use std::cell::Cell;
use std::collections::VecDeque;
use std::rc::Rc;
use std::time::Duration;

use tracing::debug;
use web_time::Instant;

use crate::core::{Editor, NodeId};

pub trait Clock {
    fn now(&self) -> Instant;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// A clock that only moves when told to. Clones share the same time.
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Rc<Cell<Instant>>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            now: Rc::new(Cell::new(Instant::now())),
        }
    }

    pub fn advance(&self, by: Duration) {
        self.now.set(self.now.get() + by);
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.now.get()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryEntry {
    pub seq: u64,
    pub snapshot: String,
    /// Block ids in document order, so a restore hands out the ids the host already holds.
    pub ids: Vec<NodeId>,
}

/// Linear, bounded snapshot history with a debounced checkpoint request.
#[derive(Debug)]
pub struct History {
    entries: VecDeque<HistoryEntry>,
    cursor: usize,
    capacity: usize,
    next_seq: u64,
    delay: Duration,
    deadline: Option<Instant>,
}

impl History {
    pub fn new(initial: String, ids: Vec<NodeId>, capacity: usize, delay: Duration) -> Self {
        let mut history = Self {
            entries: VecDeque::new(),
            cursor: 0,
            capacity: capacity.max(1),
            next_seq: 0,
            delay,
            deadline: None,
        };
        history.reset(initial, ids);
        history
    }

    pub fn reset(&mut self, initial: String, ids: Vec<NodeId>) {
        self.entries.clear();
        self.entries.push_back(HistoryEntry {
            seq: self.next_seq,
            snapshot: initial,
            ids,
        });
        self.next_seq += 1;
        self.cursor = 0;
        self.deadline = None;
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn entries(&self) -> impl Iterator<Item = &HistoryEntry> {
        self.entries.iter()
    }

    pub fn current(&self) -> Option<&HistoryEntry> {
        self.entries.get(self.cursor)
    }

    pub fn can_undo(&self) -> bool {
        self.cursor > 0
    }

    pub fn can_redo(&self) -> bool {
        self.cursor + 1 < self.entries.len()
    }

    /// Pushes the quiet-window deadline to `now + delay`.
    pub fn request_checkpoint(&mut self, now: Instant) {
        self.deadline = Some(now + self.delay);
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn has_pending(&self) -> bool {
        self.deadline.is_some()
    }

    /// Clears and reports the pending request once its deadline has passed.
    pub fn take_due(&mut self, now: Instant) -> bool {
        match self.deadline {
            Some(deadline) if now >= deadline => {
                self.deadline = None;
                true
            }
            _ => false,
        }
    }

    /// Clears and reports the pending request regardless of its deadline.
    pub fn take_pending(&mut self) -> bool {
        self.deadline.take().is_some()
    }

    /// Records a snapshot after the cursor, discarding the redo branch.
    /// A snapshot equal to the current entry is not recorded; only its ids are refreshed.
    pub fn record(&mut self, snapshot: String, ids: Vec<NodeId>) -> bool {
        if let Some(current) = self.entries.get_mut(self.cursor) {
            if current.snapshot == snapshot {
                current.ids = ids;
                return false;
            }
        }

        self.entries.truncate(self.cursor + 1);
        self.entries.push_back(HistoryEntry {
            seq: self.next_seq,
            snapshot,
            ids,
        });
        self.next_seq += 1;
        self.cursor = self.entries.len() - 1;

        while self.entries.len() > self.capacity {
            self.entries.pop_front();
            self.cursor = self.cursor.saturating_sub(1);
        }
        true
    }

    pub fn undo(&mut self) -> Option<&HistoryEntry> {
        if self.cursor == 0 {
            return None;
        }
        self.cursor -= 1;
        self.entries.get(self.cursor)
    }

    pub fn redo(&mut self) -> Option<&HistoryEntry> {
        if !self.can_redo() {
            return None;
        }
        self.cursor += 1;
        self.entries.get(self.cursor)
    }
}

impl Editor {
    pub fn can_undo(&self) -> bool {
        self.history.can_undo() || self.history.has_pending()
    }

    pub fn can_redo(&self) -> bool {
        self.history.can_redo() && !self.history.has_pending()
    }

    /// When the host should call [`Editor::poll`] next.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.history.deadline()
    }

    /// Records the current document if the quiet window has elapsed.
    pub fn poll(&mut self) -> bool {
        let now = self.clock.now();
        if !self.history.take_due(now) {
            return false;
        }
        self.record_checkpoint()
    }

    /// Records a pending checkpoint immediately instead of waiting for the quiet window.
    pub fn flush_checkpoint(&mut self) -> bool {
        if !self.history.take_pending() {
            return false;
        }
        self.record_checkpoint()
    }

    fn record_checkpoint(&mut self) -> bool {
        let snapshot = self.serialize();
        let recorded = self.history.record(snapshot, self.doc.block_ids());
        if recorded {
            debug!(
                cursor = self.history.cursor(),
                len = self.history.len(),
                "recorded checkpoint"
            );
        }
        recorded
    }

    pub fn undo(&mut self) -> bool {
        self.flush_checkpoint();
        let Some(entry) = self.history.undo().cloned() else {
            return false;
        };
        debug!(cursor = self.history.cursor(), "undo");
        self.restore_snapshot(entry);
        true
    }

    pub fn redo(&mut self) -> bool {
        self.flush_checkpoint();
        let Some(entry) = self.history.redo().cloned() else {
            return false;
        };
        debug!(cursor = self.history.cursor(), "redo");
        self.restore_snapshot(entry);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn history(capacity: usize) -> History {
        History::new(String::new(), Vec::new(), capacity, Duration::from_millis(500))
    }

    fn snapshots(history: &History) -> Vec<String> {
        history.entries().map(|e| e.snapshot.clone()).collect()
    }

    #[test]
    fn requests_inside_the_window_collapse() {
        let clock = ManualClock::new();
        let mut history = history(50);
        let t0 = clock.now();

        history.request_checkpoint(t0);
        clock.advance(Duration::from_millis(100));
        history.request_checkpoint(clock.now());
        clock.advance(Duration::from_millis(200));
        history.request_checkpoint(clock.now());

        clock.advance(Duration::from_millis(499));
        assert!(!history.take_due(clock.now()));
        clock.advance(Duration::from_millis(1));
        assert!(history.take_due(clock.now()));
        assert!(!history.take_due(clock.now()));
        assert_eq!(history.deadline(), None);
    }

    #[test]
    fn identical_snapshot_is_not_recorded() {
        let mut history = history(50);
        assert!(history.record("<p>a</p>".into(), Vec::new()));
        assert!(!history.record("<p>a</p>".into(), Vec::new()));
        assert_eq!(history.len(), 2);
    }

    #[test]
    fn record_after_undo_discards_redo_branch() {
        let mut history = history(50);
        history.record("a".into(), Vec::new());
        history.record("b".into(), Vec::new());
        assert_eq!(history.undo().map(|e| e.snapshot.as_str()), Some("a"));
        history.record("c".into(), Vec::new());
        assert!(!history.can_redo());
        assert_eq!(history.redo(), None);
        assert_eq!(snapshots(&history), vec!["", "a", "c"]);
    }

    #[test]
    fn eviction_keeps_capacity_and_reclamps_cursor() {
        let mut history = history(3);
        for snapshot in ["a", "b", "c", "d"] {
            history.record(snapshot.into(), Vec::new());
        }
        assert_eq!(snapshots(&history), vec!["b", "c", "d"]);
        assert_eq!(history.cursor(), 2);

        let mut steps = 0;
        while history.undo().is_some() {
            steps += 1;
        }
        assert_eq!(steps, 2);
        assert_eq!(history.current().map(|e| e.snapshot.as_str()), Some("b"));
    }

    #[test]
    fn sequence_numbers_are_monotonic() {
        let mut history = history(2);
        history.record("a".into(), Vec::new());
        history.record("b".into(), Vec::new());
        history.record("c".into(), Vec::new());
        let seqs: Vec<u64> = history.entries().map(|e| e.seq).collect();
        assert_eq!(seqs, vec![2, 3]);
    }
}
