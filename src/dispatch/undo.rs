//! Undo history
//!
//! Snapshots are taken before each mutating sub-command and restored
//! in LIFO order.

use std::collections::{HashMap, VecDeque};

/// State of one light before a mutation; fields a light does not
/// support are absent, never defaulted
#[derive(Debug, Clone, PartialEq)]
pub struct LightSnapshot {
    /// Power state
    pub on: bool,
    /// Brightness in [1, 254], if the light dims
    pub brightness: Option<u8>,
    /// Color as xy coordinates, if the light has color
    pub color: Option<(f64, f64)>,
}

/// Pre-mutation state of every targeted light, keyed by name
pub type UndoEntry = HashMap<String, LightSnapshot>;

/// Bounded LIFO of undo entries; the oldest is evicted when full
pub struct UndoStack {
    entries: VecDeque<UndoEntry>,
    depth: usize,
}

impl UndoStack {
    /// Create an empty stack holding at most `depth` entries
    #[must_use]
    pub fn new(depth: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(depth),
            depth,
        }
    }

    /// Push a snapshot, evicting the oldest entry if at capacity
    pub fn push(&mut self, entry: UndoEntry) {
        if self.depth == 0 {
            return;
        }
        if self.entries.len() == self.depth {
            self.entries.pop_front();
        }
        self.entries.push_back(entry);
    }

    /// Pop the most recent snapshot
    pub fn pop(&mut self) -> Option<UndoEntry> {
        self.entries.pop_back()
    }

    /// Number of stored entries
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether there is anything to undo
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
