use std::collections::HashSet;

use crate::tokenizer::normalized_lines;
use crate::traits::Resettable;

/// Idempotent line-level dedup filter.
///
/// Lines are keyed by normalized content, not position: a line repeated at
/// another offset of a later window is still a duplicate.
#[derive(Debug, Default, Clone)]
pub struct SnapshotTracker {
    sent: HashSet<String>,
}

impl SnapshotTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Lines of `text` not yet committed, joined by newline; "" when none are new.
    pub fn filter(&self, text: &str) -> String {
        let mut emitted = HashSet::new();
        normalized_lines(text)
            .into_iter()
            .filter(|l| !self.sent.contains(l) && emitted.insert(l.clone()))
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Mark every normalized line of `text` as sent.
    pub fn commit(&mut self, text: &str) {
        self.sent.extend(normalized_lines(text));
    }

    /// Committed keys, sorted.
    pub fn lines(&self) -> Vec<String> {
        let mut lines: Vec<String> = self.sent.iter().cloned().collect();
        lines.sort();
        lines
    }

    /// Replace the committed set with previously saved keys.
    pub fn restore(&mut self, lines: Vec<String>) {
        self.sent = lines.into_iter().collect();
    }

    pub fn is_fully_committed(&self, text: &str) -> bool {
        normalized_lines(text).iter().all(|l| self.sent.contains(l))
    }

    pub fn len(&self) -> usize {
        self.sent.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sent.is_empty()
    }
}

impl Resettable for SnapshotTracker {
    fn reset(&mut self) {
        self.sent.clear();
    }
}
