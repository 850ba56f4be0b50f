use crate::message::Message;
use crate::traits::Resettable;

/// Ordered conversation history with a pinned first entry.
///
/// Entry 0 (normally the system message) survives every prune; the rest is
/// cut back to the latest `max_pairs` user/assistant exchanges.
#[derive(Debug, Clone)]
pub struct ConversationHistory {
    messages: Vec<Message>,
    max_pairs: usize,
}

impl ConversationHistory {
    pub fn new(pinned: Message, max_pairs: usize) -> Self {
        Self {
            messages: vec![pinned],
            max_pairs,
        }
    }

    pub fn pinned(&self) -> &Message {
        &self.messages[0]
    }

    /// Everything after the pinned entry, oldest first.
    pub fn tail(&self) -> &[Message] {
        &self.messages[1..]
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        // The pinned entry is always present.
        false
    }

    /// Replace everything after the pinned entry, pruned to the window.
    pub fn restore(&mut self, tail: Vec<Message>) {
        self.messages.truncate(1);
        self.messages.extend(tail);
        self.prune();
    }

    pub fn push(&mut self, message: Message) {
        self.messages.push(message);
        self.prune();
    }

    fn prune(&mut self) {
        let keep = self.max_pairs * 2;
        let tail_len = self.messages.len() - 1;
        if tail_len > keep {
            self.messages.drain(1..1 + (tail_len - keep));
        }
    }
}

impl Resettable for ConversationHistory {
    fn reset(&mut self) {
        self.messages.truncate(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pinned_entry_survives_prune() {
        let mut h = ConversationHistory::new(Message::system("sys"), 2);
        for i in 0..10 {
            h.push(Message::user(format!("q{i}")));
            h.push(Message::assistant(format!("a{i}")));
        }
        assert_eq!(h.len(), 5);
        assert_eq!(h.pinned().content, "sys");
        assert_eq!(h.tail()[0].content, "q8");
        assert_eq!(h.tail()[3].content, "a9");
    }

    #[test]
    fn test_zero_window_keeps_only_pinned() {
        let mut h = ConversationHistory::new(Message::system("sys"), 0);
        h.push(Message::user("hello"));
        assert_eq!(h.len(), 1);
        assert!(h.tail().is_empty());
    }

    #[test]
    fn test_reset_keeps_pinned() {
        let mut h = ConversationHistory::new(Message::system("sys"), 4);
        h.push(Message::user("hello"));
        h.reset();
        assert_eq!(h.len(), 1);
        assert_eq!(h.pinned().content, "sys");
    }

    #[test]
    fn test_restore_replaces_tail_and_prunes() {
        let mut h = ConversationHistory::new(Message::system("sys"), 1);
        h.push(Message::user("stale"));
        h.restore(vec![
            Message::user("q1"),
            Message::assistant("a1"),
            Message::user("q2"),
            Message::assistant("a2"),
        ]);
        assert_eq!(h.pinned().content, "sys");
        assert_eq!(h.tail(), &[Message::user("q2"), Message::assistant("a2")]);
    }
}
