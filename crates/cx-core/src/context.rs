use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};

use crate::traits::Resettable;

/// Ephemeral instruction state plus the memory last retrieved for it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TemporaryContext {
    pub value: String,
    pub cached_memory: String,
    pub last_queried_value: String,
}

/// Shared handle to the session's single [`TemporaryContext`].
///
/// Clones observe the same state, so every collaborator handed a clone sees
/// updates without further wiring. There is no cross-call atomicity: callers
/// rely on the session's single-flight guard.
#[derive(Debug, Clone, Default)]
pub struct ContextHandle {
    inner: Arc<Mutex<TemporaryContext>>,
}

impl ContextHandle {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, TemporaryContext> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// `None` is a no-op; any string, including the empty one, replaces the value.
    pub fn set_context(&self, value: Option<&str>) {
        if let Some(v) = value {
            self.lock().value = v.to_string();
        }
    }

    pub fn get_context(&self) -> String {
        self.lock().value.clone()
    }

    /// True when `candidate` differs (trimmed) from the last queried value.
    /// An empty candidate never counts as changed, so it never triggers a query.
    pub fn has_changed(&self, candidate: &str) -> bool {
        let candidate = candidate.trim();
        if candidate.is_empty() {
            return false;
        }
        candidate != self.lock().last_queried_value.trim()
    }

    /// Mark `value` as queried, whether or not the query succeeded.
    pub fn record_queried(&self, value: &str) {
        self.lock().last_queried_value = value.to_string();
    }

    pub fn cached_memory(&self) -> String {
        self.lock().cached_memory.clone()
    }

    pub fn set_cached_memory(&self, memory: String) {
        self.lock().cached_memory = memory;
    }

    pub fn snapshot(&self) -> TemporaryContext {
        self.lock().clone()
    }

    pub fn restore(&self, saved: TemporaryContext) {
        *self.lock() = saved;
    }

    /// Reset value, cached memory and the last-queried marker together.
    pub fn clear(&self) {
        *self.lock() = TemporaryContext::default();
    }
}

impl Resettable for ContextHandle {
    fn reset(&mut self) {
        self.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_none_is_noop() {
        let ctx = ContextHandle::new();
        ctx.set_context(Some("focus on budget"));
        ctx.set_context(None);
        assert_eq!(ctx.get_context(), "focus on budget");
    }

    #[test]
    fn test_empty_string_replaces() {
        let ctx = ContextHandle::new();
        ctx.set_context(Some("x"));
        ctx.set_context(Some(""));
        assert_eq!(ctx.get_context(), "");
    }

    #[test]
    fn test_empty_candidate_never_changed() {
        let ctx = ContextHandle::new();
        assert!(!ctx.has_changed(""));
        assert!(!ctx.has_changed("   "));
        ctx.record_queried("something");
        assert!(!ctx.has_changed(""));
    }

    #[test]
    fn test_change_detection_trims() {
        let ctx = ContextHandle::new();
        assert!(ctx.has_changed("budget"));
        ctx.record_queried("  budget ");
        assert!(!ctx.has_changed("budget  "));
        assert!(ctx.has_changed("budgets"));
    }

    #[test]
    fn test_clones_share_state() {
        let a = ContextHandle::new();
        let b = a.clone();
        a.set_context(Some("shared"));
        assert_eq!(b.get_context(), "shared");
    }

    #[test]
    fn test_clear_resets_all_fields() {
        let ctx = ContextHandle::new();
        ctx.set_context(Some("v"));
        ctx.set_cached_memory("mem".into());
        ctx.record_queried("v");
        ctx.clear();
        assert_eq!(ctx.snapshot(), TemporaryContext::default());
        assert!(ctx.has_changed("v"));
    }

    #[test]
    fn test_restore_keeps_change_detection() {
        let ctx = ContextHandle::new();
        ctx.restore(TemporaryContext {
            value: "budget".into(),
            cached_memory: "approved in March".into(),
            last_queried_value: "budget".into(),
        });
        assert!(!ctx.has_changed("budget"));
        assert_eq!(ctx.cached_memory(), "approved in March");
    }
}
