use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Generation counter for one feed. Starting a new batch bumps the
/// generation, which invalidates every token handed out before.
#[derive(Debug, Clone, Default)]
pub struct ProcessFence {
    generation: Arc<AtomicU64>,
}

/// Identifies one batch. Stays current until its fence issues a newer token.
#[derive(Debug, Clone)]
pub struct ProcessToken {
    generation: Arc<AtomicU64>,
    id: u64,
}

impl ProcessFence {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn begin(&self) -> ProcessToken {
        let id = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        ProcessToken {
            generation: self.generation.clone(),
            id,
        }
    }

    /// Invalidates outstanding tokens without starting a new batch.
    pub fn cancel(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
    }
}

impl ProcessToken {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn is_current(&self) -> bool {
        self.generation.load(Ordering::SeqCst) == self.id
    }

    pub fn is_cancelled(&self) -> bool {
        !self.is_current()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn newer_batch_supersedes_older() {
        let fence = ProcessFence::new();
        let a = fence.begin();
        assert!(a.is_current());

        let b = fence.begin();
        assert!(a.is_cancelled());
        assert!(b.is_current());
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn cancel_invalidates_without_new_token() {
        let fence = ProcessFence::new();
        let a = fence.begin();
        fence.cancel();
        assert!(a.is_cancelled());
        assert!(fence.begin().is_current());
    }

    #[test]
    fn fences_are_independent() {
        let latest = ProcessFence::new();
        let trending = ProcessFence::new();
        let a = latest.begin();
        let _ = trending.begin();
        assert!(a.is_current());
    }
}
