//! Thread-local context propagation across team hand-offs
//!
//! A flow's execution hops between arbitrary team threads, so any
//! thread-affine context has to be explicitly carried across. Registered
//! synchronisers are suspended when the executing OS thread releases the
//! logical thread and resumed before another job node of that logical
//! thread runs, always in matching pairs.

/// Carries thread-affine context across logical-thread hand-offs
pub trait ThreadSynchroniser: Send + Sync {
    /// Capture and clear the context on the thread relinquishing the
    /// logical thread
    fn suspend(&self);

    /// Restore the context on the thread picking the logical thread back up
    fn resume(&self);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct Counting {
        suspends: AtomicUsize,
        resumes: AtomicUsize,
    }

    impl ThreadSynchroniser for Counting {
        fn suspend(&self) {
            self.suspends.fetch_add(1, Ordering::SeqCst);
        }

        fn resume(&self) {
            self.resumes.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_trait_object_usable() {
        let sync: Arc<dyn ThreadSynchroniser> = Arc::new(Counting {
            suspends: AtomicUsize::new(0),
            resumes: AtomicUsize::new(0),
        });
        sync.suspend();
        sync.resume();
    }
}
