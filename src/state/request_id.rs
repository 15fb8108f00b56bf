use std::sync::atomic::{AtomicU64, Ordering};

/// Process-unique request ids for log correlation.
pub(crate) struct RequestIdGenerator {
    seed: u128,
    counter: AtomicU64,
}

impl RequestIdGenerator {
    #[must_use]
    pub(crate) fn new() -> Self {
        Self {
            seed: fastrand::u128(..),
            counter: AtomicU64::new(1),
        }
    }

    #[must_use]
    pub(crate) fn next(&self) -> uuid::Uuid {
        let seq = self.counter.fetch_add(1, Ordering::Relaxed);
        uuid::Uuid::from_u128(self.seed ^ u128::from(seq))
    }
}
