//! Cooperative cancellation by generation counter.
//!
//! Every interrupt or reset advances the epoch. Background work holds an
//! [`EpochTicket`] taken when it started and checks it before applying
//! results or starting the next unit of work.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

#[derive(Debug, Clone, Default)]
pub struct Epoch {
    counter: Arc<AtomicU64>,
}

impl Epoch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> u64 {
        self.counter.load(Ordering::SeqCst)
    }

    /// Invalidate every outstanding ticket; returns the new epoch
    pub fn advance(&self) -> u64 {
        self.counter.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn ticket(&self) -> EpochTicket {
        EpochTicket {
            counter: Arc::clone(&self.counter),
            issued: self.current(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct EpochTicket {
    counter: Arc<AtomicU64>,
    issued: u64,
}

impl EpochTicket {
    pub fn is_current(&self) -> bool {
        self.counter.load(Ordering::SeqCst) == self.issued
    }

    pub fn issued(&self) -> u64 {
        self.issued
    }
}
