//! Concurrency gate: bounds simultaneous outbound calls.
//!
//! One permit covers one remote call, never a whole pipeline, so token
//! refreshes interleave with data calls instead of queuing behind them.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::error::{Error, Result};

#[derive(Debug, Default)]
struct GateStats {
    in_flight: AtomicUsize,
    peak: AtomicUsize,
    acquired: AtomicUsize,
}

/// A counting semaphore sized to the remote's rate ceiling.
#[derive(Debug, Clone)]
pub struct ConcurrencyGate {
    semaphore: Arc<Semaphore>,
    capacity: usize,
    stats: Arc<GateStats>,
}

/// Held for the duration of one outbound call; releases the slot on drop.
#[derive(Debug)]
pub struct GatePermit {
    _permit: OwnedSemaphorePermit,
    stats: Arc<GateStats>,
}

impl Drop for GatePermit {
    fn drop(&mut self) {
        self.stats.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

impl ConcurrencyGate {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(capacity)),
            capacity,
            stats: Arc::new(GateStats::default()),
        }
    }

    /// Wait until a slot is free.
    pub async fn acquire(&self) -> Result<GatePermit> {
        let permit = Arc::clone(&self.semaphore)
            .acquire_owned()
            .await
            .map_err(|e| Error::Other(format!("concurrency gate unavailable: {e}")))?;
        let now = self.stats.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.stats.peak.fetch_max(now, Ordering::SeqCst);
        self.stats.acquired.fetch_add(1, Ordering::SeqCst);
        Ok(GatePermit {
            _permit: permit,
            stats: Arc::clone(&self.stats),
        })
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }

    pub fn in_flight(&self) -> usize {
        self.stats.in_flight.load(Ordering::SeqCst)
    }

    /// Highest number of permits held at once since the gate was created.
    pub fn peak(&self) -> usize {
        self.stats.peak.load(Ordering::SeqCst)
    }

    /// Total permits handed out.
    pub fn acquired(&self) -> usize {
        self.stats.acquired.load(Ordering::SeqCst)
    }
}
