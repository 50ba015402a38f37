//! Requeue buffer: work deferred while a token refresh is in progress.
//!
//! Every entry remembers the token generation it is waiting to see replaced.
//! A drain only releases entries whose generation has been superseded, so an
//! item is never replayed before the refresh it is waiting for completes.

use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender, error::TryRecvError};
use tracing::debug;

use crate::model::WorkItem;

#[derive(Debug)]
struct Deferred {
    item: WorkItem,
    /// Released once the holder's generation is greater than this.
    after_generation: u64,
}

#[derive(Debug)]
pub struct RequeueBuffer {
    tx: UnboundedSender<Deferred>,
    rx: Mutex<UnboundedReceiver<Deferred>>,
    depth: AtomicUsize,
}

impl Default for RequeueBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl RequeueBuffer {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            tx,
            rx: Mutex::new(rx),
            depth: AtomicUsize::new(0),
        }
    }

    /// Defer `item` until the token of `after_generation` has been replaced.
    ///
    /// Never blocks.
    pub fn push(&self, item: WorkItem, after_generation: u64) {
        debug!(key = %item.key, after_generation, "work item deferred");
        self.depth.fetch_add(1, Ordering::SeqCst);
        // The receiver lives as long as self, so the channel cannot be closed.
        let _ = self.tx.send(Deferred {
            item,
            after_generation,
        });
    }

    /// Take every queued item whose awaited refresh has completed.
    ///
    /// Returns immediately once the queue is empty. Items still waiting on a
    /// newer generation go back into the buffer.
    pub fn drain_ready(&self, current_generation: u64) -> Vec<WorkItem> {
        let mut rx = self.rx.lock().unwrap_or_else(|e| e.into_inner());
        let mut ready = Vec::new();
        let mut waiting = Vec::new();
        loop {
            match rx.try_recv() {
                Ok(entry) if current_generation > entry.after_generation => {
                    ready.push(entry.item)
                }
                Ok(entry) => waiting.push(entry),
                Err(TryRecvError::Empty | TryRecvError::Disconnected) => break,
            }
        }
        for entry in waiting {
            let _ = self.tx.send(entry);
        }
        self.depth.fetch_sub(ready.len(), Ordering::SeqCst);
        ready
    }

    /// Take everything regardless of generation.
    pub fn drain_all(&self) -> Vec<WorkItem> {
        let mut rx = self.rx.lock().unwrap_or_else(|e| e.into_inner());
        let mut items = Vec::new();
        while let Ok(entry) = rx.try_recv() {
            items.push(entry.item);
        }
        self.depth.fetch_sub(items.len(), Ordering::SeqCst);
        items
    }

    pub fn len(&self) -> usize {
        self.depth.load(Ordering::SeqCst)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
