//! Event intake buffering and batch chunking.
//!
//! The rolling buffer accepts events until a size or timer trigger flushes
//! it. Both triggers can fire at once from different threads, so draining
//! goes through a flush-in-progress guard and exactly one caller gets the
//! buffered events. Chunk shaping and priority ordering live here; actual
//! evaluation of the drained events is the engine's job.

use crate::event::Event;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Rolling batch buffer shared by producers and the flush path.
pub struct BatchBuffer {
    events: Mutex<Vec<Event>>,
    flush_in_progress: AtomicBool,
    last_flush: Mutex<Instant>,
}

impl BatchBuffer {
    pub fn new() -> Self {
        BatchBuffer {
            events: Mutex::new(Vec::new()),
            flush_in_progress: AtomicBool::new(false),
            last_flush: Mutex::new(Instant::now()),
        }
    }

    /// Append an event, returning the buffer depth afterwards.
    pub fn push(&self, event: Event) -> usize {
        let mut events = self.events.lock().unwrap_or_else(|e| e.into_inner());
        events.push(event);
        events.len()
    }

    pub fn len(&self) -> usize {
        self.events.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether either flush trigger has fired.
    pub fn should_flush(&self, batch_size: usize, flush_interval: Duration) -> bool {
        if self.len() >= batch_size {
            return true;
        }
        !self.is_empty()
            && self
                .last_flush
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .elapsed()
                >= flush_interval
    }

    /// Take the buffered events if no other flush is running. The guard
    /// resolves the size-trigger/timer-trigger race: losers get `None`
    /// and move on.
    pub fn drain(&self) -> Option<Vec<Event>> {
        if self
            .flush_in_progress
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return None;
        }
        let drained = {
            let mut events = self.events.lock().unwrap_or_else(|e| e.into_inner());
            std::mem::take(&mut *events)
        };
        *self.last_flush.lock().unwrap_or_else(|e| e.into_inner()) = Instant::now();
        self.flush_in_progress.store(false, Ordering::Release);
        if drained.is_empty() {
            None
        } else {
            Some(drained)
        }
    }
}

impl Default for BatchBuffer {
    fn default() -> Self {
        Self::new()
    }
}

/// Higher priority first; ties keep arrival order.
pub fn order_by_priority(events: &mut [Event]) {
    events.sort_by_key(|event| std::cmp::Reverse(event.effective_priority()));
}

/// Split a batch into chunks of at most `chunk_size` events.
pub fn chunk_events(events: Vec<Event>, chunk_size: usize) -> Vec<Vec<Event>> {
    let chunk_size = chunk_size.max(1);
    let mut chunks = Vec::with_capacity(events.len().div_ceil(chunk_size));
    let mut events = events.into_iter();
    loop {
        let chunk: Vec<Event> = events.by_ref().take(chunk_size).collect();
        if chunk.is_empty() {
            break;
        }
        chunks.push(chunk);
    }
    chunks
}

/// Per-chunk accounting for a processed batch.
#[derive(Debug, Clone)]
pub struct ChunkStats {
    pub index: usize,
    pub processed: usize,
    pub failed: usize,
    pub duration: Duration,
}

/// Aggregated result of one batch flush.
#[derive(Debug, Clone, Default)]
pub struct BatchOutcome {
    pub processed: usize,
    pub failed: usize,
    pub chunks: Vec<ChunkStats>,
}

impl BatchOutcome {
    pub fn merge(mut chunks: Vec<ChunkStats>) -> Self {
        chunks.sort_by_key(|chunk| chunk.index);
        let processed = chunks.iter().map(|c| c.processed).sum();
        let failed = chunks.iter().map(|c| c.failed).sum();
        BatchOutcome {
            processed,
            failed,
            chunks,
        }
    }
}
