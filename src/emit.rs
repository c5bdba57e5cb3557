//! Match emission to external collaborators.
//!
//! Matches fan out to incident and action consumers from a dedicated
//! worker fed by a bounded channel. Evaluation never blocks on a slow
//! consumer; when the queue is full the match is counted as dropped and
//! logged, which is the backpressure signal to watch.

use crate::eval::EvaluationResult;
use crate::event::Event;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::mpsc::{sync_channel, SyncSender, TrySendError};
use std::sync::Arc;
use std::thread::JoinHandle;
use tracing::{error, warn};

/// Structured payload handed to every consumer on a rule match.
#[derive(Debug, Clone)]
pub struct MatchPayload {
    pub rule_id: String,
    pub rule_name: String,
    pub event: Event,
    pub result: EvaluationResult,
}

/// External collaborator notified of matches (incident manager, action
/// executor). Must not panic; a panicking consumer kills the dispatch
/// worker for everyone.
pub trait MatchConsumer: Send + Sync {
    fn handle(&self, payload: &MatchPayload);
}

/// Bounded fire-and-continue dispatcher.
pub struct MatchDispatcher {
    sender: Option<SyncSender<MatchPayload>>,
    depth: Arc<AtomicUsize>,
    dropped: AtomicU64,
    worker: Option<JoinHandle<()>>,
}

impl MatchDispatcher {
    pub fn new(capacity: usize, consumers: Vec<Arc<dyn MatchConsumer>>) -> Self {
        let (sender, receiver) = sync_channel::<MatchPayload>(capacity.max(1));
        let depth = Arc::new(AtomicUsize::new(0));
        let worker_depth = Arc::clone(&depth);

        let worker = std::thread::Builder::new()
            .name("match-dispatch".to_string())
            .spawn(move || {
                while let Ok(payload) = receiver.recv() {
                    worker_depth.fetch_sub(1, Ordering::Relaxed);
                    for consumer in &consumers {
                        consumer.handle(&payload);
                    }
                }
            });

        let worker = match worker {
            Ok(handle) => Some(handle),
            Err(err) => {
                error!(%err, "failed to spawn match dispatch worker");
                None
            }
        };

        MatchDispatcher {
            sender: Some(sender),
            depth,
            dropped: AtomicU64::new(0),
            worker,
        }
    }

    /// Queue a match. Returns `false` when the queue was full and the
    /// match had to be dropped.
    pub fn dispatch(&self, payload: MatchPayload) -> bool {
        let Some(sender) = &self.sender else {
            return false;
        };
        match sender.try_send(payload) {
            Ok(()) => {
                self.depth.fetch_add(1, Ordering::Relaxed);
                true
            }
            Err(TrySendError::Full(payload)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                warn!(
                    rule_id = %payload.rule_id,
                    depth = self.depth.load(Ordering::Relaxed),
                    "emit queue full, dropping match"
                );
                false
            }
            Err(TrySendError::Disconnected(_)) => false,
        }
    }

    pub fn queue_depth(&self) -> usize {
        self.depth.load(Ordering::Relaxed)
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Stop accepting matches and wait for the worker to drain.
    pub fn shutdown(&mut self) {
        self.sender.take();
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

impl Drop for MatchDispatcher {
    fn drop(&mut self) {
        self.shutdown();
    }
}
