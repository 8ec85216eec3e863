//! Registry of asynchronous runs.
//!
//! Each run keeps its full event history so late subscribers can replay it
//! before switching to live events. Recording and subscribing happen under
//! the same lock, so a subscriber never misses or duplicates an event.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use futures::stream::{self, BoxStream, StreamExt};
use tokio::sync::broadcast::{self, error::RecvError};
use tokio_util::sync::CancellationToken;

use crate::events::{ProgressEmitter, ProgressEvent};
use crate::models::RunRequest;
use crate::pipeline::Generator;

const LIVE_CHANNEL_CAPACITY: usize = 256;

/// Finished runs stay replayable for this long.
pub const DEFAULT_RETENTION: Duration = Duration::from_secs(10 * 60);

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

struct RunRecord {
    history: Mutex<Vec<ProgressEvent>>,
    live: broadcast::Sender<ProgressEvent>,
    cancel: CancellationToken,
    finished: AtomicBool,
}

impl RunRecord {
    fn new() -> Self {
        let (live, _) = broadcast::channel(LIVE_CHANNEL_CAPACITY);
        Self {
            history: Mutex::new(Vec::new()),
            live,
            cancel: CancellationToken::new(),
            finished: AtomicBool::new(false),
        }
    }

    fn record(&self, event: ProgressEvent) {
        let mut history = lock(&self.history);
        if event.is_terminal() {
            self.finished.store(true, Ordering::SeqCst);
        }
        history.push(event.clone());
        // No live subscribers is fine.
        let _ = self.live.send(event);
    }

    fn subscribe(self: &Arc<Self>) -> BoxStream<'static, ProgressEvent> {
        let history = lock(&self.history);
        let replay = history.clone();
        let done = replay.iter().any(ProgressEvent::is_terminal);
        let rx = self.live.subscribe();
        drop(history);

        let tail = LiveTail {
            record: Arc::clone(self),
            rx,
            next: replay.len(),
            backlog: VecDeque::new(),
        };
        let replay = stream::iter(replay);
        if done {
            replay.boxed()
        } else {
            replay.chain(live_events(tail)).boxed()
        }
    }

    /// Up to `count` recorded events starting at history index `from`.
    fn history_range(&self, from: usize, count: usize) -> Vec<ProgressEvent> {
        lock(&self.history)
            .iter()
            .skip(from)
            .take(count)
            .cloned()
            .collect()
    }
}

/// Live side of a subscription. `next` is the history index of the next
/// event owed to the subscriber.
struct LiveTail {
    record: Arc<RunRecord>,
    rx: broadcast::Receiver<ProgressEvent>,
    next: usize,
    backlog: VecDeque<ProgressEvent>,
}

/// Live events up to and including the terminal one. Events the broadcast
/// channel dropped for a slow subscriber are re-read from history.
fn live_events(tail: LiveTail) -> BoxStream<'static, ProgressEvent> {
    stream::unfold(Some(tail), |tail| async move {
        let mut tail = tail?;
        loop {
            let event = match tail.backlog.pop_front() {
                Some(event) => event,
                None => match tail.rx.recv().await {
                    Ok(event) => event,
                    Err(RecvError::Lagged(skipped)) => {
                        let missed = tail.record.history_range(tail.next, skipped as usize);
                        tracing::debug!(
                            skipped,
                            refilled = missed.len(),
                            "subscriber lagged, replaying from history"
                        );
                        tail.backlog.extend(missed);
                        continue;
                    }
                    Err(RecvError::Closed) => return None,
                },
            };
            tail.next += 1;
            let next = if event.is_terminal() { None } else { Some(tail) };
            return Some((event, next));
        }
    })
    .boxed()
}

pub struct RunRegistry {
    runs: Mutex<HashMap<String, Arc<RunRecord>>>,
    retention: Duration,
}

impl Default for RunRegistry {
    fn default() -> Self {
        Self::new(DEFAULT_RETENTION)
    }
}

impl RunRegistry {
    pub fn new(retention: Duration) -> Self {
        Self {
            runs: Mutex::new(HashMap::new()),
            retention,
        }
    }

    /// Spawn a run in the background and return its id.
    pub fn start(self: &Arc<Self>, generator: Arc<Generator>, request: RunRequest) -> String {
        let run_id = uuid::Uuid::new_v4().to_string();
        let record = Arc::new(RunRecord::new());
        lock(&self.runs).insert(run_id.clone(), Arc::clone(&record));

        let (emitter, mut rx) = ProgressEmitter::channel();
        let forward = {
            let record = Arc::clone(&record);
            let registry = Arc::downgrade(self);
            let run_id = run_id.clone();
            async move {
                while let Some(event) = rx.recv().await {
                    record.record(event);
                }
                if let Some(registry) = registry.upgrade() {
                    registry.schedule_removal(run_id);
                }
            }
        };
        tokio::spawn(forward);

        let cancel = record.cancel.clone();
        let id = run_id.clone();
        tokio::spawn(async move {
            generator.run(&id, request, emitter, cancel).await;
        });

        tracing::info!(run_id = %run_id, "run started");
        run_id
    }

    fn schedule_removal(self: Arc<Self>, run_id: String) {
        let registry = Arc::downgrade(&self);
        let retention = self.retention;
        tokio::spawn(async move {
            tokio::time::sleep(retention).await;
            if let Some(registry) = registry.upgrade() {
                lock(&registry.runs).remove(&run_id);
                tracing::debug!(run_id = %run_id, "run evicted from registry");
            }
        });
    }

    /// History followed by live events, ending after the terminal event.
    pub fn events(&self, run_id: &str) -> Option<BoxStream<'static, ProgressEvent>> {
        let record = lock(&self.runs).get(run_id).cloned()?;
        Some(record.subscribe())
    }

    /// Request cancellation. `false` if the run is unknown or already done.
    pub fn cancel(&self, run_id: &str) -> bool {
        let Some(record) = lock(&self.runs).get(run_id).cloned() else {
            return false;
        };
        if record.finished.load(Ordering::SeqCst) {
            return false;
        }
        record.cancel.cancel();
        tracing::info!(run_id, "run cancellation requested");
        true
    }

    pub fn contains(&self, run_id: &str) -> bool {
        lock(&self.runs).contains_key(run_id)
    }

    pub fn len(&self) -> usize {
        lock(&self.runs).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn late_subscriber_replays_history_then_live() {
        let record = Arc::new(RunRecord::new());
        record.record(ProgressEvent::status("one"));
        let mut events = record.subscribe();
        record.record(ProgressEvent::status("two"));
        record.record(ProgressEvent::Error {
            code: "cancelled".into(),
            message: "Run cancelled.".into(),
        });
        record.record(ProgressEvent::status("ignored by stream"));

        let collected: Vec<_> = events.by_ref().collect().await;
        assert_eq!(collected.len(), 3);
        assert_eq!(collected[0], ProgressEvent::status("one"));
        assert!(collected[2].is_terminal());
    }

    #[tokio::test]
    async fn finished_run_replays_and_ends() {
        let record = Arc::new(RunRecord::new());
        record.record(ProgressEvent::status("a"));
        record.record(ProgressEvent::Error {
            code: "x".into(),
            message: "y".into(),
        });
        let collected: Vec<_> = record.subscribe().collect().await;
        assert_eq!(collected.len(), 2);
        assert!(record.finished.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn slow_subscriber_receives_every_event_in_order() {
        let record = Arc::new(RunRecord::new());
        record.record(ProgressEvent::status("before subscribe"));
        let events = record.subscribe();

        let burst = LIVE_CHANNEL_CAPACITY + 44;
        for i in 0..burst {
            record.record(ProgressEvent::status(format!("step {i}")));
        }
        record.record(ProgressEvent::Error {
            code: "cancelled".into(),
            message: "Run cancelled.".into(),
        });

        let collected: Vec<_> = events.collect().await;
        let history = lock(&record.history).clone();
        assert_eq!(collected.len(), burst + 2);
        assert_eq!(collected, history);
    }

    #[tokio::test]
    async fn subscriber_that_lags_twice_still_gets_everything() {
        let record = Arc::new(RunRecord::new());
        let mut events = record.subscribe();

        for i in 0..LIVE_CHANNEL_CAPACITY + 10 {
            record.record(ProgressEvent::status(format!("a{i}")));
        }
        assert_eq!(events.next().await, Some(ProgressEvent::status("a0")));

        for i in 0..LIVE_CHANNEL_CAPACITY + 10 {
            record.record(ProgressEvent::status(format!("b{i}")));
        }
        record.record(ProgressEvent::Error {
            code: "x".into(),
            message: "y".into(),
        });

        let mut collected = vec![ProgressEvent::status("a0")];
        collected.extend(events.collect::<Vec<_>>().await);
        assert_eq!(collected, lock(&record.history).clone());
    }

    #[test]
    fn unknown_run() {
        let registry = RunRegistry::default();
        assert!(registry.events("nope").is_none());
        assert!(!registry.cancel("nope"));
        assert!(registry.is_empty());
    }
}
