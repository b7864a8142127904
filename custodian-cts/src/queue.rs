//! Series-ordered asynchronous task queue.
//!
//! Tasks are grouped into lanes by [`SeriesKey`]. Each lane is drained by a
//! single driver, so tasks sharing a key run one at a time in submission
//! order, while different lanes proceed concurrently up to the size of the
//! worker pool.
//!
//! ```text
//!  submit ──► permit ──► lane[token:a] [t0][t1][t2] ──► driver ─┐
//!                        lane[token:b] [t3]          ──► driver ─┼─► worker pool ─► backend
//!                        lane[filter:x] [q0]         ──► driver ─┘
//! ```
//!
//! A lane exists only while it has work; the driver retires it under the
//! same lock that submitters use to append, so a task can never be stranded
//! in a lane without a driver.

use std::collections::hash_map::Entry;
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{OwnedSemaphorePermit, Semaphore, TryAcquireError, broadcast, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, trace, warn};

use crate::backend::TokenBackend;
use crate::config::QueueConfig;
use crate::error::{Error, RejectReason, Rejected, Result};
use crate::filter::TokenFilter;
use crate::task::{ContinuousQueryListener, ContinuousQueryTask, SeriesKey, Task, TaskState};
use crate::token::TokenChange;

/// Point-in-time counters for a queue
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    /// Accepted tasks waiting in a lane.
    pub queued: usize,
    /// Tasks currently executing against the backend.
    pub running: usize,
    /// Tasks that finished successfully.
    pub completed: u64,
    /// Tasks that failed, were abandoned or were refused at dequeue time.
    pub failed: u64,
    /// Lanes with pending or running work.
    pub active_series: usize,
    /// Continuous queries currently forwarding changes.
    pub active_subscriptions: usize,
}

#[derive(Default)]
struct Counters {
    queued: AtomicUsize,
    running: AtomicUsize,
    completed: AtomicU64,
    failed: AtomicU64,
    subscriptions: AtomicUsize,
}

enum Work {
    Run {
        task: Task,
        _permit: OwnedSemaphorePermit,
    },
    Subscribe {
        filter: TokenFilter,
        listener: Arc<dyn ContinuousQueryListener>,
        reply: oneshot::Sender<Result<ContinuousQuery>>,
        _permit: OwnedSemaphorePermit,
    },
}

impl Work {
    fn fail(self, error: Error) {
        match self {
            Work::Run { task, .. } => task.fail(error),
            Work::Subscribe { reply, .. } => {
                let _ = reply.send(Err(error));
            }
        }
    }
}

struct Shared {
    backend: Arc<dyn TokenBackend>,
    lanes: Mutex<HashMap<SeriesKey, VecDeque<Work>>>,
    workers: Arc<Semaphore>,
    capacity: Arc<Semaphore>,
    closing: CancellationToken,
    subscriptions: CancellationToken,
    tracker: TaskTracker,
    counters: Arc<Counters>,
}

/// Asynchronous, per-series ordered executor for token operations
///
/// Cloning yields another handle onto the same queue.
#[derive(Clone)]
pub struct TokenTaskQueue {
    shared: Arc<Shared>,
}

impl TokenTaskQueue {
    /// Create a queue executing against `backend`.
    ///
    /// Zero sizes in `config` are raised to one.
    pub fn new(backend: Arc<dyn TokenBackend>, config: QueueConfig) -> Self {
        Self {
            shared: Arc::new(Shared {
                backend,
                lanes: Mutex::new(HashMap::new()),
                workers: Arc::new(Semaphore::new(config.workers.max(1))),
                capacity: Arc::new(Semaphore::new(config.capacity.max(1))),
                closing: CancellationToken::new(),
                subscriptions: CancellationToken::new(),
                tracker: TaskTracker::new(),
                counters: Arc::default(),
            }),
        }
    }

    /// Submit a task, refusing it immediately when the queue is full.
    ///
    /// On rejection the task comes back inside [`Rejected`] and its handler
    /// has not been called.
    pub fn try_submit(&self, task: Task) -> std::result::Result<(), Rejected> {
        let permit = match Arc::clone(&self.shared.capacity).try_acquire_owned() {
            Ok(permit) => permit,
            Err(TryAcquireError::NoPermits) => {
                debug!(key = %task.series_key(), "Queue saturated, rejecting task");
                return Err(Rejected {
                    reason: RejectReason::Saturated,
                    task,
                });
            }
            Err(TryAcquireError::Closed) => {
                return Err(Rejected {
                    reason: RejectReason::ShuttingDown,
                    task,
                });
            }
        };
        self.enqueue_task(task, permit)
    }

    /// Submit a task, waiting for queue capacity if necessary.
    ///
    /// Fails only once the queue is shutting down.
    pub async fn submit(&self, task: Task) -> std::result::Result<(), Rejected> {
        let permit = tokio::select! {
            biased;
            _ = self.shared.closing.cancelled() => None,
            permit = Arc::clone(&self.shared.capacity).acquire_owned() => permit.ok(),
        };
        match permit {
            Some(permit) => self.enqueue_task(task, permit),
            None => Err(Rejected {
                reason: RejectReason::ShuttingDown,
                task,
            }),
        }
    }

    /// Register a continuous query.
    ///
    /// The registration runs in the filter's series, so it is ordered after
    /// earlier queries with the same filter. Once this returns `Ok`, every
    /// matching change reaches the listener until the subscription is
    /// cancelled or the change feed closes.
    pub async fn subscribe(&self, task: ContinuousQueryTask) -> Result<ContinuousQuery> {
        let permit = tokio::select! {
            biased;
            _ = self.shared.closing.cancelled() => None,
            permit = Arc::clone(&self.shared.capacity).acquire_owned() => permit.ok(),
        };
        let Some(permit) = permit else {
            return Err(Error::Shutdown);
        };

        let key = task.series_key();
        let (filter, listener) = task.into_parts();
        let (reply, registered) = oneshot::channel();
        {
            let mut lanes = self.shared.lanes.lock();
            if self.shared.closing.is_cancelled() {
                return Err(Error::Shutdown);
            }
            let work = Work::Subscribe {
                filter,
                listener,
                reply,
                _permit: permit,
            };
            self.push(&mut lanes, key, work);
        }

        registered.await.unwrap_or(Err(Error::Abandoned {
            operation: "continuous_query",
        }))
    }

    /// Stop accepting work and wait for the queue to drain.
    ///
    /// Already accepted tasks still run and report their outcome; active
    /// continuous queries are cancelled.
    pub async fn shutdown(&self) {
        {
            let _lanes = self.shared.lanes.lock();
            self.shared.closing.cancel();
        }
        info!(
            queued = self.shared.counters.queued.load(Ordering::Relaxed),
            "Token task queue shutting down"
        );

        self.shared.subscriptions.cancel();
        self.shared.tracker.close();
        self.shared.tracker.wait().await;
        debug!("Token task queue drained");
    }

    /// Whether [`TokenTaskQueue::shutdown`] has been called
    pub fn is_shutting_down(&self) -> bool {
        self.shared.closing.is_cancelled()
    }

    pub fn stats(&self) -> QueueStats {
        let counters = &self.shared.counters;
        QueueStats {
            queued: counters.queued.load(Ordering::Relaxed),
            running: counters.running.load(Ordering::Relaxed),
            completed: counters.completed.load(Ordering::Relaxed),
            failed: counters.failed.load(Ordering::Relaxed),
            active_series: self.shared.lanes.lock().len(),
            active_subscriptions: counters.subscriptions.load(Ordering::Relaxed),
        }
    }

    fn enqueue_task(
        &self,
        task: Task,
        permit: OwnedSemaphorePermit,
    ) -> std::result::Result<(), Rejected> {
        let mut lanes = self.shared.lanes.lock();
        if self.shared.closing.is_cancelled() {
            return Err(Rejected {
                reason: RejectReason::ShuttingDown,
                task,
            });
        }
        let key = task.series_key();
        self.push(
            &mut lanes,
            key,
            Work::Run {
                task,
                _permit: permit,
            },
        );
        Ok(())
    }

    /// Append work to its lane, starting a driver if the lane was idle.
    ///
    /// Callers hold the lane lock and have checked the queue is open.
    fn push(&self, lanes: &mut HashMap<SeriesKey, VecDeque<Work>>, key: SeriesKey, work: Work) {
        self.shared.counters.queued.fetch_add(1, Ordering::Relaxed);
        trace!(key = %key, state = ?TaskState::Queued, "Task state changed");
        match lanes.entry(key) {
            Entry::Occupied(mut lane) => lane.get_mut().push_back(work),
            Entry::Vacant(slot) => {
                let key = slot.key().clone();
                slot.insert(VecDeque::from([work]));
                let shared = Arc::clone(&self.shared);
                self.shared.tracker.spawn(drive(shared, key));
            }
        }
    }
}

impl fmt::Debug for TokenTaskQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenTaskQueue")
            .field("stats", &self.stats())
            .field("shutting_down", &self.is_shutting_down())
            .finish()
    }
}

/// Drain one lane until it is empty, then retire it
async fn drive(shared: Arc<Shared>, key: SeriesKey) {
    loop {
        let work = {
            let mut lanes = shared.lanes.lock();
            match lanes.get_mut(&key).and_then(VecDeque::pop_front) {
                Some(work) => work,
                None => {
                    lanes.remove(&key);
                    return;
                }
            }
        };
        shared.counters.queued.fetch_sub(1, Ordering::Relaxed);

        let Ok(_worker) = Arc::clone(&shared.workers).acquire_owned().await else {
            shared.counters.failed.fetch_add(1, Ordering::Relaxed);
            work.fail(Error::Shutdown);
            continue;
        };

        match work {
            Work::Run { task, _permit } => run_task(&shared, &key, task).await,
            Work::Subscribe {
                filter,
                listener,
                reply,
                _permit,
            } => register(&shared, &key, filter, listener, reply).await,
        }
    }
}

async fn run_task(shared: &Shared, key: &SeriesKey, task: Task) {
    let kind = task.kind();
    let backend = Arc::clone(&shared.backend);
    shared.counters.running.fetch_add(1, Ordering::Relaxed);
    trace!(task = %kind, key = %key, state = ?TaskState::Running, "Task state changed");

    // A panicking backend must not take the lane driver down with it; the
    // task's completion guard reports the abandonment to its handler.
    let state = match tokio::spawn(task.execute(backend)).await {
        Ok(state) => state,
        Err(e) => {
            error!(task = %kind, key = %key, error = %e, "Task execution panicked");
            TaskState::Failed
        }
    };

    shared.counters.running.fetch_sub(1, Ordering::Relaxed);
    match state {
        TaskState::Completed => shared.counters.completed.fetch_add(1, Ordering::Relaxed),
        _ => shared.counters.failed.fetch_add(1, Ordering::Relaxed),
    };
    trace!(task = %kind, key = %key, state = ?state, "Task state changed");
}

async fn register(
    shared: &Shared,
    key: &SeriesKey,
    filter: TokenFilter,
    listener: Arc<dyn ContinuousQueryListener>,
    reply: oneshot::Sender<Result<ContinuousQuery>>,
) {
    let feed = match shared.backend.subscribe(&filter).await {
        Ok(feed) => feed,
        Err(e) => {
            warn!(key = %key, error = %e, "Continuous query registration failed");
            listener.process_error(&Error::Subscription(e.to_string()));
            shared.counters.failed.fetch_add(1, Ordering::Relaxed);
            let _ = reply.send(Err(Error::Subscription(e.to_string())));
            return;
        }
    };

    let token = shared.subscriptions.child_token();
    shared.counters.subscriptions.fetch_add(1, Ordering::Relaxed);
    let handle = shared.tracker.spawn(forward(
        feed,
        filter,
        listener,
        token.clone(),
        Arc::clone(&shared.counters),
    ));
    shared.counters.completed.fetch_add(1, Ordering::Relaxed);
    debug!(key = %key, state = ?TaskState::Active, "Continuous query active");

    let query = ContinuousQuery {
        key: key.clone(),
        token,
        handle,
    };
    if let Err(Ok(query)) = reply.send(Ok(query)) {
        // Nobody is waiting for the handle, so nobody could ever cancel it
        query.token.cancel();
    }
}

async fn forward(
    mut feed: broadcast::Receiver<TokenChange>,
    filter: TokenFilter,
    listener: Arc<dyn ContinuousQueryListener>,
    token: CancellationToken,
    counters: Arc<Counters>,
) {
    loop {
        tokio::select! {
            biased;
            _ = token.cancelled() => {
                listener.on_cancelled();
                break;
            }
            change = feed.recv() => match change {
                Ok(change) => {
                    if filter.matches(&change.token) {
                        listener.object_changed(&change);
                    }
                }
                Err(RecvError::Lagged(missed)) => {
                    warn!(
                        filter = %filter.identity(),
                        missed,
                        "Continuous query lagged behind change feed"
                    );
                    listener.process_error(&Error::Subscription(format!(
                        "{missed} changes missed"
                    )));
                }
                Err(RecvError::Closed) => {
                    info!(filter = %filter.identity(), "Change feed closed");
                    listener.connection_lost();
                    break;
                }
            },
        }
    }
    counters.subscriptions.fetch_sub(1, Ordering::Relaxed);
}

/// Handle onto an active continuous query
///
/// Dropping the handle leaves the subscription running until the queue
/// shuts down; call [`ContinuousQuery::cancel`] to end it early.
pub struct ContinuousQuery {
    key: SeriesKey,
    token: CancellationToken,
    handle: JoinHandle<()>,
}

impl ContinuousQuery {
    pub fn series_key(&self) -> &SeriesKey {
        &self.key
    }

    /// `Active` while changes are forwarded, `Cancelled` afterwards
    pub fn state(&self) -> TaskState {
        if self.handle.is_finished() {
            TaskState::Cancelled
        } else {
            TaskState::Active
        }
    }

    pub fn is_active(&self) -> bool {
        self.state() == TaskState::Active
    }

    /// Cancel the subscription.
    ///
    /// When this returns the listener has received `on_cancelled` (unless
    /// the feed had already closed) and will get no further callbacks.
    pub async fn cancel(self) {
        self.token.cancel();
        if let Err(e) = self.handle.await {
            error!(key = %self.key, error = %e, "Continuous query forwarder panicked");
        }
    }
}

impl fmt::Debug for ContinuousQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContinuousQuery")
            .field("key", &self.key)
            .field("state", &self.state())
            .finish()
    }
}
