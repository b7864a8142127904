//! Ordering and lifecycle tests for TokenTaskQueue
//!
//! These tests validate the queue's contract end to end:
//! - Tasks sharing a token ID run in submission order, one at a time
//! - Unrelated tokens proceed concurrently
//! - Queries sharing a filter run one after another
//! - Every handler fires exactly once, even when the backend panics
//! - Saturation and shutdown hand tasks back instead of dropping them
//! - Continuous queries stream changes until cancelled

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Semaphore, broadcast, mpsc, oneshot};
use tokio::time::Instant;
use tracing_subscriber::EnvFilter;

use custodian_cts::{
    BackendError, ContinuousQueryListener, Error, Filter, InMemoryTokenStore, Options,
    PartialToken, QueueConfig, RejectReason, TaskFactory, TaskState, Token, TokenBackend,
    TokenChange, TokenFilter, TokenTaskQueue, TokenType, handler_fn,
};

/// Backend wrapper that records calls and can delay, gate or panic
#[derive(Default)]
struct ScriptedBackend {
    inner: InMemoryTokenStore,
    log: Arc<Mutex<Vec<String>>>,
    delay: Option<Duration>,
    gate: Option<Arc<Semaphore>>,
    fail_subscribe: bool,
}

impl ScriptedBackend {
    async fn step(&self, op: &str, id: &str) {
        self.log.lock().unwrap().push(format!("start {op} {id}"));
        if let Some(gate) = &self.gate {
            let _permit = gate.acquire().await.unwrap();
        }
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if id == "boom" {
            panic!("backend exploded on {op}");
        }
    }

    fn done(&self, op: &str, id: &str) {
        self.log.lock().unwrap().push(format!("end {op} {id}"));
    }
}

#[async_trait]
impl TokenBackend for ScriptedBackend {
    async fn create(&self, token: Token, options: &Options) -> Result<Token, BackendError> {
        let id = token.id().to_string();
        self.step("create", &id).await;
        let result = self.inner.create(token, options).await;
        self.done("create", &id);
        result
    }

    async fn read(&self, token_id: &str, options: &Options) -> Result<Option<Token>, BackendError> {
        self.step("read", token_id).await;
        let result = self.inner.read(token_id, options).await;
        self.done("read", token_id);
        result
    }

    async fn update(&self, token: Token, options: &Options) -> Result<Token, BackendError> {
        let id = token.id().to_string();
        self.step("update", &id).await;
        let result = self.inner.update(token, options).await;
        self.done("update", &id);
        result
    }

    async fn delete(
        &self,
        token_id: &str,
        options: &Options,
    ) -> Result<PartialToken, BackendError> {
        self.step("delete", token_id).await;
        let result = self.inner.delete(token_id, options).await;
        self.done("delete", token_id);
        result
    }

    async fn query(&self, filter: &TokenFilter) -> Result<Vec<Token>, BackendError> {
        let identity = filter.identity();
        self.step("query", &identity).await;
        let result = self.inner.query(filter).await;
        self.done("query", &identity);
        result
    }

    async fn partial_query(
        &self,
        filter: &TokenFilter,
    ) -> Result<Vec<PartialToken>, BackendError> {
        let identity = filter.identity();
        self.step("partial_query", &identity).await;
        let result = self.inner.partial_query(filter).await;
        self.done("partial_query", &identity);
        result
    }

    async fn subscribe(
        &self,
        filter: &TokenFilter,
    ) -> Result<broadcast::Receiver<TokenChange>, BackendError> {
        if self.fail_subscribe {
            return Err(BackendError::Unavailable("change feed offline".to_string()));
        }
        self.inner.subscribe(filter).await
    }
}

/// Listener forwarding callbacks onto a channel the test can await
struct ChannelListener {
    events: mpsc::UnboundedSender<String>,
}

impl ContinuousQueryListener for ChannelListener {
    fn object_changed(&self, change: &TokenChange) {
        let _ = self
            .events
            .send(format!("{:?} {}", change.change_type, change.token.id()));
    }

    fn process_error(&self, error: &Error) {
        let _ = self.events.send(format!("error {error}"));
    }

    fn connection_lost(&self) {
        let _ = self.events.send("lost".to_string());
    }

    fn on_cancelled(&self) {
        let _ = self.events.send("cancelled".to_string());
    }
}

fn session(id: &str, user: &str) -> Token {
    Token::new(id, TokenType::Session).with_attribute("user", user)
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn queue_over(backend: ScriptedBackend, config: QueueConfig) -> TokenTaskQueue {
    init_tracing();
    TokenTaskQueue::new(Arc::new(backend), config)
}

async fn next_event(rx: &mut mpsc::UnboundedReceiver<String>) -> String {
    tokio::time::timeout(Duration::from_secs(1), rx.recv())
        .await
        .expect("listener event timed out")
        .expect("listener channel closed")
}

// ==== Ordering Tests ====

#[tokio::test]
async fn same_token_tasks_complete_in_submission_order() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let backend = ScriptedBackend {
        log: Arc::clone(&log),
        delay: Some(Duration::from_millis(20)),
        ..Default::default()
    };
    let queue = queue_over(backend, QueueConfig::default());
    let factory = TaskFactory::new();

    let handler_log = Arc::clone(&log);
    let create = factory.create(
        session("t-1", "alice"),
        Options::default(),
        handler_fn(move |result: custodian_cts::Result<Token>| {
            assert!(result.is_ok());
            handler_log.lock().unwrap().push("handler create t-1".to_string());
        }),
    );
    let (tx, rx) = oneshot::channel::<custodian_cts::Result<PartialToken>>();
    let delete = factory.delete("t-1", Options::default(), tx);

    queue.submit(create).await.unwrap();
    queue.submit(delete).await.unwrap();

    let deleted = rx.await.unwrap().unwrap();
    assert_eq!(deleted.id(), "t-1");
    assert_eq!(
        *log.lock().unwrap(),
        vec![
            "start create t-1",
            "end create t-1",
            "handler create t-1",
            "start delete t-1",
            "end delete t-1",
        ]
    );
}

#[tokio::test]
async fn read_after_update_observes_update() {
    let queue = queue_over(ScriptedBackend::default(), QueueConfig::default());
    let factory = TaskFactory::new();

    let (created_tx, created_rx) = oneshot::channel::<custodian_cts::Result<Token>>();
    let (updated_tx, updated_rx) = oneshot::channel::<custodian_cts::Result<Token>>();
    let (read_tx, read_rx) = oneshot::channel::<custodian_cts::Result<Option<Token>>>();

    queue
        .submit(factory.create(session("t-2", "alice"), Options::default(), created_tx))
        .await
        .unwrap();
    queue
        .submit(factory.update(session("t-2", "bob"), Options::default(), updated_tx))
        .await
        .unwrap();
    queue
        .submit(factory.read("t-2", Options::default(), read_tx))
        .await
        .unwrap();

    created_rx.await.unwrap().unwrap();
    updated_rx.await.unwrap().unwrap();
    let read = read_rx.await.unwrap().unwrap().unwrap();
    assert_eq!(read.attribute("user"), Some("bob"));
}

#[tokio::test(start_paused = true)]
async fn different_tokens_run_concurrently() {
    let backend = ScriptedBackend {
        delay: Some(Duration::from_millis(100)),
        ..Default::default()
    };
    let queue = queue_over(backend, QueueConfig::default().with_workers(4));
    let factory = TaskFactory::new();

    let start = Instant::now();
    let mut receivers = Vec::new();
    for id in ["a", "b", "c"] {
        let (tx, rx) = oneshot::channel::<custodian_cts::Result<Token>>();
        queue
            .submit(factory.create(session(id, "alice"), Options::default(), tx))
            .await
            .unwrap();
        receivers.push(rx);
    }
    for rx in receivers {
        rx.await.unwrap().unwrap();
    }

    assert!(
        start.elapsed() < Duration::from_millis(200),
        "independent tokens should not serialize: took {:?}",
        start.elapsed()
    );
}

#[tokio::test(start_paused = true)]
async fn worker_pool_bounds_parallelism() {
    let backend = ScriptedBackend {
        delay: Some(Duration::from_millis(100)),
        ..Default::default()
    };
    let queue = queue_over(backend, QueueConfig::default().with_workers(1));
    let factory = TaskFactory::new();

    let start = Instant::now();
    let (tx_a, rx_a) = oneshot::channel::<custodian_cts::Result<Token>>();
    let (tx_b, rx_b) = oneshot::channel::<custodian_cts::Result<Token>>();
    queue
        .submit(factory.create(session("a", "x"), Options::default(), tx_a))
        .await
        .unwrap();
    queue
        .submit(factory.create(session("b", "y"), Options::default(), tx_b))
        .await
        .unwrap();
    rx_a.await.unwrap().unwrap();
    rx_b.await.unwrap().unwrap();

    assert!(start.elapsed() >= Duration::from_millis(200));
}

// ==== Query Tests ====

async fn seeded_backend(
    log: &Arc<Mutex<Vec<String>>>,
    gate: Option<Arc<Semaphore>>,
) -> ScriptedBackend {
    let backend = ScriptedBackend {
        log: Arc::clone(log),
        gate,
        ..Default::default()
    };
    for (id, user) in [("a", "alice"), ("b", "bob"), ("c", "alice")] {
        let token = session(id, user).with_attribute("realm", "/");
        backend.inner.create(token, &Options::default()).await.unwrap();
    }
    backend
}

#[tokio::test]
async fn same_filter_queries_run_in_submission_order() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let gate = Arc::new(Semaphore::new(0));
    let backend = seeded_backend(&log, Some(Arc::clone(&gate))).await;
    let queue = queue_over(backend, QueueConfig::default().with_workers(4));
    let factory = TaskFactory::new();
    let filter = TokenFilter::new(Filter::equals("user", "alice"));

    let handler_log = Arc::clone(&log);
    let first = factory.query(
        filter.clone(),
        handler_fn(move |result: custodian_cts::Result<Vec<Token>>| {
            assert_eq!(result.unwrap().len(), 2);
            handler_log.lock().unwrap().push("handler first query".to_string());
        }),
    );
    let (tx, rx) = oneshot::channel::<custodian_cts::Result<Vec<Token>>>();
    let second = factory.query(filter.clone(), tx);

    queue.submit(first).await.unwrap();
    queue.submit(second).await.unwrap();

    // With the backend held shut, only the first query may have started
    tokio::time::sleep(Duration::from_millis(50)).await;
    let started = log
        .lock()
        .unwrap()
        .iter()
        .filter(|line| line.starts_with("start query"))
        .count();
    assert_eq!(started, 1);
    let stats = queue.stats();
    assert_eq!(stats.running, 1);
    assert_eq!(stats.queued, 1);
    assert_eq!(stats.active_series, 1);

    gate.add_permits(1);
    let tokens = rx.await.unwrap().unwrap();
    let ids: Vec<_> = tokens.iter().map(Token::id).collect();
    assert_eq!(ids, vec!["a", "c"]);

    let identity = filter.identity();
    assert_eq!(
        *log.lock().unwrap(),
        vec![
            format!("start query {identity}"),
            format!("end query {identity}"),
            "handler first query".to_string(),
            format!("start query {identity}"),
            format!("end query {identity}"),
        ]
    );
}

#[tokio::test]
async fn partial_query_returns_requested_attributes_only() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let backend = seeded_backend(&log, None).await;
    let queue = queue_over(backend, QueueConfig::default());
    let filter = TokenFilter::new(Filter::equals("user", "alice")).returning(["realm"]);

    let (tx, rx) = oneshot::channel::<custodian_cts::Result<Vec<PartialToken>>>();
    queue
        .submit(TaskFactory::new().partial_query(filter.clone(), tx))
        .await
        .unwrap();

    let partials = rx.await.unwrap().unwrap();
    assert_eq!(partials.len(), 2);
    for partial in &partials {
        assert_eq!(partial.attribute("realm"), Some("/"));
        assert_eq!(partial.attribute("user"), None);
    }
    assert_eq!(
        *log.lock().unwrap(),
        vec![
            format!("start partial_query {}", filter.identity()),
            format!("end partial_query {}", filter.identity()),
        ]
    );
}

// ==== Exactly-once Tests ====

#[tokio::test]
async fn failures_are_delivered_to_handler() {
    let queue = queue_over(ScriptedBackend::default(), QueueConfig::default());
    let (tx, rx) = oneshot::channel::<custodian_cts::Result<Token>>();

    queue
        .submit(TaskFactory::new().update(session("missing", "alice"), Options::default(), tx))
        .await
        .unwrap();

    match rx.await.unwrap() {
        Err(Error::TaskExecution { operation, key, source }) => {
            assert_eq!(operation, "update");
            assert_eq!(key, "token:missing");
            assert_eq!(source, BackendError::NotFound("missing".to_string()));
        }
        other => panic!("expected task execution error, got {other:?}"),
    }
}

#[tokio::test]
async fn panicking_backend_abandons_task_once_and_lane_continues() {
    let queue = queue_over(ScriptedBackend::default(), QueueConfig::default());
    let factory = TaskFactory::new();

    let calls = Arc::new(Mutex::new(Vec::new()));
    let seen = Arc::clone(&calls);
    let doomed = factory.create(
        session("boom", "alice"),
        Options::default(),
        handler_fn(move |result: custodian_cts::Result<Token>| {
            seen.lock().unwrap().push(result.map(|t| t.id().to_string()));
        }),
    );
    let (tx, rx) = oneshot::channel::<custodian_cts::Result<Option<Token>>>();
    let follow_up = factory.read("boom", Options::default(), tx);

    queue.submit(doomed).await.unwrap();
    queue.submit(follow_up).await.unwrap();

    // The read on the same key panics too, but only after the create finished
    assert!(matches!(
        rx.await.unwrap(),
        Err(Error::Abandoned { operation: "read" })
    ));

    let calls = calls.lock().unwrap();
    assert_eq!(calls.len(), 1);
    assert!(matches!(calls[0], Err(Error::Abandoned { operation: "create" })));
}

// ==== Backpressure Tests ====

#[tokio::test]
async fn try_submit_hands_task_back_when_saturated() {
    let gate = Arc::new(Semaphore::new(0));
    let backend = ScriptedBackend {
        gate: Some(Arc::clone(&gate)),
        ..Default::default()
    };
    let queue = queue_over(backend, QueueConfig::default().with_capacity(1));
    let factory = TaskFactory::new();

    let (first_tx, first_rx) = oneshot::channel::<custodian_cts::Result<Token>>();
    tokio_test::assert_ok!(queue.try_submit(factory.create(
        session("a", "alice"),
        Options::default(),
        first_tx
    )));

    let (second_tx, mut second_rx) = oneshot::channel::<custodian_cts::Result<Token>>();
    let rejected = queue
        .try_submit(factory.create(session("b", "bob"), Options::default(), second_tx))
        .unwrap_err();
    assert_eq!(rejected.reason, RejectReason::Saturated);
    assert_eq!(rejected.task.state(), TaskState::Created);
    assert!(second_rx.try_recv().is_err(), "rejected handler must not fire");

    // Resubmitting waits for the first task to release its slot
    let retry = tokio::spawn({
        let queue = queue.clone();
        async move { queue.submit(rejected.into_task()).await }
    });
    gate.add_permits(2);

    first_rx.await.unwrap().unwrap();
    retry.await.unwrap().unwrap();
    assert_eq!(second_rx.await.unwrap().unwrap().id(), "b");
}

// ==== Continuous Query Tests ====

#[tokio::test]
async fn continuous_query_streams_matching_changes_until_cancelled() {
    let queue = queue_over(ScriptedBackend::default(), QueueConfig::default());
    let factory = TaskFactory::new();
    let (events_tx, mut events) = mpsc::unbounded_channel();

    let query = queue
        .subscribe(factory.continuous_query(
            TokenFilter::new(Filter::equals("user", "alice")),
            Arc::new(ChannelListener { events: events_tx }),
        ))
        .await
        .unwrap();
    assert_eq!(query.state(), TaskState::Active);
    assert_eq!(queue.stats().active_subscriptions, 1);

    for (id, user) in [("a", "alice"), ("b", "bob"), ("c", "alice")] {
        let (tx, rx) = oneshot::channel::<custodian_cts::Result<Token>>();
        queue
            .submit(factory.create(session(id, user), Options::default(), tx))
            .await
            .unwrap();
        rx.await.unwrap().unwrap();
    }

    assert_eq!(next_event(&mut events).await, "Added a");
    assert_eq!(next_event(&mut events).await, "Added c");

    query.cancel().await;
    assert_eq!(next_event(&mut events).await, "cancelled");
    assert_eq!(queue.stats().active_subscriptions, 0);

    let (tx, rx) = oneshot::channel::<custodian_cts::Result<Token>>();
    queue
        .submit(factory.create(session("d", "alice"), Options::default(), tx))
        .await
        .unwrap();
    rx.await.unwrap().unwrap();
    assert!(events.try_recv().is_err(), "no callbacks after cancel");
}

#[tokio::test]
async fn failed_registration_reports_to_listener() {
    let backend = ScriptedBackend {
        fail_subscribe: true,
        ..Default::default()
    };
    let queue = queue_over(backend, QueueConfig::default());
    let (events_tx, mut events) = mpsc::unbounded_channel();

    let result = queue
        .subscribe(TaskFactory::new().continuous_query(
            TokenFilter::all(),
            Arc::new(ChannelListener { events: events_tx }),
        ))
        .await;

    assert!(matches!(result, Err(Error::Subscription(_))));
    assert!(next_event(&mut events).await.starts_with("error"));
    assert_eq!(queue.stats().active_subscriptions, 0);
}

// ==== Shutdown Tests ====

#[tokio::test]
async fn shutdown_drains_accepted_work_and_rejects_new_work() {
    let backend = ScriptedBackend {
        delay: Some(Duration::from_millis(10)),
        ..Default::default()
    };
    let queue = queue_over(backend, QueueConfig::default());
    let factory = TaskFactory::new();
    let (events_tx, mut events) = mpsc::unbounded_channel();

    let _query = queue
        .subscribe(factory.continuous_query(
            TokenFilter::all(),
            Arc::new(ChannelListener { events: events_tx }),
        ))
        .await
        .unwrap();

    let mut receivers = Vec::new();
    for id in ["a", "b", "c", "d"] {
        let (tx, rx) = oneshot::channel::<custodian_cts::Result<Token>>();
        queue
            .submit(factory.create(session(id, "alice"), Options::default(), tx))
            .await
            .unwrap();
        receivers.push(rx);
    }

    queue.shutdown().await;

    for rx in receivers {
        assert!(rx.await.unwrap().is_ok());
    }
    let stats = queue.stats();
    assert_eq!(stats.queued, 0);
    assert_eq!(stats.active_series, 0);
    assert_eq!(stats.active_subscriptions, 0);

    let mut seen = Vec::new();
    while let Ok(event) = events.try_recv() {
        seen.push(event);
    }
    assert_eq!(seen.last().map(String::as_str), Some("cancelled"));

    let (tx, _rx) = oneshot::channel::<custodian_cts::Result<Token>>();
    let rejected = queue
        .try_submit(factory.create(session("late", "alice"), Options::default(), tx))
        .unwrap_err();
    assert_eq!(rejected.reason, RejectReason::ShuttingDown);

    let late_query = queue
        .subscribe(factory.continuous_query(
            TokenFilter::all(),
            Arc::new(ChannelListener {
                events: mpsc::unbounded_channel().0,
            }),
        ))
        .await;
    assert!(matches!(late_query, Err(Error::Shutdown)));
}
