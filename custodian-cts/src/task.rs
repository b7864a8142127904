//! Tasks: immutable descriptions of one persistence operation.
//!
//! Every task except a continuous query carries exactly one
//! [`ResultHandler`], and the handler is consumed by the first outcome it
//! receives. A `Completion` guard owns the handler while the task runs; if
//! the execution is dropped before reporting (for instance because the
//! backend panicked), the guard reports [`Error::Abandoned`] instead, so the
//! handler still fires exactly once.

use std::fmt;
use std::sync::Arc;

use tokio::sync::oneshot;
use tracing::trace;

use crate::backend::TokenBackend;
use crate::error::{BackendError, Error, Result};
use crate::filter::TokenFilter;
use crate::options::Options;
use crate::token::{PartialToken, Token, TokenChange};

/// Operation a task performs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskKind {
    Create,
    Read,
    Update,
    Delete,
    Query,
    PartialQuery,
    ContinuousQuery,
}

impl TaskKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskKind::Create => "create",
            TaskKind::Read => "read",
            TaskKind::Update => "update",
            TaskKind::Delete => "delete",
            TaskKind::Query => "query",
            TaskKind::PartialQuery => "partial_query",
            TaskKind::ContinuousQuery => "continuous_query",
        }
    }
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle of a task inside the queue
///
/// Ordinary tasks move `Created -> Queued -> Running -> {Completed, Failed}`.
/// Continuous queries move `Created -> Queued -> Active -> Cancelled`.
/// A task value the caller still holds is always `Created`; the queue
/// traces every later transition under the task's series key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Created,
    Queued,
    Running,
    Completed,
    Failed,
    Active,
    Cancelled,
}

impl TaskState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskState::Completed | TaskState::Failed | TaskState::Cancelled
        )
    }
}

/// Ordering lane a task belongs to
///
/// Tasks with equal keys run strictly in submission order.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SeriesKey {
    /// Create, read, update and delete are ordered per token ID
    Token(String),
    /// Queries are ordered per filter identity
    Filter(String),
}

impl fmt::Display for SeriesKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SeriesKey::Token(id) => write!(f, "token:{id}"),
            SeriesKey::Filter(identity) => write!(f, "filter:{identity}"),
        }
    }
}

/// Callback receiving the outcome of a task
///
/// Both methods consume the handler, so it can be notified at most once.
pub trait ResultHandler<T>: Send + 'static {
    fn on_success(self: Box<Self>, result: T);
    fn on_error(self: Box<Self>, error: Error);
}

impl<T: Send + 'static> ResultHandler<T> for oneshot::Sender<Result<T>> {
    fn on_success(self: Box<Self>, result: T) {
        // The submitter may have stopped waiting; that's not our concern
        let _ = self.send(Ok(result));
    }

    fn on_error(self: Box<Self>, error: Error) {
        let _ = self.send(Err(error));
    }
}

/// Adapter turning a closure over `Result<T>` into a [`ResultHandler`]
pub struct FnHandler<F>(F);

/// Wrap a closure as a result handler
pub fn handler_fn<T, F>(f: F) -> FnHandler<F>
where
    F: FnOnce(Result<T>) + Send + 'static,
{
    FnHandler(f)
}

impl<T, F> ResultHandler<T> for FnHandler<F>
where
    F: FnOnce(Result<T>) + Send + 'static,
{
    fn on_success(self: Box<Self>, result: T) {
        (self.0)(Ok(result))
    }

    fn on_error(self: Box<Self>, error: Error) {
        (self.0)(Err(error))
    }
}

/// Owns a handler until an outcome is delivered
struct Completion<T: 'static> {
    operation: &'static str,
    handler: Option<Box<dyn ResultHandler<T>>>,
}

impl<T: 'static> Completion<T> {
    fn new(operation: TaskKind, handler: Box<dyn ResultHandler<T>>) -> Self {
        Self {
            operation: operation.as_str(),
            handler: Some(handler),
        }
    }

    fn succeed(mut self, value: T) {
        if let Some(handler) = self.handler.take() {
            handler.on_success(value);
        }
    }

    fn fail(mut self, error: Error) {
        if let Some(handler) = self.handler.take() {
            handler.on_error(error);
        }
    }

    fn finish(self, key: &SeriesKey, outcome: std::result::Result<T, BackendError>) -> TaskState {
        match outcome {
            Ok(value) => {
                self.succeed(value);
                TaskState::Completed
            }
            Err(source) => {
                let operation = self.operation;
                self.fail(Error::TaskExecution {
                    operation,
                    key: key.to_string(),
                    source,
                });
                TaskState::Failed
            }
        }
    }
}

impl<T: 'static> Drop for Completion<T> {
    fn drop(&mut self) {
        if let Some(handler) = self.handler.take() {
            handler.on_error(Error::Abandoned {
                operation: self.operation,
            });
        }
    }
}

enum Operation {
    Create {
        token: Token,
        options: Options,
        handler: Box<dyn ResultHandler<Token>>,
    },
    Read {
        token_id: String,
        options: Options,
        handler: Box<dyn ResultHandler<Option<Token>>>,
    },
    Update {
        token: Token,
        options: Options,
        handler: Box<dyn ResultHandler<Token>>,
    },
    Delete {
        token_id: String,
        options: Options,
        handler: Box<dyn ResultHandler<PartialToken>>,
    },
    Query {
        filter: TokenFilter,
        handler: Box<dyn ResultHandler<Vec<Token>>>,
    },
    PartialQuery {
        filter: TokenFilter,
        handler: Box<dyn ResultHandler<Vec<PartialToken>>>,
    },
}

/// One persistence operation ready for submission
///
/// Built by [`crate::TaskFactory`], consumed exactly once by the queue.
pub struct Task {
    operation: Operation,
}

impl Task {
    pub(crate) fn create(
        token: Token,
        options: Options,
        handler: Box<dyn ResultHandler<Token>>,
    ) -> Self {
        Self {
            operation: Operation::Create {
                token,
                options,
                handler,
            },
        }
    }

    pub(crate) fn read(
        token_id: String,
        options: Options,
        handler: Box<dyn ResultHandler<Option<Token>>>,
    ) -> Self {
        Self {
            operation: Operation::Read {
                token_id,
                options,
                handler,
            },
        }
    }

    pub(crate) fn update(
        token: Token,
        options: Options,
        handler: Box<dyn ResultHandler<Token>>,
    ) -> Self {
        Self {
            operation: Operation::Update {
                token,
                options,
                handler,
            },
        }
    }

    pub(crate) fn delete(
        token_id: String,
        options: Options,
        handler: Box<dyn ResultHandler<PartialToken>>,
    ) -> Self {
        Self {
            operation: Operation::Delete {
                token_id,
                options,
                handler,
            },
        }
    }

    pub(crate) fn query(filter: TokenFilter, handler: Box<dyn ResultHandler<Vec<Token>>>) -> Self {
        Self {
            operation: Operation::Query { filter, handler },
        }
    }

    pub(crate) fn partial_query(
        filter: TokenFilter,
        handler: Box<dyn ResultHandler<Vec<PartialToken>>>,
    ) -> Self {
        Self {
            operation: Operation::PartialQuery { filter, handler },
        }
    }

    pub fn kind(&self) -> TaskKind {
        match &self.operation {
            Operation::Create { .. } => TaskKind::Create,
            Operation::Read { .. } => TaskKind::Read,
            Operation::Update { .. } => TaskKind::Update,
            Operation::Delete { .. } => TaskKind::Delete,
            Operation::Query { .. } => TaskKind::Query,
            Operation::PartialQuery { .. } => TaskKind::PartialQuery,
        }
    }

    /// Not yet accepted by a queue; submission consumes the task
    pub fn state(&self) -> TaskState {
        TaskState::Created
    }

    /// The series this task is ordered within
    pub fn series_key(&self) -> SeriesKey {
        match &self.operation {
            Operation::Create { token, .. } | Operation::Update { token, .. } => {
                SeriesKey::Token(token.id().to_string())
            }
            Operation::Read { token_id, .. } | Operation::Delete { token_id, .. } => {
                SeriesKey::Token(token_id.clone())
            }
            Operation::Query { filter, .. } | Operation::PartialQuery { filter, .. } => {
                SeriesKey::Filter(filter.identity())
            }
        }
    }

    /// Notify the handler of `error` without touching the backend
    pub(crate) fn fail(self, error: Error) {
        let kind = self.kind();
        match self.operation {
            Operation::Create { handler, .. } | Operation::Update { handler, .. } => {
                Completion::new(kind, handler).fail(error)
            }
            Operation::Read { handler, .. } => Completion::new(kind, handler).fail(error),
            Operation::Delete { handler, .. } => Completion::new(kind, handler).fail(error),
            Operation::Query { handler, .. } => Completion::new(kind, handler).fail(error),
            Operation::PartialQuery { handler, .. } => Completion::new(kind, handler).fail(error),
        }
    }

    /// Run the task against the backend and notify its handler.
    ///
    /// Returns the terminal state reached.
    pub(crate) async fn execute(self, backend: Arc<dyn TokenBackend>) -> TaskState {
        let kind = self.kind();
        let key = self.series_key();
        trace!(task = %kind, key = %key, "Task running");

        match self.operation {
            Operation::Create {
                token,
                options,
                handler,
            } => {
                let completion = Completion::new(kind, handler);
                completion.finish(&key, backend.create(token, &options).await)
            }
            Operation::Read {
                token_id,
                options,
                handler,
            } => {
                let completion = Completion::new(kind, handler);
                completion.finish(&key, backend.read(&token_id, &options).await)
            }
            Operation::Update {
                token,
                options,
                handler,
            } => {
                let completion = Completion::new(kind, handler);
                completion.finish(&key, backend.update(token, &options).await)
            }
            Operation::Delete {
                token_id,
                options,
                handler,
            } => {
                let completion = Completion::new(kind, handler);
                completion.finish(&key, backend.delete(&token_id, &options).await)
            }
            Operation::Query { filter, handler } => {
                let completion = Completion::new(kind, handler);
                completion.finish(&key, backend.query(&filter).await)
            }
            Operation::PartialQuery { filter, handler } => {
                let completion = Completion::new(kind, handler);
                completion.finish(&key, backend.partial_query(&filter).await)
            }
        }
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("kind", &self.kind())
            .field("series", &self.series_key())
            .finish_non_exhaustive()
    }
}

/// Receives the change stream of a continuous query
///
/// Called from the queue's runtime; implementations must not block.
pub trait ContinuousQueryListener: Send + Sync + 'static {
    /// A token matching the filter changed
    fn object_changed(&self, change: &TokenChange);

    /// The subscription hit an error (registration failure or missed changes)
    fn process_error(&self, error: &Error) {
        let _ = error;
    }

    /// The backend closed the change feed
    fn connection_lost(&self) {}

    /// The subscription was cancelled; no further callbacks follow
    fn on_cancelled(&self) {}
}

/// A long-lived subscription request
pub struct ContinuousQueryTask {
    filter: TokenFilter,
    listener: Arc<dyn ContinuousQueryListener>,
}

impl ContinuousQueryTask {
    pub(crate) fn new(filter: TokenFilter, listener: Arc<dyn ContinuousQueryListener>) -> Self {
        Self { filter, listener }
    }

    pub fn kind(&self) -> TaskKind {
        TaskKind::ContinuousQuery
    }

    pub fn filter(&self) -> &TokenFilter {
        &self.filter
    }

    pub fn state(&self) -> TaskState {
        TaskState::Created
    }

    pub fn series_key(&self) -> SeriesKey {
        SeriesKey::Filter(self.filter.identity())
    }

    pub(crate) fn into_parts(self) -> (TokenFilter, Arc<dyn ContinuousQueryListener>) {
        (self.filter, self.listener)
    }
}

impl fmt::Debug for ContinuousQueryTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContinuousQueryTask")
            .field("filter", &self.filter.identity())
            .finish_non_exhaustive()
    }
}
