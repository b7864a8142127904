//! Construction of task values.

use std::sync::Arc;

use crate::filter::TokenFilter;
use crate::options::Options;
use crate::task::{ContinuousQueryListener, ContinuousQueryTask, ResultHandler, Task};
use crate::token::{PartialToken, Token};

/// Builds tasks for submission to the [`crate::TokenTaskQueue`]
///
/// Stateless and free of I/O: constructors only package their inputs.
#[derive(Debug, Clone, Copy, Default)]
pub struct TaskFactory;

impl TaskFactory {
    pub fn new() -> Self {
        Self
    }

    /// Signal the creation of the given token
    pub fn create(
        &self,
        token: Token,
        options: Options,
        handler: impl ResultHandler<Token>,
    ) -> Task {
        Task::create(token, options, Box::new(handler))
    }

    /// Signal a read of the token ID; the handler receives `None` when absent
    pub fn read(
        &self,
        token_id: impl Into<String>,
        options: Options,
        handler: impl ResultHandler<Option<Token>>,
    ) -> Task {
        Task::read(token_id.into(), options, Box::new(handler))
    }

    /// Signal an update of the given token
    pub fn update(
        &self,
        token: Token,
        options: Options,
        handler: impl ResultHandler<Token>,
    ) -> Task {
        Task::update(token, options, Box::new(handler))
    }

    /// Signal a delete of the token ID
    pub fn delete(
        &self,
        token_id: impl Into<String>,
        options: Options,
        handler: impl ResultHandler<PartialToken>,
    ) -> Task {
        Task::delete(token_id.into(), options, Box::new(handler))
    }

    /// Signal a query against the persistence store
    pub fn query(&self, filter: TokenFilter, handler: impl ResultHandler<Vec<Token>>) -> Task {
        Task::query(filter, Box::new(handler))
    }

    /// Signal an attribute projection query against the persistence store
    pub fn partial_query(
        &self,
        filter: TokenFilter,
        handler: impl ResultHandler<Vec<PartialToken>>,
    ) -> Task {
        Task::partial_query(filter, Box::new(handler))
    }

    /// Signal a continuous query whose changes stream to `listener`
    pub fn continuous_query(
        &self,
        filter: TokenFilter,
        listener: Arc<dyn ContinuousQueryListener>,
    ) -> ContinuousQueryTask {
        ContinuousQueryTask::new(filter, listener)
    }
}
