//! custodian-cts: Core token store for custodian
//!
//! This crate turns token persistence into asynchronous, ordered work:
//!
//! - **Tasks** - [`TaskFactory`] packages create/read/update/delete/query
//!   operations together with the [`ResultHandler`] that receives the outcome
//! - **Queue** - [`TokenTaskQueue`] runs tasks with the same [`SeriesKey`]
//!   strictly in order while unrelated keys proceed concurrently
//! - **Continuous queries** - [`TokenTaskQueue::subscribe`] streams matching
//!   changes to a [`ContinuousQueryListener`] until cancelled
//! - **Backends** - the [`TokenBackend`] trait, with [`InMemoryTokenStore`]
//!   for tests and development
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use custodian_cts::{
//!     InMemoryTokenStore, Options, QueueConfig, TaskFactory, Token, TokenTaskQueue, TokenType,
//! };
//! use tokio::sync::oneshot;
//!
//! async fn example() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = QueueConfig::default();
//!     let queue = TokenTaskQueue::new(Arc::new(InMemoryTokenStore::from_config(&config)), config);
//!
//!     let (tx, rx) = oneshot::channel::<custodian_cts::Result<Token>>();
//!     let task = TaskFactory::new().create(
//!         Token::new("token-1", TokenType::Session),
//!         Options::default(),
//!         tx,
//!     );
//!     queue.submit(task).await?;
//!
//!     let stored = rx.await??;
//!     println!("stored {}", stored.id());
//!     Ok(())
//! }
//! ```

pub mod backend;
pub mod config;
pub mod error;
pub mod factory;
pub mod filter;
pub mod memory;
pub mod options;
pub mod queue;
pub mod task;
pub mod token;

pub use backend::TokenBackend;
pub use config::QueueConfig;
pub use error::{BackendError, Error, RejectReason, Rejected, Result};
pub use factory::TaskFactory;
pub use filter::{Filter, TokenFilter};
pub use memory::InMemoryTokenStore;
pub use options::Options;
pub use queue::{ContinuousQuery, QueueStats, TokenTaskQueue};
pub use task::{
    ContinuousQueryListener, ContinuousQueryTask, FnHandler, ResultHandler, SeriesKey, Task,
    TaskKind, TaskState, handler_fn,
};
pub use token::{ChangeType, PartialToken, Token, TokenChange, TokenType};
