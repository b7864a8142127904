//! Timeout handler fan-out.
//!
//! When a session times out, every configured [`SessionTimeoutHandler`] runs
//! as its own unit of work. The caller waits at most
//! [`TIMEOUT_HANDLER_DEADLINE`] for all units; stragglers are then signalled
//! to stop through the [`CancellationToken`] each handler receives and left
//! to wind down on their own. A handler that ignores the signal is aborted
//! once [`TIMEOUT_HANDLER_GRACE`] has passed. A unit's failure is logged
//! where it happens and never reaches the caller or its siblings.
//!
//! ```text
//!         ┌─► unit(h1) ─► spawn(h1.on_idle_timeout) ─┐
//! sweep ──┼─► unit(h2) ─► spawn(h2.on_idle_timeout) ─┼─► join until deadline ─► cancel rest
//!         └─► unit(h3) ─► spawn(h3.on_idle_timeout) ─┘
//! ```

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::Serialize;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::credential::{CredentialProvider, SsoToken};
use crate::error::TimeoutHandlerError;
use crate::session::{SessionEventType, SessionId};

/// Longest a timeout sweep waits for its handlers
pub const TIMEOUT_HANDLER_DEADLINE: Duration = Duration::from_millis(1000);

/// How long a cancelled handler may keep running before it is aborted
pub const TIMEOUT_HANDLER_GRACE: Duration = Duration::from_millis(100);

/// Error type returned by handler implementations
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Extension invoked when a session reaches a lifetime limit
///
/// `cancel` fires when the sweep's deadline passes. Long-running handlers
/// should watch it and return promptly; ones that do not are aborted after
/// [`TIMEOUT_HANDLER_GRACE`].
#[async_trait]
pub trait SessionTimeoutHandler: Send + Sync {
    async fn on_idle_timeout(
        &self,
        token: &SsoToken,
        cancel: &CancellationToken,
    ) -> Result<(), BoxError>;

    async fn on_max_timeout(
        &self,
        token: &SsoToken,
        cancel: &CancellationToken,
    ) -> Result<(), BoxError>;
}

type HandlerConstructor =
    Arc<dyn Fn() -> Result<Arc<dyn SessionTimeoutHandler>, BoxError> + Send + Sync>;

/// Startup-time table from configured handler names to constructors
#[derive(Default, Clone)]
pub struct TimeoutHandlerRegistry {
    constructors: HashMap<String, HandlerConstructor>,
}

impl TimeoutHandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a constructor run once per timeout under `name`
    #[must_use]
    pub fn with_constructor<F>(mut self, name: impl Into<String>, constructor: F) -> Self
    where
        F: Fn() -> Result<Arc<dyn SessionTimeoutHandler>, BoxError> + Send + Sync + 'static,
    {
        self.constructors.insert(name.into(), Arc::new(constructor));
        self
    }

    /// Register a shared handler instance under `name`
    #[must_use]
    pub fn with_handler(
        self,
        name: impl Into<String>,
        handler: Arc<dyn SessionTimeoutHandler>,
    ) -> Self {
        self.with_constructor(name, move || Ok(Arc::clone(&handler)))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.constructors.contains_key(name)
    }

    fn constructor(&self, name: &str) -> Option<HandlerConstructor> {
        self.constructors.get(name).cloned()
    }
}

impl std::fmt::Debug for TimeoutHandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<_> = self.constructors.keys().collect();
        names.sort();
        f.debug_struct("TimeoutHandlerRegistry")
            .field("handlers", &names)
            .finish()
    }
}

/// Outcome counts of one timeout sweep
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TimeoutSweepReport {
    /// Handlers that finished successfully before the deadline.
    pub completed: usize,
    /// Handlers that failed, panicked or could not be constructed.
    pub failed: usize,
    /// Handlers still running at the deadline.
    pub cancelled: usize,
    /// No handler ran because the credential could not be issued.
    pub credential_error: bool,
}

#[derive(Debug, Clone, Copy)]
enum TimeoutKind {
    Idle,
    Max,
}

impl TimeoutKind {
    fn from_event(event: SessionEventType) -> Option<Self> {
        match event {
            SessionEventType::IdleTimeout => Some(TimeoutKind::Idle),
            SessionEventType::MaxTimeout => Some(TimeoutKind::Max),
            _ => None,
        }
    }
}

/// Runs the configured timeout handlers with a bounded deadline
pub struct TimeoutHandlerCoordinator {
    registry: TimeoutHandlerRegistry,
    handlers: RwLock<Arc<BTreeSet<String>>>,
    credentials: Arc<dyn CredentialProvider>,
    deadline: Duration,
}

impl TimeoutHandlerCoordinator {
    pub fn new(
        registry: TimeoutHandlerRegistry,
        handlers: BTreeSet<String>,
        credentials: Arc<dyn CredentialProvider>,
    ) -> Self {
        for name in handlers.iter().filter(|name| !registry.contains(name)) {
            warn!(handler = %name, "Configured timeout handler is not registered");
        }
        Self {
            registry,
            handlers: RwLock::new(Arc::new(handlers)),
            credentials,
            deadline: TIMEOUT_HANDLER_DEADLINE,
        }
    }

    /// The configured handler names as of now
    pub fn handlers(&self) -> Arc<BTreeSet<String>> {
        Arc::clone(&self.handlers.read())
    }

    /// Replace the configured handler names; sweeps in flight keep their snapshot
    pub fn set_handlers(&self, handlers: BTreeSet<String>) {
        *self.handlers.write() = Arc::new(handlers);
    }

    /// Run every configured handler for a timed-out session.
    ///
    /// Returns no later than the deadline, whatever the handlers do.
    pub async fn exec_session_timeout_handlers(
        &self,
        session_id: &SessionId,
        event: SessionEventType,
    ) -> TimeoutSweepReport {
        let handlers = self.handlers();
        let mut report = TimeoutSweepReport::default();
        if handlers.is_empty() {
            return report;
        }
        let Some(kind) = TimeoutKind::from_event(event) else {
            debug!(
                session_id = %session_id,
                event = %event,
                "Not a timeout event, skipping handlers"
            );
            return report;
        };

        let token = match self.credentials.create_token(session_id).await {
            Ok(token) => token,
            Err(e) => {
                warn!(
                    session_id = %session_id,
                    error = %e,
                    "Unable to construct credential for executing timeout handlers"
                );
                report.credential_error = true;
                return report;
            }
        };

        let deadline = Instant::now() + self.deadline;
        let cancel = CancellationToken::new();
        let mut units = JoinSet::new();
        for name in handlers.iter() {
            units.spawn(run_unit(
                name.clone(),
                self.registry.constructor(name),
                token.clone(),
                kind,
                cancel.child_token(),
            ));
        }

        loop {
            match tokio::time::timeout_at(deadline, units.join_next()).await {
                Ok(Some(Ok(Ok(())))) => report.completed += 1,
                Ok(Some(Ok(Err(TimeoutHandlerError::Interrupted(_))))) => report.cancelled += 1,
                Ok(Some(Ok(Err(_)))) => report.failed += 1,
                Ok(Some(Err(e))) => {
                    error!(session_id = %session_id, error = %e, "Timeout handler unit aborted");
                    report.failed += 1;
                }
                Ok(None) => break,
                Err(_) => {
                    report.cancelled += units.len();
                    debug!(
                        session_id = %session_id,
                        outstanding = units.len(),
                        "Timeout handler deadline reached, cancelling"
                    );
                    cancel.cancel();
                    units.detach_all();
                    break;
                }
            }
        }
        report
    }
}

impl std::fmt::Debug for TimeoutHandlerCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TimeoutHandlerCoordinator")
            .field("registry", &self.registry)
            .field("handlers", &self.handlers())
            .field("deadline", &self.deadline)
            .finish_non_exhaustive()
    }
}

/// One handler's unit of work; logs its own outcome
async fn run_unit(
    name: String,
    constructor: Option<HandlerConstructor>,
    token: SsoToken,
    kind: TimeoutKind,
    cancel: CancellationToken,
) -> Result<(), TimeoutHandlerError> {
    let result = match constructor {
        None => Err(TimeoutHandlerError::UnknownHandler(name.clone())),
        Some(constructor) => {
            let handler_name = name.clone();
            let signal = cancel.clone();
            let mut invocation = tokio::spawn(async move {
                let handler = constructor().map_err(|e| TimeoutHandlerError::Construction {
                    name: handler_name.clone(),
                    message: e.to_string(),
                })?;
                let outcome = match kind {
                    TimeoutKind::Idle => handler.on_idle_timeout(&token, &signal).await,
                    TimeoutKind::Max => handler.on_max_timeout(&token, &signal).await,
                };
                outcome.map_err(|e| TimeoutHandlerError::Failed {
                    name: handler_name,
                    message: e.to_string(),
                })
            });

            tokio::select! {
                joined = &mut invocation => match joined {
                    Ok(result) => result,
                    Err(e) if e.is_panic() => Err(TimeoutHandlerError::Panicked(name.clone())),
                    Err(_) => Err(TimeoutHandlerError::Interrupted(name.clone())),
                },
                _ = cancel.cancelled() => {
                    if tokio::time::timeout(TIMEOUT_HANDLER_GRACE, &mut invocation)
                        .await
                        .is_err()
                    {
                        debug!(handler = %name, "Timeout handler ignored cancellation, aborting");
                        invocation.abort();
                    }
                    Err(TimeoutHandlerError::Interrupted(name.clone()))
                }
            }
        }
    };

    match &result {
        Ok(()) => debug!(handler = %name, "Timeout handler completed"),
        Err(TimeoutHandlerError::Interrupted(_)) => {
            warn!(handler = %name, "Timeout handler was interrupted")
        }
        Err(e) => error!(
            handler = %name,
            error = %e,
            "Error while executing session timeout handler"
        ),
    }
    result
}
