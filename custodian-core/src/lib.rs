//! custodian-core: Session lifecycle for custodian
//!
//! This crate tracks the authenticated sessions hosted by one server:
//!
//! - **Identity** - [`SessionId`] encodes the session kind, handle flag and
//!   owning server; [`InternalSession`] is the authoritative record
//! - **Registry** - [`SessionRegistry`] maps live ids (and their aliases) to
//!   records with atomic per-key insert and compare-and-remove
//! - **Dispatch** - [`SessionOperationDispatcher`] routes kind-specific
//!   operations to the matching [`SessionOperations`]
//! - **Removal** - [`SessionService`] destroys, logs out and expires
//!   sessions; [`NotificationDispatcher`] announces each removal exactly once
//! - **Timeouts** - [`TimeoutHandlerCoordinator`] runs configured
//!   [`SessionTimeoutHandler`]s under a fixed deadline
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use custodian_core::{
//!     SessionOperationDispatcher, SessionOperations, SessionService, SessionServiceConfig,
//! };
//!
//! fn start(
//!     stateful: Arc<dyn SessionOperations>,
//!     stateless: Arc<dyn SessionOperations>,
//! ) -> Result<(), Box<dyn std::error::Error>> {
//!     let service = SessionService::builder(SessionServiceConfig::default())
//!         .build(|_| SessionOperationDispatcher::new(stateful, stateless))?;
//!
//!     let session = service.new_internal_session("example.com", false);
//!     service.register_session(Arc::clone(&session))?;
//!     assert!(service.get_internal_session(Some(session.id())).is_some());
//!
//!     service.destroy_internal_session(&session);
//!     assert!(service.get_internal_session(Some(session.id())).is_none());
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod controller;
pub mod credential;
pub mod dispatcher;
pub mod error;
pub mod identity;
pub mod monitoring;
pub mod notification;
pub mod pending;
pub mod registry;
pub mod session;
pub mod sweeper;
pub mod timeout;

#[cfg(test)]
mod testing;

pub use config::{ConfigLoader, SessionServiceConfig};
pub use controller::{SessionService, SessionServiceBuilder};
pub use credential::{CredentialProvider, ScopedCredentialProvider, SsoToken};
pub use dispatcher::{SessionOperationDispatcher, SessionOperations};
pub use error::{ConfigError, Result, SessionError, TimeoutHandlerError};
pub use identity::{CaseInsensitiveIdentityStore, IdentityStore};
pub use monitoring::{ActiveSessionCounter, MonitoringOperations};
pub use notification::{
    AuditEventName, InternalSessionEvent, InternalSessionListener, NotificationDispatcher,
    QueuedNotificationSender, SessionAuditor, SessionEventBroker, SessionLogging,
    SessionNotification, SessionNotificationSender, TracingSessionAuditor, TracingSessionLogger,
};
pub use pending::{AuthenticationSessionStore, InMemoryAuthenticationSessionStore};
pub use registry::SessionRegistry;
pub use session::{
    InternalSession, InternalSessionFactory, PartialSession, SearchResults, SearchStatus, Session,
    SessionEventType, SessionId, SessionInfo, SessionKind, SessionQuery, SessionState,
    TokenRestriction,
};
pub use sweeper::spawn_expiry_sweeper;
pub use timeout::{
    BoxError, SessionTimeoutHandler, TIMEOUT_HANDLER_DEADLINE, TIMEOUT_HANDLER_GRACE,
    TimeoutHandlerCoordinator, TimeoutHandlerRegistry, TimeoutSweepReport,
};
