//! The session service: lifecycle of internal sessions on this server.
//!
//! [`SessionService`] owns the registry and the collaborators that react to
//! a session ending. Operations that depend on the session kind are routed
//! through the [`SessionOperationDispatcher`]; the service itself only
//! validates arguments and performs the shared removal path.
//!
//! Capability implementations usually need to call back into the service
//! (to look up or remove records), so the dispatcher is built with a
//! [`Weak`] reference to the service it belongs to:
//!
//! ```ignore
//! let service = SessionService::builder(config)
//!     .with_timeout_handlers(handlers)
//!     .build(|service| {
//!         SessionOperationDispatcher::new(
//!             Arc::new(LocalOperations::new(service.clone())),
//!             Arc::new(StatelessOperations::new(service)),
//!         )
//!     })?;
//! ```

use std::collections::BTreeSet;
use std::sync::{Arc, Weak};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::config::SessionServiceConfig;
use crate::credential::{CredentialProvider, ScopedCredentialProvider, SsoToken};
use crate::dispatcher::SessionOperationDispatcher;
use crate::error::{ConfigError, Result, SessionError};
use crate::identity::{CaseInsensitiveIdentityStore, IdentityStore};
use crate::monitoring::{ActiveSessionCounter, MonitoringOperations};
use crate::notification::{
    AuditEventName, InternalSessionEvent, InternalSessionListener, NotificationDispatcher,
    QueuedNotificationSender, SessionAuditor, SessionEventBroker, SessionLogging,
    SessionNotification, SessionNotificationSender, TracingSessionAuditor, TracingSessionLogger,
};
use crate::pending::{AuthenticationSessionStore, InMemoryAuthenticationSessionStore};
use crate::registry::SessionRegistry;
use crate::session::{
    InternalSession, InternalSessionFactory, PartialSession, SearchResults, Session,
    SessionEventType, SessionId, SessionInfo, SessionQuery, TokenRestriction,
};
use crate::timeout::{TimeoutHandlerCoordinator, TimeoutHandlerRegistry, TimeoutSweepReport};

/// Collects collaborators for a [`SessionService`]
///
/// Every collaborator has an in-process default.
pub struct SessionServiceBuilder {
    config: SessionServiceConfig,
    timeout_handlers: TimeoutHandlerRegistry,
    credentials: Option<Arc<dyn CredentialProvider>>,
    logging: Option<Arc<dyn SessionLogging>>,
    auditor: Option<Arc<dyn SessionAuditor>>,
    sender: Option<Arc<dyn SessionNotificationSender>>,
    monitoring: Option<Arc<dyn MonitoringOperations>>,
    identity: Option<Arc<dyn IdentityStore>>,
    pending: Option<Arc<dyn AuthenticationSessionStore>>,
}

impl SessionServiceBuilder {
    pub fn new(config: SessionServiceConfig) -> Self {
        Self {
            config,
            timeout_handlers: TimeoutHandlerRegistry::new(),
            credentials: None,
            logging: None,
            auditor: None,
            sender: None,
            monitoring: None,
            identity: None,
            pending: None,
        }
    }

    /// Constructors for the handler names listed in the configuration
    #[must_use]
    pub fn with_timeout_handlers(mut self, registry: TimeoutHandlerRegistry) -> Self {
        self.timeout_handlers = registry;
        self
    }

    #[must_use]
    pub fn with_credential_provider(mut self, credentials: Arc<dyn CredentialProvider>) -> Self {
        self.credentials = Some(credentials);
        self
    }

    #[must_use]
    pub fn with_logging(mut self, logging: Arc<dyn SessionLogging>) -> Self {
        self.logging = Some(logging);
        self
    }

    #[must_use]
    pub fn with_auditor(mut self, auditor: Arc<dyn SessionAuditor>) -> Self {
        self.auditor = Some(auditor);
        self
    }

    /// Replaces the default queued sender; `take_notifications` then yields `None`
    #[must_use]
    pub fn with_notification_sender(mut self, sender: Arc<dyn SessionNotificationSender>) -> Self {
        self.sender = Some(sender);
        self
    }

    #[must_use]
    pub fn with_monitoring(mut self, monitoring: Arc<dyn MonitoringOperations>) -> Self {
        self.monitoring = Some(monitoring);
        self
    }

    #[must_use]
    pub fn with_identity_store(mut self, identity: Arc<dyn IdentityStore>) -> Self {
        self.identity = Some(identity);
        self
    }

    #[must_use]
    pub fn with_authentication_store(
        mut self,
        pending: Arc<dyn AuthenticationSessionStore>,
    ) -> Self {
        self.pending = Some(pending);
        self
    }

    /// Validate the configuration and assemble the service.
    ///
    /// `operations` receives a weak reference to the service under
    /// construction and returns the per-kind capabilities.
    pub fn build<F>(self, operations: F) -> std::result::Result<Arc<SessionService>, ConfigError>
    where
        F: FnOnce(Weak<SessionService>) -> SessionOperationDispatcher,
    {
        self.config.validate()?;
        let config = self.config;

        let (sender, notifications) = match self.sender {
            Some(sender) => (sender, None),
            None => {
                let (sender, rx) =
                    QueuedNotificationSender::new(config.notification_queue_capacity);
                (Arc::new(sender) as Arc<dyn SessionNotificationSender>, Some(rx))
            }
        };
        let broker = Arc::new(SessionEventBroker::new(config.event_channel_capacity));
        let notifier = NotificationDispatcher::new(
            broker,
            self.logging.unwrap_or_else(|| Arc::new(TracingSessionLogger)),
            sender,
        );
        let timeouts = TimeoutHandlerCoordinator::new(
            self.timeout_handlers,
            config.timeout_handlers.clone(),
            self.credentials
                .unwrap_or_else(|| Arc::new(ScopedCredentialProvider::default())),
        );
        let factory =
            InternalSessionFactory::new(&config.server_id, config.max_idle(), config.max_session());
        let auditor = self
            .auditor
            .unwrap_or_else(|| Arc::new(TracingSessionAuditor));
        let monitoring = self
            .monitoring
            .unwrap_or_else(|| Arc::new(ActiveSessionCounter::new()));
        let identity = self
            .identity
            .unwrap_or_else(|| Arc::new(CaseInsensitiveIdentityStore));
        let pending = self
            .pending
            .unwrap_or_else(|| Arc::new(InMemoryAuthenticationSessionStore::new()));

        let service = Arc::new_cyclic(|weak| SessionService {
            operations: operations(weak.clone()),
            factory,
            registry: SessionRegistry::new(),
            notifier,
            auditor,
            timeouts,
            monitoring,
            identity,
            pending,
            notifications: Mutex::new(notifications),
            config,
        });
        info!(
            server_id = %service.config.server_id,
            max_sessions = service.config.max_sessions,
            timeout_handlers = service.config.timeout_handlers.len(),
            "Session service started"
        );
        Ok(service)
    }
}

/// Lifecycle of the internal sessions hosted by this server
pub struct SessionService {
    config: SessionServiceConfig,
    factory: InternalSessionFactory,
    registry: SessionRegistry,
    operations: SessionOperationDispatcher,
    notifier: NotificationDispatcher,
    auditor: Arc<dyn SessionAuditor>,
    timeouts: TimeoutHandlerCoordinator,
    monitoring: Arc<dyn MonitoringOperations>,
    identity: Arc<dyn IdentityStore>,
    pending: Arc<dyn AuthenticationSessionStore>,
    notifications: Mutex<Option<mpsc::Receiver<SessionNotification>>>,
}

impl SessionService {
    pub fn builder(config: SessionServiceConfig) -> SessionServiceBuilder {
        SessionServiceBuilder::new(config)
    }

    pub fn config(&self) -> &SessionServiceConfig {
        &self.config
    }

    pub fn server_id(&self) -> &str {
        &self.config.server_id
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    pub fn operations(&self) -> &SessionOperationDispatcher {
        &self.operations
    }

    pub fn broker(&self) -> &Arc<SessionEventBroker> {
        self.notifier.broker()
    }

    /// Receive every session event published after this call
    pub fn subscribe_events(&self) -> broadcast::Receiver<InternalSessionEvent> {
        self.broker().subscribe()
    }

    pub fn add_internal_listener(&self, listener: Arc<dyn InternalSessionListener>) {
        self.broker().add_listener(listener);
    }

    /// The receiving end of the default notification queue, once
    pub fn take_notifications(&self) -> Option<mpsc::Receiver<SessionNotification>> {
        self.notifications.lock().take()
    }

    // ==================== Creation ====================

    /// A fresh VALID session; the caller registers it once authenticated
    pub fn new_internal_session(&self, domain: &str, stateless: bool) -> Arc<InternalSession> {
        let session = Arc::new(self.factory.new_internal_session(domain, stateless));
        debug!(session_id = %session.id(), domain = %domain, stateless, "Internal session created");
        session
    }

    /// Make `session` live and count it against the session ceiling.
    ///
    /// Fails without counting anything when `session` is already registered,
    /// destroyed, invalid, or on its way out.
    pub fn register_session(&self, session: Arc<InternalSession>) -> Result<()> {
        self.registry.register(session)?;
        self.monitoring.increment_active_sessions();
        Ok(())
    }

    /// Park a session that is still authenticating
    pub fn add_authentication_session(&self, session: Arc<InternalSession>) {
        self.pending.add_session(session);
    }

    // ==================== Removal ====================

    /// Destroy `target` on behalf of `requester`.
    ///
    /// No target is a no-op. Permission is checked by the capability for
    /// the target's kind, which fails with
    /// [`SessionError::PermissionDenied`] when it is refused.
    pub async fn destroy_session(
        &self,
        requester: &Session,
        target: Option<&SessionId>,
    ) -> Result<()> {
        let Some(target) = target else {
            return Ok(());
        };
        let operations = self.operations.get_operation(target);
        let session = operations.resolve_session(target).await?;
        operations.destroy(requester, session).await
    }

    /// Remove `session` from this server. Safe to call any number of times.
    pub fn destroy_internal_session(&self, session: &Arc<InternalSession>) {
        self.remove_internal_session(session, SessionEventType::Destroy);
    }

    /// Remove `session` because its owner logged out
    pub fn logout_internal_session(&self, session: &Arc<InternalSession>) {
        self.remove_internal_session(session, SessionEventType::Logout);
    }

    /// Destroy a session that may still be authenticating
    pub fn destroy_authentication_session(&self, id: &SessionId) {
        let session = self
            .pending
            .remove_session(id)
            .or_else(|| self.registry.get_primary(id));
        match session {
            Some(session) => self.destroy_internal_session(&session),
            None => debug!(session_id = %id, "No session to destroy"),
        }
    }

    fn remove_internal_session(&self, session: &Arc<InternalSession>, event: SessionEventType) {
        let unregistered = self.registry.remove(session);
        if unregistered {
            self.monitoring.decrement_active_sessions();
        }

        if session.claim_removal() && !session.state().is_terminal() {
            self.notifier.signal_remove(session, event);
            self.audit(session, AuditEventName::for_removal(event));
            info!(session_id = %session.id(), event = %event, "Session removed");
        }

        if unregistered {
            self.registry.remove_session_id(session.id());
        }
    }

    fn audit(&self, session: &InternalSession, event: AuditEventName) {
        if let Err(e) = self
            .auditor
            .audit_activity(&session.to_session_info(), event)
        {
            error!(
                session_id = %session.id(),
                audit_event = %event,
                error = %e,
                "Failed to audit session activity"
            );
        }
    }

    // ==================== Lookup ====================

    /// The live record for `id`.
    ///
    /// `None` for a missing id, an unregistered id, and any session handle.
    pub fn get_internal_session(&self, id: Option<&SessionId>) -> Option<Arc<InternalSession>> {
        let id = id?;
        if id.is_session_handle() {
            return None;
        }
        self.registry.get_primary(id)
    }

    /// The live record a client-visible handle refers to
    pub fn get_internal_session_by_handle(
        &self,
        handle: &SessionId,
    ) -> Option<Arc<InternalSession>> {
        if !handle.is_session_handle() {
            return None;
        }
        self.registry.get(handle)
    }

    // ==================== Delegated operations ====================

    pub async fn check_session_exists(&self, id: &SessionId) -> Result<bool> {
        self.operations
            .get_operation(id)
            .check_session_exists(id)
            .await
    }

    pub async fn get_session_info(&self, id: &SessionId, reset: bool) -> Result<SessionInfo> {
        self.operations
            .get_operation(id)
            .get_session_info(id, reset)
            .await
    }

    pub async fn get_valid_sessions(
        &self,
        session: &Session,
        pattern: Option<&str>,
    ) -> Result<SearchResults<SessionInfo>> {
        self.operations
            .get_operation(session.id())
            .get_valid_sessions(session, pattern)
            .await
    }

    /// Sessions matching `query`, as seen by `caller`.
    ///
    /// Both arguments are required.
    pub async fn get_matching_sessions(
        &self,
        caller: Option<&Session>,
        query: Option<&SessionQuery>,
    ) -> Result<Vec<PartialSession>> {
        let caller = caller
            .ok_or_else(|| SessionError::Validation("caller session is required".to_string()))?;
        let query =
            query.ok_or_else(|| SessionError::Validation("session query is required".to_string()))?;
        self.operations
            .get_operation(caller.id())
            .get_matching_sessions(query)
            .await
    }

    pub async fn logout(&self, session: &Session) -> Result<()> {
        self.operations
            .get_operation(session.id())
            .logout(session)
            .await
    }

    pub async fn add_session_listener(&self, session: &Session, url: &str) -> Result<()> {
        if url.trim().is_empty() {
            return Err(SessionError::Validation(
                "listener url must not be empty".to_string(),
            ));
        }
        self.operations
            .get_operation(session.id())
            .add_session_listener(session, url)
            .await
    }

    /// The master session id behind `restricted_id`
    pub async fn deference_restricted_id(
        &self,
        session: &Session,
        restricted_id: &str,
    ) -> Result<SessionId> {
        let restricted_id = SessionId::parse(restricted_id)?;
        self.operations
            .get_operation(session.id())
            .deference_restricted_id(session, &restricted_id)
            .await
    }

    pub async fn set_external_property(
        &self,
        client: &SsoToken,
        id: &SessionId,
        name: &str,
        value: &str,
    ) -> Result<()> {
        self.operations
            .get_operation(id)
            .set_external_property(client, id, name, value)
            .await
    }

    pub async fn get_restricted_token_id(
        &self,
        master: &str,
        restriction: &TokenRestriction,
    ) -> Result<SessionId> {
        let (master, operations) = self.operations.get_operation_for(master)?;
        operations.get_restricted_token_id(&master, restriction).await
    }

    /// Set a caller-supplied property on a live record and announce it.
    ///
    /// Fails with [`SessionError::ProtectedProperty`] for protected names.
    pub fn apply_external_property(
        &self,
        session: &Arc<InternalSession>,
        name: &str,
        value: &str,
    ) -> Result<()> {
        session.set_external_property(name, value)?;
        self.broker().on_event(&InternalSessionEvent::new(
            session,
            SessionEventType::PropertyChanged,
        ));
        self.notifier
            .send_event(session, SessionEventType::PropertyChanged);
        Ok(())
    }

    // ==================== Notifications ====================

    pub fn send_event(&self, session: &InternalSession, event: SessionEventType) {
        self.notifier.send_event(session, event);
    }

    pub fn notification_queue_size(&self) -> usize {
        self.notifier.notification_queue_size()
    }

    // ==================== Timeouts ====================

    /// Run the configured timeout handlers; returns by the handler deadline
    pub async fn exec_session_timeout_handlers(
        &self,
        id: &SessionId,
        event: SessionEventType,
    ) -> TimeoutSweepReport {
        self.timeouts.exec_session_timeout_handlers(id, event).await
    }

    /// Replace the configured timeout handler names
    pub fn set_timeout_handlers(&self, handlers: BTreeSet<String>) {
        self.timeouts.set_handlers(handlers);
    }

    /// Time `session` out: run the handlers, then remove it
    pub async fn expire_session(
        &self,
        session: &Arc<InternalSession>,
        event: SessionEventType,
    ) -> TimeoutSweepReport {
        let report = self
            .timeouts
            .exec_session_timeout_handlers(session.id(), event)
            .await;
        self.remove_internal_session(session, event);
        report
    }

    /// Expire every registered session due at `now`; returns how many.
    ///
    /// Due sessions expire concurrently, so the sweep takes about one
    /// handler deadline however many sessions are due.
    pub async fn sweep_expired(self: &Arc<Self>, now: DateTime<Utc>) -> usize {
        let due = self.registry.due(now);
        let count = due.len();

        let mut expiries = JoinSet::new();
        for (session, event) in due {
            let service = Arc::clone(self);
            expiries.spawn(async move {
                service.expire_session(&session, event).await;
            });
        }
        while let Some(joined) = expiries.join_next().await {
            if let Err(e) = joined {
                error!(error = %e, "Session expiry task failed");
            }
        }
        count
    }

    // ==================== Admission ====================

    pub fn increment_active_sessions(&self) {
        self.monitoring.increment_active_sessions();
    }

    pub fn decrement_active_sessions(&self) {
        self.monitoring.decrement_active_sessions();
    }

    pub fn active_sessions(&self) -> u64 {
        self.monitoring.active_sessions()
    }

    /// Whether new sessions should be refused
    pub fn has_exceeded_max_sessions(&self) -> bool {
        self.monitoring.active_sessions() >= self.config.max_sessions
    }

    /// Whether `uuid` names the configured super user
    pub async fn is_super_user(&self, uuid: &str) -> bool {
        let Some(super_user) = self.config.super_user.as_deref() else {
            return false;
        };
        match self.identity.same_identity(super_user, uuid).await {
            Ok(same) => same,
            Err(e) => {
                warn!(uuid = %uuid, error = %e, "Unable to compare identity with super user");
                false
            }
        }
    }
}

impl std::fmt::Debug for SessionService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionService")
            .field("server_id", &self.config.server_id)
            .field("registry", &self.registry)
            .field("timeouts", &self.timeouts)
            .finish_non_exhaustive()
    }
}
