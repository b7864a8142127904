//! Session event distribution and the removal signal.
//!
//! - [`SessionEventBroker`] fans events out to in-process listeners and a
//!   broadcast channel
//! - [`SessionLogging`] / [`SessionAuditor`] record events; the defaults
//!   write through `tracing`
//! - [`SessionNotificationSender`] forwards events to registered remote
//!   listeners; [`QueuedNotificationSender`] puts them on a bounded queue
//! - [`NotificationDispatcher::signal_remove`] ties them together in a
//!   fixed order

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, info, warn};

use crate::session::{InternalSession, SessionEventType, SessionId, SessionInfo, SessionState};
use crate::timeout::BoxError;

/// Event about one internal session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InternalSessionEvent {
    pub session_id: SessionId,
    pub event_type: SessionEventType,
    /// Snapshot taken when the event was raised.
    pub session: SessionInfo,
    pub time: DateTime<Utc>,
}

impl InternalSessionEvent {
    pub fn new(session: &InternalSession, event_type: SessionEventType) -> Self {
        Self {
            session_id: session.id().clone(),
            event_type,
            session: session.to_session_info(),
            time: Utc::now(),
        }
    }
}

/// In-process observer of session events
///
/// Called synchronously on the signalling task; must not block.
pub trait InternalSessionListener: Send + Sync {
    fn on_event(&self, event: &InternalSessionEvent);
}

/// Distributes session events to local listeners and async subscribers
pub struct SessionEventBroker {
    listeners: RwLock<Vec<Arc<dyn InternalSessionListener>>>,
    tx: broadcast::Sender<InternalSessionEvent>,
}

impl SessionEventBroker {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self {
            listeners: RwLock::new(Vec::new()),
            tx,
        }
    }

    pub fn add_listener(&self, listener: Arc<dyn InternalSessionListener>) {
        self.listeners.write().push(listener);
    }

    /// Receive every event published after this call
    pub fn subscribe(&self) -> broadcast::Receiver<InternalSessionEvent> {
        self.tx.subscribe()
    }
}

impl InternalSessionListener for SessionEventBroker {
    fn on_event(&self, event: &InternalSessionEvent) {
        let listeners = self.listeners.read().clone();
        for listener in listeners {
            listener.on_event(event);
        }
        // No subscribers is fine
        let _ = self.tx.send(event.clone());
    }
}

impl fmt::Debug for SessionEventBroker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionEventBroker")
            .field("listeners", &self.listeners.read().len())
            .field("subscribers", &self.tx.receiver_count())
            .finish()
    }
}

/// Records session events in the session log
pub trait SessionLogging: Send + Sync {
    fn log_event(&self, info: &SessionInfo, event: SessionEventType) -> Result<(), BoxError>;
}

/// Names of audited session activities
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AuditEventName {
    SessionDestroyed,
    SessionIdleTimedOut,
    SessionMaxTimedOut,
    SessionLoggedOut,
    SessionPropertyChanged,
}

impl AuditEventName {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditEventName::SessionDestroyed => "AM-SESSION-DESTROYED",
            AuditEventName::SessionIdleTimedOut => "AM-SESSION-IDLE_TIMED_OUT",
            AuditEventName::SessionMaxTimedOut => "AM-SESSION-MAX_TIMED_OUT",
            AuditEventName::SessionLoggedOut => "AM-SESSION-LOGGED_OUT",
            AuditEventName::SessionPropertyChanged => "AM-SESSION-PROPERTY_CHANGED",
        }
    }

    /// The audit name recorded when a session ends with `event`
    pub fn for_removal(event: SessionEventType) -> Self {
        match event {
            SessionEventType::IdleTimeout => AuditEventName::SessionIdleTimedOut,
            SessionEventType::MaxTimeout => AuditEventName::SessionMaxTimedOut,
            SessionEventType::Logout => AuditEventName::SessionLoggedOut,
            _ => AuditEventName::SessionDestroyed,
        }
    }
}

impl fmt::Display for AuditEventName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Records auditable session activity
pub trait SessionAuditor: Send + Sync {
    fn audit_activity(&self, info: &SessionInfo, event: AuditEventName) -> Result<(), BoxError>;
}

/// Session log written through `tracing`
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSessionLogger;

impl SessionLogging for TracingSessionLogger {
    fn log_event(&self, info: &SessionInfo, event: SessionEventType) -> Result<(), BoxError> {
        let session = serde_json::to_string(info)?;
        info!(target: "custodian::session", event = %event, session = %session, "Session event");
        Ok(())
    }
}

/// Audit trail written through `tracing`
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSessionAuditor;

impl SessionAuditor for TracingSessionAuditor {
    fn audit_activity(&self, info: &SessionInfo, event: AuditEventName) -> Result<(), BoxError> {
        let session = serde_json::to_string(info)?;
        info!(target: "custodian::audit", event = %event, session = %session, "Session activity");
        Ok(())
    }
}

/// Forwards session events to the session's registered remote listeners
pub trait SessionNotificationSender: Send + Sync {
    fn send_event(&self, session: &InternalSession, event: SessionEventType)
    -> Result<(), BoxError>;

    /// Notifications accepted but not yet delivered
    fn notification_queue_size(&self) -> usize;
}

/// One notification bound for one listener endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionNotification {
    pub url: String,
    pub event_type: SessionEventType,
    pub session: SessionInfo,
    pub time: DateTime<Utc>,
}

/// Queues notifications for a delivery worker
///
/// The worker owns the receiver returned by [`QueuedNotificationSender::new`].
/// When the queue is full the notification is dropped with a warning.
#[derive(Debug, Clone)]
pub struct QueuedNotificationSender {
    tx: mpsc::Sender<SessionNotification>,
}

impl QueuedNotificationSender {
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<SessionNotification>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }
}

impl SessionNotificationSender for QueuedNotificationSender {
    fn send_event(
        &self,
        session: &InternalSession,
        event: SessionEventType,
    ) -> Result<(), BoxError> {
        let listeners = session.listeners();
        if listeners.is_empty() {
            return Ok(());
        }

        let info = session.to_session_info();
        let time = Utc::now();
        for url in listeners {
            let notification = SessionNotification {
                url,
                event_type: event,
                session: info.clone(),
                time,
            };
            match self.tx.try_send(notification) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(dropped)) => {
                    warn!(
                        session_id = %session.id(),
                        url = %dropped.url,
                        "Notification queue full, dropping notification"
                    );
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    return Err("notification delivery worker has stopped".into());
                }
            }
        }
        Ok(())
    }

    fn notification_queue_size(&self) -> usize {
        self.tx.max_capacity() - self.tx.capacity()
    }
}

/// Performs the removal signal for a session
pub struct NotificationDispatcher {
    broker: Arc<SessionEventBroker>,
    logging: Arc<dyn SessionLogging>,
    sender: Arc<dyn SessionNotificationSender>,
}

impl NotificationDispatcher {
    pub fn new(
        broker: Arc<SessionEventBroker>,
        logging: Arc<dyn SessionLogging>,
        sender: Arc<dyn SessionNotificationSender>,
    ) -> Self {
        Self {
            broker,
            logging,
            sender,
        }
    }

    pub fn broker(&self) -> &Arc<SessionEventBroker> {
        &self.broker
    }

    /// Announce that `session` is gone.
    ///
    /// Local listeners and the session log see the event before the state
    /// becomes DESTROYED; remote listeners are told last.
    pub fn signal_remove(&self, session: &InternalSession, event: SessionEventType) {
        self.broker
            .on_event(&InternalSessionEvent::new(session, event));

        if let Err(e) = self.logging.log_event(&session.to_session_info(), event) {
            error!(session_id = %session.id(), error = %e, "Failed to log session event");
        }

        if let Err(e) = session.set_state(SessionState::Destroyed) {
            debug!(session_id = %session.id(), error = %e, "Session already out of service");
        }

        self.send_event(session, event);
    }

    /// Forward an event to the session's remote listeners, logging failure
    pub fn send_event(&self, session: &InternalSession, event: SessionEventType) {
        if let Err(e) = self.sender.send_event(session, event) {
            error!(
                session_id = %session.id(),
                event = %event,
                error = %e,
                "Failed to send session notification"
            );
        }
    }

    pub fn notification_queue_size(&self) -> usize {
        self.sender.notification_queue_size()
    }
}

impl fmt::Debug for NotificationDispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NotificationDispatcher")
            .field("broker", &self.broker)
            .finish_non_exhaustive()
    }
}
