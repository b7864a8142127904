//! Server-side session records

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, TimeDelta, Utc};
use parking_lot::RwLock;
use uuid::Uuid;

use super::{SessionEventType, SessionId, SessionInfo, SessionKind, SessionState};
use crate::error::{Result, SessionError};

/// Prefix of property names callers may never set
pub const PROTECTED_PROPERTY_PREFIX: &str = "am.protected.";

/// Internal property names that are protected regardless of prefix
const PROTECTED_PROPERTIES: &[&str] = &[
    "AuthLevel",
    "AuthType",
    "Host",
    "HostName",
    "Organization",
    "Principal",
    "Principals",
    "SessionHandle",
    "UserId",
    "UserToken",
    "authInstant",
];

/// Whether external callers are barred from setting `name`
pub fn is_protected_property(name: &str) -> bool {
    name.starts_with(PROTECTED_PROPERTY_PREFIX) || PROTECTED_PROPERTIES.contains(&name)
}

struct Mutable {
    state: SessionState,
    last_access: DateTime<Utc>,
    client_id: Option<String>,
    properties: BTreeMap<String, String>,
    listeners: BTreeSet<String>,
}

/// Authoritative server-side session record
///
/// Shared as `Arc<InternalSession>`; mutable fields sit behind a lock so
/// readers on other tasks see consistent snapshots.
pub struct InternalSession {
    id: SessionId,
    domain: String,
    stateless: bool,
    created_at: DateTime<Utc>,
    max_idle: TimeDelta,
    max_session: TimeDelta,
    inner: RwLock<Mutable>,
    removal_claimed: AtomicBool,
}

impl InternalSession {
    pub fn new(
        id: SessionId,
        domain: impl Into<String>,
        max_idle: TimeDelta,
        max_session: TimeDelta,
    ) -> Self {
        let now = Utc::now();
        Self {
            stateless: id.is_stateless(),
            id,
            domain: domain.into(),
            created_at: now,
            max_idle,
            max_session,
            inner: RwLock::new(Mutable {
                state: SessionState::Inactive,
                last_access: now,
                client_id: None,
                properties: BTreeMap::new(),
                listeners: BTreeSet::new(),
            }),
            removal_claimed: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> &SessionId {
        &self.id
    }

    pub fn domain(&self) -> &str {
        &self.domain
    }

    pub fn is_stateless(&self) -> bool {
        self.stateless
    }

    pub fn state(&self) -> SessionState {
        self.inner.read().state
    }

    pub fn is_valid(&self) -> bool {
        self.state() == SessionState::Valid
    }

    /// Move to `next`, refusing any step backwards.
    ///
    /// Setting the current state again is a no-op.
    pub fn set_state(&self, next: SessionState) -> Result<()> {
        let mut inner = self.inner.write();
        if inner.state == next {
            return Ok(());
        }
        if !inner.state.can_transition_to(next) {
            return Err(SessionError::InvalidStateTransition {
                from: inner.state,
                to: next,
            });
        }
        inner.state = next;
        Ok(())
    }

    pub fn client_id(&self) -> Option<String> {
        self.inner.read().client_id.clone()
    }

    pub fn set_client_id(&self, client_id: impl Into<String>) {
        self.inner.write().client_id = Some(client_id.into());
    }

    // ==================== Expiry ====================

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn last_access(&self) -> DateTime<Utc> {
        self.inner.read().last_access
    }

    pub fn max_idle(&self) -> TimeDelta {
        self.max_idle
    }

    pub fn max_session(&self) -> TimeDelta {
        self.max_session
    }

    /// Record use of the session, resetting idle time
    pub fn touch(&self) {
        self.touch_at(Utc::now());
    }

    pub fn touch_at(&self, now: DateTime<Utc>) {
        let mut inner = self.inner.write();
        if now > inner.last_access {
            inner.last_access = now;
        }
    }

    pub fn idle_time(&self, now: DateTime<Utc>) -> TimeDelta {
        (now - self.last_access()).max(TimeDelta::zero())
    }

    /// Time until the maximum lifetime runs out
    pub fn time_left(&self, now: DateTime<Utc>) -> TimeDelta {
        (self.max_session_deadline() - now).max(TimeDelta::zero())
    }

    fn max_session_deadline(&self) -> DateTime<Utc> {
        self.created_at
            .checked_add_signed(self.max_session)
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    /// The timeout due at `now`, if any.
    ///
    /// Max timeout wins when both lifetimes have run out. Sessions already
    /// out of service never time out again.
    pub fn timeout_event(&self, now: DateTime<Utc>) -> Option<SessionEventType> {
        let inner = self.inner.read();
        if inner.state.is_terminal() {
            return None;
        }
        if now >= self.max_session_deadline() {
            return Some(SessionEventType::MaxTimeout);
        }
        let idle_deadline = inner
            .last_access
            .checked_add_signed(self.max_idle)
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        (now >= idle_deadline).then_some(SessionEventType::IdleTimeout)
    }

    // ==================== Properties ====================

    pub fn property(&self, name: &str) -> Option<String> {
        self.inner.read().properties.get(name).cloned()
    }

    pub fn properties(&self) -> BTreeMap<String, String> {
        self.inner.read().properties.clone()
    }

    /// Set a property from trusted server code, bypassing protection
    pub fn set_property(&self, name: impl Into<String>, value: impl Into<String>) {
        self.inner.write().properties.insert(name.into(), value.into());
    }

    /// Set a property on behalf of an external caller
    pub fn set_external_property(&self, name: &str, value: impl Into<String>) -> Result<()> {
        if is_protected_property(name) {
            return Err(SessionError::ProtectedProperty(name.to_string()));
        }
        self.set_property(name, value);
        Ok(())
    }

    pub fn remove_property(&self, name: &str) -> Option<String> {
        self.inner.write().properties.remove(name)
    }

    // ==================== Listeners ====================

    /// Register a notification endpoint; false if it was already registered
    pub fn add_listener(&self, url: impl Into<String>) -> bool {
        self.inner.write().listeners.insert(url.into())
    }

    pub fn listeners(&self) -> Vec<String> {
        self.inner.read().listeners.iter().cloned().collect()
    }

    // ==================== Removal ====================

    /// Claim the right to run the removal signal.
    ///
    /// Returns true for exactly one caller over the session's lifetime.
    pub fn claim_removal(&self) -> bool {
        self.removal_claimed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Whether some caller has already claimed removal
    pub fn is_removal_claimed(&self) -> bool {
        self.removal_claimed.load(Ordering::Acquire)
    }

    pub fn to_session_info(&self) -> SessionInfo {
        self.session_info_at(Utc::now())
    }

    pub fn session_info_at(&self, now: DateTime<Utc>) -> SessionInfo {
        let inner = self.inner.read();
        SessionInfo {
            session_id: self.id.to_string(),
            client_id: inner.client_id.clone(),
            domain: self.domain.clone(),
            state: inner.state,
            stateless: self.stateless,
            max_idle_minutes: self.max_idle.num_minutes(),
            max_session_minutes: self.max_session.num_minutes(),
            idle_seconds: (now - inner.last_access).max(TimeDelta::zero()).num_seconds(),
            time_left_seconds: (self.max_session_deadline() - now)
                .max(TimeDelta::zero())
                .num_seconds(),
            properties: inner.properties.clone(),
        }
    }
}

impl std::fmt::Debug for InternalSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InternalSession")
            .field("id", &self.id)
            .field("domain", &self.domain)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

/// Creates fresh internal sessions for this server
#[derive(Debug, Clone)]
pub struct InternalSessionFactory {
    server_id: String,
    max_idle: TimeDelta,
    max_session: TimeDelta,
}

impl InternalSessionFactory {
    pub fn new(server_id: impl Into<String>, max_idle: TimeDelta, max_session: TimeDelta) -> Self {
        Self {
            server_id: server_id.into(),
            max_idle,
            max_session,
        }
    }

    /// A new VALID session with a fresh identifier; not yet registered
    pub fn new_internal_session(&self, domain: &str, stateless: bool) -> InternalSession {
        let kind = if stateless {
            SessionKind::Stateless
        } else {
            SessionKind::Stateful
        };
        let id = SessionId::new(kind, Uuid::new_v4().simple().to_string(), &self.server_id);
        let session = InternalSession::new(id, domain, self.max_idle, self.max_session);
        session.inner.write().state = SessionState::Valid;
        session
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn factory() -> InternalSessionFactory {
        InternalSessionFactory::new("01", TimeDelta::minutes(30), TimeDelta::minutes(120))
    }

    // ==================== Factory Tests ====================

    #[test]
    fn factory_creates_valid_session() {
        let session = factory().new_internal_session("example.com", false);
        assert_eq!(session.state(), SessionState::Valid);
        assert_eq!(session.domain(), "example.com");
        assert!(!session.is_stateless());
        assert_eq!(session.id().server_id(), "01");
        assert!(!session.id().is_session_handle());
    }

    #[test]
    fn factory_ids_are_unique_and_typed() {
        let f = factory();
        let a = f.new_internal_session("d", true);
        let b = f.new_internal_session("d", true);
        assert_ne!(a.id(), b.id());
        assert!(a.is_stateless());
        assert_eq!(a.id().kind(), SessionKind::Stateless);
    }

    // ==================== State Tests ====================

    #[test]
    fn state_cannot_go_backwards() {
        let session = factory().new_internal_session("d", false);
        session.set_state(SessionState::Destroyed).unwrap();

        let err = session.set_state(SessionState::Valid).unwrap_err();
        assert!(matches!(
            err,
            SessionError::InvalidStateTransition {
                from: SessionState::Destroyed,
                to: SessionState::Valid
            }
        ));
        assert_eq!(session.state(), SessionState::Destroyed);
    }

    #[test]
    fn setting_same_state_is_noop() {
        let session = factory().new_internal_session("d", false);
        session.set_state(SessionState::Destroyed).unwrap();
        assert!(session.set_state(SessionState::Destroyed).is_ok());
    }

    #[test]
    fn claim_removal_succeeds_once() {
        let session = factory().new_internal_session("d", false);
        assert!(!session.is_removal_claimed());
        assert!(session.claim_removal());
        assert!(!session.claim_removal());
        assert!(session.is_removal_claimed());
    }

    // ==================== Expiry Tests ====================

    #[test]
    fn fresh_session_is_not_due() {
        let session = factory().new_internal_session("d", false);
        assert_eq!(session.timeout_event(Utc::now()), None);
    }

    #[test]
    fn idle_timeout_after_max_idle() {
        let session = factory().new_internal_session("d", false);
        let later = session.last_access() + TimeDelta::minutes(31);
        assert_eq!(
            session.timeout_event(later),
            Some(SessionEventType::IdleTimeout)
        );
    }

    #[test]
    fn touch_defers_idle_timeout() {
        let session = factory().new_internal_session("d", false);
        let later = session.last_access() + TimeDelta::minutes(20);
        session.touch_at(later);
        assert_eq!(session.timeout_event(later + TimeDelta::minutes(20)), None);
        assert_eq!(session.idle_time(later + TimeDelta::minutes(5)), TimeDelta::minutes(5));
    }

    #[test]
    fn max_timeout_wins_over_idle() {
        let session = factory().new_internal_session("d", false);
        let much_later = session.created_at() + TimeDelta::minutes(121);
        assert_eq!(
            session.timeout_event(much_later),
            Some(SessionEventType::MaxTimeout)
        );
        assert_eq!(session.time_left(much_later), TimeDelta::zero());
    }

    #[test]
    fn destroyed_session_never_times_out() {
        let session = factory().new_internal_session("d", false);
        session.set_state(SessionState::Destroyed).unwrap();
        let much_later = session.created_at() + TimeDelta::days(1);
        assert_eq!(session.timeout_event(much_later), None);
    }

    // ==================== Property Tests ====================

    #[test]
    fn external_property_rejects_protected_names() {
        let session = factory().new_internal_session("d", false);

        let err = session
            .set_external_property("am.protected.authLevel", "5")
            .unwrap_err();
        assert!(matches!(err, SessionError::ProtectedProperty(_)));
        assert!(matches!(
            session.set_external_property("UserId", "mallory"),
            Err(SessionError::ProtectedProperty(_))
        ));

        session.set_external_property("theme", "dark").unwrap();
        assert_eq!(session.property("theme").as_deref(), Some("dark"));
    }

    #[test]
    fn server_code_may_set_protected_properties() {
        let session = factory().new_internal_session("d", false);
        session.set_property("am.protected.authLevel", "5");
        assert_eq!(
            session.property("am.protected.authLevel").as_deref(),
            Some("5")
        );
    }

    #[test]
    fn listeners_are_deduplicated() {
        let session = factory().new_internal_session("d", false);
        assert!(session.add_listener("https://app/notify"));
        assert!(!session.add_listener("https://app/notify"));
        assert_eq!(session.listeners(), vec!["https://app/notify"]);
    }

    #[test]
    fn session_info_reflects_record() {
        let session = factory().new_internal_session("example.com", false);
        session.set_client_id("alice");
        session.set_property("theme", "dark");

        let now = session.created_at() + TimeDelta::minutes(10);
        let info = session.session_info_at(now);
        assert_eq!(info.session_id, session.id().to_string());
        assert_eq!(info.client_id.as_deref(), Some("alice"));
        assert_eq!(info.state, SessionState::Valid);
        assert_eq!(info.max_idle_minutes, 30);
        assert_eq!(info.time_left_seconds, 110 * 60);
        assert_eq!(info.properties.get("theme").map(String::as_str), Some("dark"));
    }
}
