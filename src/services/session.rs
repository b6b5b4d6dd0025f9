//! Per-user session state
//!
//! Each session is addressed by an opaque bearer token handed to the browser.
//! Anonymous sessions exist so a scanned salon survives the detour through
//! registration or login. The store map is the only shared structure; each
//! session sits behind its own async mutex so one user's slow backend call
//! never blocks another.
//!
//! A request without a known token works on a detached entry. The entry only
//! joins the store once it holds something worth keeping, and entries idle
//! longer than the configured limit are swept.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Mutex as SyncMutex, RwLock};
use rustc_hash::FxHashMap;
use tokio::sync::Mutex;
use tracing::{debug, info};
use uuid::Uuid;

use crate::domain::types::{BusinessId, CustomerId, Role};
use crate::infra::metrics::Metrics;
use crate::services::wizard::BookingWizard;

/// Authenticated identity attached to a session
#[derive(Debug, Clone, PartialEq)]
pub struct SessionUser {
    pub user_id: String,
    pub email: Option<String>,
    pub role: Role,
    pub customer_id: Option<CustomerId>,
    pub business_id: Option<BusinessId>,
    /// Identity provider token, used to sign out upstream
    pub access_token: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionContext {
    pub user: Option<SessionUser>,
    /// Salon picked by QR or manual entry; preselected whenever a wizard starts
    pub selected_business_id: Option<BusinessId>,
}

impl SessionContext {
    pub fn is_authenticated(&self) -> bool {
        self.user.is_some()
    }

    pub fn role(&self) -> Option<Role> {
        self.user.as_ref().map(|u| u.role)
    }

    pub fn customer_id(&self) -> Option<&CustomerId> {
        self.user.as_ref().and_then(|u| u.customer_id.as_ref())
    }

    pub fn business_id(&self) -> Option<&BusinessId> {
        self.user.as_ref().and_then(|u| u.business_id.as_ref())
    }
}

/// Lifetime of the identity provider token behind a signed-in session
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TokenLease {
    /// Provider-side expiry; `None` when the provider did not say
    pub expires_at: Option<Instant>,
    /// Last time the provider confirmed the token
    pub verified_at: Instant,
}

impl TokenLease {
    pub fn new(expires_in_secs: Option<u64>) -> Self {
        let now = Instant::now();
        Self {
            expires_at: expires_in_secs.map(|secs| now + Duration::from_secs(secs)),
            verified_at: now,
        }
    }

    pub fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| now >= at)
    }
}

#[derive(Debug, Default)]
pub struct SessionEntry {
    pub context: SessionContext,
    pub wizard: Option<BookingWizard>,
    pub lease: Option<TokenLease>,
}

impl SessionEntry {
    /// Nothing signed in, remembered or in progress
    pub fn is_blank(&self) -> bool {
        self.context.user.is_none()
            && self.context.selected_business_id.is_none()
            && self.wizard.is_none()
    }
}

pub type SessionHandle = Arc<Mutex<SessionEntry>>;

struct StoredSession {
    handle: SessionHandle,
    last_seen: SyncMutex<Instant>,
}

impl StoredSession {
    fn new(handle: SessionHandle) -> Self {
        Self { handle, last_seen: SyncMutex::new(Instant::now()) }
    }
}

/// Session looked up for one request
pub struct SessionSlot {
    pub token: String,
    pub handle: SessionHandle,
    /// False for a detached entry not yet in the store
    pub stored: bool,
}

#[derive(Default)]
pub struct SessionStore {
    sessions: RwLock<FxHashMap<String, StoredSession>>,
    metrics: Option<Arc<Metrics>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    fn publish_count(&self, count: usize) {
        if let Some(metrics) = &self.metrics {
            metrics.set_active_sessions(count as u64);
        }
    }

    fn new_token() -> String {
        Uuid::new_v4().simple().to_string()
    }

    fn insert(&self, token: String, handle: SessionHandle) {
        let count = {
            let mut sessions = self.sessions.write();
            sessions.insert(token, StoredSession::new(handle));
            sessions.len()
        };
        self.publish_count(count);
        debug!(sessions = count, "session_created");
    }

    /// Open a new empty session in the store and return its token
    pub fn create(&self) -> (String, SessionHandle) {
        let token = Self::new_token();
        let handle: SessionHandle = Arc::new(Mutex::new(SessionEntry::default()));
        self.insert(token.clone(), handle.clone());
        (token, handle)
    }

    /// Look up a session and mark it as seen
    pub fn get(&self, token: &str) -> Option<SessionHandle> {
        let sessions = self.sessions.read();
        let stored = sessions.get(token)?;
        *stored.last_seen.lock() = Instant::now();
        Some(stored.handle.clone())
    }

    /// Look up `token`. An absent or unknown token yields a detached entry
    /// under a fresh token; [`SessionStore::keep`] stores it.
    pub fn resolve(&self, token: Option<&str>) -> SessionSlot {
        if let Some(token) = token {
            if let Some(handle) = self.get(token) {
                return SessionSlot { token: token.to_string(), handle, stored: true };
            }
        }
        SessionSlot {
            token: Self::new_token(),
            handle: Arc::new(Mutex::new(SessionEntry::default())),
            stored: false,
        }
    }

    /// Store a detached entry once it holds state. Returns whether the
    /// session is in the store afterwards.
    pub async fn keep(&self, slot: &SessionSlot) -> bool {
        if slot.stored {
            return self.sessions.read().contains_key(&slot.token);
        }
        if slot.handle.lock().await.is_blank() {
            return false;
        }
        self.insert(slot.token.clone(), slot.handle.clone());
        true
    }

    pub fn remove(&self, token: &str) -> Option<SessionHandle> {
        let (removed, count) = {
            let mut sessions = self.sessions.write();
            let removed = sessions.remove(token);
            (removed, sessions.len())
        };
        self.publish_count(count);
        removed.map(|stored| stored.handle)
    }

    /// Drop sessions not seen for `idle` or longer; returns how many went
    pub fn sweep_idle(&self, idle: Duration) -> usize {
        let now = Instant::now();
        let (removed, count) = {
            let mut sessions = self.sessions.write();
            let before = sessions.len();
            sessions.retain(|_, stored| now.duration_since(*stored.last_seen.lock()) < idle);
            (before - sessions.len(), sessions.len())
        };
        self.publish_count(count);
        if removed > 0 {
            info!(removed = removed, sessions = count, "idle_sessions_swept");
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
