//! Authenticated sessions.
//!
//! A session maps an opaque token to the [`Principal`] that logged in. The
//! request service resolves the token on every call; identity is never kept
//! in ambient state.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use arm_gcode::Role;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

/// Sessions unused for this long are dropped.
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(30 * 60);

/// Authenticated caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    pub user_id: i64,
    pub username: String,
    pub role: Role,
}

/// Verifies credentials.
pub trait IdentityProvider: Send + Sync {
    fn login(&self, username: &str, password: &str) -> Option<Principal>;
}

struct Session {
    principal: Principal,
    last_seen: Instant,
}

/// Token table with an idle timeout. Every successful lookup renews the
/// session; expired ones are removed on lookup and whenever a session opens.
pub struct SessionManager {
    sessions: RwLock<HashMap<String, Session>>,
    idle_timeout: Duration,
}

impl SessionManager {
    pub fn new() -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
        }
    }

    pub fn with_idle_timeout(mut self, idle_timeout: Duration) -> Self {
        self.idle_timeout = idle_timeout;
        self
    }

    /// Opens a session and returns its token (32 hex characters).
    pub fn create(&self, principal: Principal) -> String {
        let token = Uuid::new_v4().simple().to_string();
        info!("session opened for {} ({})", principal.username, principal.role);
        let mut sessions = self.sessions.write();
        self.purge_expired(&mut sessions);
        sessions.insert(
            token.clone(),
            Session {
                principal,
                last_seen: Instant::now(),
            },
        );
        token
    }

    pub fn get(&self, token: &str) -> Option<Principal> {
        let mut sessions = self.sessions.write();
        let session = sessions.get_mut(token)?;
        if session.last_seen.elapsed() > self.idle_timeout {
            info!("session for {} expired", session.principal.username);
            sessions.remove(token);
            return None;
        }
        session.last_seen = Instant::now();
        Some(session.principal.clone())
    }

    pub fn remove(&self, token: &str) -> bool {
        match self.sessions.write().remove(token) {
            Some(session) => {
                info!("session closed for {}", session.principal.username);
                true
            }
            None => false,
        }
    }

    /// Closes every session of one user, e.g. after the account is disabled.
    pub fn remove_user(&self, user_id: i64) -> usize {
        let mut sessions = self.sessions.write();
        let before = sessions.len();
        sessions.retain(|_, s| s.principal.user_id != user_id);
        let removed = before - sessions.len();
        if removed > 0 {
            info!("closed {} session(s) of user {}", removed, user_id);
        }
        removed
    }

    /// Open sessions, including expired ones not yet purged.
    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn purge_expired(&self, sessions: &mut HashMap<String, Session>) {
        let timeout = self.idle_timeout;
        sessions.retain(|_, s| s.last_seen.elapsed() <= timeout);
    }
}

impl Default for SessionManager {
    fn default() -> Self {
        Self::new()
    }
}
