//! Admin API authentication: two shared access tokens (view and admin) are
//! exchanged for short-lived random session tokens.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use rand::RngCore;

/// How long a session stays valid after login.
pub const SESSION_VALIDITY: Duration = Duration::from_secs(2 * 60 * 60);

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AccessLevel {
    View,
    Admin,
}

impl AccessLevel {
    /// Admin implies view.
    pub fn allows(self, required: AccessLevel) -> bool {
        self == AccessLevel::Admin || required == AccessLevel::View
    }
}

struct Session {
    level: AccessLevel,
    expires_at: Instant,
}

pub struct SessionStore {
    view_token: String,
    admin_token: String,
    validity: Duration,
    sessions: Mutex<HashMap<String, Session>>,
}

impl SessionStore {
    pub fn new(view_token: String, admin_token: String) -> Self {
        Self {
            view_token,
            admin_token,
            validity: SESSION_VALIDITY,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    #[cfg(test)]
    fn with_validity(mut self, validity: Duration) -> Self {
        self.validity = validity;
        self
    }

    /// Exchange an access token for a session token. Returns `None` when the
    /// token matches neither configured access token.
    pub fn login(&self, access_token: &str) -> Option<(String, AccessLevel)> {
        let level = if ct_eq(access_token, &self.admin_token) {
            AccessLevel::Admin
        } else if ct_eq(access_token, &self.view_token) {
            AccessLevel::View
        } else {
            return None;
        };

        let mut token_bytes = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut token_bytes);
        let token = hex::encode(token_bytes);

        self.sessions.lock().unwrap().insert(
            token.clone(),
            Session {
                level,
                expires_at: Instant::now() + self.validity,
            },
        );

        Some((token, level))
    }

    /// Check a session token against the required access level. Expired
    /// sessions are purged as a side effect.
    pub fn authorize(&self, session_token: &str, required: AccessLevel) -> bool {
        let now = Instant::now();
        let mut sessions = self.sessions.lock().unwrap();
        sessions.retain(|_, s| s.expires_at > now);
        sessions
            .get(session_token)
            .is_some_and(|s| s.level.allows(required))
    }

    pub fn session_validity(&self) -> Duration {
        self.validity
    }
}

/// Compare two strings in constant time; no early return on length mismatch
/// so timing does not reveal the secret length.
fn ct_eq(a: &str, b: &str) -> bool {
    let a = a.as_bytes();
    let b = b.as_bytes();
    let len = a.len().max(b.len());
    let mut diff: u8 = (a.len() ^ b.len()) as u8;
    for i in 0..len {
        let x = a.get(i).copied().unwrap_or(0);
        let y = b.get(i).copied().unwrap_or(0);
        diff |= x ^ y;
    }
    diff == 0
}
