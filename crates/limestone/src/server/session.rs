//! Operator sessions and request credentials.

use std::collections::HashMap;

use axum::http::{header, HeaderMap};
use chrono::{DateTime, TimeDelta, Utc};
use parking_lot::Mutex;

/// In-memory session table. Sessions do not survive a restart.
#[derive(Debug)]
pub struct SessionStore {
    ttl: TimeDelta,
    sessions: Mutex<HashMap<String, DateTime<Utc>>>,
}

impl SessionStore {
    /// Create an empty store whose sessions live for `ttl`.
    #[must_use]
    pub fn new(ttl: TimeDelta) -> Self {
        Self {
            ttl,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// Session lifetime.
    #[must_use]
    pub fn ttl(&self) -> TimeDelta {
        self.ttl
    }

    /// Start a session and return its id.
    pub fn create(&self, now: DateTime<Utc>) -> String {
        let id = format!("{:032x}", rand::random::<u128>());
        let mut sessions = self.sessions.lock();
        sessions.retain(|_, expires| *expires > now);
        sessions.insert(id.clone(), now + self.ttl);
        id
    }

    /// Whether `id` names a live session. Expired entries are dropped.
    pub fn is_valid(&self, id: &str, now: DateTime<Utc>) -> bool {
        let mut sessions = self.sessions.lock();
        match sessions.get(id) {
            Some(expires) if *expires > now => true,
            Some(_) => {
                sessions.remove(id);
                false
            }
            None => false,
        }
    }

    /// End a session. Returns whether it existed.
    pub fn revoke(&self, id: &str) -> bool {
        self.sessions.lock().remove(id).is_some()
    }

    /// Number of stored sessions, expired or not.
    #[must_use]
    pub fn len(&self) -> usize {
        self.sessions.lock().len()
    }

    /// Whether no sessions are stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Value of the cookie called `name`, if the request carries one.
#[must_use]
pub fn cookie_value<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(key, _)| *key == name)
        .map(|(_, value)| value)
}

/// Token from an `Authorization: Bearer` header.
#[must_use]
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(str::trim)
}

/// `Set-Cookie` value that starts a session.
#[must_use]
pub fn session_cookie(name: &str, id: &str, ttl: TimeDelta) -> String {
    format!(
        "{name}={id}; Path=/; HttpOnly; SameSite=Lax; Max-Age={}",
        ttl.num_seconds()
    )
}

/// `Set-Cookie` value that clears the session cookie.
#[must_use]
pub fn expired_cookie(name: &str) -> String {
    format!("{name}=; Path=/; HttpOnly; SameSite=Lax; Max-Age=0")
}

/// Compare a presented secret against the configured one.
///
/// An unconfigured secret matches nothing. The comparison time does not
/// depend on where the inputs first differ.
#[must_use]
pub fn secret_matches(presented: &str, expected: Option<&str>) -> bool {
    let Some(expected) = expected else {
        return false;
    };
    let (a, b) = (presented.as_bytes(), expected.as_bytes());
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0_u8, |acc, (x, y)| acc | (x ^ y)) == 0
}
