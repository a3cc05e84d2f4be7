//! Per-client capability sets.
//!
//! A client identifies itself with the `homestream_session` cookie, issued
//! by `POST /stream/formats`. Entries idle for longer than the configured TTL
//! are removed by a periodic cleanup task.

use std::sync::Arc;
use std::time::Duration;

use axum::http::{header, HeaderMap};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use hs_transcode::ClientCapabilities;
use uuid::Uuid;

/// Name of the cookie carrying the client session id.
pub const SESSION_COOKIE: &str = "homestream_session";

#[derive(Debug, Clone)]
struct ClientSession {
    caps: ClientCapabilities,
    last_seen: DateTime<Utc>,
}

/// Thread-safe store of declared client capabilities.
#[derive(Debug, Clone)]
pub struct CapabilityStore {
    sessions: Arc<DashMap<String, ClientSession>>,
    ttl: Duration,
}

impl CapabilityStore {
    pub fn new(ttl_secs: u64) -> Self {
        Self {
            sessions: Arc::new(DashMap::new()),
            ttl: Duration::from_secs(ttl_secs),
        }
    }

    /// Store (or overwrite) the capability set of a session.
    pub fn set(&self, session_id: &str, caps: ClientCapabilities) {
        tracing::debug!(
            session_id = %session_id,
            audio = caps.audio.len(),
            video = caps.video.len(),
            "Client capabilities declared"
        );
        self.sessions.insert(
            session_id.to_string(),
            ClientSession {
                caps,
                last_seen: Utc::now(),
            },
        );
    }

    /// Capability set of a session, refreshing its idle timer.
    pub fn get(&self, session_id: &str) -> Option<ClientCapabilities> {
        self.sessions.get_mut(session_id).map(|mut entry| {
            entry.last_seen = Utc::now();
            entry.caps.clone()
        })
    }

    /// Remove sessions idle for longer than the TTL.
    pub fn cleanup_expired(&self) -> usize {
        let now = Utc::now();
        let ttl = chrono::Duration::from_std(self.ttl).unwrap_or_else(|_| chrono::Duration::days(1));

        let mut removed = 0;
        self.sessions.retain(|session_id, session| {
            let idle = now - session.last_seen;
            if idle > ttl {
                tracing::debug!(
                    session_id = %session_id,
                    idle_secs = idle.num_seconds(),
                    "Expired client session removed"
                );
                removed += 1;
                false
            } else {
                true
            }
        });
        removed
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    #[cfg(test)]
    fn backdate(&self, session_id: &str, by: chrono::Duration) {
        if let Some(mut entry) = self.sessions.get_mut(session_id) {
            entry.last_seen = entry.last_seen - by;
        }
    }
}

/// Start a background task that periodically drops expired sessions.
pub fn start_cleanup_task(store: CapabilityStore, interval: Duration) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            interval.tick().await;
            let removed = store.cleanup_expired();
            if removed > 0 {
                tracing::debug!(removed, "Cleaned up client sessions");
            }
        }
    })
}

/// Read the session id from the `Cookie` header.
pub fn session_id(headers: &HeaderMap) -> Option<String> {
    let cookies = headers.get(header::COOKIE)?.to_str().ok()?;
    cookies
        .split(';')
        .map(str::trim)
        .find_map(|part| part.strip_prefix(&format!("{SESSION_COOKIE}=")))
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

pub fn new_session_id() -> String {
    Uuid::new_v4().to_string()
}

/// `Set-Cookie` value for a freshly issued session.
pub fn session_cookie(session_id: &str, ttl_secs: u64) -> String {
    format!("{SESSION_COOKIE}={session_id}; Path=/; Max-Age={ttl_secs}; HttpOnly; SameSite=Lax")
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn caps() -> ClientCapabilities {
        ClientCapabilities {
            audio: vec!["audio/mpeg;libmp3lame".into()],
            video: vec![],
        }
    }

    #[test]
    fn set_then_get() {
        let store = CapabilityStore::new(60);
        assert!(store.get("s1").is_none());
        store.set("s1", caps());
        assert_eq!(store.get("s1").unwrap(), caps());
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn set_overwrites() {
        let store = CapabilityStore::new(60);
        store.set("s1", caps());
        store.set("s1", ClientCapabilities::default());
        assert!(store.get("s1").unwrap().audio.is_empty());
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn cleanup_removes_idle_sessions() {
        let store = CapabilityStore::new(60);
        store.set("old", caps());
        store.set("fresh", caps());
        store.backdate("old", chrono::Duration::seconds(120));

        assert_eq!(store.cleanup_expired(), 1);
        assert!(store.get("old").is_none());
        assert!(store.get("fresh").is_some());
    }

    #[test]
    fn cookie_parsing() {
        let mut headers = HeaderMap::new();
        assert!(session_id(&headers).is_none());

        headers.insert(
            header::COOKIE,
            HeaderValue::from_static("theme=dark; homestream_session=abc-123; other=1"),
        );
        assert_eq!(session_id(&headers).as_deref(), Some("abc-123"));

        headers.insert(header::COOKIE, HeaderValue::from_static("homestream_session="));
        assert!(session_id(&headers).is_none());
    }

    #[test]
    fn issued_cookie_round_trips() {
        let id = new_session_id();
        let cookie = session_cookie(&id, 3600);
        let first = cookie.split(';').next().unwrap();

        let mut headers = HeaderMap::new();
        headers.insert(header::COOKIE, HeaderValue::from_str(first).unwrap());
        assert_eq!(session_id(&headers), Some(id));
    }
}
