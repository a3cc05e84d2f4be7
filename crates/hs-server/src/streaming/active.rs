//! Registry of live transcodes, listed by `GET /stream/sessions`.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::watch;
use uuid::Uuid;

use super::monitor::Rates;
use super::session::SessionState;

/// What a live session is playing.
#[derive(Debug, Clone, Serialize)]
pub struct StreamLabel {
    pub provider: String,
    pub resource: String,
    pub mimetype: &'static str,
    pub copy_audio: bool,
    pub copy_video: bool,
    pub remux: bool,
    pub seek: f64,
}

#[derive(Debug)]
struct Entry {
    label: StreamLabel,
    pid: Option<u32>,
    started_at: DateTime<Utc>,
    state: watch::Receiver<SessionState>,
    bytes_sent: Arc<AtomicU64>,
    rates: Option<watch::Receiver<Rates>>,
}

/// Snapshot of one live session.
#[derive(Debug, Clone, Serialize)]
pub struct ActiveStreamInfo {
    pub id: Uuid,
    #[serde(flatten)]
    pub label: StreamLabel,
    pub pid: Option<u32>,
    pub started_at: DateTime<Utc>,
    pub state: SessionState,
    pub bytes_sent: u64,
    pub rates: Option<Rates>,
}

/// Thread-safe set of live sessions.
#[derive(Debug, Clone, Default)]
pub struct ActiveStreams {
    inner: Arc<DashMap<Uuid, Entry>>,
}

impl ActiveStreams {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a session until the returned guard is dropped.
    pub fn register(
        &self,
        id: Uuid,
        label: StreamLabel,
        pid: Option<u32>,
        state: watch::Receiver<SessionState>,
        bytes_sent: Arc<AtomicU64>,
        rates: Option<watch::Receiver<Rates>>,
    ) -> ActiveGuard {
        tracing::info!(
            session_id = %id,
            provider = %label.provider,
            resource = %label.resource,
            mimetype = label.mimetype,
            pid = ?pid,
            "Stream session started"
        );
        self.inner.insert(
            id,
            Entry {
                label,
                pid,
                started_at: Utc::now(),
                state,
                bytes_sent,
                rates,
            },
        );
        ActiveGuard {
            streams: self.clone(),
            id,
        }
    }

    pub fn list(&self) -> Vec<ActiveStreamInfo> {
        let mut list: Vec<ActiveStreamInfo> = self
            .inner
            .iter()
            .map(|entry| {
                let e = entry.value();
                ActiveStreamInfo {
                    id: *entry.key(),
                    label: e.label.clone(),
                    pid: e.pid,
                    started_at: e.started_at,
                    state: *e.state.borrow(),
                    bytes_sent: e.bytes_sent.load(Ordering::Relaxed),
                    rates: e.rates.as_ref().map(|r| *r.borrow()),
                }
            })
            .collect();
        list.sort_by_key(|s| s.started_at);
        list
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

/// Removes its session from [`ActiveStreams`] when dropped.
#[derive(Debug)]
pub struct ActiveGuard {
    streams: ActiveStreams,
    id: Uuid,
}

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        if let Some((id, entry)) = self.streams.inner.remove(&self.id) {
            tracing::info!(
                session_id = %id,
                provider = %entry.label.provider,
                resource = %entry.label.resource,
                state = %*entry.state.borrow(),
                bytes_sent = entry.bytes_sent.load(Ordering::Relaxed),
                duration_secs = (Utc::now() - entry.started_at).num_seconds(),
                "Stream session ended"
            );
        }
    }
}
