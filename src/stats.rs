use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

use crate::error::Peer;

/// Process-wide session and traffic counters
#[derive(Debug, Default)]
pub struct RelayStats {
    pub active_sessions: AtomicU32,
    pub total_sessions: AtomicU64,
    pub intercepted_sessions: AtomicU64,
    pub bytes_to_server: AtomicU64,
    pub bytes_to_client: AtomicU64,
}

impl RelayStats {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn session_started(&self) {
        self.active_sessions.fetch_add(1, Ordering::Relaxed);
        self.total_sessions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn session_closed(&self) {
        self.active_sessions.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn session_intercepted(&self) {
        self.intercepted_sessions.fetch_add(1, Ordering::Relaxed);
    }

    /// Count bytes delivered to `to`
    pub fn relayed(&self, to: Peer, bytes: usize) {
        let counter = match to {
            Peer::Server => &self.bytes_to_server,
            Peer::Client => &self.bytes_to_client,
        };
        counter.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub fn log_stats(&self) {
        tracing::info!(
            active = self.active_sessions.load(Ordering::Relaxed),
            total = self.total_sessions.load(Ordering::Relaxed),
            intercepted = self.intercepted_sessions.load(Ordering::Relaxed),
            bytes_to_server = self.bytes_to_server.load(Ordering::Relaxed),
            bytes_to_client = self.bytes_to_client.load(Ordering::Relaxed),
            "relay stats"
        );
    }
}
