//! Process-wide session registry and the janitor that reaps abandoned
//! sessions.
//!
//! One mutex guards the token map; each session carries its own adapter
//! mutex so motion commands for the same session never interleave their
//! machine-interface I/O, while different sessions proceed in parallel.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex as StdMutex;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::time::Duration;
use std::time::Instant;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::debug;
use tracing::trace;

use crate::gdb::GdbAdapter;

pub struct DebugSession {
    token: String,
    pub adapter: Mutex<GdbAdapter>,
    last_ping: StdMutex<Instant>,
    initialized: AtomicBool,
}

impl DebugSession {
    pub fn new(token: impl Into<String>, adapter: GdbAdapter) -> Self {
        Self {
            token: token.into(),
            adapter: Mutex::new(adapter),
            last_ping: StdMutex::new(Instant::now()),
            initialized: AtomicBool::new(false),
        }
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    /// Refresh the liveness timestamp. Monotonically non-decreasing.
    pub fn ping(&self) {
        if let Ok(mut last) = self.last_ping.lock() {
            *last = (*last).max(Instant::now());
        }
    }

    pub fn ping_age(&self) -> Duration {
        self.last_ping
            .lock()
            .map(|last| last.elapsed())
            .unwrap_or_default()
    }

    /// Flag the end of the init pipeline; until then the janitor treats the
    /// session as live regardless of pings.
    pub fn mark_initialized(&self) {
        self.initialized.store(true, Ordering::SeqCst);
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::SeqCst)
    }
}

/// Decide whether the janitor should reap a session. A session dies when its
/// ping is stale (age has *reached* the deadline) or its supervised stream is
/// gone or dead.
pub fn should_reap(ping_age: Duration, ping_deadline: Duration, stream_alive: Option<bool>) -> bool {
    ping_age >= ping_deadline || !matches!(stream_alive, Some(true))
}

#[derive(Default)]
pub struct SessionRegistry {
    sessions: StdMutex<HashMap<String, Arc<DebugSession>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert under `token`. A token maps to at most one session; an existing
    /// entry is replaced.
    pub fn register(&self, token: &str, session: Arc<DebugSession>) {
        if let Ok(mut sessions) = self.sessions.lock() {
            sessions.insert(token.to_string(), session);
        }
    }

    pub fn get(&self, token: &str) -> Option<Arc<DebugSession>> {
        self.sessions.lock().ok()?.get(token).cloned()
    }

    pub fn remove(&self, token: &str) -> Option<Arc<DebugSession>> {
        self.sessions.lock().ok()?.remove(token)
    }

    pub fn len(&self) -> usize {
        self.sessions.lock().map(|s| s.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// One janitor pass. Sessions still initializing get their ping
    /// refreshed (a build in progress is live); everything else is reaped
    /// when stale or when its debugger stream is gone.
    pub async fn sweep(&self, ping_deadline: Duration) {
        let entries: Vec<(String, Arc<DebugSession>)> = match self.sessions.lock() {
            Ok(sessions) => sessions
                .iter()
                .map(|(token, session)| (token.clone(), session.clone()))
                .collect(),
            Err(_) => return,
        };

        for (token, session) in entries {
            if !session.is_initialized() {
                session.ping();
                continue;
            }
            let mut adapter = session.adapter.lock().await;
            let alive = adapter.stream_alive();
            if should_reap(session.ping_age(), ping_deadline, alive) {
                debug!("reaping session {token}");
                adapter.stop().await;
                drop(adapter);
                self.remove(&token);
            } else {
                trace!("session {token} is live");
            }
        }
    }
}

/// Spawn the periodic janitor task.
pub fn spawn_janitor(
    registry: Arc<SessionRegistry>,
    interval: Duration,
    ping_deadline: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(interval).await;
            registry.sweep(ping_deadline).await;
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use pretty_assertions::assert_eq;

    fn session(dir: &std::path::Path, token: &str) -> Arc<DebugSession> {
        let config = Config {
            received_dir: dir.to_path_buf(),
            debug_dir: dir.to_path_buf(),
            ..Config::default()
        };
        Arc::new(DebugSession::new(token, GdbAdapter::new(&config, token)))
    }

    #[test]
    fn reap_decision_boundaries() {
        let deadline = Duration::from_secs(15);
        // Fresh ping, live stream: keep.
        assert!(!should_reap(Duration::from_secs(14), deadline, Some(true)));
        // Ping exactly at the deadline: reap.
        assert!(should_reap(deadline, deadline, Some(true)));
        assert!(should_reap(Duration::from_secs(16), deadline, Some(true)));
        // Stream gone or dead: reap regardless of pings.
        assert!(should_reap(Duration::ZERO, deadline, None));
        assert!(should_reap(Duration::ZERO, deadline, Some(false)));
    }

    #[test]
    fn register_get_remove_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let registry = SessionRegistry::new();
        let session = session(dir.path(), "tok");

        registry.register("tok", session.clone());
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.get("tok").unwrap().token(), "tok");
        assert!(registry.get("other").is_none());

        registry.remove("tok");
        assert!(registry.is_empty());
        assert!(registry.get("tok").is_none());
    }

    #[test]
    fn a_token_maps_to_at_most_one_session() {
        let dir = tempfile::tempdir().unwrap();
        let registry = SessionRegistry::new();
        registry.register("tok", session(dir.path(), "tok"));
        registry.register("tok", session(dir.path(), "tok"));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn ping_is_monotonic() {
        let dir = tempfile::tempdir().unwrap();
        let session = session(dir.path(), "tok");
        let before = session.ping_age();
        session.ping();
        assert!(session.ping_age() <= before);
    }

    #[tokio::test]
    async fn sweep_keeps_sessions_still_initializing() {
        let dir = tempfile::tempdir().unwrap();
        let registry = SessionRegistry::new();
        registry.register("tok", session(dir.path(), "tok"));

        registry.sweep(Duration::from_secs(15)).await;
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn sweep_reaps_initialized_sessions_without_a_stream() {
        let dir = tempfile::tempdir().unwrap();
        let registry = SessionRegistry::new();
        let session = session(dir.path(), "tok");
        session.mark_initialized();
        registry.register("tok", session);

        registry.sweep(Duration::from_secs(15)).await;
        assert!(registry.is_empty());
    }
}
