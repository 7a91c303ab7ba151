//! Per-host cache of agent sessions.
//!
//! The pool owns the only concurrently mutated session structure. Creation
//! follows the double-checked pattern: an optimistic read, then a write
//! lock with a re-check before the archive is built, uploaded, and the
//! session opened. Upload tracking is per host, not per hash: remote file
//! systems are not assumed to be shared.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tokio::sync::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::agent::AgentBuilder;
use crate::errors::{BuildError, PoolError, PoolShutdownError, SessionError};
use crate::inventory::Host;
use crate::protocol::AgentSession;
use crate::transport::Transport;

pub struct ConnectionPool<T: Transport> {
    transport: T,
    /// Current archive recipe. Swapped when the controller is reconfigured;
    /// sessions opened earlier keep running their already-deployed archive,
    /// content addressing keeps the two from colliding.
    builder: RwLock<Arc<AgentBuilder>>,
    sessions: RwLock<HashMap<String, Arc<AgentSession>>>,
    /// `host:hash` pairs whose upload a prior session already confirmed.
    uploaded: Mutex<HashSet<String>>,
    /// Send an `info` probe after each handshake.
    probe_on_connect: bool,
}

impl<T: Transport> ConnectionPool<T> {
    pub fn new(transport: T, builder: Arc<AgentBuilder>) -> Self {
        Self {
            transport,
            builder: RwLock::new(builder),
            sessions: RwLock::new(HashMap::new()),
            uploaded: Mutex::new(HashSet::new()),
            probe_on_connect: false,
        }
    }

    /// Replace the archive recipe used for sessions opened from now on.
    pub async fn set_builder(&self, builder: Arc<AgentBuilder>) {
        *self.builder.write().await = builder;
    }

    #[must_use]
    pub fn probe_on_connect(mut self, probe: bool) -> Self {
        self.probe_on_connect = probe;
        self
    }

    #[must_use]
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Return the live session for `host`, opening one if needed.
    ///
    /// # Errors
    ///
    /// Returns a build error when the archive cannot be assembled, or a
    /// session error from upload, spawn, or handshake.
    pub async fn acquire(
        &self,
        cancel: &CancellationToken,
        host: &Host,
    ) -> Result<Arc<AgentSession>, PoolError> {
        if let Some(session) = self.lookup(&host.name).await {
            return Ok(session);
        }

        let mut sessions = self.sessions.write().await;
        // Re-check: another task may have created the session while we
        // waited for the write lock.
        let cached = sessions
            .get(&host.name)
            .filter(|s| !s.is_poisoned() && !s.is_closed())
            .map(Arc::clone);
        if let Some(session) = cached {
            return Ok(session);
        }
        let stale = sessions.remove(&host.name);

        let builder = Arc::clone(&*self.builder.read().await);
        let artifact = tokio::task::spawn_blocking(move || builder.build())
            .await
            .map_err(|e| BuildError::Io(format!("build task panicked: {e}")))??;

        let remote_path = artifact.remote_path();
        let upload_key = format!("{}:{}", host.name, artifact.hash);
        if !self.uploaded.lock().await.contains(&upload_key) {
            debug!(host = %host.name, hash = %artifact.hash, "uploading agent archive");
            self.transport
                .upload(host, &artifact.path, &remote_path)
                .await
                .map_err(|e| SessionError::Transport(format!("{e:#}")))?;
            self.uploaded.lock().await.insert(upload_key);
        }

        let channel = self
            .transport
            .open_channel(host, &remote_path)
            .await
            .map_err(|e| SessionError::Transport(format!("{e:#}")))?;
        let session = Arc::new(AgentSession::open(channel, cancel).await?);
        info!(
            host = %host.name,
            agent_version = %session.meta().version,
            agent_pid = session.meta().pid,
            "agent session established"
        );

        if self.probe_on_connect {
            match session.probe(cancel).await {
                Ok(features) => debug!(host = %host.name, ?features, "agent capabilities"),
                Err(e) => warn!(host = %host.name, "capability probe failed: {e}"),
            }
        }

        sessions.insert(host.name.clone(), Arc::clone(&session));
        drop(sessions);

        if let Some(old) = stale {
            // Closed outside the map lock.
            if let Err(e) = old.close().await {
                warn!(host = %host.name, "closing stale session: {e}");
            }
        }
        Ok(session)
    }

    async fn lookup(&self, host_name: &str) -> Option<Arc<AgentSession>> {
        let sessions = self.sessions.read().await;
        sessions
            .get(host_name)
            .filter(|s| !s.is_poisoned() && !s.is_closed())
            .map(Arc::clone)
    }

    /// Number of live pooled sessions.
    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }

    /// Remove and close the session for `host_name`, if any.
    pub async fn evict(&self, host_name: &str) {
        let removed = { self.sessions.write().await.remove(host_name) };
        if let Some(session) = removed {
            debug!(host = %host_name, "evicting session");
            if let Err(e) = session.close().await {
                warn!(host = %host_name, "closing evicted session: {e}");
            }
        }
    }

    /// Close every pooled session in an orderly fashion.
    ///
    /// # Errors
    ///
    /// Returns one [`PoolShutdownError`] carrying every per-session close
    /// failure; sessions that closed cleanly are not retried.
    pub async fn drain(&self) -> Result<(), PoolShutdownError> {
        let sessions: Vec<(String, Arc<AgentSession>)> = {
            let mut map = self.sessions.write().await;
            map.drain().collect()
        };

        let mut failures = Vec::new();
        for (name, session) in sessions {
            if let Err(e) = session.close().await {
                failures.push((name, e.to_string()));
            }
        }
        if failures.is_empty() {
            Ok(())
        } else {
            Err(PoolShutdownError { failures })
        }
    }
}
