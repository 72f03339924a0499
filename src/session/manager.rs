use crate::errors::{Result, ServerError};
use crate::session::record::{
    ActionRecord, ArtifactRef, SessionSnapshot, SessionState, SessionSummary,
};
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

struct Session {
    session_id: String,
    created_at: DateTime<Utc>,
    last_activity: DateTime<Utc>,
    last_seen: Instant,
    state: SessionState,
    actions: Vec<ActionRecord>,
    artifacts: BTreeMap<String, ArtifactRef>,
}

impl Session {
    fn new(session_id: String) -> Self {
        let now = Utc::now();
        Self {
            session_id,
            created_at: now,
            last_activity: now,
            last_seen: Instant::now(),
            state: SessionState::Active,
            actions: Vec::new(),
            artifacts: BTreeMap::new(),
        }
    }

    fn touch(&mut self) {
        self.last_activity = Utc::now();
        self.last_seen = Instant::now();
    }

    fn ensure_active(&self) -> Result<()> {
        match self.state {
            SessionState::Active => Ok(()),
            SessionState::Closed => Err(ServerError::SessionClosed(self.session_id.clone())),
        }
    }

    fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            session_id: self.session_id.clone(),
            created_at: self.created_at,
            last_activity: self.last_activity,
            state: self.state,
            actions: self.actions.clone(),
            artifacts: self.artifacts.clone(),
        }
    }
}

enum Slot {
    Active(Arc<Mutex<Session>>),
    /// Terminal snapshot kept after close until purged
    Closed(Arc<SessionSnapshot>),
}

/// Owns all per-session state.
///
/// The session map sits behind a read-write lock and each live session behind
/// its own mutex, so appends to one session never wait on another.
#[derive(Default)]
pub struct SessionManager {
    slots: RwLock<HashMap<String, Slot>>,
}

impl SessionManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a session, generating an id when none is given.
    pub async fn create_session(&self, session_id: Option<String>) -> Result<SessionSnapshot> {
        let session_id = session_id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let mut slots = self.slots.write().await;
        if slots.contains_key(&session_id) {
            return Err(ServerError::SessionAlreadyExists(session_id));
        }
        let session = Session::new(session_id.clone());
        let snapshot = session.snapshot();
        slots.insert(session_id.clone(), Slot::Active(Arc::new(Mutex::new(session))));
        info!(session_id = %session_id, "created session");
        Ok(snapshot)
    }

    /// Makes sure an active session exists for `session_id`. Returns true when it was created.
    pub async fn get_or_create(&self, session_id: &str) -> Result<bool> {
        {
            let slots = self.slots.read().await;
            match slots.get(session_id) {
                Some(Slot::Active(_)) => return Ok(false),
                Some(Slot::Closed(_)) => {
                    return Err(ServerError::SessionClosed(session_id.to_string()))
                }
                None => {}
            }
        }
        match self.create_session(Some(session_id.to_string())).await {
            Ok(_) => Ok(true),
            // Lost a race with a concurrent creator
            Err(ServerError::SessionAlreadyExists(_)) => match self.live(session_id).await {
                Ok(_) => Ok(false),
                Err(e) => Err(e),
            },
            Err(e) => Err(e),
        }
    }

    async fn live(&self, session_id: &str) -> Result<Arc<Mutex<Session>>> {
        let slots = self.slots.read().await;
        match slots.get(session_id) {
            Some(Slot::Active(session)) => Ok(Arc::clone(session)),
            Some(Slot::Closed(_)) => Err(ServerError::SessionClosed(session_id.to_string())),
            None => Err(ServerError::SessionNotFound(session_id.to_string())),
        }
    }

    /// Append an action to the session's ordered log.
    pub async fn add_action(&self, session_id: &str, record: ActionRecord) -> Result<()> {
        let session = self.live(session_id).await?;
        let mut session = session.lock().await;
        session.ensure_active()?;
        debug!(session_id = %session_id, tool = %record.tool_name, "recorded action");
        session.actions.push(record);
        session.touch();
        Ok(())
    }

    /// Store a named artifact, replacing an earlier one with the same name.
    pub async fn add_artifact(
        &self,
        session_id: &str,
        name: &str,
        reference: ArtifactRef,
    ) -> Result<()> {
        let session = self.live(session_id).await?;
        let mut session = session.lock().await;
        session.ensure_active()?;
        session.artifacts.insert(name.to_string(), reference);
        session.touch();
        Ok(())
    }

    pub async fn get_session(&self, session_id: &str) -> Result<SessionSnapshot> {
        let session = {
            let slots = self.slots.read().await;
            match slots.get(session_id) {
                Some(Slot::Active(session)) => Arc::clone(session),
                Some(Slot::Closed(snapshot)) => return Ok(snapshot.as_ref().clone()),
                None => return Err(ServerError::SessionNotFound(session_id.to_string())),
            }
        };
        let snapshot = session.lock().await.snapshot();
        Ok(snapshot)
    }

    /// All sessions, oldest first, including closed ones not yet purged.
    pub async fn list_sessions(&self) -> Vec<SessionSummary> {
        let slots: Vec<Slot> = {
            let slots = self.slots.read().await;
            slots
                .values()
                .map(|slot| match slot {
                    Slot::Active(s) => Slot::Active(Arc::clone(s)),
                    Slot::Closed(s) => Slot::Closed(Arc::clone(s)),
                })
                .collect()
        };

        let mut summaries = Vec::with_capacity(slots.len());
        for slot in slots {
            let summary = match slot {
                Slot::Active(session) => SessionSummary::from(&session.lock().await.snapshot()),
                Slot::Closed(snapshot) => SessionSummary::from(snapshot.as_ref()),
            };
            summaries.push(summary);
        }
        summaries.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.session_id.cmp(&b.session_id))
        });
        summaries
    }

    /// Close a session, keeping its terminal snapshot. Closing twice returns the same snapshot.
    pub async fn close_session(&self, session_id: &str) -> Result<SessionSnapshot> {
        let mut slots = self.slots.write().await;
        let session = match slots.get(session_id) {
            Some(Slot::Active(session)) => Arc::clone(session),
            Some(Slot::Closed(snapshot)) => return Ok(snapshot.as_ref().clone()),
            None => return Err(ServerError::SessionNotFound(session_id.to_string())),
        };

        let snapshot = {
            let mut session = session.lock().await;
            session.state = SessionState::Closed;
            session.touch();
            session.snapshot()
        };
        slots.insert(session_id.to_string(), Slot::Closed(Arc::new(snapshot.clone())));
        info!(
            session_id = %session_id,
            actions = snapshot.actions.len(),
            artifacts = snapshot.artifacts.len(),
            "closed session"
        );
        Ok(snapshot)
    }

    /// Forget a session entirely. Returns false if it was unknown.
    pub async fn purge(&self, session_id: &str) -> bool {
        self.slots.write().await.remove(session_id).is_some()
    }

    /// Close active sessions idle for at least `ttl`, returning their ids.
    pub async fn sweep_expired(&self, ttl: Duration) -> Vec<String> {
        let candidates: Vec<(String, Arc<Mutex<Session>>)> = {
            let slots = self.slots.read().await;
            slots
                .iter()
                .filter_map(|(id, slot)| match slot {
                    Slot::Active(session) => Some((id.clone(), Arc::clone(session))),
                    Slot::Closed(_) => None,
                })
                .collect()
        };

        let mut expired = Vec::new();
        for (session_id, session) in candidates {
            let idle = session.lock().await.last_seen.elapsed();
            if idle >= ttl && self.close_session(&session_id).await.is_ok() {
                expired.push(session_id);
            }
        }
        if !expired.is_empty() {
            info!(count = expired.len(), "expired idle sessions");
        }
        expired
    }

    pub async fn active_count(&self) -> usize {
        self.slots
            .read()
            .await
            .values()
            .filter(|slot| matches!(slot, Slot::Active(_)))
            .count()
    }

    /// Periodically expire idle sessions until `cancel` fires.
    pub fn spawn_sweeper(
        self: &Arc<Self>,
        ttl: Duration,
        interval: Duration,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        manager.sweep_expired(ttl).await;
                    }
                }
            }
            debug!("session sweeper stopped");
        })
    }
}
