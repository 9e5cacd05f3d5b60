use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::Utc;
use shared::{
    domain::{RunId, SessionAction, SessionState},
    protocol::SessionSnapshot,
};
use tokio::sync::watch;
use tracing::debug;

use crate::error::SessionError;

/// Single-writer owner of the shared session state.
///
/// Every mutation goes through [`SessionStore::dispatch`] (or one of its
/// run-scoped variants) and is published to subscribers as a fresh
/// [`SessionSnapshot`]. Readers never share the mutable state directly.
#[derive(Clone)]
pub struct SessionStore {
    inner: Arc<StoreInner>,
}

struct StoreInner {
    state: Mutex<SessionSnapshot>,
    tx: watch::Sender<SessionSnapshot>,
    current_run: Mutex<RunId>,
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionStore {
    pub fn new() -> Self {
        let initial = SessionSnapshot::initial();
        let (tx, _) = watch::channel(initial.clone());
        Self {
            inner: Arc::new(StoreInner {
                state: Mutex::new(initial),
                tx,
                current_run: Mutex::new(RunId(0)),
            }),
        }
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        lock(&self.inner.state).clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.inner.tx.subscribe()
    }

    pub fn dispatch(&self, action: SessionAction) -> Result<SessionSnapshot, SessionError> {
        self.transact(|_| (action, ())).map(|(_, snapshot)| snapshot)
    }

    /// Derives one action from the current state and applies it without
    /// letting another writer in between.
    pub fn transact<R>(
        &self,
        decide: impl FnOnce(&SessionState) -> (SessionAction, R),
    ) -> Result<(R, SessionSnapshot), SessionError> {
        let mut snapshot = lock(&self.inner.state);
        let (action, value) = decide(&snapshot.state);
        if snapshot.state.apply(&action)? {
            snapshot.revision.0 += 1;
            if matches!(action, SessionAction::SetSubmission { .. }) {
                snapshot.submission_seq.0 += 1;
            }
            snapshot.updated_at = Utc::now();
            debug!(
                action = action.name(),
                revision = snapshot.revision.0,
                "session state updated"
            );
            self.inner.tx.send_replace(snapshot.clone());
        }
        Ok((value, snapshot.clone()))
    }

    /// Retires every earlier run and returns the id of the new current run.
    pub fn begin_run(&self) -> RunId {
        let mut current = lock(&self.inner.current_run);
        current.0 += 1;
        *current
    }

    /// Applies `action` only while `run` is still the current run.
    /// Returns `Ok(None)` when the run has been superseded.
    pub fn dispatch_for_run(
        &self,
        run: RunId,
        action: SessionAction,
    ) -> Result<Option<SessionSnapshot>, SessionError> {
        let current = lock(&self.inner.current_run);
        if *current != run {
            debug!(
                run = run.0,
                current = current.0,
                action = action.name(),
                "dropping write from superseded run"
            );
            return Ok(None);
        }
        let snapshot = self.dispatch(action)?;
        drop(current);
        Ok(Some(snapshot))
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
