//! Background sync engine.
//!
//! Every scheduled save gets a monotonically increasing generation. Only the
//! newest generation may write its outcome into `SyncState`; older saves
//! still run to completion (and their tickets still resolve) but their
//! results are dropped as stale. `flush` takes a fresh generation too, so an
//! in-flight background save can never overwrite the result of a flush.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::model::ProfilePatch;
use crate::config::OnboardingConfig;
use crate::error::{FlushError, StoreError, SyncError};
use crate::store::ProfileStore;

/// Tag recorded for saves issued by `flush`.
pub const FLUSH_TAG: &str = "flush";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    #[default]
    Idle,
    Saving,
    Error,
}

/// Observable persistence state for the session.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SyncState {
    pub status: SyncStatus,
    pub last_saved_at: Option<DateTime<Utc>>,
    pub last_error: Option<SyncError>,
    /// Tag of the save that last changed the state.
    pub last_tag: Option<String>,
    /// Generation of the save that last changed the state.
    pub generation: u64,
}

struct Inner {
    store: Arc<dyn ProfileStore>,
    latest: AtomicU64,
    state: watch::Sender<SyncState>,
    max_attempts: u32,
    backoff: Duration,
}

impl Inner {
    fn is_latest(&self, generation: u64) -> bool {
        self.latest.load(Ordering::SeqCst) == generation
    }

    /// Claim the next generation and mark the state as saving.
    fn begin(&self, tag: &str) -> u64 {
        let generation = self.latest.fetch_add(1, Ordering::SeqCst) + 1;
        self.state.send_if_modified(|state| {
            if !self.is_latest(generation) {
                return false;
            }
            state.status = SyncStatus::Saving;
            state.last_tag = Some(tag.to_string());
            state.generation = generation;
            true
        });
        generation
    }

    /// Write a save's outcome, unless a newer save has been issued since.
    fn publish(&self, generation: u64, tag: &str, outcome: Result<(), &SyncError>) {
        let applied = self.state.send_if_modified(|state| {
            if !self.is_latest(generation) {
                return false;
            }
            match outcome {
                Ok(()) => {
                    state.status = SyncStatus::Idle;
                    state.last_saved_at = Some(Utc::now());
                    state.last_error = None;
                }
                Err(err) => {
                    state.status = SyncStatus::Error;
                    state.last_error = Some(err.clone());
                }
            }
            state.last_tag = Some(tag.to_string());
            state.generation = generation;
            true
        });
        if !applied {
            debug!(tag, generation, "Dropping stale sync outcome");
        }
    }
}

/// Schedules fire-and-forget profile saves and the final synchronous flush.
#[derive(Clone)]
pub struct SyncEngine {
    inner: Arc<Inner>,
}

impl SyncEngine {
    pub fn new(store: Arc<dyn ProfileStore>, max_attempts: u32, backoff: Duration) -> Self {
        let (state, _) = watch::channel(SyncState::default());
        Self {
            inner: Arc::new(Inner {
                store,
                latest: AtomicU64::new(0),
                state,
                max_attempts: max_attempts.max(1),
                backoff,
            }),
        }
    }

    pub fn from_config(store: Arc<dyn ProfileStore>, config: &OnboardingConfig) -> Self {
        Self::new(store, config.sync_max_attempts, config.sync_retry_backoff)
    }

    /// Current sync state snapshot.
    pub fn state(&self) -> SyncState {
        self.inner.state.borrow().clone()
    }

    /// Watch sync state changes.
    pub fn subscribe(&self) -> watch::Receiver<SyncState> {
        self.inner.state.subscribe()
    }

    /// Start a background save of `draft` and return immediately.
    ///
    /// Dropping the returned ticket detaches the save. An empty draft is
    /// skipped without claiming a generation.
    pub fn schedule(
        &self,
        draft: ProfilePatch,
        owner_id: Uuid,
        tag: impl Into<String>,
    ) -> SyncTicket {
        let tag = tag.into();
        if draft.is_empty() {
            debug!(tag = %tag, profile_id = %owner_id, "Skipping empty draft");
            return SyncTicket {
                tag,
                generation: self.inner.latest.load(Ordering::SeqCst),
                handle: None,
            };
        }

        let generation = self.inner.begin(&tag);
        let inner = self.inner.clone();
        let task_tag = tag.clone();
        let handle = tokio::spawn(async move {
            let result = run_save(&inner, &draft, owner_id, &task_tag, generation).await;
            inner.publish(generation, &task_tag, result.as_ref().map(|_| ()));
            result
        });

        SyncTicket {
            tag,
            generation,
            handle: Some(handle),
        }
    }

    /// Write `draft` now and wait for the store to acknowledge it.
    ///
    /// Supersedes any in-flight background save. A single attempt is made;
    /// the failure goes back to the caller as well as into `SyncState`.
    pub async fn flush(&self, draft: &ProfilePatch, owner_id: Uuid) -> Result<(), FlushError> {
        let generation = self.inner.begin(FLUSH_TAG);
        let started = Instant::now();

        let result = if draft.is_empty() {
            Ok(())
        } else {
            self.inner
                .store
                .update_profile(owner_id, draft)
                .await
                .map(|_| ())
        };

        match result {
            Ok(()) => {
                info!(
                    profile_id = %owner_id,
                    generation,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Draft flushed"
                );
                self.inner.publish(generation, FLUSH_TAG, Ok(()));
                Ok(())
            }
            Err(source) => {
                warn!(profile_id = %owner_id, generation, error = %source, "Draft flush failed");
                let err = SyncError {
                    tag: FLUSH_TAG.to_string(),
                    generation,
                    source: source.clone(),
                };
                self.inner.publish(generation, FLUSH_TAG, Err(&err));
                Err(FlushError {
                    profile_id: owner_id,
                    source,
                })
            }
        }
    }
}

async fn run_save(
    inner: &Inner,
    draft: &ProfilePatch,
    owner_id: Uuid,
    tag: &str,
    generation: u64,
) -> Result<(), SyncError> {
    let started = Instant::now();
    let mut attempt = 1;
    loop {
        match inner.store.update_profile(owner_id, draft).await {
            Ok(_) => {
                debug!(
                    profile_id = %owner_id,
                    tag,
                    generation,
                    attempt,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Background save complete"
                );
                return Ok(());
            }
            Err(e) => {
                let retry = attempt < inner.max_attempts && inner.is_latest(generation);
                warn!(
                    profile_id = %owner_id,
                    tag,
                    generation,
                    attempt,
                    retry,
                    error = %e,
                    "Background save failed"
                );
                if !retry {
                    return Err(SyncError {
                        tag: tag.to_string(),
                        generation,
                        source: e,
                    });
                }
                tokio::time::sleep(inner.backoff * attempt).await;
                attempt += 1;
            }
        }
    }
}

/// Handle to one scheduled save.
pub struct SyncTicket {
    pub tag: String,
    pub generation: u64,
    handle: Option<JoinHandle<Result<(), SyncError>>>,
}

impl SyncTicket {
    /// Whether the save has finished (or was skipped).
    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().is_none_or(|h| h.is_finished())
    }

    /// Wait for this save's own outcome, stale or not.
    pub async fn wait(self) -> Result<(), SyncError> {
        let Some(handle) = self.handle else {
            return Ok(());
        };
        match handle.await {
            Ok(result) => result,
            Err(e) => Err(SyncError {
                tag: self.tag,
                generation: self.generation,
                source: StoreError::Unavailable(format!("save task aborted: {e}")),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::sync::atomic::AtomicUsize;

    use async_trait::async_trait;
    use tokio::sync::Notify;

    use super::*;
    use crate::onboarding::model::ProfileRecord;
    use crate::store::memory::InMemoryProfileStore;

    /// Store whose behaviour is keyed by the patch's display name.
    #[derive(Default)]
    struct ScriptedStore {
        profiles: InMemoryProfileStore,
        gates: Mutex<HashMap<String, Arc<Notify>>>,
        failures: Mutex<HashMap<String, usize>>,
        calls: AtomicUsize,
    }

    impl ScriptedStore {
        fn gate(&self, name: &str) -> Arc<Notify> {
            let gate = Arc::new(Notify::new());
            self.gates.lock().unwrap().insert(name.to_string(), gate.clone());
            gate
        }

        fn fail(&self, name: &str, times: usize) {
            self.failures.lock().unwrap().insert(name.to_string(), times);
        }
    }

    #[async_trait]
    impl ProfileStore for ScriptedStore {
        async fn get_profile(&self, id: Uuid) -> Result<Option<ProfileRecord>, StoreError> {
            self.profiles.get_profile(id).await
        }

        async fn update_profile(
            &self,
            id: Uuid,
            patch: &ProfilePatch,
        ) -> Result<ProfileRecord, StoreError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let key = patch.display_name.clone().unwrap_or_default();
            let gate = self.gates.lock().unwrap().get(&key).cloned();
            if let Some(gate) = gate {
                gate.notified().await;
            }
            let fail = match self.failures.lock().unwrap().get_mut(&key) {
                Some(n) if *n > 0 => {
                    *n -= 1;
                    true
                }
                _ => false,
            };
            if fail {
                return Err(StoreError::Unavailable("offline".into()));
            }
            self.profiles.update_profile(id, patch).await
        }
    }

    fn named(name: &str) -> ProfilePatch {
        ProfilePatch {
            display_name: Some(name.to_string()),
            ..Default::default()
        }
    }

    fn engine(store: Arc<ScriptedStore>, attempts: u32) -> SyncEngine {
        SyncEngine::new(store, attempts, Duration::from_millis(1))
    }

    #[tokio::test]
    async fn stale_failure_does_not_overwrite_newer_success() {
        let store = Arc::new(ScriptedStore::default());
        let gate_a = store.gate("a");
        store.fail("a", usize::MAX);
        let sync = engine(store.clone(), 3);
        let owner = Uuid::new_v4();

        let a = sync.schedule(named("a"), owner, "name");
        let b = sync.schedule(named("b"), owner, "sex");
        b.wait().await.unwrap();
        assert_eq!(sync.state().status, SyncStatus::Idle);

        gate_a.notify_one();
        let err = a.wait().await.unwrap_err();
        assert_eq!(err.tag, "name");

        let state = sync.state();
        assert_eq!(state.status, SyncStatus::Idle);
        assert!(state.last_error.is_none());
        assert_eq!(state.last_tag.as_deref(), Some("sex"));
        // Superseded saves stop retrying after the first failure.
        assert_eq!(store.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn failure_surfaces_after_retries() {
        let store = Arc::new(ScriptedStore::default());
        store.fail("a", usize::MAX);
        let sync = engine(store.clone(), 2);

        let err = sync
            .schedule(named("a"), Uuid::new_v4(), "name")
            .wait()
            .await
            .unwrap_err();
        assert!(matches!(err.source, StoreError::Unavailable(_)));

        let state = sync.state();
        assert_eq!(state.status, SyncStatus::Error);
        assert_eq!(state.last_error.unwrap().tag, "name");
        assert_eq!(store.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn transient_failure_is_retried() {
        let store = Arc::new(ScriptedStore::default());
        store.fail("a", 1);
        let sync = engine(store.clone(), 3);
        let owner = Uuid::new_v4();

        sync.schedule(named("a"), owner, "name").wait().await.unwrap();
        assert_eq!(sync.state().status, SyncStatus::Idle);
        assert!(sync.state().last_saved_at.is_some());
        let saved = store.profiles.get_profile(owner).await.unwrap().unwrap();
        assert_eq!(saved.display_name.as_deref(), Some("a"));
    }

    #[tokio::test]
    async fn flush_reports_failure_and_supersedes_background_save() {
        let store = Arc::new(ScriptedStore::default());
        let gate_a = store.gate("a");
        store.fail("b", 1);
        let sync = engine(store.clone(), 1);
        let owner = Uuid::new_v4();

        let a = sync.schedule(named("a"), owner, "name");
        let err = sync.flush(&named("b"), owner).await.unwrap_err();
        assert_eq!(err.profile_id, owner);
        assert_eq!(sync.state().status, SyncStatus::Error);

        gate_a.notify_one();
        a.wait().await.unwrap();
        assert_eq!(sync.state().status, SyncStatus::Error);
        assert_eq!(sync.state().last_tag.as_deref(), Some(FLUSH_TAG));
    }

    #[tokio::test]
    async fn flush_success_marks_idle() {
        let store = Arc::new(ScriptedStore::default());
        let sync = engine(store.clone(), 1);
        let owner = Uuid::new_v4();
        sync.flush(&named("c"), owner).await.unwrap();
        assert_eq!(sync.state().status, SyncStatus::Idle);
        assert!(store.profiles.get_profile(owner).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn subscribers_see_saving_then_idle() {
        let store = Arc::new(ScriptedStore::default());
        let gate = store.gate("a");
        let sync = engine(store, 1);
        let mut rx = sync.subscribe();

        let ticket = sync.schedule(named("a"), Uuid::new_v4(), "name");
        rx.changed().await.unwrap();
        assert_eq!(rx.borrow_and_update().status, SyncStatus::Saving);

        gate.notify_one();
        rx.changed().await.unwrap();
        assert_eq!(rx.borrow_and_update().status, SyncStatus::Idle);
        ticket.wait().await.unwrap();
    }

    #[tokio::test]
    async fn empty_draft_is_skipped() {
        let store = Arc::new(ScriptedStore::default());
        let sync = engine(store.clone(), 1);
        let ticket = sync.schedule(ProfilePatch::default(), Uuid::new_v4(), "name");
        assert!(ticket.is_finished());
        ticket.wait().await.unwrap();
        assert_eq!(store.calls.load(Ordering::SeqCst), 0);
        assert_eq!(sync.state(), SyncState::default());
    }
}
