//! Finalization orchestrator.
//!
//! Order of operations: in-flight guard, legal checkboxes, legal document
//! acceptance, synchronous flush, then one bounded commit. A successful
//! commit is pushed into every profile cache before completion is signalled.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use chrono::Utc;
use futures::future::join_all;
use serde::Serialize;
use tokio::sync::watch;
use tracing::{info, warn};
use uuid::Uuid;

use super::calories;
use super::draft::build_draft;
use super::model::{ProfilePatch, ProfileRecord};
use super::session::OnboardingSession;
use super::state::Step;
use super::sync::SyncEngine;
use super::validate;
use crate::error::{FinalizeError, StoreError, ValidationError};
use crate::store::{LegalDocumentStore, ProfileCache, ProfileStore};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FinalizeState {
    #[default]
    Idle,
    InFlight,
    Committed,
    FailedRetryable,
}

/// Clears the in-flight flag however the attempt ends.
struct InFlightGuard<'a>(&'a AtomicBool);

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

pub struct Finalizer {
    profiles: Arc<dyn ProfileStore>,
    legal: Arc<dyn LegalDocumentStore>,
    caches: Vec<Arc<dyn ProfileCache>>,
    sync: SyncEngine,
    commit_timeout: Duration,
    in_flight: AtomicBool,
    state: watch::Sender<FinalizeState>,
}

impl Finalizer {
    pub fn new(
        profiles: Arc<dyn ProfileStore>,
        legal: Arc<dyn LegalDocumentStore>,
        caches: Vec<Arc<dyn ProfileCache>>,
        sync: SyncEngine,
        commit_timeout: Duration,
    ) -> Self {
        let (state, _) = watch::channel(FinalizeState::Idle);
        Self {
            profiles,
            legal,
            caches,
            sync,
            commit_timeout,
            in_flight: AtomicBool::new(false),
            state,
        }
    }

    pub fn state(&self) -> FinalizeState {
        *self.state.borrow()
    }

    /// Watch for completion. `Committed` is the signal to leave onboarding.
    pub fn subscribe(&self) -> watch::Receiver<FinalizeState> {
        self.state.subscribe()
    }

    /// Commit the session. Returns the committed profile.
    pub async fn finalize(
        &self,
        session: &OnboardingSession,
    ) -> Result<ProfileRecord, FinalizeError> {
        let profile_id = session.profile_id;
        if self.state() == FinalizeState::Committed {
            return Err(FinalizeError::AlreadyCommitted { profile_id });
        }
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(FinalizeError::AlreadyInFlight { profile_id });
        }
        let _guard = InFlightGuard(&self.in_flight);
        self.state.send_replace(FinalizeState::InFlight);

        let started = Instant::now();
        match self.run(session).await {
            Ok(record) => {
                self.propagate(&record).await;
                info!(
                    profile_id = %profile_id,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Onboarding committed"
                );
                self.state.send_replace(FinalizeState::Committed);
                Ok(record)
            }
            Err(e) => {
                warn!(profile_id = %profile_id, error = %e, "Onboarding finalization failed");
                self.state.send_replace(FinalizeState::FailedRetryable);
                Err(e)
            }
        }
    }

    async fn run(&self, session: &OnboardingSession) -> Result<ProfileRecord, FinalizeError> {
        let profile_id = session.profile_id;
        let today = Utc::now().date_naive();

        validate::validate_step_on(Step::Legal, session, today).map_err(FinalizeError::Incomplete)?;

        let documents = self
            .legal
            .fetch_active_documents()
            .await
            .map_err(FinalizeError::Legal)?;
        if documents.is_empty() {
            return Err(FinalizeError::Integrity(
                "no active legal documents to accept".to_string(),
            ));
        }
        self.legal
            .accept_documents(profile_id, &documents)
            .await
            .map_err(FinalizeError::Legal)?;

        self.sync.flush(&build_draft(session), profile_id).await?;

        let commit = commit_patch(session, today)?;
        self.commit(profile_id, commit).await
    }

    /// Run the commit against a deadline.
    ///
    /// The write runs on its own task, so a timed-out commit can still land
    /// later. The payload is idempotent, which makes that harmless.
    async fn commit(
        &self,
        profile_id: Uuid,
        commit: ProfilePatch,
    ) -> Result<ProfileRecord, FinalizeError> {
        let profiles = self.profiles.clone();
        let write = tokio::spawn(async move { profiles.update_profile(profile_id, &commit).await });

        match tokio::time::timeout(self.commit_timeout, write).await {
            Err(_) => Err(FinalizeError::CommitTimeout {
                timeout: self.commit_timeout,
            }),
            Ok(Err(join)) => Err(FinalizeError::Commit(StoreError::Unavailable(format!(
                "commit task aborted: {join}"
            )))),
            Ok(Ok(result)) => result.map_err(FinalizeError::Commit),
        }
    }

    async fn propagate(&self, record: &ProfileRecord) {
        let puts = self.caches.iter().map(|cache| async move {
            (cache.name().to_string(), cache.put_profile(record).await)
        });
        for (name, result) in join_all(puts).await {
            if let Err(e) = result {
                warn!(
                    profile_id = %record.id,
                    cache = %name,
                    error = %e,
                    "Failed to update profile cache"
                );
            }
        }
    }
}

/// The final profile write: calorie targets, focus ranking and the
/// completion flag.
///
/// Targets are always recomputed from the session being committed; the
/// session's cached copy only feeds the background drafts.
fn commit_patch(
    session: &OnboardingSession,
    today: chrono::NaiveDate,
) -> Result<ProfilePatch, FinalizeError> {
    let preview = calories::plan_for_session(session, today).ok_or_else(|| {
        FinalizeError::Incomplete(ValidationError::new("onboarding.plan.errors.missing_metrics"))
    })?;
    let target = preview.result.target_calories;
    let maintenance = preview.maintenance_calories;

    Ok(ProfilePatch {
        calorie_target: Some(target),
        maintenance_calories: Some(maintenance),
        focus_modules: (!session.focus_modules.is_empty()).then(|| session.focus_modules.clone()),
        onboarding_complete: Some(true),
        onboarding_completed_at: Some(Utc::now()),
        ..Default::default()
    })
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use async_trait::async_trait;
    use tokio::sync::Notify;

    use super::*;
    use crate::onboarding::model::{
        ActivityLevel, CaloriePlan, FocusModule, GoalType, LegalCheckbox, LegalDocument, Sex,
    };
    use crate::onboarding::session::{FormDelta, HeightInput};
    use crate::onboarding::state::HostContext;
    use crate::store::memory::{InMemoryLegalDocuments, InMemoryProfileStore, MemoryProfileCache};

    /// Profile store that can hold the commit on a gate or fail the flush.
    #[derive(Default)]
    struct TestProfiles {
        inner: InMemoryProfileStore,
        commit_gate: Option<Arc<Notify>>,
        fail_flush: bool,
        commits: AtomicUsize,
    }

    #[async_trait]
    impl ProfileStore for TestProfiles {
        async fn get_profile(&self, id: Uuid) -> Result<Option<ProfileRecord>, StoreError> {
            self.inner.get_profile(id).await
        }

        async fn update_profile(
            &self,
            id: Uuid,
            patch: &ProfilePatch,
        ) -> Result<ProfileRecord, StoreError> {
            if patch.onboarding_complete == Some(true) {
                self.commits.fetch_add(1, Ordering::SeqCst);
                if let Some(gate) = &self.commit_gate {
                    gate.notified().await;
                }
            } else if self.fail_flush {
                return Err(StoreError::Unavailable("offline".into()));
            }
            self.inner.update_profile(id, patch).await
        }
    }

    struct BrokenCache;

    #[async_trait]
    impl ProfileCache for BrokenCache {
        fn name(&self) -> &str {
            "broken"
        }

        async fn put_profile(&self, _record: &ProfileRecord) -> Result<(), StoreError> {
            Err(StoreError::Query("disk full".into()))
        }

        async fn get_cached_profile(&self, _id: Uuid) -> Result<Option<ProfileRecord>, StoreError> {
            Ok(None)
        }
    }

    fn docs() -> Vec<LegalDocument> {
        vec![
            LegalDocument {
                doc_type: "terms".into(),
                version: "2024-01".into(),
            },
            LegalDocument {
                doc_type: "privacy".into(),
                version: "2024-03".into(),
            },
        ]
    }

    fn complete_session() -> OnboardingSession {
        let mut s = OnboardingSession::new(Uuid::new_v4(), HostContext::Standard)
            .apply(FormDelta::Name("Ada".into()))
            .apply(FormDelta::DateOfBirth("1990-05-01".into()))
            .apply(FormDelta::Sex(Sex::Female))
            .apply(FormDelta::Height(HeightInput::metric("165")))
            .apply(FormDelta::ActivityLevel(ActivityLevel::Moderate))
            .apply(FormDelta::CurrentWeight("150".into()))
            .apply(FormDelta::GoalType(GoalType::Lose))
            .apply(FormDelta::GoalWeight("140".into()))
            .apply(FormDelta::CaloriePlan(CaloriePlan::Standard))
            .apply(FormDelta::FocusModules(vec![FocusModule::Food, FocusModule::Weight]));
        for checkbox in LegalCheckbox::REQUIRED {
            s = s.apply(FormDelta::Legal {
                checkbox,
                accepted: true,
            });
        }
        s
    }

    struct Harness {
        profiles: Arc<TestProfiles>,
        legal: Arc<InMemoryLegalDocuments>,
        cache: Arc<MemoryProfileCache>,
        finalizer: Arc<Finalizer>,
    }

    fn harness(
        profiles: TestProfiles,
        documents: Vec<LegalDocument>,
        timeout: Duration,
    ) -> Harness {
        let profiles = Arc::new(profiles);
        let legal = Arc::new(InMemoryLegalDocuments::new(documents));
        let cache = Arc::new(MemoryProfileCache::new());
        let sync = SyncEngine::new(profiles.clone(), 1, Duration::from_millis(1));
        let finalizer = Arc::new(Finalizer::new(
            profiles.clone(),
            legal.clone(),
            vec![cache.clone(), Arc::new(BrokenCache)],
            sync,
            timeout,
        ));
        Harness {
            profiles,
            legal,
            cache,
            finalizer,
        }
    }

    #[tokio::test]
    async fn commits_and_propagates_to_caches() {
        let h = harness(TestProfiles::default(), docs(), Duration::from_secs(5));
        let session = complete_session();

        let record = h.finalizer.finalize(&session).await.unwrap();
        assert!(record.onboarding_complete);
        assert!(record.onboarding_completed_at.is_some());
        let expected = calories::plan_for_session(&session, Utc::now().date_naive()).unwrap();
        assert_eq!(record.calorie_target, Some(expected.result.target_calories));
        assert_eq!(record.maintenance_calories, Some(expected.maintenance_calories));
        assert_eq!(record.focus_modules, vec![FocusModule::Food, FocusModule::Weight]);
        assert_eq!(record.display_name.as_deref(), Some("Ada"));

        assert_eq!(h.legal.accepted_by(session.profile_id).await, docs());
        let cached = h.cache.get_cached_profile(session.profile_id).await.unwrap();
        assert_eq!(cached, Some(record));
        assert_eq!(h.finalizer.state(), FinalizeState::Committed);

        let again = h.finalizer.finalize(&session).await.unwrap_err();
        assert!(matches!(again, FinalizeError::AlreadyCommitted { .. }));
    }

    #[tokio::test]
    async fn cached_targets_are_not_trusted() {
        let h = harness(TestProfiles::default(), docs(), Duration::from_secs(5));
        let session = complete_session().with_calorie_targets(400, 500);

        let record = h.finalizer.finalize(&session).await.unwrap();
        let expected = calories::plan_for_session(&session, Utc::now().date_naive()).unwrap();
        assert_eq!(record.calorie_target, Some(expected.result.target_calories));
        assert_eq!(record.maintenance_calories, Some(expected.maintenance_calories));
        assert!(f64::from(record.calorie_target.unwrap()) >= calories::HARD_FLOOR_KCAL);
    }

    #[tokio::test]
    async fn unchecked_legal_box_blocks_before_any_write() {
        let h = harness(TestProfiles::default(), docs(), Duration::from_secs(5));
        let session = complete_session().apply(FormDelta::Legal {
            checkbox: LegalCheckbox::HealthDisclaimer,
            accepted: false,
        });

        let err = h.finalizer.finalize(&session).await.unwrap_err();
        assert_eq!(err.i18n_key(), "onboarding.legal.errors.required");
        assert!(h.legal.accepted_by(session.profile_id).await.is_empty());
        assert!(h.profiles.get_profile(session.profile_id).await.unwrap().is_none());
        assert_eq!(h.finalizer.state(), FinalizeState::FailedRetryable);
    }

    #[tokio::test]
    async fn empty_document_set_is_integrity_error() {
        let h = harness(TestProfiles::default(), Vec::new(), Duration::from_secs(5));
        let session = complete_session();

        let err = h.finalizer.finalize(&session).await.unwrap_err();
        assert!(matches!(err, FinalizeError::Integrity(_)));
        assert!(err.is_retryable());
        assert_eq!(h.profiles.commits.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn flush_failure_stops_before_commit() {
        let profiles = TestProfiles {
            fail_flush: true,
            ..Default::default()
        };
        let h = harness(profiles, docs(), Duration::from_secs(5));

        let err = h.finalizer.finalize(&complete_session()).await.unwrap_err();
        assert!(matches!(err, FinalizeError::Flush(_)));
        assert_eq!(h.profiles.commits.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn timeout_leaves_profile_incomplete_and_late_success_is_idempotent() {
        let gate = Arc::new(Notify::new());
        let profiles = TestProfiles {
            commit_gate: Some(gate.clone()),
            ..Default::default()
        };
        let h = harness(profiles, docs(), Duration::from_millis(20));
        let session = complete_session();

        let err = h.finalizer.finalize(&session).await.unwrap_err();
        assert!(matches!(err, FinalizeError::CommitTimeout { .. }));
        assert_eq!(err.i18n_key(), "onboarding.errors.service_waking_up");
        let stored = h.profiles.get_profile(session.profile_id).await.unwrap().unwrap();
        assert!(!stored.onboarding_complete);

        // The original write lands late.
        gate.notify_one();
        let mut first_completed_at = None;
        for _ in 0..50 {
            let stored = h.profiles.get_profile(session.profile_id).await.unwrap().unwrap();
            if stored.onboarding_complete {
                first_completed_at = stored.onboarding_completed_at;
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(first_completed_at.is_some());

        // The user retries; the replayed commit keeps the first timestamp.
        gate.notify_one();
        let record = h.finalizer.finalize(&session).await.unwrap();
        assert_eq!(record.onboarding_completed_at, first_completed_at);
        assert_eq!(h.profiles.commits.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn concurrent_finalize_is_rejected() {
        let gate = Arc::new(Notify::new());
        let profiles = TestProfiles {
            commit_gate: Some(gate.clone()),
            ..Default::default()
        };
        let h = harness(profiles, docs(), Duration::from_secs(5));
        let session = complete_session();
        let mut state = h.finalizer.subscribe();

        let first = {
            let finalizer = h.finalizer.clone();
            let session = session.clone();
            tokio::spawn(async move { finalizer.finalize(&session).await })
        };
        state
            .wait_for(|s| *s == FinalizeState::InFlight)
            .await
            .unwrap();

        let err = h.finalizer.finalize(&session).await.unwrap_err();
        assert!(matches!(err, FinalizeError::AlreadyInFlight { .. }));

        gate.notify_one();
        assert!(first.await.unwrap().is_ok());
        assert_eq!(h.finalizer.state(), FinalizeState::Committed);
    }
}
