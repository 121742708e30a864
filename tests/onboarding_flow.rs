//! End-to-end onboarding flows against the libSQL backend.
//!
//! Each test walks a manager through the wizard the way the screen layer
//! does (apply edits, advance, retreat, finish) and checks what landed in
//! the database.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::timeout;
use uuid::Uuid;

use onboarding_engine::config::OnboardingConfig;
use onboarding_engine::error::{FinalizeError, StoreError};
use onboarding_engine::onboarding::model::{
    ActivityLevel, CaloriePlan, FocusModule, GoalType, LegalCheckbox, LegalDocument, ProfilePatch,
    ProfileRecord, Sex, WeightUnit,
};
use onboarding_engine::onboarding::{
    Advance, FinalizeState, FormDelta, HeightInput, HostContext, OnboardingManager,
    OnboardingStores, Step, SyncStatus,
};
use onboarding_engine::store::memory::MemoryProfileCache;
use onboarding_engine::store::{LibSqlBackend, ProfileCache, ProfileStore};

/// Maximum time any test is allowed to run before we consider it hung.
const TEST_TIMEOUT: Duration = Duration::from_secs(10);

async fn database() -> Arc<LibSqlBackend> {
    let db = LibSqlBackend::new_memory().await.unwrap();
    for doc_type in ["terms_of_service", "privacy_policy", "health_disclaimer"] {
        db.publish_legal_document(&LegalDocument {
            doc_type: doc_type.into(),
            version: "1".into(),
        })
        .await
        .unwrap();
    }
    Arc::new(db)
}

fn stores(db: Arc<LibSqlBackend>, profiles: Arc<dyn ProfileStore>) -> OnboardingStores {
    OnboardingStores {
        profiles,
        weight_log: db.clone(),
        legal: db.clone(),
        caches: vec![Arc::new(MemoryProfileCache::new()), db],
    }
}

fn config(host_context: HostContext) -> OnboardingConfig {
    OnboardingConfig {
        host_context,
        sync_retry_backoff: Duration::from_millis(1),
        ..Default::default()
    }
}

fn deltas(step: Step) -> Vec<FormDelta> {
    match step {
        Step::Name => vec![FormDelta::Name("Grace".into())],
        Step::DateOfBirth => vec![FormDelta::DateOfBirth("1985-09-30".into())],
        Step::Sex => vec![FormDelta::Sex(Sex::Female)],
        Step::Height => vec![FormDelta::Height(HeightInput::imperial("5", "6"))],
        Step::ActivityLevel => vec![FormDelta::ActivityLevel(ActivityLevel::Light)],
        Step::CurrentWeight => vec![
            FormDelta::WeightUnit(WeightUnit::Kg),
            FormDelta::CurrentWeight("72".into()),
            FormDelta::BodyFatPercent("30".into()),
        ],
        Step::GoalType => vec![FormDelta::GoalType(GoalType::Lose)],
        Step::GoalWeight => vec![FormDelta::GoalWeight("65".into())],
        Step::Plan => vec![FormDelta::CaloriePlan(CaloriePlan::Mild)],
        Step::FocusModules => vec![FormDelta::FocusModules(vec![
            FocusModule::Weight,
            FocusModule::Food,
        ])],
        Step::Legal => LegalCheckbox::REQUIRED
            .into_iter()
            .map(|checkbox| FormDelta::Legal {
                checkbox,
                accepted: true,
            })
            .collect(),
    }
}

/// Fill and advance until the last step passes validation.
async fn walk(manager: &OnboardingManager) -> Vec<Step> {
    let mut visited = Vec::new();
    loop {
        let step = manager.status().await.step.unwrap();
        visited.push(step);
        for delta in deltas(step) {
            manager.apply(delta).await;
        }
        match manager.advance().await.unwrap() {
            Advance::Moved { .. } => {}
            Advance::ReadyToFinalize => return visited,
        }
    }
}

async fn wait_for_idle(manager: &OnboardingManager) {
    let mut sync = manager.sync().subscribe();
    sync.wait_for(|s| s.status == SyncStatus::Idle && s.last_saved_at.is_some())
        .await
        .unwrap();
}

#[tokio::test]
async fn full_flow_commits_profile() {
    timeout(TEST_TIMEOUT, async {
        let db = database().await;
        let id = Uuid::new_v4();
        let manager = OnboardingManager::new(
            id,
            &config(HostContext::Standard),
            stores(db.clone(), db.clone()),
        );

        let visited = walk(&manager).await;
        assert_eq!(visited, Step::ALL.to_vec());

        let preview = manager.preview().await.unwrap();
        let record = manager.finish().await.unwrap();
        assert!(record.onboarding_complete);
        assert_eq!(record.display_name.as_deref(), Some("Grace"));
        assert_eq!(record.calorie_target, Some(preview.result.target_calories));
        assert_eq!(record.maintenance_calories, Some(preview.maintenance_calories));
        assert_eq!(record.weight_unit, Some(WeightUnit::Kg));
        assert_eq!(record.calorie_plan, Some(CaloriePlan::Mild));
        assert_eq!(record.focus_modules, vec![FocusModule::Weight, FocusModule::Food]);
        assert!(record.calorie_target.unwrap() >= 1200);
        assert!(record.maintenance_calories.unwrap() > record.calorie_target.unwrap());

        let stored = db.get_profile(id).await.unwrap().unwrap();
        assert!(stored.onboarding_complete);
        // 72 kg is the canonical 158.7 lb.
        assert_eq!(stored.weight_lb, Some(158.7));
        // The weight log runs in the background; give it a moment.
        while db.list_weight_logs(id).await.unwrap().is_empty() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(db.list_weight_logs(id).await.unwrap().len(), 1);

        let cached = db.get_cached_profile(id).await.unwrap().unwrap();
        assert_eq!(cached.calorie_target, record.calorie_target);
        assert_eq!(manager.finalizer().state(), FinalizeState::Committed);
        assert_eq!(manager.status().await.sync.status, SyncStatus::Idle);
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn constrained_host_skips_plan_step() {
    timeout(TEST_TIMEOUT, async {
        let db = database().await;
        let id = Uuid::new_v4();
        let manager = OnboardingManager::new(
            id,
            &config(HostContext::Constrained),
            stores(db.clone(), db.clone()),
        );
        // A plan label picked before the host was known must not be written.
        manager.apply(FormDelta::CaloriePlan(CaloriePlan::Aggressive)).await;

        let visited = walk(&manager).await;
        assert!(!visited.contains(&Step::Plan));
        assert_eq!(manager.status().await.total_steps, 11);

        let preview = manager.preview().await.unwrap();
        let record = manager.finish().await.unwrap();
        assert!(record.onboarding_complete);
        assert_eq!(record.calorie_plan, None);
        assert_eq!(record.calorie_target, Some(preview.result.target_calories));
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn late_edits_change_committed_target() {
    timeout(TEST_TIMEOUT, async {
        let db = database().await;
        let id = Uuid::new_v4();
        let manager = OnboardingManager::new(
            id,
            &config(HostContext::Standard),
            stores(db.clone(), db.clone()),
        );
        walk(&manager).await;
        let planned = manager.preview().await.unwrap().result.target_calories;

        manager.apply(FormDelta::ActivityLevel(ActivityLevel::VeryHigh)).await;
        manager.apply(FormDelta::CaloriePlan(CaloriePlan::Standard)).await;
        let fresh = manager.preview().await.unwrap().result.target_calories;
        assert_ne!(fresh, planned);

        let record = manager.finish().await.unwrap();
        assert_eq!(record.calorie_target, Some(fresh));
        let stored = db.get_profile(id).await.unwrap().unwrap();
        assert_eq!(stored.calorie_target, Some(fresh));
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn back_navigation_keeps_entered_data() {
    timeout(TEST_TIMEOUT, async {
        let db = database().await;
        let manager = OnboardingManager::new(
            Uuid::new_v4(),
            &config(HostContext::Standard),
            stores(db.clone(), db.clone()),
        );

        for step in [Step::Name, Step::DateOfBirth, Step::Sex] {
            for delta in deltas(step) {
                manager.apply(delta).await;
            }
            manager.advance().await.unwrap();
        }
        assert_eq!(manager.status().await.current_step, 4);

        assert_eq!(manager.retreat().await, Some(3));
        assert_eq!(manager.retreat().await, Some(2));
        let session = manager.session().await;
        assert_eq!(session.name, "Grace");
        assert_eq!(session.date_of_birth, "1985-09-30");
        assert_eq!(session.sex, Some(Sex::Female));

        // Re-advancing needs no re-entry.
        manager.advance().await.unwrap();
        manager.advance().await.unwrap();
        assert_eq!(manager.status().await.current_step, 4);
        assert_eq!(manager.status().await.transitions, 7);
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn resume_repopulates_from_store() {
    timeout(TEST_TIMEOUT, async {
        let db = database().await;
        let id = Uuid::new_v4();
        {
            let manager = OnboardingManager::new(
                id,
                &config(HostContext::Standard),
                stores(db.clone(), db.clone()),
            );
            for step in [Step::Name, Step::DateOfBirth, Step::Sex, Step::Height] {
                for delta in deltas(step) {
                    manager.apply(delta).await;
                }
                manager.advance().await.unwrap();
            }
            wait_for_idle(&manager).await;
        }

        // Fresh memory cache: the settings cache has nothing either, so the
        // profile store is the source.
        let resumed = OnboardingManager::resume(
            id,
            &config(HostContext::Standard),
            stores(db.clone(), db.clone()),
        )
        .await
        .unwrap();
        let session = resumed.session().await;
        assert_eq!(session.name, "Grace");
        assert_eq!(session.date_of_birth, "1985-09-30");
        assert_eq!(session.height, HeightInput::imperial("5", "6"));
        assert_eq!(session.current_step, 1);
    })
    .await
    .expect("test timed out");
}

/// Profile store whose commit write stalls while `slow` is set.
struct SlowCommitStore {
    inner: Arc<LibSqlBackend>,
    slow: AtomicBool,
}

#[async_trait]
impl ProfileStore for SlowCommitStore {
    async fn get_profile(&self, id: Uuid) -> Result<Option<ProfileRecord>, StoreError> {
        self.inner.get_profile(id).await
    }

    async fn update_profile(
        &self,
        id: Uuid,
        patch: &ProfilePatch,
    ) -> Result<ProfileRecord, StoreError> {
        if patch.onboarding_complete == Some(true) && self.slow.load(Ordering::SeqCst) {
            tokio::time::sleep(Duration::from_millis(300)).await;
        }
        self.inner.update_profile(id, patch).await
    }
}

#[tokio::test]
async fn commit_timeout_then_retry_succeeds() {
    timeout(TEST_TIMEOUT, async {
        let db = database().await;
        let id = Uuid::new_v4();
        let slow = Arc::new(SlowCommitStore {
            inner: db.clone(),
            slow: AtomicBool::new(true),
        });
        let cfg = OnboardingConfig {
            commit_timeout: Duration::from_millis(50),
            ..config(HostContext::Standard)
        };
        let manager = OnboardingManager::new(id, &cfg, stores(db.clone(), slow.clone()));
        walk(&manager).await;

        let err = manager.finish().await.unwrap_err();
        assert!(matches!(err, FinalizeError::CommitTimeout { .. }));
        assert_eq!(err.i18n_key(), "onboarding.errors.service_waking_up");
        assert!(err.is_retryable());
        assert!(!db.get_profile(id).await.unwrap().unwrap().onboarding_complete);
        assert_eq!(manager.finalizer().state(), FinalizeState::FailedRetryable);

        // The service wakes up; the late write lands and the retry commits.
        tokio::time::sleep(Duration::from_millis(350)).await;
        let late = db.get_profile(id).await.unwrap().unwrap();
        assert!(late.onboarding_complete);

        slow.slow.store(false, Ordering::SeqCst);
        let record = manager.finish().await.unwrap();
        assert_eq!(record.onboarding_completed_at, late.onboarding_completed_at);

        let again = manager.finish().await.unwrap_err();
        assert!(!again.is_retryable());
    })
    .await
    .expect("test timed out");
}
