//! OnboardingManager: the facade the screen layer drives.
//!
//! Owns the session, gates forward moves on validation, kicks off a
//! background save after every move and hands the final submit to the
//! finalizer. Navigation never waits on persistence.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::calories::{self, CaloriePreview};
use super::draft::build_draft;
use super::finalize::{FinalizeState, Finalizer};
use super::goal_weight;
use super::model::{ProfileRecord, WeightLogEntry};
use super::session::{FormDelta, OnboardingSession};
use super::state::{Advance, FIRST_STEP, HostContext, Step, StepSequencer};
use super::sync::{SyncEngine, SyncState, SyncStatus};
use crate::config::OnboardingConfig;
use crate::error::{FinalizeError, StoreError, ValidationError};
use crate::store::{LegalDocumentStore, ProfileCache, ProfileStore, WeightLogStore};

/// The stores a manager talks to.
#[derive(Clone)]
pub struct OnboardingStores {
    pub profiles: Arc<dyn ProfileStore>,
    pub weight_log: Arc<dyn WeightLogStore>,
    pub legal: Arc<dyn LegalDocumentStore>,
    /// Caches refreshed on commit. The first one is also read on resume.
    pub caches: Vec<Arc<dyn ProfileCache>>,
}

pub struct OnboardingManager {
    session: Arc<RwLock<OnboardingSession>>,
    sequencer: StepSequencer,
    sync: SyncEngine,
    finalizer: Finalizer,
    stores: OnboardingStores,
}

impl OnboardingManager {
    /// Start a fresh session for `profile_id`.
    pub fn new(profile_id: Uuid, config: &OnboardingConfig, stores: OnboardingStores) -> Self {
        let session = OnboardingSession::new(profile_id, config.host_context);
        Self::with_session(session, config, stores)
    }

    /// Start a session pre-filled from whatever is already persisted.
    ///
    /// Reads the caches first, then the profile store. A cache failure only
    /// logs; a profile store failure is returned.
    pub async fn resume(
        profile_id: Uuid,
        config: &OnboardingConfig,
        stores: OnboardingStores,
    ) -> Result<Self, StoreError> {
        let mut record = None;
        for cache in &stores.caches {
            match cache.get_cached_profile(profile_id).await {
                Ok(Some(cached)) => {
                    debug!(profile_id = %profile_id, cache = cache.name(), "Resuming from cache");
                    record = Some(cached);
                    break;
                }
                Ok(None) => {}
                Err(e) => {
                    warn!(
                        profile_id = %profile_id,
                        cache = cache.name(),
                        error = %e,
                        "Profile cache read failed"
                    );
                }
            }
        }
        if record.is_none() {
            record = stores.profiles.get_profile(profile_id).await?;
        }

        let mut session = OnboardingSession::new(profile_id, config.host_context);
        if let Some(ref record) = record {
            session = session.hydrate_from(record);
            info!(profile_id = %profile_id, "Onboarding session resumed");
        }
        Ok(Self::with_session(session, config, stores))
    }

    fn with_session(
        session: OnboardingSession,
        config: &OnboardingConfig,
        stores: OnboardingStores,
    ) -> Self {
        let sync = SyncEngine::from_config(stores.profiles.clone(), config);
        let finalizer = Finalizer::new(
            stores.profiles.clone(),
            stores.legal.clone(),
            stores.caches.clone(),
            sync.clone(),
            config.commit_timeout,
        );
        Self {
            sequencer: StepSequencer::new(session.host_context),
            session: Arc::new(RwLock::new(session)),
            sync,
            finalizer,
            stores,
        }
    }

    /// Snapshot of the form state.
    pub async fn session(&self) -> OnboardingSession {
        self.session.read().await.clone()
    }

    pub fn sync(&self) -> &SyncEngine {
        &self.sync
    }

    pub fn finalizer(&self) -> &Finalizer {
        &self.finalizer
    }

    /// Apply a user edit and return the updated session.
    pub async fn apply(&self, delta: FormDelta) -> OnboardingSession {
        let mut session = self.session.write().await;
        *session = session.apply(delta);
        session.clone()
    }

    /// Validate the current step and move forward.
    ///
    /// On success a background save of the full draft is scheduled, tagged
    /// with the step just left. On failure nothing changes.
    pub async fn advance(&self) -> Result<Advance, ValidationError> {
        let mut session = self.session.write().await;
        let advance = self.sequencer.advance(&session)?;
        let Advance::Moved { from, to } = advance else {
            return Ok(advance);
        };
        let left = Step::from_index(from);

        if left == Some(Step::CurrentWeight) {
            self.log_weight(&session);
        }
        if self.leaves_calorie_decision(left) {
            if let Some(preview) = calories::plan_for_session(&session, Utc::now().date_naive()) {
                *session = session.with_calorie_targets(
                    preview.result.target_calories,
                    preview.maintenance_calories,
                );
            }
        }

        *session = session.moved_to(to);
        let draft = build_draft(&session);
        let profile_id = session.profile_id;
        drop(session);

        let tag = left.map(|s| s.to_string()).unwrap_or_else(|| from.to_string());
        info!(profile_id = %profile_id, step = from, to, "Onboarding step advanced");
        self.sync.schedule(draft, profile_id, tag);
        Ok(advance)
    }

    /// Move back one step. Returns the new step, or `None` on the first step.
    pub async fn retreat(&self) -> Option<u8> {
        let mut session = self.session.write().await;
        let to = self.sequencer.retreat(session.current_step)?;
        debug!(
            profile_id = %session.profile_id,
            step = session.current_step,
            to,
            "Onboarding step retreated"
        );
        *session = session.moved_to(to);
        Some(to)
    }

    /// Submit the wizard.
    ///
    /// Every step on the host's path is re-validated first, so a session
    /// resumed mid-way cannot commit with gaps. Submitting is only allowed
    /// from the last step.
    pub async fn finish(&self) -> Result<ProfileRecord, FinalizeError> {
        let session = self.session().await;
        let graph = self.sequencer.graph();
        let mut step = Some(FIRST_STEP);
        while let Some(index) = step {
            self.sequencer
                .check(index, &session)
                .map_err(FinalizeError::Incomplete)?;
            step = graph.forward(index);
        }
        if graph.forward(session.current_step).is_some() {
            return Err(FinalizeError::Incomplete(ValidationError::new(
                "onboarding.errors.not_on_last_step",
            )));
        }
        self.finalizer.finalize(&session).await
    }

    /// Calorie numbers for the plan step.
    pub async fn preview(&self) -> Option<CaloriePreview> {
        calories::plan_for_session(&*self.session.read().await, Utc::now().date_naive())
    }

    /// Suggested goal weight in pounds, to offer as a pre-fill.
    pub async fn suggested_goal_weight_lb(&self) -> Option<f64> {
        let session = self.session.read().await;
        goal_weight::suggested_target_for_session(&session, Utc::now().date_naive())
    }

    pub async fn status(&self) -> OnboardingStatus {
        let session = self.session.read().await;
        OnboardingStatus {
            profile_id: session.profile_id,
            current_step: session.current_step,
            step: Step::from_index(session.current_step),
            total_steps: session.total_steps,
            host_context: session.host_context,
            transitions: session.history.len(),
            sync: SyncView::from(self.sync.state()),
            finalize: self.finalizer.state(),
        }
    }

    /// The step whose exit fixes the calorie targets.
    fn leaves_calorie_decision(&self, left: Option<Step>) -> bool {
        let decision = if self.sequencer.graph().forward(Step::GoalWeight.index())
            == Some(Step::Plan.index())
        {
            Step::Plan
        } else {
            Step::GoalWeight
        };
        left == Some(decision)
    }

    /// Record the weigh-in in the background.
    ///
    /// The draft keeps carrying the weight until the log is confirmed, so a
    /// failed insert falls back to the profile write.
    fn log_weight(&self, session: &OnboardingSession) {
        let Some(weight_lb) = session.current_weight_lb() else {
            return;
        };
        let entry = WeightLogEntry {
            profile_id: session.profile_id,
            weighed_at: Utc::now(),
            weight_lb,
            body_fat_percent: session.body_fat(),
            weight_unit: session.weight_unit,
        };
        let store = self.stores.weight_log.clone();
        let shared = self.session.clone();
        tokio::spawn(async move {
            match store.insert_weight_log(&entry).await {
                Ok(()) => {
                    let mut session = shared.write().await;
                    if session.current_weight_lb() == Some(entry.weight_lb) {
                        *session = session.apply(FormDelta::WeightLogged(true));
                    }
                }
                Err(e) => {
                    warn!(
                        profile_id = %entry.profile_id,
                        error = %e,
                        "Weight log insert failed; weight will be saved on the profile"
                    );
                    let mut session = shared.write().await;
                    *session = session.apply(FormDelta::WeightLogged(false));
                }
            }
        });
    }
}

/// Sync state as shown to clients.
#[derive(Debug, Clone, Serialize)]
pub struct SyncView {
    pub status: SyncStatus,
    pub last_saved_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_tag: Option<String>,
}

impl From<SyncState> for SyncView {
    fn from(state: SyncState) -> Self {
        Self {
            status: state.status,
            last_saved_at: state.last_saved_at,
            last_error: state.last_error.map(|e| e.to_string()),
            last_tag: state.last_tag,
        }
    }
}

/// Onboarding status returned by the REST endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct OnboardingStatus {
    pub profile_id: Uuid,
    pub current_step: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub step: Option<Step>,
    pub total_steps: u8,
    pub host_context: HostContext,
    pub transitions: usize,
    pub sync: SyncView,
    pub finalize: FinalizeState,
}
