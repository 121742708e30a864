use std::sync::Arc;

use anyhow::Context;
use onboarding_engine::config::OnboardingConfig;
use onboarding_engine::onboarding::model::{
    ActivityLevel, CaloriePlan, FocusModule, GoalType, LegalCheckbox, LegalDocument, Sex,
    WeightUnit,
};
use onboarding_engine::onboarding::session::display_weight;
use onboarding_engine::onboarding::{
    Advance, FormDelta, HeightInput, OnboardingManager, OnboardingRouteState, OnboardingStores,
    Step, onboarding_routes,
};
use onboarding_engine::store::LibSqlBackend;
use onboarding_engine::store::memory::MemoryProfileCache;
use tracing::{info, warn};
use uuid::Uuid;

/// Legal documents published on first run.
const DEFAULT_DOCUMENTS: [(&str, &str); 3] = [
    ("terms_of_service", "2025-01"),
    ("privacy_policy", "2025-01"),
    ("health_disclaimer", "2025-01"),
];

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let config = OnboardingConfig::from_env().context("invalid onboarding configuration")?;

    eprintln!("Onboarding engine v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Host: {}", config.host_context);
    eprintln!("   Database: {}", config.db_path.display());

    // ── Database ─────────────────────────────────────────────────────────
    let db = Arc::new(
        LibSqlBackend::new_local(&config.db_path)
            .await
            .with_context(|| format!("failed to open database at {}", config.db_path.display()))?,
    );
    for (doc_type, version) in DEFAULT_DOCUMENTS {
        db.publish_legal_document(&LegalDocument {
            doc_type: doc_type.to_string(),
            version: version.to_string(),
        })
        .await?;
    }

    let stores = OnboardingStores {
        profiles: db.clone(),
        weight_log: db.clone(),
        legal: db.clone(),
        caches: vec![Arc::new(MemoryProfileCache::new()), db.clone()],
    };
    let manager = Arc::new(OnboardingManager::new(Uuid::new_v4(), &config, stores));

    // ── Status server ───────────────────────────────────────────────────
    if let Some(port) = config.status_port {
        let app = onboarding_routes(OnboardingRouteState {
            manager: manager.clone(),
        });
        let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{port}"))
            .await
            .with_context(|| format!("failed to bind status port {port}"))?;
        eprintln!("   Status API: http://0.0.0.0:{port}/api/onboarding/status");
        tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app).await {
                warn!(error = %e, "Status server stopped");
            }
        });
    }

    run_scripted_session(&manager).await?;

    match manager.finish().await {
        Ok(record) => info!(
            profile_id = %record.id,
            calorie_target = ?record.calorie_target,
            "Demo onboarding complete"
        ),
        Err(e) => warn!(
            error = %e,
            key = e.i18n_key(),
            retryable = e.is_retryable(),
            "Demo onboarding failed"
        ),
    }

    if config.status_port.is_some() {
        eprintln!("   Serving status until Ctrl-C");
        tokio::signal::ctrl_c().await?;
    }
    Ok(())
}

/// Fill and advance every step the host shows.
async fn run_scripted_session(manager: &OnboardingManager) -> anyhow::Result<()> {
    loop {
        let status = manager.status().await;
        let step = status
            .step
            .with_context(|| format!("session on unknown step {}", status.current_step))?;

        for delta in script(manager, step).await {
            manager.apply(delta).await;
        }

        match manager.advance().await {
            Ok(Advance::Moved { .. }) => {}
            Ok(Advance::ReadyToFinalize) => return Ok(()),
            Err(e) => anyhow::bail!("step {step} rejected input: {} {:?}", e.key, e.params),
        }
    }
}

async fn script(manager: &OnboardingManager, step: Step) -> Vec<FormDelta> {
    match step {
        Step::Name => vec![FormDelta::Name("Demo User".into())],
        Step::DateOfBirth => vec![FormDelta::DateOfBirth("1988-04-12".into())],
        Step::Sex => vec![FormDelta::Sex(Sex::Male)],
        Step::Height => vec![FormDelta::Height(HeightInput::imperial("5", "11"))],
        Step::ActivityLevel => vec![FormDelta::ActivityLevel(ActivityLevel::Moderate)],
        Step::CurrentWeight => vec![
            FormDelta::WeightUnit(WeightUnit::Lb),
            FormDelta::CurrentWeight("192.5".into()),
        ],
        Step::GoalType => vec![FormDelta::GoalType(GoalType::Lose)],
        Step::GoalWeight => {
            let target = manager
                .suggested_goal_weight_lb()
                .await
                .map(|lb| display_weight(lb, WeightUnit::Lb).to_string())
                .unwrap_or_else(|| "175".to_string());
            vec![FormDelta::GoalWeight(target)]
        }
        Step::Plan => vec![FormDelta::CaloriePlan(CaloriePlan::Standard)],
        Step::FocusModules => vec![FormDelta::FocusModules(vec![
            FocusModule::Food,
            FocusModule::Weight,
            FocusModule::Exercise,
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
