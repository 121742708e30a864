//! Per-field and per-step validators.
//!
//! Every failure is a [`ValidationError`] carrying an i18n key and its
//! interpolation parameters.

use std::collections::HashSet;

use chrono::{NaiveDate, Utc};

use super::calories::{self, HARD_FLOOR_KCAL, TargetStatus};
use super::goal_weight::{self, GoalWeightInput};
use super::metrics;
use super::model::{CaloriePlan, FocusModule, WeightUnit};
use super::session::{OnboardingSession, display_weight};
use super::state::Step;
use crate::error::ValidationError;

pub const NAME_MAX_LEN: usize = 50;
pub const MIN_AGE_YEARS: u32 = 13;
pub const MAX_AGE_YEARS: u32 = 120;
pub const MIN_HEIGHT_CM: f64 = 90.0;
pub const MAX_HEIGHT_CM: f64 = 250.0;
pub const MIN_WEIGHT_LB: f64 = 50.0;
pub const MAX_WEIGHT_LB: f64 = 1000.0;
pub const MIN_BODY_FAT_PERCENT: f64 = 2.0;
pub const MAX_BODY_FAT_PERCENT: f64 = 70.0;
/// Furthest a goal target date may lie in the future.
pub const MAX_GOAL_HORIZON_DAYS: i64 = 730;

pub fn validate_name(name: &str) -> Result<&str, ValidationError> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(ValidationError::new("onboarding.name.errors.required"));
    }
    if trimmed.chars().count() > NAME_MAX_LEN {
        return Err(
            ValidationError::new("onboarding.name.errors.too_long").with_param("max", NAME_MAX_LEN)
        );
    }
    Ok(trimmed)
}

pub fn validate_date_of_birth(input: &str, today: NaiveDate) -> Result<NaiveDate, ValidationError> {
    let dob = metrics::parse_date(input)
        .ok_or_else(|| ValidationError::new("onboarding.dob.errors.invalid"))?;
    let age = metrics::age_on(dob, today)
        .ok_or_else(|| ValidationError::new("onboarding.dob.errors.in_future"))?;
    if age < MIN_AGE_YEARS {
        return Err(
            ValidationError::new("onboarding.dob.errors.too_young").with_param("min", MIN_AGE_YEARS)
        );
    }
    if age > MAX_AGE_YEARS {
        return Err(
            ValidationError::new("onboarding.dob.errors.too_old").with_param("max", MAX_AGE_YEARS)
        );
    }
    Ok(dob)
}

pub fn validate_height(session: &OnboardingSession) -> Result<f64, ValidationError> {
    let cm = session
        .height_cm()
        .ok_or_else(|| ValidationError::new("onboarding.height.errors.invalid"))?;
    if !(MIN_HEIGHT_CM..=MAX_HEIGHT_CM).contains(&cm) {
        return Err(ValidationError::new("onboarding.height.errors.out_of_range")
            .with_param("min_cm", MIN_HEIGHT_CM)
            .with_param("max_cm", MAX_HEIGHT_CM));
    }
    Ok(cm)
}

pub fn validate_current_weight(input: &str, unit: WeightUnit) -> Result<f64, ValidationError> {
    let lb = super::session::parse_weight_lb(input, unit)
        .ok_or_else(|| ValidationError::new("onboarding.weight.errors.invalid"))?;
    if !(MIN_WEIGHT_LB..=MAX_WEIGHT_LB).contains(&lb) {
        return Err(ValidationError::new("onboarding.weight.errors.out_of_range")
            .with_param("min", display_weight(MIN_WEIGHT_LB, unit))
            .with_param("max", display_weight(MAX_WEIGHT_LB, unit))
            .with_param("unit", unit));
    }
    Ok(lb)
}

/// Body fat is optional; an empty input passes.
pub fn validate_body_fat(input: &str) -> Result<Option<f64>, ValidationError> {
    if input.trim().is_empty() {
        return Ok(None);
    }
    let value = metrics::parse_positive(input)
        .ok_or_else(|| ValidationError::new("onboarding.body_fat.errors.invalid"))?;
    if !(MIN_BODY_FAT_PERCENT..=MAX_BODY_FAT_PERCENT).contains(&value) {
        return Err(ValidationError::new("onboarding.body_fat.errors.out_of_range")
            .with_param("min", MIN_BODY_FAT_PERCENT)
            .with_param("max", MAX_BODY_FAT_PERCENT));
    }
    Ok(Some(value))
}

pub fn validate_goal_target_date(
    input: &str,
    today: NaiveDate,
) -> Result<NaiveDate, ValidationError> {
    let date = metrics::parse_date(input)
        .ok_or_else(|| ValidationError::new("onboarding.plan.errors.date_invalid"))?;
    let days = (date - today).num_days();
    if days <= 0 {
        return Err(ValidationError::new("onboarding.plan.errors.date_in_past"));
    }
    if days > MAX_GOAL_HORIZON_DAYS {
        return Err(ValidationError::new("onboarding.plan.errors.date_too_far")
            .with_param("max_days", MAX_GOAL_HORIZON_DAYS));
    }
    Ok(date)
}

pub fn validate_focus_modules(modules: &[FocusModule]) -> Result<(), ValidationError> {
    if modules.is_empty() {
        return Err(ValidationError::new("onboarding.modules.errors.required"));
    }
    let mut seen = HashSet::new();
    if !modules.iter().all(|m| seen.insert(*m)) {
        return Err(ValidationError::new("onboarding.modules.errors.duplicate"));
    }
    Ok(())
}

/// Validate `step` as of today.
pub fn validate_step(step: Step, session: &OnboardingSession) -> Result<(), ValidationError> {
    validate_step_on(step, session, Utc::now().date_naive())
}

/// Validate `step` as of `today`.
pub fn validate_step_on(
    step: Step,
    session: &OnboardingSession,
    today: NaiveDate,
) -> Result<(), ValidationError> {
    match step {
        Step::Name => validate_name(&session.name).map(|_| ()),
        Step::DateOfBirth => validate_date_of_birth(&session.date_of_birth, today).map(|_| ()),
        Step::Sex => session
            .sex
            .map(|_| ())
            .ok_or_else(|| ValidationError::new("onboarding.sex.errors.required")),
        Step::Height => validate_height(session).map(|_| ()),
        Step::ActivityLevel => session
            .activity_level
            .map(|_| ())
            .ok_or_else(|| ValidationError::new("onboarding.activity.errors.required")),
        Step::CurrentWeight => {
            validate_current_weight(&session.current_weight, session.weight_unit)?;
            validate_body_fat(&session.body_fat_percent).map(|_| ())
        }
        Step::GoalType => session
            .goal_type
            .map(|_| ())
            .ok_or_else(|| ValidationError::new("onboarding.goal.errors.required")),
        Step::GoalWeight => validate_goal_weight_step(session),
        Step::Plan => validate_plan_step(session, today),
        Step::FocusModules => validate_focus_modules(&session.focus_modules),
        Step::Legal => {
            if session.legal_accepted() {
                Ok(())
            } else {
                Err(ValidationError::new("onboarding.legal.errors.required"))
            }
        }
    }
}

fn validate_goal_weight_step(session: &OnboardingSession) -> Result<(), ValidationError> {
    let current_weight_lb = session
        .current_weight_lb()
        .ok_or_else(|| ValidationError::new("onboarding.weight.errors.invalid"))?;
    let goal_type = session
        .goal_type
        .ok_or_else(|| ValidationError::new("onboarding.goal.errors.required"))?;
    goal_weight::validate_goal_weight(&GoalWeightInput {
        current_weight_lb,
        goal_type,
        weight_unit: session.weight_unit,
        target_input: &session.goal_weight,
    })
}

fn validate_plan_step(
    session: &OnboardingSession,
    today: NaiveDate,
) -> Result<(), ValidationError> {
    let plan = session
        .calorie_plan
        .ok_or_else(|| ValidationError::new("onboarding.plan.errors.required"))?;
    if plan == CaloriePlan::ByDate {
        validate_goal_target_date(&session.goal_target_date, today)?;
    }
    let preview = calories::plan_for_session(session, today)
        .ok_or_else(|| ValidationError::new("onboarding.plan.errors.missing_metrics"))?;
    if preview.result.status == TargetStatus::Rejected {
        return Err(ValidationError::new("onboarding.plan.errors.unsafe_deficit")
            .with_param("minimum", HARD_FLOOR_KCAL)
            .with_param("requested", (preview.tdee + preview.requested_daily_diff).round()));
    }
    Ok(())
}
