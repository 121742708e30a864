//! Calorie policy engine: BMR, TDEE and safety-clamped daily targets.
//!
//! BMR uses the Mifflin-St Jeor equation (1990):
//! `BMR = 10·kg + 6.25·cm − 5·age + s`, with `s = +5` for men and `−161`
//! for women. TDEE multiplies BMR by a fixed activity coefficient.
//!
//! The target clamp has two tiers:
//! - below [`HARD_FLOOR_KCAL`] the request is rejected; the returned target is
//!   the sex-specific floor and the plan step refuses to advance;
//! - between the hard floor and the sex-specific soft floor the target is
//!   raised to the soft floor and a non-blocking warning is attached.

use std::collections::BTreeMap;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use super::metrics::{self, lb_to_kg};
use super::model::{ActivityLevel, CaloriePlan, GoalType, Sex};
use super::session::OnboardingSession;

/// Absolute minimum daily target, independent of sex.
pub const HARD_FLOOR_KCAL: f64 = 1000.0;

/// Soft floor for women.
pub const FEMALE_SOFT_FLOOR_KCAL: f64 = 1200.0;

/// Soft floor for men.
pub const MALE_SOFT_FLOOR_KCAL: f64 = 1500.0;

/// Energy content of one kilogram of body mass change.
pub const KCAL_PER_KG: f64 = 7700.0;

/// Daily deficit/surplus substituted when there is no target date.
pub const DEFAULT_DAILY_DIFF_KCAL: f64 = 250.0;

/// Mifflin-St Jeor basal metabolic rate in kcal/day.
pub fn calculate_bmr(weight_kg: f64, height_cm: f64, age_years: u32, sex: Sex) -> f64 {
    let sex_offset = match sex {
        Sex::Male => 5.0,
        Sex::Female => -161.0,
    };
    10.0 * weight_kg + 6.25 * height_cm - 5.0 * f64::from(age_years) + sex_offset
}

/// Activity coefficient applied to BMR.
pub fn activity_multiplier(level: ActivityLevel) -> f64 {
    match level {
        ActivityLevel::Sedentary => 1.2,
        ActivityLevel::Light => 1.375,
        ActivityLevel::Moderate => 1.55,
        ActivityLevel::High => 1.725,
        ActivityLevel::VeryHigh => 1.9,
    }
}

/// Total daily energy expenditure in kcal/day.
pub fn calculate_tdee(bmr: f64, activity_level: ActivityLevel) -> f64 {
    bmr * activity_multiplier(activity_level)
}

/// Daily calorie difference needed to move from `current_weight_kg` to
/// `goal_weight_kg` over `weeks_to_goal` weeks.
///
/// Negative for a deficit, positive for a surplus. Without a usable week
/// count, a fixed mild difference is substituted in the goal direction, and
/// zero when the weights are equal.
pub fn calculate_required_daily_calorie_diff(
    current_weight_kg: f64,
    goal_weight_kg: f64,
    weeks_to_goal: Option<f64>,
) -> f64 {
    let delta_kg = goal_weight_kg - current_weight_kg;
    match weeks_to_goal {
        Some(weeks) if weeks > 0.0 && weeks.is_finite() => delta_kg * KCAL_PER_KG / (weeks * 7.0),
        _ => {
            if delta_kg == 0.0 || !delta_kg.is_finite() {
                0.0
            } else {
                DEFAULT_DAILY_DIFF_KCAL.copysign(delta_kg)
            }
        }
    }
}

/// The daily difference a goal asks for, given the chosen plan.
///
/// Maintenance and recomposition goals always ask for zero. A `ByDate` plan
/// without a usable date, or no plan at all, falls back to the mild default.
pub fn requested_daily_diff(
    goal_type: GoalType,
    current_weight_kg: f64,
    goal_weight_kg: Option<f64>,
    plan: Option<CaloriePlan>,
    weeks_to_goal: Option<f64>,
) -> f64 {
    let direction = match goal_type {
        GoalType::Maintain | GoalType::Recomp => return 0.0,
        GoalType::Lose => -1.0,
        GoalType::Gain => 1.0,
    };
    match plan.and_then(|p| p.daily_magnitude()) {
        Some(magnitude) => direction * magnitude,
        None => match goal_weight_kg {
            Some(goal_kg) => {
                calculate_required_daily_calorie_diff(current_weight_kg, goal_kg, weeks_to_goal)
            }
            None => direction * DEFAULT_DAILY_DIFF_KCAL,
        },
    }
}

/// Sex-specific soft floor.
pub fn soft_floor(sex: Sex) -> f64 {
    match sex {
        Sex::Male => MALE_SOFT_FLOOR_KCAL,
        Sex::Female => FEMALE_SOFT_FLOOR_KCAL,
    }
}

/// How the clamp treated a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetStatus {
    /// The request was used as-is.
    Accepted,
    /// Raised to the soft floor; a warning is attached.
    Adjusted,
    /// The request fell below the hard floor and must not be used.
    Rejected,
}

/// Localizable warning attached to a soft-floor adjustment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CalorieWarning {
    pub key: String,
    pub params: BTreeMap<String, String>,
}

/// Output of [`calculate_safe_calorie_target`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalorieTargetResult {
    pub target_calories: u32,
    pub adjusted_daily_diff: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning: Option<CalorieWarning>,
    pub status: TargetStatus,
}

/// Derive a safe daily target from TDEE and a requested difference.
///
/// The returned target is never below [`HARD_FLOOR_KCAL`]. A warning is
/// present exactly when the unclamped target lies in
/// `[HARD_FLOOR_KCAL, soft_floor(sex))`.
pub fn calculate_safe_calorie_target(
    tdee: f64,
    requested_daily_diff: f64,
    sex: Sex,
) -> CalorieTargetResult {
    let floor = soft_floor(sex);
    let raw = tdee + requested_daily_diff;

    if !raw.is_finite() || raw < HARD_FLOOR_KCAL {
        let adjusted = if tdee.is_finite() { floor - tdee } else { 0.0 };
        return CalorieTargetResult {
            target_calories: floor as u32,
            adjusted_daily_diff: adjusted.round() as i32,
            warning: None,
            status: TargetStatus::Rejected,
        };
    }

    if raw < floor {
        let mut params = BTreeMap::new();
        params.insert("minimum".to_string(), format!("{}", floor as u32));
        params.insert("requested".to_string(), format!("{}", raw.round() as i64));
        return CalorieTargetResult {
            target_calories: floor as u32,
            adjusted_daily_diff: (floor - tdee).round() as i32,
            warning: Some(CalorieWarning {
                key: "onboarding.plan.warnings.raised_to_minimum".to_string(),
                params,
            }),
            status: TargetStatus::Adjusted,
        };
    }

    CalorieTargetResult {
        target_calories: raw.round() as u32,
        adjusted_daily_diff: requested_daily_diff.round() as i32,
        warning: None,
        status: TargetStatus::Accepted,
    }
}

/// Everything the plan step shows, derived from the session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaloriePreview {
    pub bmr: f64,
    pub tdee: f64,
    pub maintenance_calories: u32,
    pub requested_daily_diff: f64,
    pub result: CalorieTargetResult,
}

/// Compute the calorie preview for a session, if every input is present.
pub fn plan_for_session(session: &OnboardingSession, today: NaiveDate) -> Option<CaloriePreview> {
    let weight_kg = lb_to_kg(session.current_weight_lb()?);
    let height_cm = session.height_cm()?;
    let age = metrics::age_on(session.date_of_birth()?, today)?;
    let sex = session.sex?;
    let activity = session.activity_level?;
    let goal_type = session.goal_type?;

    let bmr = calculate_bmr(weight_kg, height_cm, age, sex);
    let tdee = calculate_tdee(bmr, activity);

    let goal_kg = session.goal_weight_lb().map(lb_to_kg);
    let weeks = session
        .goal_target_date()
        .and_then(|target| metrics::weeks_until(today, target));
    let plan = if session.host_context.skips_plan_step() {
        None
    } else {
        session.calorie_plan
    };
    let requested = requested_daily_diff(goal_type, weight_kg, goal_kg, plan, weeks);
    let result = calculate_safe_calorie_target(tdee, requested, sex);

    Some(CaloriePreview {
        bmr,
        tdee,
        maintenance_calories: tdee.round() as u32,
        requested_daily_diff: requested,
        result,
    })
}
