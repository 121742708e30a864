//! Goal-weight bounds checking and the suggested-target heuristic.

use chrono::NaiveDate;

use super::metrics::{self, canonical_weight_lb, kg_to_lb};
use super::model::{GoalType, Sex, WeightUnit};
use super::session::{OnboardingSession, display_weight, parse_weight_lb};
use crate::error::ValidationError;

/// Lowest goal weight considered healthy for any adult.
pub const MIN_GOAL_WEIGHT_LB: f64 = 80.0;

/// Highest goal weight accepted for a gain goal.
pub const MAX_GOAL_WEIGHT_LB: f64 = 700.0;

/// Maintenance targets must sit within this fraction of current weight.
pub const MAINTAIN_TOLERANCE: f64 = 0.02;

/// Recomposition targets must sit within this fraction of current weight.
pub const RECOMP_BAND: f64 = 0.05;

/// Inputs to [`validate_goal_weight`].
#[derive(Debug, Clone, Copy)]
pub struct GoalWeightInput<'a> {
    pub current_weight_lb: f64,
    pub goal_type: GoalType,
    pub weight_unit: WeightUnit,
    /// The target as typed, in `weight_unit`.
    pub target_input: &'a str,
}

/// Check a goal weight against the bounds for its goal type.
///
/// Maintenance and recomposition accept an empty target (meaning "my current
/// weight"); lose and gain require one.
pub fn validate_goal_weight(input: &GoalWeightInput<'_>) -> Result<(), ValidationError> {
    let unit = input.weight_unit;
    let current = input.current_weight_lb;
    let shown = |lb: f64| display_weight(lb, unit);

    let target = if input.target_input.trim().is_empty() {
        match input.goal_type {
            GoalType::Maintain | GoalType::Recomp => return Ok(()),
            GoalType::Lose | GoalType::Gain => {
                return Err(ValidationError::new("onboarding.goal_weight.errors.required"));
            }
        }
    } else {
        parse_weight_lb(input.target_input, unit)
            .ok_or_else(|| ValidationError::new("onboarding.goal_weight.errors.invalid"))?
    };

    match input.goal_type {
        GoalType::Lose => {
            if target >= current {
                return Err(ValidationError::new("onboarding.goal_weight.errors.lose_not_below")
                    .with_param("current", shown(current))
                    .with_param("unit", unit));
            }
            if target < MIN_GOAL_WEIGHT_LB {
                return Err(ValidationError::new("onboarding.goal_weight.errors.below_minimum")
                    .with_param("min", shown(MIN_GOAL_WEIGHT_LB))
                    .with_param("unit", unit));
            }
        }
        GoalType::Gain => {
            if target <= current {
                return Err(ValidationError::new("onboarding.goal_weight.errors.gain_not_above")
                    .with_param("current", shown(current))
                    .with_param("unit", unit));
            }
            if target > MAX_GOAL_WEIGHT_LB {
                return Err(ValidationError::new("onboarding.goal_weight.errors.above_maximum")
                    .with_param("max", shown(MAX_GOAL_WEIGHT_LB))
                    .with_param("unit", unit));
            }
        }
        GoalType::Maintain => check_band(
            target,
            current,
            MAINTAIN_TOLERANCE,
            "onboarding.goal_weight.errors.maintain_out_of_band",
            unit,
        )?,
        GoalType::Recomp => check_band(
            target,
            current,
            RECOMP_BAND,
            "onboarding.goal_weight.errors.recomp_out_of_band",
            unit,
        )?,
    }
    Ok(())
}

fn check_band(
    target: f64,
    current: f64,
    fraction: f64,
    key: &str,
    unit: WeightUnit,
) -> Result<(), ValidationError> {
    let low = canonical_weight_lb(current * (1.0 - fraction));
    let high = canonical_weight_lb(current * (1.0 + fraction));
    if target < low || target > high {
        return Err(ValidationError::new(key)
            .with_param("min", display_weight(low, unit))
            .with_param("max", display_weight(high, unit))
            .with_param("unit", unit));
    }
    Ok(())
}

/// Propose a goal weight in canonical pounds.
///
/// Anchored on a BMI of 23 (men) or 22 (women), one point higher from age
/// 65, then pulled toward the current weight so the suggestion stays a
/// modest step in the goal's direction. Only ever offered as a pre-fill.
pub fn get_suggested_target_weight_lb(
    current_weight_lb: f64,
    height_cm: f64,
    sex: Sex,
    age_years: u32,
    goal_type: GoalType,
) -> f64 {
    let mut bmi = match sex {
        Sex::Male => 23.0,
        Sex::Female => 22.0,
    };
    if age_years >= 65 {
        bmi += 1.0;
    }
    let height_m = height_cm / 100.0;
    let anchor = kg_to_lb(bmi * height_m * height_m);

    let suggestion = match goal_type {
        GoalType::Maintain | GoalType::Recomp => current_weight_lb,
        GoalType::Lose => {
            if anchor < current_weight_lb {
                anchor.max(current_weight_lb * 0.85)
            } else {
                current_weight_lb * 0.95
            }
        }
        GoalType::Gain => {
            if anchor > current_weight_lb {
                anchor.min(current_weight_lb * 1.15)
            } else {
                current_weight_lb * 1.05
            }
        }
    };
    canonical_weight_lb(suggestion)
}

/// Suggested goal weight for a session, only when it passes validation.
pub fn suggested_target_for_session(session: &OnboardingSession, today: NaiveDate) -> Option<f64> {
    let current = session.current_weight_lb()?;
    let height = session.height_cm()?;
    let sex = session.sex?;
    let age = metrics::age_on(session.date_of_birth()?, today)?;
    let goal_type = session.goal_type?;

    let suggestion = get_suggested_target_weight_lb(current, height, sex, age, goal_type);
    let typed = display_weight(suggestion, session.weight_unit).to_string();
    validate_goal_weight(&GoalWeightInput {
        current_weight_lb: current,
        goal_type,
        weight_unit: session.weight_unit,
        target_input: &typed,
    })
    .ok()
    .map(|()| suggestion)
}
