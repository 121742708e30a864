//! Draft accumulator: turns the current form state into a sparse patch.
//!
//! A field is included only when its source value parses; values are
//! normalised to canonical units and precision first. The function is pure,
//! so the same session always yields the same patch.

use super::model::ProfilePatch;
use super::session::OnboardingSession;
use super::validate;

pub fn build_draft(session: &OnboardingSession) -> ProfilePatch {
    let mut draft = ProfilePatch {
        display_name: validate::validate_name(&session.name)
            .ok()
            .map(str::to_string),
        date_of_birth: session.date_of_birth(),
        sex: session.sex,
        activity_level: session.activity_level,
        goal_type: session.goal_type,
        goal_weight_lb: session.goal_weight_lb(),
        goal_target_date: session.goal_target_date(),
        calorie_target: session.calorie_target,
        maintenance_calories: session.maintenance_calories,
        ..Default::default()
    };

    if let Some(cm) = session.height_cm() {
        draft.height_cm = Some(cm);
        draft.height_unit = Some(session.height.unit);
    }

    // A logged weight reaches the profile through the weight log.
    if !session.weight_logged {
        draft.weight_lb = session.current_weight_lb();
        draft.body_fat_percent = session.body_fat();
    }

    if session.current_weight_lb().is_some() || draft.goal_weight_lb.is_some() {
        draft.weight_unit = Some(session.weight_unit);
    }

    if !session.host_context.skips_plan_step() {
        draft.calorie_plan = session.calorie_plan;
    }

    if !session.focus_modules.is_empty() {
        draft.focus_modules = Some(session.focus_modules.clone());
    }

    draft
}
