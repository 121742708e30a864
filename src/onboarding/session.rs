//! Client-resident onboarding session: raw form values plus step position.
//!
//! Form values are kept as the user typed them; parsing and unit
//! normalisation happen in the accessors below so validators and the draft
//! accumulator agree on what counts as a valid value.

use std::collections::BTreeSet;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::metrics;
use super::model::{
    ActivityLevel, CaloriePlan, FocusModule, GoalType, HeightUnit, LegalCheckbox, ProfileRecord,
    Sex, WeightUnit,
};
use super::state::{FIRST_STEP, HostContext, TOTAL_STEPS};

/// Height as entered, in either unit system.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeightInput {
    pub unit: HeightUnit,
    pub cm: String,
    pub feet: String,
    pub inches: String,
}

impl HeightInput {
    pub fn metric(cm: impl Into<String>) -> Self {
        Self {
            unit: HeightUnit::Cm,
            cm: cm.into(),
            ..Default::default()
        }
    }

    pub fn imperial(feet: impl Into<String>, inches: impl Into<String>) -> Self {
        Self {
            unit: HeightUnit::FtIn,
            feet: feet.into(),
            inches: inches.into(),
            ..Default::default()
        }
    }

    /// Parsed height in canonical centimetres.
    pub fn to_cm(&self) -> Option<f64> {
        let cm = match self.unit {
            HeightUnit::Cm => metrics::parse_positive(&self.cm)?,
            HeightUnit::FtIn => {
                let feet = metrics::parse_positive(&self.feet)?;
                let inches = if self.inches.trim().is_empty() {
                    0.0
                } else {
                    metrics::parse_non_negative(&self.inches)?
                };
                if inches >= 12.0 {
                    return None;
                }
                metrics::feet_inches_to_cm(feet, inches)
            }
        };
        Some(metrics::canonical_height_cm(cm))
    }
}

/// One recorded step move.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepTransition {
    pub from: u8,
    pub to: u8,
    pub at: DateTime<Utc>,
}

/// A single change to the session's form state.
///
/// Step handlers produce deltas; the session applies them to produce a new
/// state, which keeps every mutation explicit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "field", content = "value", rename_all = "snake_case")]
pub enum FormDelta {
    Name(String),
    DateOfBirth(String),
    Sex(Sex),
    Height(HeightInput),
    ActivityLevel(ActivityLevel),
    WeightUnit(WeightUnit),
    CurrentWeight(String),
    BodyFatPercent(String),
    GoalType(GoalType),
    GoalWeight(String),
    GoalTargetDate(String),
    CaloriePlan(CaloriePlan),
    FocusModules(Vec<FocusModule>),
    Legal { checkbox: LegalCheckbox, accepted: bool },
    WeightLogged(bool),
}

impl FormDelta {
    fn changes_calorie_inputs(&self) -> bool {
        matches!(
            self,
            Self::DateOfBirth(_)
                | Self::Sex(_)
                | Self::Height(_)
                | Self::ActivityLevel(_)
                | Self::CurrentWeight(_)
                | Self::GoalType(_)
                | Self::GoalWeight(_)
                | Self::GoalTargetDate(_)
                | Self::CaloriePlan(_)
        )
    }
}

/// The whole wizard state for one user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OnboardingSession {
    pub profile_id: Uuid,
    pub current_step: u8,
    pub total_steps: u8,
    pub host_context: HostContext,
    pub name: String,
    pub date_of_birth: String,
    pub sex: Option<Sex>,
    pub height: HeightInput,
    pub activity_level: Option<ActivityLevel>,
    pub weight_unit: WeightUnit,
    pub current_weight: String,
    pub body_fat_percent: String,
    /// Whether the current weight reached the weight log. When it did not,
    /// the draft carries the weight directly.
    pub weight_logged: bool,
    pub goal_type: Option<GoalType>,
    pub goal_weight: String,
    pub goal_target_date: String,
    pub calorie_plan: Option<CaloriePlan>,
    pub calorie_target: Option<u32>,
    pub maintenance_calories: Option<u32>,
    pub focus_modules: Vec<FocusModule>,
    pub legal: BTreeSet<LegalCheckbox>,
    pub history: Vec<StepTransition>,
}

impl OnboardingSession {
    pub fn new(profile_id: Uuid, host_context: HostContext) -> Self {
        Self {
            profile_id,
            current_step: FIRST_STEP,
            total_steps: TOTAL_STEPS,
            host_context,
            name: String::new(),
            date_of_birth: String::new(),
            sex: None,
            height: HeightInput::default(),
            activity_level: None,
            weight_unit: WeightUnit::default(),
            current_weight: String::new(),
            body_fat_percent: String::new(),
            weight_logged: false,
            goal_type: None,
            goal_weight: String::new(),
            goal_target_date: String::new(),
            calorie_plan: None,
            calorie_target: None,
            maintenance_calories: None,
            focus_modules: Vec::new(),
            legal: BTreeSet::new(),
            history: Vec::new(),
        }
    }

    /// Return a new session with `delta` applied.
    ///
    /// Any edit to a calorie input drops the cached targets.
    pub fn apply(&self, delta: FormDelta) -> Self {
        let mut next = self.clone();
        if delta.changes_calorie_inputs() {
            next.calorie_target = None;
            next.maintenance_calories = None;
        }
        match delta {
            FormDelta::Name(v) => next.name = v,
            FormDelta::DateOfBirth(v) => next.date_of_birth = v,
            FormDelta::Sex(v) => next.sex = Some(v),
            FormDelta::Height(v) => next.height = v,
            FormDelta::ActivityLevel(v) => next.activity_level = Some(v),
            FormDelta::WeightUnit(unit) => {
                // Re-express typed weights so the numbers keep their meaning.
                next.current_weight = convert_display(&self.current_weight, self.weight_unit, unit);
                next.goal_weight = convert_display(&self.goal_weight, self.weight_unit, unit);
                next.weight_unit = unit;
            }
            FormDelta::CurrentWeight(v) => {
                next.current_weight = v;
                next.weight_logged = false;
            }
            FormDelta::BodyFatPercent(v) => {
                next.body_fat_percent = v;
                next.weight_logged = false;
            }
            FormDelta::GoalType(v) => next.goal_type = Some(v),
            FormDelta::GoalWeight(v) => next.goal_weight = v,
            FormDelta::GoalTargetDate(v) => next.goal_target_date = v,
            FormDelta::CaloriePlan(v) => next.calorie_plan = Some(v),
            FormDelta::FocusModules(v) => next.focus_modules = v,
            FormDelta::Legal { checkbox, accepted } => {
                if accepted {
                    next.legal.insert(checkbox);
                } else {
                    next.legal.remove(&checkbox);
                }
            }
            FormDelta::WeightLogged(v) => next.weight_logged = v,
        }
        next
    }

    /// Cache the targets the plan step settled on.
    pub(crate) fn with_calorie_targets(&self, target: u32, maintenance: u32) -> Self {
        let mut next = self.clone();
        next.calorie_target = Some(target);
        next.maintenance_calories = Some(maintenance);
        next
    }

    /// Return a new session positioned at `to`, with the move recorded.
    pub fn moved_to(&self, to: u8) -> Self {
        let mut next = self.clone();
        next.history.push(StepTransition {
            from: self.current_step,
            to,
            at: Utc::now(),
        });
        next.current_step = to;
        next
    }

    /// Repopulate every form field from a persisted profile.
    ///
    /// Fields the record does not have keep their current session value, so
    /// unsaved input is never discarded.
    pub fn hydrate_from(&self, record: &ProfileRecord) -> Self {
        let mut next = self.clone();
        if let Some(ref name) = record.display_name {
            next.name = name.clone();
        }
        if let Some(dob) = record.date_of_birth {
            next.date_of_birth = dob.format("%Y-%m-%d").to_string();
        }
        if record.sex.is_some() {
            next.sex = record.sex;
        }
        if let Some(cm) = record.height_cm {
            next.height = match record.height_unit.unwrap_or(HeightUnit::Cm) {
                HeightUnit::Cm => HeightInput::metric(format_number(cm)),
                HeightUnit::FtIn => {
                    let (feet, inches) = metrics::cm_to_feet_inches(cm);
                    HeightInput::imperial(feet.to_string(), format_number(inches))
                }
            };
        }
        if record.activity_level.is_some() {
            next.activity_level = record.activity_level;
        }
        if let Some(unit) = record.weight_unit {
            next.weight_unit = unit;
        }
        if let Some(lb) = record.weight_lb {
            next.current_weight = format_number(display_weight(lb, next.weight_unit));
            next.weight_logged = true;
        }
        if let Some(bf) = record.body_fat_percent {
            next.body_fat_percent = format_number(bf);
        }
        if record.goal_type.is_some() {
            next.goal_type = record.goal_type;
        }
        if let Some(lb) = record.goal_weight_lb {
            next.goal_weight = format_number(display_weight(lb, next.weight_unit));
        }
        if let Some(date) = record.goal_target_date {
            next.goal_target_date = date.format("%Y-%m-%d").to_string();
        }
        if record.calorie_plan.is_some() {
            next.calorie_plan = record.calorie_plan;
        }
        if record.calorie_target.is_some() {
            next.calorie_target = record.calorie_target;
        }
        if record.maintenance_calories.is_some() {
            next.maintenance_calories = record.maintenance_calories;
        }
        if !record.focus_modules.is_empty() {
            next.focus_modules = record.focus_modules.clone();
        }
        next
    }

    /// Current weight in canonical pounds, if it parses.
    pub fn current_weight_lb(&self) -> Option<f64> {
        parse_weight_lb(&self.current_weight, self.weight_unit)
    }

    /// Goal weight in canonical pounds, if it parses.
    pub fn goal_weight_lb(&self) -> Option<f64> {
        parse_weight_lb(&self.goal_weight, self.weight_unit)
    }

    pub fn body_fat(&self) -> Option<f64> {
        metrics::parse_positive(&self.body_fat_percent).map(|v| metrics::round_to(v, 1))
    }

    pub fn height_cm(&self) -> Option<f64> {
        self.height.to_cm()
    }

    pub fn date_of_birth(&self) -> Option<NaiveDate> {
        metrics::parse_date(&self.date_of_birth)
    }

    pub fn goal_target_date(&self) -> Option<NaiveDate> {
        metrics::parse_date(&self.goal_target_date)
    }

    /// Trimmed display name, if non-empty.
    pub fn display_name(&self) -> Option<&str> {
        let trimmed = self.name.trim();
        (!trimmed.is_empty()).then_some(trimmed)
    }

    /// Whether every required legal checkbox is ticked.
    pub fn legal_accepted(&self) -> bool {
        LegalCheckbox::REQUIRED
            .iter()
            .all(|checkbox| self.legal.contains(checkbox))
    }
}

/// Parse a weight typed in `unit` into canonical pounds.
pub fn parse_weight_lb(input: &str, unit: WeightUnit) -> Option<f64> {
    let value = metrics::parse_positive(input)?;
    let lb = match unit {
        WeightUnit::Lb => value,
        WeightUnit::Kg => metrics::kg_to_lb(value),
    };
    Some(metrics::canonical_weight_lb(lb))
}

/// Express canonical pounds in the user's display unit (one decimal).
pub fn display_weight(lb: f64, unit: WeightUnit) -> f64 {
    match unit {
        WeightUnit::Lb => metrics::round_to(lb, 1),
        WeightUnit::Kg => metrics::round_to(metrics::lb_to_kg(lb), 1),
    }
}

fn convert_display(input: &str, from: WeightUnit, to: WeightUnit) -> String {
    if from == to {
        return input.to_string();
    }
    match parse_weight_lb(input, from) {
        Some(lb) => format_number(display_weight(lb, to)),
        None => input.to_string(),
    }
}

/// Format without a trailing `.0`.
fn format_number(value: f64) -> String {
    if value.fract() == 0.0 {
        format!("{value:.0}")
    } else {
        format!("{value:.1}")
    }
}
