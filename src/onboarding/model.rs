//! Profile record, draft patch and the enums the intake wizard collects.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Biological sex used by the BMR formula and the calorie soft floor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Sex {
    Male,
    Female,
}

impl std::fmt::Display for Sex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Male => write!(f, "male"),
            Self::Female => write!(f, "female"),
        }
    }
}

/// Self-reported activity level, ordered from least to most active.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityLevel {
    Sedentary,
    Light,
    Moderate,
    High,
    VeryHigh,
}

impl ActivityLevel {
    /// All levels in ascending order.
    pub const ALL: [ActivityLevel; 5] = [
        Self::Sedentary,
        Self::Light,
        Self::Moderate,
        Self::High,
        Self::VeryHigh,
    ];
}

impl std::fmt::Display for ActivityLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Sedentary => "sedentary",
            Self::Light => "light",
            Self::Moderate => "moderate",
            Self::High => "high",
            Self::VeryHigh => "very_high",
        };
        write!(f, "{s}")
    }
}

/// What the user wants to do with their weight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GoalType {
    Lose,
    Gain,
    Maintain,
    /// Body recomposition: hold weight roughly steady while changing composition.
    Recomp,
}

impl std::fmt::Display for GoalType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Lose => "lose",
            Self::Gain => "gain",
            Self::Maintain => "maintain",
            Self::Recomp => "recomp",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WeightUnit {
    #[default]
    Lb,
    Kg,
}

impl std::fmt::Display for WeightUnit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Lb => write!(f, "lb"),
            Self::Kg => write!(f, "kg"),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HeightUnit {
    #[default]
    FtIn,
    Cm,
}

/// Pace label chosen on the plan step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaloriePlan {
    Mild,
    Standard,
    Aggressive,
    /// Pace derived from a goal target date.
    ByDate,
}

impl CaloriePlan {
    /// Daily deficit/surplus magnitude for the fixed-pace labels.
    pub fn daily_magnitude(&self) -> Option<f64> {
        match self {
            Self::Mild => Some(250.0),
            Self::Standard => Some(500.0),
            Self::Aggressive => Some(750.0),
            Self::ByDate => None,
        }
    }
}

impl std::fmt::Display for CaloriePlan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Mild => "mild",
            Self::Standard => "standard",
            Self::Aggressive => "aggressive",
            Self::ByDate => "by_date",
        };
        write!(f, "{s}")
    }
}

/// App areas the user can rank by interest; drives home-screen ordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FocusModule {
    Food,
    Exercise,
    Weight,
    Insights,
}

/// Legal checkboxes on the final step. All are required.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LegalCheckbox {
    TermsOfService,
    PrivacyPolicy,
    HealthDisclaimer,
}

impl LegalCheckbox {
    pub const REQUIRED: [LegalCheckbox; 3] = [
        Self::TermsOfService,
        Self::PrivacyPolicy,
        Self::HealthDisclaimer,
    ];
}

/// An active legal document version the user must accept.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LegalDocument {
    pub doc_type: String,
    pub version: String,
}

/// A weight-log row written when the user records their current weight.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeightLogEntry {
    pub profile_id: Uuid,
    pub weighed_at: DateTime<Utc>,
    pub weight_lb: f64,
    pub body_fat_percent: Option<f64>,
    pub weight_unit: WeightUnit,
}

/// The canonical remote profile row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProfileRecord {
    pub id: Uuid,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub date_of_birth: Option<NaiveDate>,
    #[serde(default)]
    pub sex: Option<Sex>,
    #[serde(default)]
    pub height_cm: Option<f64>,
    #[serde(default)]
    pub height_unit: Option<HeightUnit>,
    #[serde(default)]
    pub weight_lb: Option<f64>,
    #[serde(default)]
    pub body_fat_percent: Option<f64>,
    #[serde(default)]
    pub weight_unit: Option<WeightUnit>,
    #[serde(default)]
    pub activity_level: Option<ActivityLevel>,
    #[serde(default)]
    pub goal_type: Option<GoalType>,
    #[serde(default)]
    pub goal_weight_lb: Option<f64>,
    #[serde(default)]
    pub goal_target_date: Option<NaiveDate>,
    #[serde(default)]
    pub calorie_target: Option<u32>,
    #[serde(default)]
    pub maintenance_calories: Option<u32>,
    #[serde(default)]
    pub calorie_plan: Option<CaloriePlan>,
    #[serde(default)]
    pub focus_modules: Vec<FocusModule>,
    #[serde(default)]
    pub onboarding_complete: bool,
    #[serde(default)]
    pub onboarding_completed_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl ProfileRecord {
    /// A blank, not-yet-onboarded profile.
    pub fn new(id: Uuid) -> Self {
        Self {
            id,
            display_name: None,
            date_of_birth: None,
            sex: None,
            height_cm: None,
            height_unit: None,
            weight_lb: None,
            body_fat_percent: None,
            weight_unit: None,
            activity_level: None,
            goal_type: None,
            goal_weight_lb: None,
            goal_target_date: None,
            calorie_target: None,
            maintenance_calories: None,
            calorie_plan: None,
            focus_modules: Vec::new(),
            onboarding_complete: false,
            onboarding_completed_at: None,
            updated_at: Utc::now(),
        }
    }
}

/// Sparse partial-profile patch (the draft).
///
/// A `None` field is absent from the patch and never overwrites a stored
/// value. Serialized form omits absent fields entirely.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProfilePatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date_of_birth: Option<NaiveDate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sex: Option<Sex>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height_cm: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height_unit: Option<HeightUnit>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weight_lb: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body_fat_percent: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weight_unit: Option<WeightUnit>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub activity_level: Option<ActivityLevel>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub goal_type: Option<GoalType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub goal_weight_lb: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub goal_target_date: Option<NaiveDate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub calorie_target: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub maintenance_calories: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub calorie_plan: Option<CaloriePlan>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub focus_modules: Option<Vec<FocusModule>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub onboarding_complete: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub onboarding_completed_at: Option<DateTime<Utc>>,
}

impl ProfilePatch {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Names of the fields present in this patch (for logging).
    pub fn field_names(&self) -> Vec<String> {
        match serde_json::to_value(self) {
            Ok(serde_json::Value::Object(map)) => map.keys().cloned().collect(),
            _ => Vec::new(),
        }
    }

    /// Merge this patch into a record, touching only present fields.
    ///
    /// `onboarding_completed_at` keeps the earliest timestamp so replaying a
    /// commit is a no-op.
    pub fn apply_to(&self, record: &mut ProfileRecord) {
        fn set<T: Clone>(target: &mut Option<T>, value: &Option<T>) {
            if let Some(v) = value {
                *target = Some(v.clone());
            }
        }

        set(&mut record.display_name, &self.display_name);
        set(&mut record.date_of_birth, &self.date_of_birth);
        set(&mut record.sex, &self.sex);
        set(&mut record.height_cm, &self.height_cm);
        set(&mut record.height_unit, &self.height_unit);
        set(&mut record.weight_lb, &self.weight_lb);
        set(&mut record.body_fat_percent, &self.body_fat_percent);
        set(&mut record.weight_unit, &self.weight_unit);
        set(&mut record.activity_level, &self.activity_level);
        set(&mut record.goal_type, &self.goal_type);
        set(&mut record.goal_weight_lb, &self.goal_weight_lb);
        set(&mut record.goal_target_date, &self.goal_target_date);
        set(&mut record.calorie_target, &self.calorie_target);
        set(&mut record.maintenance_calories, &self.maintenance_calories);
        set(&mut record.calorie_plan, &self.calorie_plan);
        if let Some(ref modules) = self.focus_modules {
            record.focus_modules = modules.clone();
        }
        if let Some(complete) = self.onboarding_complete {
            record.onboarding_complete = record.onboarding_complete || complete;
        }
        if let Some(at) = self.onboarding_completed_at {
            record.onboarding_completed_at = Some(match record.onboarding_completed_at {
                Some(existing) if existing <= at => existing,
                _ => at,
            });
        }
        record.updated_at = Utc::now();
    }
}

/// Keys used for the durable key-value cache.
pub mod settings_keys {
    /// Key under which the last committed profile is cached.
    pub const PROFILE_CACHE: &str = "profile_cache";
}
