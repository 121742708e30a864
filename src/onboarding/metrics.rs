//! Unit conversions and rounding policy for body metrics.
//!
//! Canonical storage units are pounds (one decimal place) for weight and
//! centimetres (one decimal place) for height. Everything the user types is
//! parsed and normalised through here before it reaches a draft.

use chrono::{Datelike, NaiveDate};

/// Kilograms per pound (exact by definition).
pub const KG_PER_LB: f64 = 0.453_592_37;

/// Centimetres per inch (exact by definition).
pub const CM_PER_INCH: f64 = 2.54;

/// Decimal places kept for canonical weights.
pub const WEIGHT_PRECISION: u32 = 1;

/// Decimal places kept for canonical heights.
pub const HEIGHT_PRECISION: u32 = 1;

pub fn lb_to_kg(lb: f64) -> f64 {
    lb * KG_PER_LB
}

pub fn kg_to_lb(kg: f64) -> f64 {
    kg / KG_PER_LB
}

pub fn inches_to_cm(inches: f64) -> f64 {
    inches * CM_PER_INCH
}

/// Feet + inches to centimetres.
pub fn feet_inches_to_cm(feet: f64, inches: f64) -> f64 {
    inches_to_cm(feet * 12.0 + inches)
}

/// Centimetres to whole feet and remaining inches (inches rounded to one decimal).
pub fn cm_to_feet_inches(cm: f64) -> (u32, f64) {
    let total_inches = cm / CM_PER_INCH;
    let mut feet = (total_inches / 12.0).floor();
    let mut inches = round_to(total_inches - feet * 12.0, 1);
    if inches >= 12.0 {
        feet += 1.0;
        inches -= 12.0;
    }
    (feet as u32, inches)
}

/// Round half away from zero to `decimals` places.
pub fn round_to(value: f64, decimals: u32) -> f64 {
    let factor = 10f64.powi(decimals as i32);
    (value * factor).round() / factor
}

/// Normalise a weight in pounds to canonical precision.
pub fn canonical_weight_lb(lb: f64) -> f64 {
    round_to(lb, WEIGHT_PRECISION)
}

/// Normalise a height in centimetres to canonical precision.
pub fn canonical_height_cm(cm: f64) -> f64 {
    round_to(cm, HEIGHT_PRECISION)
}

/// Parse user input as a positive, finite number.
///
/// Accepts a comma as decimal separator. Empty, negative, zero, NaN and
/// infinite inputs yield `None`.
pub fn parse_positive(input: &str) -> Option<f64> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return None;
    }
    let value: f64 = trimmed.replace(',', ".").parse().ok()?;
    (value.is_finite() && value > 0.0).then_some(value)
}

/// Parse user input as a non-negative, finite number (zero allowed).
pub fn parse_non_negative(input: &str) -> Option<f64> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return None;
    }
    let value: f64 = trimmed.replace(',', ".").parse().ok()?;
    (value.is_finite() && value >= 0.0).then_some(value)
}

/// Parse an ISO `YYYY-MM-DD` date.
pub fn parse_date(input: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(input.trim(), "%Y-%m-%d").ok()
}

/// Age in completed years on `today`. `None` when the date is in the future.
pub fn age_on(date_of_birth: NaiveDate, today: NaiveDate) -> Option<u32> {
    if date_of_birth > today {
        return None;
    }
    let mut years = today.year() - date_of_birth.year();
    if (today.month(), today.day()) < (date_of_birth.month(), date_of_birth.day()) {
        years -= 1;
    }
    u32::try_from(years).ok()
}

/// Whole weeks (fractional) between `today` and `target`. `None` unless the
/// target is strictly in the future.
pub fn weeks_until(today: NaiveDate, target: NaiveDate) -> Option<f64> {
    let days = (target - today).num_days();
    (days > 0).then(|| days as f64 / 7.0)
}
