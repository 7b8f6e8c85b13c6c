//! Field-level validation of incoming requests.

use std::collections::BTreeMap;
use std::fmt;

use chrono::NaiveDateTime;
use rust_decimal::Decimal;
use serde::Serialize;

/// Longest accepted address, in characters.
pub const MAX_ADDRESS_LEN: usize = 255;

/// Longest accepted rating comment, in characters.
pub const MAX_COMMENT_LEN: usize = 500;

pub const MIN_SCORE: f64 = 1.0;
pub const MAX_SCORE: f64 = 5.0;

/// Field name to message map. Only the first failure per field is kept.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct ValidationErrors(BTreeMap<String, String>);

impl ValidationErrors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, field: &str, message: impl Into<String>) {
        self.0
            .entry(field.to_string())
            .or_insert_with(|| message.into());
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, field: &str) -> Option<&str> {
        self.0.get(field).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Returns `value` if no field failed, the collected errors otherwise.
    pub fn finish<T>(self, value: impl FnOnce() -> T) -> Result<T, ValidationErrors> {
        if self.is_empty() {
            Ok(value())
        } else {
            Err(self)
        }
    }
}

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (field, message) in &self.0 {
            if !first {
                f.write_str("; ")?;
            }
            write!(f, "{field}: {message}")?;
            first = false;
        }
        Ok(())
    }
}

pub(crate) fn positive_id(
    errors: &mut ValidationErrors,
    field: &str,
    label: &str,
    value: Option<i64>,
) -> i64 {
    match value {
        None => {
            errors.add(field, format!("{label} cannot be null"));
            0
        }
        Some(id) if id <= 0 => {
            errors.add(field, format!("{label} must be positive"));
            id
        }
        Some(id) => id,
    }
}

pub(crate) fn address(
    errors: &mut ValidationErrors,
    field: &str,
    label: &str,
    value: &Option<String>,
) -> String {
    match value.as_deref() {
        None => {
            errors.add(field, format!("{label} cannot be blank"));
            String::new()
        }
        Some(text) if text.trim().is_empty() => {
            errors.add(field, format!("{label} cannot be blank"));
            String::new()
        }
        Some(text) if text.chars().count() > MAX_ADDRESS_LEN => {
            errors.add(
                field,
                format!("{label} must be less than {MAX_ADDRESS_LEN} characters"),
            );
            String::new()
        }
        Some(text) => text.to_string(),
    }
}

pub(crate) fn past_or_present(
    errors: &mut ValidationErrors,
    field: &str,
    value: Option<NaiveDateTime>,
    now: NaiveDateTime,
) -> NaiveDateTime {
    match value {
        None => {
            errors.add(field, "Order date time cannot be null");
            now
        }
        Some(at) if at > now => {
            errors.add(field, "Order date time must be in the past or present");
            at
        }
        Some(at) => at,
    }
}

pub(crate) fn price(errors: &mut ValidationErrors, field: &str, value: Option<Decimal>) -> Decimal {
    let Some(price) = value else {
        errors.add(field, "Price cannot be null");
        return Decimal::ZERO;
    };
    if price.is_sign_negative() && !price.is_zero() {
        errors.add(field, "Price must not be negative");
    } else if price.normalize().scale() > 2 || price.trunc() >= Decimal::from(10_000_000_000_i64) {
        errors.add(
            field,
            "Price must have up to 10 digits before the decimal and 2 digits after",
        );
    }
    price
}

pub(crate) fn score(errors: &mut ValidationErrors, value: Option<f64>) -> f64 {
    match value {
        None => {
            errors.add("score", "Rating cannot be null");
            0.0
        }
        Some(s) if s.is_nan() || s < MIN_SCORE => {
            errors.add("score", "Rating must be at least 1.0");
            s
        }
        Some(s) if s > MAX_SCORE => {
            errors.add("score", "Rating must be at most 5.0");
            s
        }
        Some(s) => s,
    }
}

pub(crate) fn comment(errors: &mut ValidationErrors, value: &Option<String>) -> Option<String> {
    if let Some(text) = value
        && text.chars().count() > MAX_COMMENT_LEN
    {
        errors.add(
            "comment",
            format!("Comment cannot exceed {MAX_COMMENT_LEN} characters"),
        );
    }
    value.clone()
}
