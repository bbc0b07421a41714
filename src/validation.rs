use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;
use utoipa::ToSchema;

use crate::error::{AppError, AppResult};

/// Smallest and largest value accepted for amounts and cooking times (SMALLINT, positive).
pub const MIN_SMALL_POSITIVE: i64 = 1;
pub const MAX_SMALL_POSITIVE: i64 = i16::MAX as i64;

pub const REQUIRED_FIELD: &str = "Обязательное поле.";
/// Key for messages that are not tied to a single field.
pub const NON_FIELD_ERRORS: &str = "non_field_errors";

/// Field-level validation messages keyed by field name.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, ToSchema)]
#[serde(transparent)]
pub struct FieldErrors(BTreeMap<String, Vec<String>>);

impl FieldErrors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, field: &str, message: impl Into<String>) {
        self.0
            .entry(field.to_string())
            .or_default()
            .push(message.into());
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, field: &str) -> Option<&[String]> {
        self.0.get(field).map(Vec::as_slice)
    }

    pub fn into_result(self) -> AppResult<()> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(AppError::Validation(self))
        }
    }

    /// Required, trimmed-non-empty string of at most `max_chars` characters.
    pub fn check_text(&mut self, field: &str, value: &str, max_chars: Option<usize>) {
        if value.trim().is_empty() {
            self.add(field, REQUIRED_FIELD);
            return;
        }
        if let Some(max) = max_chars.filter(|max| value.chars().count() > *max) {
            self.add(field, format!("Не более {max} символов."));
        }
    }

    /// Positive SMALLINT range check; returns the narrowed value when it fits.
    pub fn check_small_positive(&mut self, field: &str, value: i64) -> Option<i16> {
        if value < MIN_SMALL_POSITIVE {
            self.add(field, format!("Значение должно быть не меньше {MIN_SMALL_POSITIVE}."));
            return None;
        }
        if value > MAX_SMALL_POSITIVE {
            self.add(field, format!("Значение должно быть не больше {MAX_SMALL_POSITIVE}."));
            return None;
        }
        i16::try_from(value).ok()
    }
}

impl fmt::Display for FieldErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (field, messages) in &self.0 {
            if !first {
                f.write_str("; ")?;
            }
            first = false;
            write!(f, "{field}: {}", messages.join(" "))?;
        }
        Ok(())
    }
}
