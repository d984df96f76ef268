use std::fmt;

use crate::error::AppError;

pub const SLUG_MAX_LEN: usize = 64;
pub const NAME_MAX_LEN: usize = 255;
pub const DESCRIPTION_MAX_LEN: usize = 1024;
pub const EMAIL_MAX_LEN: usize = 254;
/// One billion major units, well within `i64` cents.
pub const MAX_AMOUNT: i64 = 100_000_000_000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub field: &'static str,
    pub message: String,
}

impl ValidationError {
    pub fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

impl std::error::Error for ValidationError {}

impl From<ValidationError> for AppError {
    fn from(err: ValidationError) -> Self {
        AppError::Validation(err.to_string())
    }
}

pub type ValidationResult = Result<(), ValidationError>;

pub fn sanitize_string(value: &str) -> String {
    value
        .chars()
        .filter(|ch| !ch.is_control())
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

pub fn validate_required(field: &'static str, value: &str) -> ValidationResult {
    if value.trim().is_empty() {
        return Err(ValidationError::new(field, "must not be empty"));
    }

    Ok(())
}

pub fn validate_max_len(field: &'static str, value: &str, max_len: usize) -> ValidationResult {
    if value.chars().count() > max_len {
        return Err(ValidationError::new(
            field,
            format!("must be at most {} characters", max_len),
        ));
    }

    Ok(())
}

/// Lowercase letters, digits and dashes, not starting or ending with a dash.
pub fn validate_slug(slug: &str) -> ValidationResult {
    validate_required("slug", slug)?;
    validate_max_len("slug", slug, SLUG_MAX_LEN)?;

    if !slug
        .chars()
        .all(|ch| ch.is_ascii_lowercase() || ch.is_ascii_digit() || ch == '-')
    {
        return Err(ValidationError::new(
            "slug",
            "must contain only lowercase letters, digits and dashes",
        ));
    }
    if slug.starts_with('-') || slug.ends_with('-') {
        return Err(ValidationError::new("slug", "must not start or end with a dash"));
    }

    Ok(())
}

/// ISO-4217 style code: three uppercase ASCII letters.
pub fn validate_currency(currency: &str) -> ValidationResult {
    if currency.len() != 3 || !currency.chars().all(|ch| ch.is_ascii_uppercase()) {
        return Err(ValidationError::new(
            "currency",
            "must be a three-letter uppercase ISO-4217 code",
        ));
    }

    Ok(())
}

pub fn validate_email(email: &str) -> ValidationResult {
    validate_max_len("email", email, EMAIL_MAX_LEN)?;
    match email.split_once('@') {
        Some((local, domain)) if !local.is_empty() && domain.contains('.') => Ok(()),
        _ => Err(ValidationError::new("email", "must be a valid email address")),
    }
}

pub fn validate_positive_amount(field: &'static str, amount: i64) -> ValidationResult {
    if amount <= 0 {
        return Err(ValidationError::new(field, "must be greater than zero"));
    }
    if amount > MAX_AMOUNT {
        return Err(ValidationError::new(field, "is too large"));
    }

    Ok(())
}

pub fn validate_non_negative_amount(field: &'static str, amount: i64) -> ValidationResult {
    if amount < 0 {
        return Err(ValidationError::new(field, "must not be negative"));
    }

    Ok(())
}
