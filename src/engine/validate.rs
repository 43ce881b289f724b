use rust_decimal::Decimal;

use crate::limits::*;

use super::EngineError;

/// Trimmed, non-empty, bounded text.
pub(crate) fn required_text(field: &'static str, value: &str, max: usize) -> Result<String, EngineError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(EngineError::Validation(format!("{field} is required")));
    }
    if trimmed.chars().count() > max {
        return Err(EngineError::Validation(format!(
            "{field} must be at most {max} characters"
        )));
    }
    Ok(trimmed.to_string())
}

/// Free text, may be empty.
pub(crate) fn optional_text(field: &'static str, value: &str, max: usize) -> Result<String, EngineError> {
    if value.chars().count() > max {
        return Err(EngineError::Validation(format!(
            "{field} must be at most {max} characters"
        )));
    }
    Ok(value.to_string())
}

pub(crate) fn email(value: &str) -> Result<String, EngineError> {
    let email = required_text("email", value, MAX_EMAIL_LEN)?;
    let valid = match email.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty()
                && !domain.is_empty()
                && !domain.contains('@')
                && domain.contains('.')
                && !domain.starts_with('.')
                && !domain.ends_with('.')
                && !email.contains(char::is_whitespace)
        }
        None => false,
    };
    if !valid {
        return Err(EngineError::Validation(format!("invalid email: {email}")));
    }
    Ok(email)
}

pub(crate) fn phone(value: Option<String>) -> Result<Option<String>, EngineError> {
    match value {
        None => Ok(None),
        Some(p) if p.trim().is_empty() => Ok(None),
        Some(p) => Ok(Some(required_text("phone_number", &p, MAX_PHONE_LEN)?)),
    }
}

pub(crate) fn capacity(value: u32) -> Result<u32, EngineError> {
    if value == 0 {
        return Err(EngineError::Validation("capacity must be at least 1".into()));
    }
    Ok(value)
}

/// Non-negative amount with at most `PRICE_SCALE` decimals and `max_digits` digits.
pub(crate) fn money(field: &'static str, value: Decimal, max_digits: u32) -> Result<Decimal, EngineError> {
    if value.is_sign_negative() && !value.is_zero() {
        return Err(EngineError::Validation(format!("{field} must not be negative")));
    }
    let normalized = value.normalize();
    if normalized.scale() > PRICE_SCALE {
        return Err(EngineError::Validation(format!(
            "{field} must have at most {PRICE_SCALE} decimal places"
        )));
    }
    let limit = Decimal::from(10u64.pow(max_digits - PRICE_SCALE));
    if value >= limit {
        return Err(EngineError::Validation(format!(
            "{field} must have at most {max_digits} digits"
        )));
    }
    let mut fixed = normalized;
    fixed.rescale(PRICE_SCALE);
    Ok(fixed)
}

/// Nightly rates must be strictly positive.
pub(crate) fn rate(value: Decimal) -> Result<Decimal, EngineError> {
    let price = money("price", value, MAX_RATE_DIGITS)?;
    if price.is_zero() {
        return Err(EngineError::Validation("price must be positive".into()));
    }
    Ok(price)
}
