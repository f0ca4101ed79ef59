//! Lead intake: validation and normalization of inbound submissions.
//!
//! Everything here runs before any batch lookup. A submission that fails
//! validation is rejected to the caller and never reaches the engine.

use crate::errors::AppError;
use phonenumber::country::Id as CountryId;
use phonenumber::Mode;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::OnceLock;

/// Raw lead as submitted by a form or campaign webhook.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct LeadSubmission {
    pub email: Option<String>,
    #[serde(alias = "branch")]
    pub vertical: Option<String>,
    #[serde(alias = "postal_code", alias = "zipcode")]
    pub postcode: Option<String>,
    pub name: Option<String>,
    pub phone: Option<String>,
    #[serde(default)]
    pub interests: Option<Value>,
}

/// A validated lead ready for upsert.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewLead {
    pub email: String,
    pub vertical: String,
    pub postcode: Option<String>,
    pub name: Option<String>,
    pub phone: Option<String>,
    pub interests: Value,
}

fn email_regex() -> &'static Regex {
    static EMAIL: OnceLock<Regex> = OnceLock::new();
    EMAIL.get_or_init(|| {
        Regex::new(
            r"^[a-zA-Z0-9.!#$%&'*+/=?^_`{|}~-]+@[a-zA-Z0-9](?:[a-zA-Z0-9-]{0,61}[a-zA-Z0-9])?(?:\.[a-zA-Z0-9](?:[a-zA-Z0-9-]{0,61}[a-zA-Z0-9])?)+$",
        )
        .expect("email regex is valid")
    })
}

/// Validate an email address.
///
/// Checks basic structure, a dotted domain, and the placeholder patterns
/// people type into forms to get past them (999999, 111111...).
pub fn is_valid_email(email: &str) -> bool {
    if email.len() < 5 || !email.contains('@') || !email.contains('.') {
        return false;
    }

    let fake_patterns = ["999999", "111111", "000000", "123456789"];
    if let Some(pattern) = fake_patterns.iter().find(|p| email.contains(*p)) {
        tracing::warn!(
            "Invalid email detected (fake pattern '{}'): {}",
            pattern,
            email
        );
        return false;
    }

    if !email_regex().is_match(email) {
        tracing::warn!("Invalid email format: {}", email);
        return false;
    }

    true
}

/// Normalize a Dutch phone number to E.164.
///
/// Returns `None` when the number cannot be parsed or is not a valid NL number.
pub fn normalize_nl_phone(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.len() < 8 {
        return None;
    }

    match phonenumber::parse(Some(CountryId::NL), trimmed) {
        Ok(number) if phonenumber::is_valid(&number) => {
            Some(number.format().mode(Mode::E164).to_string())
        }
        Ok(_) => {
            tracing::debug!("Phone is not a valid NL number: {}", trimmed);
            None
        }
        Err(e) => {
            tracing::debug!("Failed to parse phone '{}': {:?}", trimmed, e);
            None
        }
    }
}

/// Uppercase and strip whitespace. Empty input becomes `None`.
pub fn clean_postcode(raw: &str) -> Option<String> {
    let cleaned: String = raw
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect::<String>()
        .to_uppercase();
    (!cleaned.is_empty()).then_some(cleaned)
}

fn non_empty(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

/// Validate and normalize a submission.
///
/// The vertical and a valid email are required. A phone that cannot be
/// normalized is kept as typed, since the customer may still be able to use it.
pub fn validate_submission(submission: &LeadSubmission) -> Result<NewLead, AppError> {
    let vertical = non_empty(submission.vertical.as_deref())
        .map(|v| v.to_lowercase())
        .ok_or_else(|| AppError::BadRequest("Lead vertical (branch) is required".to_string()))?;

    let email = non_empty(submission.email.as_deref())
        .map(|e| e.to_lowercase())
        .ok_or_else(|| AppError::BadRequest("Lead email is required".to_string()))?;
    if !is_valid_email(&email) {
        return Err(AppError::BadRequest(format!("Invalid email: {}", email)));
    }

    let phone = non_empty(submission.phone.as_deref()).map(|raw| {
        normalize_nl_phone(&raw).unwrap_or_else(|| {
            tracing::warn!("Keeping unnormalized phone for {}: {}", email, raw);
            raw
        })
    });

    let interests = match &submission.interests {
        None | Some(Value::Null) => Value::Object(Default::default()),
        Some(v) => v.clone(),
    };

    Ok(NewLead {
        email,
        vertical,
        postcode: submission.postcode.as_deref().and_then(clean_postcode),
        name: non_empty(submission.name.as_deref()),
        phone,
        interests,
    })
}
