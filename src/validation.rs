//! Form input validation and sanitization.
//!
//! Every validator returns a [`ValidationResult`] carrying a validity flag
//! and the full list of violated rules - callers render all messages at
//! once instead of fixing one error per submit. Validation failures are
//! data, never `Err`.
//!
//! `sanitize_string` and `validate_query_param` are heuristic filters for
//! defense in depth. They do not replace output encoding or parameterized
//! queries upstream.

use std::collections::HashMap;

use regex::Regex;

/// Maximum accepted length for a person or device name.
const MAX_NAME_LENGTH: usize = 100;

/// Minimum password length required by the password rules.
const MIN_PASSWORD_LENGTH: usize = 8;

/// Outcome of a single validation. `errors` is empty iff `is_valid`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationResult {
    pub is_valid: bool,
    pub errors: Vec<String>,
}

impl ValidationResult {
    fn ok() -> Self {
        Self {
            is_valid: true,
            errors: Vec::new(),
        }
    }

    fn from_errors(errors: Vec<String>) -> Self {
        Self {
            is_valid: errors.is_empty(),
            errors,
        }
    }
}

/// Outcome of validating a whole form. `errors` holds entries only for
/// failing fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormValidation {
    pub is_valid: bool,
    pub errors: HashMap<String, Vec<String>>,
}

/// Optional constraints for [`validate_number`].
#[derive(Debug, Clone, Copy, Default)]
pub struct NumberConstraints {
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub integer_only: bool,
}

/// Validate an email address.
pub fn validate_email(value: &str) -> ValidationResult {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return ValidationResult::from_errors(vec!["Email is required".to_string()]);
    }

    let well_formed = Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$")
        .is_ok_and(|re| re.is_match(trimmed));
    if well_formed {
        ValidationResult::ok()
    } else {
        ValidationResult::from_errors(vec!["Invalid email address".to_string()])
    }
}

/// Validate a password against the five complexity rules. All violated
/// rules are reported, not just the first.
pub fn validate_password(value: &str) -> ValidationResult {
    let mut errors = Vec::new();

    if value.len() < MIN_PASSWORD_LENGTH {
        errors.push(format!(
            "Password must be at least {} characters",
            MIN_PASSWORD_LENGTH
        ));
    }
    if !value.chars().any(|c| c.is_ascii_uppercase()) {
        errors.push("Password must contain an uppercase letter".to_string());
    }
    if !value.chars().any(|c| c.is_ascii_lowercase()) {
        errors.push("Password must contain a lowercase letter".to_string());
    }
    if !value.chars().any(|c| c.is_ascii_digit()) {
        errors.push("Password must contain a number".to_string());
    }
    if !value.chars().any(|c| !c.is_alphanumeric() && !c.is_whitespace()) {
        errors.push("Password must contain a special character".to_string());
    }

    ValidationResult::from_errors(errors)
}

/// Validate a display name. `label` names the field in error messages.
pub fn validate_name(label: &str, value: &str) -> ValidationResult {
    let trimmed = value.trim();
    let mut errors = Vec::new();

    if trimmed.is_empty() {
        errors.push(format!("{} is required", label));
    } else {
        if trimmed.len() > MAX_NAME_LENGTH {
            errors.push(format!(
                "{} must be at most {} characters",
                label, MAX_NAME_LENGTH
            ));
        }
        let allowed = trimmed
            .chars()
            .all(|c| c.is_alphanumeric() || c.is_whitespace() || matches!(c, '-' | '\'' | '.'));
        if !allowed {
            errors.push(format!("{} contains invalid characters", label));
        }
    }

    ValidationResult::from_errors(errors)
}

/// Validate a numeric form value (arrives as a string) against optional
/// range and integer constraints.
pub fn validate_number(
    label: &str,
    value: &str,
    constraints: NumberConstraints,
) -> ValidationResult {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return ValidationResult::from_errors(vec![format!("{} is required", label)]);
    }

    let parsed: f64 = match trimmed.parse() {
        Ok(n) => n,
        Err(_) => {
            return ValidationResult::from_errors(vec![format!("{} must be a number", label)]);
        }
    };

    let mut errors = Vec::new();
    if !parsed.is_finite() {
        errors.push(format!("{} must be a number", label));
    }
    if constraints.integer_only && parsed.fract() != 0.0 {
        errors.push(format!("{} must be a whole number", label));
    }
    if let Some(min) = constraints.min {
        if parsed < min {
            errors.push(format!("{} must be at least {}", label, min));
        }
    }
    if let Some(max) = constraints.max {
        if parsed > max {
            errors.push(format!("{} must be at most {}", label, max));
        }
    }

    ValidationResult::from_errors(errors)
}

/// Validate an absolute http(s) URL.
pub fn validate_url(value: &str) -> ValidationResult {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return ValidationResult::from_errors(vec!["URL is required".to_string()]);
    }

    match url::Url::parse(trimmed) {
        Ok(parsed) if parsed.scheme() == "http" || parsed.scheme() == "https" => {
            ValidationResult::ok()
        }
        Ok(_) => ValidationResult::from_errors(vec![
            "URL must use http or https".to_string()
        ]),
        Err(_) => ValidationResult::from_errors(vec!["Invalid URL".to_string()]),
    }
}

/// Validate that a string parses as JSON.
pub fn validate_json(value: &str) -> ValidationResult {
    match serde_json::from_str::<serde_json::Value>(value) {
        Ok(_) => ValidationResult::ok(),
        Err(_) => ValidationResult::from_errors(vec!["Invalid JSON".to_string()]),
    }
}

/// Clean an untrusted string for display contexts: trims whitespace, strips
/// angle brackets, `javascript:` URI prefixes, and inline event-handler
/// attribute patterns (`onclick=` etc.), all case-insensitively.
///
/// Heuristic filter only - not a substitute for output encoding.
pub fn sanitize_string(value: &str) -> String {
    let mut cleaned: String = value
        .trim()
        .chars()
        .filter(|c| *c != '<' && *c != '>')
        .collect();

    if let Ok(re) = Regex::new(r"(?i)javascript:") {
        cleaned = re.replace_all(&cleaned, "").into_owned();
    }
    if let Ok(re) = Regex::new(r"(?i)\bon\w+\s*=") {
        cleaned = re.replace_all(&cleaned, "").into_owned();
    }

    cleaned
}

/// Fixed screening patterns for [`validate_query_param`]: SQL keywords,
/// comment markers, statement separators, and the classic tautology.
const QUERY_SCREEN_PATTERNS: &[&str] = &[
    r"(?i)\b(select|insert|update|delete|drop|union|alter|create|truncate|exec|execute)\b",
    r"--",
    r"/\*",
    r";",
    r#"(?i)\bor\b\s+['"]?\d+['"]?\s*=\s*['"]?\d+"#,
];

/// Screen a value destined for a query parameter. Returns `false` if the
/// input matches any SQL-injection pattern. Defense in depth - the server
/// is still expected to use parameterized queries.
pub fn validate_query_param(value: &str) -> bool {
    for pattern in QUERY_SCREEN_PATTERNS {
        if Regex::new(pattern).is_ok_and(|re| re.is_match(value)) {
            return false;
        }
    }
    true
}

/// Apply a validator per field over a record of field values. The error map
/// contains keys only for fields that failed.
pub fn validate_form(
    fields: &[(&str, &str, &dyn Fn(&str) -> ValidationResult)],
) -> FormValidation {
    let mut errors: HashMap<String, Vec<String>> = HashMap::new();

    for (name, value, validator) in fields {
        let result = validator(value);
        if !result.is_valid {
            errors.insert((*name).to_string(), result.errors);
        }
    }

    FormValidation {
        is_valid: errors.is_empty(),
        errors,
    }
}
