use email_address::EmailAddress;
use regex::Regex;
use serde_json::Value;
use url::Url;
use uuid::Uuid;

use crate::types::ValidationRule;

/// Returns `true` if the provided string is a syntactically valid email address.
pub fn is_valid_email(value: &str) -> bool {
    EmailAddress::is_valid(value)
}

/// Returns `true` if the provided string parses as a URL with a scheme.
pub fn is_valid_url(value: &str) -> bool {
    Url::parse(value).is_ok()
}

/// Returns `true` if the provided string parses as a UUID.
pub fn is_valid_uuid(value: &str) -> bool {
    Uuid::parse_str(value).is_ok()
}

fn length_of(value: &Value) -> Option<usize> {
    match value {
        Value::String(s) => Some(s.chars().count()),
        Value::Array(items) => Some(items.len()),
        _ => None,
    }
}

fn numeric_from_value(value: &Value) -> Option<f64> {
    match value {
        Value::Number(number) => number.as_f64(),
        Value::String(string) => string.parse::<f64>().ok(),
        _ => None,
    }
}

/// Checks a single rule. Returns the violation message, if any.
///
/// Rules only constrain values of the shape they understand: a length rule on
/// a number, or a regex on an object, passes.
pub fn check_rule(rule: &ValidationRule, value: &Value) -> Option<String> {
    match rule {
        ValidationRule::Length { min, max } => {
            let len = length_of(value)?;
            if let Some(min_len) = min
                && len < *min_len
            {
                return Some(format!("length must be at least {min_len}"));
            }
            if let Some(max_len) = max
                && len > *max_len
            {
                return Some(format!("length must be at most {max_len}"));
            }
            None
        }
        ValidationRule::Range { min, max } => {
            let candidate = numeric_from_value(value)?;
            if let Some(min) = min
                && candidate < *min
            {
                return Some(format!("value must be at least {min}"));
            }
            if let Some(max) = max
                && candidate > *max
            {
                return Some(format!("value must be at most {max}"));
            }
            None
        }
        ValidationRule::Regex { pattern } => {
            let candidate = value.as_str()?;
            let regex = Regex::new(pattern).ok()?;
            (!regex.is_match(candidate)).then(|| format!("value does not match pattern {pattern}"))
        }
        ValidationRule::Enum {
            allowed,
            case_insensitive,
        } => {
            let candidate = value.as_str()?;
            let matches = allowed.iter().any(|option| {
                if *case_insensitive {
                    option.eq_ignore_ascii_case(candidate)
                } else {
                    option == candidate
                }
            });
            (!matches).then(|| format!("value must be one of {allowed:?}"))
        }
        ValidationRule::Email => {
            let candidate = value.as_str()?;
            (!is_valid_email(candidate)).then(|| "value must be a valid email address".to_string())
        }
        ValidationRule::Url => {
            let candidate = value.as_str()?;
            (!is_valid_url(candidate)).then(|| "value must be a valid URL".to_string())
        }
        ValidationRule::Uuid => {
            let candidate = value.as_str()?;
            (!is_valid_uuid(candidate)).then(|| "value must be a valid UUID".to_string())
        }
    }
}

/// Runs every rule against `value` and returns the first violation.
///
/// `null` is never checked; nullability is governed by the mandatory flags.
pub fn check_value(rules: &[ValidationRule], value: &Value) -> Option<String> {
    if value.is_null() {
        return None;
    }
    rules.iter().find_map(|rule| check_rule(rule, value))
}
