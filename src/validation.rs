use once_cell::sync::Lazy;
use regex::Regex;
use validator::{Validate, ValidationError, ValidationErrors, ValidationErrorsKind};

use crate::error::{ApiError, FieldError};
use crate::models::PriceRange;

pub static SLUG_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-z0-9-]+$").expect("slug pattern compiles"));

pub static TIME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^([01]\d|2[0-3]):[0-5]\d$").expect("time pattern compiles"));

/// Runs the derived field checks and returns them as a flat list of field errors.
pub fn field_errors<T: Validate>(input: &T) -> Vec<FieldError> {
    match input.validate() {
        Ok(()) => Vec::new(),
        Err(errors) => flatten(&errors, ""),
    }
}

pub fn validate_input<T: Validate>(input: &T) -> Result<(), ApiError> {
    finish(field_errors(input))
}

/// Field checks followed by the composite rules of the request.
pub fn validate_with_rules<T: Validate>(input: &T, rules: Vec<FieldError>) -> Result<(), ApiError> {
    let mut errors = field_errors(input);
    errors.extend(rules);
    finish(errors)
}

pub fn finish(errors: Vec<FieldError>) -> Result<(), ApiError> {
    if errors.is_empty() {
        Ok(())
    } else {
        Err(ApiError::Validation(errors))
    }
}

pub fn prefixed(prefix: &str, errors: Vec<FieldError>) -> Vec<FieldError> {
    errors
        .into_iter()
        .map(|err| FieldError::new(format!("{prefix}.{}", err.field), err.message))
        .collect()
}

fn flatten(errors: &ValidationErrors, prefix: &str) -> Vec<FieldError> {
    let mut out = Vec::new();
    let mut keys: Vec<_> = errors.errors().keys().collect();
    keys.sort();

    for key in keys {
        let path = join_path(prefix, &camel_case(key));
        match &errors.errors()[key] {
            ValidationErrorsKind::Field(list) => {
                out.extend(list.iter().map(|err| FieldError::new(path.clone(), describe(err))));
            }
            ValidationErrorsKind::Struct(nested) => out.extend(flatten(nested, &path)),
            ValidationErrorsKind::List(items) => {
                for (index, nested) in items {
                    out.extend(flatten(nested, &format!("{path}.{index}")));
                }
            }
        }
    }

    out
}

fn join_path(prefix: &str, key: &str) -> String {
    if prefix.is_empty() {
        key.to_string()
    } else {
        format!("{prefix}.{key}")
    }
}

fn camel_case(key: &str) -> String {
    let mut out = String::with_capacity(key.len());
    let mut upper = false;
    for c in key.chars() {
        if c == '_' {
            upper = !out.is_empty();
        } else if upper {
            out.extend(c.to_uppercase());
            upper = false;
        } else {
            out.push(c);
        }
    }
    out
}

fn describe(err: &ValidationError) -> String {
    if let Some(message) = &err.message {
        return message.to_string();
    }

    let param = |name: &str| err.params.get(name).map(|value| value.to_string());
    match err.code.as_ref() {
        "length" => match (param("min"), param("max")) {
            (Some(min), Some(max)) => format!("Must be between {min} and {max} characters"),
            (Some(min), None) => format!("Must be at least {min} characters"),
            (None, Some(max)) => format!("Must be at most {max} characters"),
            _ => "Invalid length".to_string(),
        },
        "range" => match (param("min"), param("max")) {
            (Some(min), Some(max)) => format!("Must be between {min} and {max}"),
            (Some(min), None) => format!("Must be at least {min}"),
            (None, Some(max)) => format!("Must be at most {max}"),
            _ => "Out of range".to_string(),
        },
        "email" => "Invalid email".to_string(),
        "url" => "Invalid url".to_string(),
        code => format!("Invalid value ({code})"),
    }
}

/// Resolved `page`/`limit` pair after bounds checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    pub page: i64,
    pub limit: i64,
}

impl PageRequest {
    pub fn from_query(
        page: Option<i64>,
        limit: Option<i64>,
        default_limit: i64,
        max_limit: i64,
    ) -> Result<Self, ApiError> {
        let mut errors = Vec::new();
        let page = page.unwrap_or(1);
        let limit = limit.unwrap_or(default_limit);

        if page < 1 {
            errors.push(FieldError::new("page", "Page must be a positive integer"));
        }
        if limit < 1 || limit > max_limit {
            errors.push(FieldError::new(
                "limit",
                format!("Limit must be between 1 and {max_limit}"),
            ));
        }

        finish(errors)?;
        Ok(Self { page, limit })
    }

    pub fn offset(&self) -> i64 {
        (self.page - 1).saturating_mul(self.limit)
    }
}

pub fn parse_price_ranges(raw: Option<&str>) -> Result<Option<Vec<PriceRange>>, ApiError> {
    let Some(raw) = raw.filter(|value| !value.trim().is_empty()) else {
        return Ok(None);
    };

    let mut ranges = Vec::new();
    let mut invalid = Vec::new();
    for value in raw.split(',').map(str::trim) {
        match PriceRange::parse(value) {
            Some(range) => ranges.push(range),
            None => invalid.push(value.to_string()),
        }
    }

    if !invalid.is_empty() {
        return Err(ApiError::validation(
            "priceRange",
            format!("Invalid price range values: {}", invalid.join(", ")),
        ));
    }
    Ok(Some(ranges))
}

pub fn parse_feature_ids(raw: Option<&str>) -> Result<Option<Vec<i32>>, ApiError> {
    let Some(raw) = raw.filter(|value| !value.trim().is_empty()) else {
        return Ok(None);
    };

    raw.split(',')
        .map(|id| id.trim().parse::<i32>())
        .collect::<Result<Vec<_>, _>>()
        .map(Some)
        .map_err(|_| ApiError::validation("features", "Features must be comma-separated numbers"))
}

pub fn check_slug(field: &str, slug: &str, min: usize, max: usize) -> Result<(), ApiError> {
    if slug.len() < min || slug.len() > max || !SLUG_RE.is_match(slug) {
        return Err(ApiError::validation(
            field,
            "Invalid slug format (use lowercase letters, numbers, and hyphens)",
        ));
    }
    Ok(())
}

pub fn positive_id(field: &str, id: i32) -> Result<i32, ApiError> {
    if id < 1 {
        return Err(ApiError::validation(field, "Must be a positive integer"));
    }
    Ok(id)
}

/// Serde helpers that accept the loose shapes produced by multipart forms:
/// numbers sent as strings and nested arrays sent as JSON-encoded strings.
pub mod coerce {
    use serde::de::{DeserializeOwned, Error};
    use serde::{Deserialize, Deserializer};
    use serde_json::Value;

    fn number<'de, D: Deserializer<'de>>(value: Value) -> Result<Option<f64>, D::Error> {
        match value {
            Value::Null => Ok(None),
            Value::Number(n) => n
                .as_f64()
                .map(Some)
                .ok_or_else(|| D::Error::custom("expected a number")),
            Value::String(s) if s.trim().is_empty() => Ok(None),
            Value::String(s) => s
                .trim()
                .parse::<f64>()
                .map(Some)
                .map_err(|_| D::Error::custom(format!("expected a number, got '{s}'"))),
            _ => Err(D::Error::custom("expected a number")),
        }
    }

    fn to_i32<E: Error>(value: f64) -> Result<i32, E> {
        if value.fract() != 0.0 || value < i32::MIN as f64 || value > i32::MAX as f64 {
            return Err(E::custom("expected an integer"));
        }
        Ok(value as i32)
    }

    pub fn opt_f64<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<f64>, D::Error> {
        number::<D>(Value::deserialize(deserializer)?)
    }

    pub fn opt_i32<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<i32>, D::Error> {
        number::<D>(Value::deserialize(deserializer)?)?
            .map(to_i32)
            .transpose()
    }

    pub fn i32<'de, D: Deserializer<'de>>(deserializer: D) -> Result<i32, D::Error> {
        opt_i32(deserializer)?.ok_or_else(|| D::Error::custom("expected an integer"))
    }

    pub fn opt_bool<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<bool>, D::Error> {
        match Value::deserialize(deserializer)? {
            Value::Null => Ok(None),
            Value::Bool(b) => Ok(Some(b)),
            Value::String(s) => match s.trim() {
                "" => Ok(None),
                "true" | "1" => Ok(Some(true)),
                "false" | "0" => Ok(Some(false)),
                other => Err(D::Error::custom(format!("expected a boolean, got '{other}'"))),
            },
            _ => Err(D::Error::custom("expected a boolean")),
        }
    }

    /// A JSON array, or a string holding a JSON array.
    pub fn opt_json_list<'de, D, T>(deserializer: D) -> Result<Option<Vec<T>>, D::Error>
    where
        D: Deserializer<'de>,
        T: DeserializeOwned,
    {
        let value = match Value::deserialize(deserializer)? {
            Value::Null => return Ok(None),
            Value::String(s) if s.trim().is_empty() => return Ok(None),
            Value::String(s) => serde_json::from_str::<Value>(&s)
                .map_err(|_| D::Error::custom("expected a JSON-encoded array"))?,
            other => other,
        };

        if !value.is_array() {
            return Err(D::Error::custom("expected an array"));
        }
        serde_json::from_value(value)
            .map(Some)
            .map_err(|err| D::Error::custom(err.to_string()))
    }

    /// Like [`opt_json_list`] for integer ids, also accepting numeric strings inside the array.
    pub fn opt_id_list<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Vec<i32>>, D::Error> {
        let Some(values) = opt_json_list::<D, Value>(deserializer)? else {
            return Ok(None);
        };

        values
            .into_iter()
            .map(|value| number::<D>(value)?.ok_or_else(|| D::Error::custom("expected an integer")))
            .map(|value| value.and_then(to_i32))
            .collect::<Result<Vec<_>, _>>()
            .map(Some)
    }
}
