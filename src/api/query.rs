//! Query string validation. The only failures the HTTP surface reports.

use crate::core::error::ValidationError;
use crate::core::price::Interval;
use serde::Deserialize;

pub const MAX_IDS: u32 = 100;
pub const MAX_DAYS: u32 = 365;

#[derive(Debug, Default, Deserialize)]
pub struct PricesQuery {
    pub ids: Option<String>,
    pub currency: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct HistoryQuery {
    pub id: Option<String>,
    pub days: Option<String>,
    pub interval: Option<String>,
    pub currency: Option<String>,
    pub debug: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct RiskQuery {
    pub ids: Option<String>,
    pub values: Option<String>,
    pub days: Option<String>,
    pub interval: Option<String>,
    pub currency: Option<String>,
}

fn present(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

/// Comma separated ids, at least one and at most [`MAX_IDS`].
pub fn ids(raw: Option<&str>) -> Result<Vec<String>, ValidationError> {
    let raw = present(raw).ok_or(ValidationError::Missing("ids"))?;
    let ids: Vec<String> = raw
        .split(',')
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .map(str::to_string)
        .collect();
    if ids.is_empty() || ids.len() > MAX_IDS as usize {
        return Err(ValidationError::OutOfRange {
            field: "ids",
            min: 1,
            max: MAX_IDS,
        });
    }
    if let Some(bad) = ids
        .iter()
        .find(|id| !id.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'))
    {
        return Err(ValidationError::Invalid {
            field: "ids",
            value: bad.clone(),
        });
    }
    Ok(ids)
}

pub fn id(raw: Option<&str>) -> Result<String, ValidationError> {
    let mut ids = ids(raw).map_err(|e| match e {
        ValidationError::Missing(_) => ValidationError::Missing("id"),
        other => other,
    })?;
    if ids.len() != 1 {
        return Err(ValidationError::Invalid {
            field: "id",
            value: ids.join(","),
        });
    }
    Ok(ids.remove(0))
}

pub fn values(raw: Option<&str>) -> Result<Vec<f64>, ValidationError> {
    let raw = present(raw).ok_or(ValidationError::Missing("values"))?;
    raw.split(',')
        .map(|v| {
            v.trim()
                .parse::<f64>()
                .ok()
                .filter(|v| v.is_finite())
                .ok_or_else(|| ValidationError::Invalid {
                    field: "values",
                    value: v.to_string(),
                })
        })
        .collect()
}

pub fn currency(raw: Option<&str>, default: &str) -> Result<String, ValidationError> {
    let Some(raw) = present(raw) else {
        return Ok(default.to_string());
    };
    let code = raw.to_lowercase();
    if !(2..=10).contains(&code.len()) || !code.chars().all(|c| c.is_ascii_alphabetic()) {
        return Err(ValidationError::Invalid {
            field: "currency",
            value: raw.to_string(),
        });
    }
    Ok(code)
}

pub fn days(raw: Option<&str>, default: u32) -> Result<u32, ValidationError> {
    let Some(raw) = present(raw) else {
        return Ok(default);
    };
    let days: u32 = raw.parse().map_err(|_| ValidationError::Invalid {
        field: "days",
        value: raw.to_string(),
    })?;
    if !(1..=MAX_DAYS).contains(&days) {
        return Err(ValidationError::OutOfRange {
            field: "days",
            min: 1,
            max: MAX_DAYS,
        });
    }
    Ok(days)
}

pub fn interval(raw: Option<&str>, default: Interval) -> Result<Interval, ValidationError> {
    match present(raw) {
        None => Ok(default),
        Some(raw) => raw.parse().map_err(|_| ValidationError::Invalid {
            field: "interval",
            value: raw.to_string(),
        }),
    }
}

pub fn flag(raw: Option<&str>, field: &'static str) -> Result<bool, ValidationError> {
    match present(raw) {
        None | Some("0") | Some("false") => Ok(false),
        Some("1") | Some("true") => Ok(true),
        Some(other) => Err(ValidationError::Invalid {
            field,
            value: other.to_string(),
        }),
    }
}
