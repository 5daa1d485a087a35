use crate::model::{format_date, MealType};
use chrono::NaiveDate;
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CafeteriaError {
    #[error("{entity} not found: {key}")]
    NotFound { entity: &'static str, key: String },

    #[error("student {identifier} is inactive")]
    Inactive { identifier: String },

    #[error("{meal_type} already registered for {date}")]
    DuplicateForPeriod {
        existing_id: Option<i64>,
        meal_type: MealType,
        date: NaiveDate,
    },

    #[error("{message}")]
    Validation { field: &'static str, message: String },

    #[error("unknown search criteria: {0}")]
    InvalidCriteria(String),

    #[error("invalid credentials")]
    Unauthorized,

    #[error("{0}")]
    Forbidden(String),

    #[error("storage failure: {0}")]
    Storage(#[from] rusqlite::Error),
}

pub type Result<T> = std::result::Result<T, CafeteriaError>;

impl CafeteriaError {
    pub fn not_found(entity: &'static str, key: impl ToString) -> Self {
        CafeteriaError::NotFound {
            entity,
            key: key.to_string(),
        }
    }

    pub fn validation(field: &'static str, message: impl Into<String>) -> Self {
        CafeteriaError::Validation {
            field,
            message: message.into(),
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            CafeteriaError::NotFound { .. } => "not_found",
            CafeteriaError::Inactive { .. } => "student_inactive",
            CafeteriaError::DuplicateForPeriod { .. } => "duplicate_for_period",
            CafeteriaError::Validation { .. } => "bad_params",
            CafeteriaError::InvalidCriteria(_) => "invalid_criteria",
            CafeteriaError::Unauthorized => "unauthorized",
            CafeteriaError::Forbidden(_) => "forbidden",
            CafeteriaError::Storage(_) => "db_query_failed",
        }
    }

    pub fn details(&self) -> Option<serde_json::Value> {
        match self {
            CafeteriaError::NotFound { entity, key } => {
                Some(json!({ "entity": entity, "key": key }))
            }
            CafeteriaError::Inactive { identifier } => Some(json!({ "identifier": identifier })),
            CafeteriaError::DuplicateForPeriod {
                existing_id,
                meal_type,
                date,
            } => Some(json!({
                "existingId": existing_id,
                "mealType": meal_type.as_str(),
                "date": format_date(*date),
            })),
            CafeteriaError::Validation { field, .. } => Some(json!({ "field": field })),
            CafeteriaError::InvalidCriteria(kind) => Some(json!({ "criteria": kind })),
            _ => None,
        }
    }
}

/// True when a storage error is a UNIQUE or PRIMARY KEY violation.
pub fn is_unique_violation(e: &rusqlite::Error) -> bool {
    matches!(
        e,
        rusqlite::Error::SqliteFailure(f, _)
            if f.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
                || f.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY
    )
}
