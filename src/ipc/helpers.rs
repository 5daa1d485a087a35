use crate::auth;
use crate::error::CafeteriaError;
use crate::model::{parse_date, User};
use chrono::NaiveDate;
use rusqlite::Connection;
use serde_json::json;

use super::error::{err, OrResponse};
use super::types::{AppState, Request};

pub fn db_conn<'a>(state: &'a AppState, req: &Request) -> Result<&'a Connection, serde_json::Value> {
    state
        .db
        .as_ref()
        .ok_or_else(|| err(&req.id, "no_workspace", "select a workspace first", None))
}

/// The user behind this channel's session, re-checked against the database
/// so a deactivated account stops working mid-session.
pub fn current_user(state: &AppState, req: &Request) -> Result<User, serde_json::Value> {
    let conn = db_conn(state, req)?;
    let Some(session) = state.session.as_ref() else {
        return Err(err(&req.id, "no_session", "log in first", None));
    };
    auth::resolve_session(conn, &session.token).or_resp(req)
}

pub fn current_admin(state: &AppState, req: &Request) -> Result<User, serde_json::Value> {
    let user = current_user(state, req)?;
    auth::require_admin(&user).or_resp(req)?;
    Ok(user)
}

/// Resolves an explicit bearer token for the `api.*` family.
pub fn token_user(state: &AppState, req: &Request) -> Result<User, serde_json::Value> {
    let conn = db_conn(state, req)?;
    let token = required_str(req, "token")?;
    auth::resolve_session(conn, &token).or_resp(req)
}

pub fn required_str(req: &Request, key: &str) -> Result<String, serde_json::Value> {
    req.params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|v| v.to_string())
        .ok_or_else(|| err(&req.id, "bad_params", format!("missing {}", key), None))
}

pub fn optional_str(req: &Request, key: &str) -> Option<String> {
    req.params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|v| v.to_string())
}

pub fn required_i64(req: &Request, key: &str) -> Result<i64, serde_json::Value> {
    req.params
        .get(key)
        .and_then(|v| v.as_i64())
        .ok_or_else(|| err(&req.id, "bad_params", format!("missing {}", key), None))
}

pub fn optional_i64(req: &Request, key: &str) -> Result<Option<i64>, serde_json::Value> {
    match req.params.get(key) {
        None | Some(serde_json::Value::Null) => Ok(None),
        Some(v) => v.as_i64().map(Some).ok_or_else(|| {
            err(
                &req.id,
                "bad_params",
                format!("{} must be an integer", key),
                None,
            )
        }),
    }
}

pub fn optional_bool(req: &Request, key: &str) -> Result<Option<bool>, serde_json::Value> {
    match req.params.get(key) {
        None | Some(serde_json::Value::Null) => Ok(None),
        Some(v) => v.as_bool().map(Some).ok_or_else(|| {
            err(
                &req.id,
                "bad_params",
                format!("{} must be a boolean", key),
                None,
            )
        }),
    }
}

/// Absent, null and "" all mean "no bound".
pub fn optional_date(req: &Request, key: &str) -> Result<Option<NaiveDate>, serde_json::Value> {
    match req.params.get(key) {
        None | Some(serde_json::Value::Null) => Ok(None),
        Some(serde_json::Value::String(s)) if s.trim().is_empty() => Ok(None),
        Some(v) => v.as_str().and_then(parse_date).map(Some).ok_or_else(|| {
            err(
                &req.id,
                "bad_params",
                format!("{} must be YYYY-MM-DD", key),
                Some(json!({ key: v })),
            )
        }),
    }
}

pub fn required_date(req: &Request, key: &str) -> Result<NaiveDate, serde_json::Value> {
    optional_date(req, key)?
        .ok_or_else(|| err(&req.id, "bad_params", format!("missing {}", key), None))
}

/// Parses a closed-set enum parameter, reporting the accepted values.
pub fn required_enum<T>(
    req: &Request,
    key: &'static str,
    parse: impl Fn(&str) -> Option<T>,
    accepted: &str,
) -> Result<T, serde_json::Value> {
    let raw = required_str(req, key)?;
    parse(&raw).ok_or_else(|| {
        let e = CafeteriaError::validation(key, format!("{} must be one of: {}", key, accepted));
        err(&req.id, e.code(), e.to_string(), Some(json!({ key: raw })))
    })
}

pub fn optional_enum<T>(
    req: &Request,
    key: &'static str,
    parse: impl Fn(&str) -> Option<T>,
    accepted: &str,
) -> Result<Option<T>, serde_json::Value> {
    match optional_str(req, key) {
        None => Ok(None),
        Some(s) if s.trim().is_empty() => Ok(None),
        Some(_) => required_enum(req, key, parse, accepted).map(Some),
    }
}

/// Server local wall-clock time; attendance days follow the cafeteria's clock.
pub fn now() -> chrono::NaiveDateTime {
    chrono::Local::now().naive_local()
}
