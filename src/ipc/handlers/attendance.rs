use crate::ipc::error::{respond, OrResponse};
use crate::ipc::helpers::{
    current_user, db_conn, now, optional_date, optional_enum, optional_i64, optional_str,
    required_str, token_user,
};
use crate::ipc::types::{AppState, Request};
use crate::ledger::{self, HistoryFilter, Registration};
use crate::model::{MealType, RegistrationMethod, User};
use serde_json::json;

const MEAL_TYPES: &str = "breakfast, lunch, dinner";
const METHODS: &str = "manual, qr, card";
const RECENT_DEFAULT: i64 = 10;

/// Both entry points end here so the ledger policy is applied once.
fn register(
    state: &AppState,
    req: &Request,
    actor: &User,
    method: RegistrationMethod,
) -> Result<serde_json::Value, serde_json::Value> {
    let conn = db_conn(state, req)?;
    let identifier = required_str(req, "identifier")?;
    // Lunch is what the counter serves when the client does not say.
    let meal_type =
        optional_enum(req, "mealType", MealType::parse, MEAL_TYPES)?.unwrap_or(MealType::Lunch);
    let note = optional_str(req, "note");
    let reg = Registration {
        identifier: &identifier,
        meal_type,
        actor_id: actor.id,
        method,
        note: note.as_deref(),
    };
    let record = ledger::register_attendance(conn, &reg, now()).or_resp(req)?;
    Ok(json!({ "record": record }))
}

/// Form path: the operator logged in on this channel, always manual entry.
fn handle_register(state: &mut AppState, req: &Request) -> Result<serde_json::Value, serde_json::Value> {
    let actor = current_user(state, req)?;
    register(state, req, &actor, RegistrationMethod::Manual)
}

/// JSON API path used by scanners: bearer token, method defaults to qr.
fn handle_api_register(state: &mut AppState, req: &Request) -> Result<serde_json::Value, serde_json::Value> {
    let actor = token_user(state, req)?;
    let method = optional_enum(req, "method", RegistrationMethod::parse, METHODS)?
        .unwrap_or(RegistrationMethod::Qr);
    register(state, req, &actor, method)
}

fn handle_history(state: &mut AppState, req: &Request) -> Result<serde_json::Value, serde_json::Value> {
    current_user(state, req)?;
    let conn = db_conn(state, req)?;
    let filter = HistoryFilter {
        from: optional_date(req, "from")?,
        to: optional_date(req, "to")?,
        student_id: optional_i64(req, "studentId")?,
        limit: optional_i64(req, "limit")?.map(|n| n.clamp(0, u32::MAX as i64) as u32),
    };
    let rows = ledger::history(conn, &filter).or_resp(req)?;
    Ok(json!({ "records": rows }))
}

fn handle_recent(state: &mut AppState, req: &Request) -> Result<serde_json::Value, serde_json::Value> {
    current_user(state, req)?;
    let conn = db_conn(state, req)?;
    let limit = optional_i64(req, "limit")?.unwrap_or(RECENT_DEFAULT).clamp(0, 500) as u32;
    let rows = ledger::history(
        conn,
        &HistoryFilter {
            limit: Some(limit),
            ..HistoryFilter::default()
        },
    )
    .or_resp(req)?;
    Ok(json!({ "records": rows }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let r = match req.method.as_str() {
        "attendance.register" => handle_register(state, req),
        "api.attendance.register" => handle_api_register(state, req),
        "attendance.history" => handle_history(state, req),
        "attendance.recent" => handle_recent(state, req),
        _ => return None,
    };
    Some(respond(req, r))
}
