use crate::ipc::error::{err, respond, OrResponse};
use crate::ipc::helpers::{current_admin, current_user, db_conn, now, required_str};
use crate::ipc::types::{AppState, Request};
use crate::settings;
use serde_json::json;

fn handle_list(state: &mut AppState, req: &Request) -> Result<serde_json::Value, serde_json::Value> {
    current_user(state, req)?;
    let conn = db_conn(state, req)?;
    let entries = settings::list(conn).or_resp(req)?;
    Ok(json!({ "settings": entries }))
}

/// `params.values` is an object of key -> string value.
fn handle_set(state: &mut AppState, req: &Request) -> Result<serde_json::Value, serde_json::Value> {
    current_admin(state, req)?;
    let conn = db_conn(state, req)?;
    let Some(values) = req.params.get("values").and_then(|v| v.as_object()) else {
        return Err(err(&req.id, "bad_params", "missing values object", None));
    };
    let mut pairs: Vec<(String, String)> = Vec::with_capacity(values.len());
    for (k, v) in values {
        let Some(s) = v.as_str() else {
            return Err(err(
                &req.id,
                "bad_params",
                "setting values must be strings",
                Some(json!({ "key": k })),
            ));
        };
        pairs.push((k.clone(), s.to_string()));
    }
    settings::set_many(conn, &pairs, now()).or_resp(req)?;
    Ok(json!({ "updated": pairs.len() }))
}

fn handle_hours_get(state: &mut AppState, req: &Request) -> Result<serde_json::Value, serde_json::Value> {
    current_user(state, req)?;
    let conn = db_conn(state, req)?;
    let hours = settings::service_hours(conn).or_resp(req)?;
    Ok(json!({ "hours": hours }))
}

fn handle_hours_set(state: &mut AppState, req: &Request) -> Result<serde_json::Value, serde_json::Value> {
    current_admin(state, req)?;
    let conn = db_conn(state, req)?;
    let hours = settings::set_service_hours(
        conn,
        &required_str(req, "start")?,
        &required_str(req, "end")?,
        &required_str(req, "days")?,
        now(),
    )
    .or_resp(req)?;
    Ok(json!({ "hours": hours }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let r = match req.method.as_str() {
        "settings.list" => handle_list(state, req),
        "settings.set" => handle_set(state, req),
        "hours.get" => handle_hours_get(state, req),
        "hours.set" => handle_hours_set(state, req),
        _ => return None,
    };
    Some(respond(req, r))
}
