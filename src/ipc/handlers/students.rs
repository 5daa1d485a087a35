use crate::directory::{self, SearchCriteria, StudentInput};
use crate::ipc::error::{err, respond, OrResponse};
use crate::ipc::helpers::{
    current_user, db_conn, now, optional_bool, optional_i64, optional_str, required_enum,
    required_i64, required_str,
};
use crate::ipc::types::{AppState, Request};
use crate::model::{FeeCategory, Student};
use serde_json::json;

const FEE_CATEGORIES: &str = "subsidized, paid";

fn student_input(req: &Request) -> Result<StudentInput, serde_json::Value> {
    Ok(StudentInput {
        identifier: optional_str(req, "identifier"),
        name: optional_str(req, "name").unwrap_or_default(),
        class_name: optional_str(req, "class").unwrap_or_default(),
        fee_category: required_enum(req, "feeCategory", FeeCategory::parse, FEE_CATEGORIES)?,
        active: optional_bool(req, "active")?,
    })
}

fn lookup(state: &AppState, req: &Request) -> Result<Student, serde_json::Value> {
    let conn = db_conn(state, req)?;
    if let Some(id) = optional_i64(req, "studentId")? {
        return directory::get_by_id(conn, id).or_resp(req);
    }
    if let Some(identifier) = optional_str(req, "identifier") {
        return directory::get_by_identifier(conn, &identifier).or_resp(req);
    }
    Err(err(
        &req.id,
        "bad_params",
        "missing studentId or identifier",
        None,
    ))
}

fn handle_list(state: &mut AppState, req: &Request) -> Result<serde_json::Value, serde_json::Value> {
    current_user(state, req)?;
    let conn = db_conn(state, req)?;
    let listed = if optional_bool(req, "includeInactive")?.unwrap_or(false) {
        directory::list_all(conn)
    } else {
        directory::list_active(conn)
    };
    let students = listed.or_resp(req)?;
    Ok(json!({ "students": students }))
}

fn handle_get(state: &mut AppState, req: &Request) -> Result<serde_json::Value, serde_json::Value> {
    current_user(state, req)?;
    let student = lookup(state, req)?;
    Ok(json!({ "student": student }))
}

fn handle_create(state: &mut AppState, req: &Request) -> Result<serde_json::Value, serde_json::Value> {
    current_user(state, req)?;
    let conn = db_conn(state, req)?;
    let input = student_input(req)?;
    let student = directory::create(conn, &input, now()).or_resp(req)?;
    Ok(json!({ "student": student }))
}

fn handle_update(state: &mut AppState, req: &Request) -> Result<serde_json::Value, serde_json::Value> {
    current_user(state, req)?;
    let conn = db_conn(state, req)?;
    let id = required_i64(req, "studentId")?;
    let input = student_input(req)?;
    let student = directory::update(conn, id, &input).or_resp(req)?;
    Ok(json!({ "student": student }))
}

fn handle_toggle_active(state: &mut AppState, req: &Request) -> Result<serde_json::Value, serde_json::Value> {
    current_user(state, req)?;
    let conn = db_conn(state, req)?;
    let id = required_i64(req, "studentId")?;
    let student = directory::toggle_active(conn, id).or_resp(req)?;
    Ok(json!({ "student": student }))
}

fn handle_search(state: &mut AppState, req: &Request) -> Result<serde_json::Value, serde_json::Value> {
    current_user(state, req)?;
    let conn = db_conn(state, req)?;
    let criteria = SearchCriteria::parse(&required_str(req, "criteria")?).or_resp(req)?;
    let text = required_str(req, "text")?;
    let students = directory::search(conn, criteria, &text).or_resp(req)?;
    Ok(json!({ "criteria": criteria.as_str(), "students": students }))
}

/// The text a badge QR code encodes; rendering the image is up to the client.
fn handle_qr_payload(state: &mut AppState, req: &Request) -> Result<serde_json::Value, serde_json::Value> {
    current_user(state, req)?;
    let student = lookup(state, req)?;
    Ok(json!({
        "identifier": student.identifier,
        "payload": student.identifier,
        "name": student.name,
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let r = match req.method.as_str() {
        "students.list" => handle_list(state, req),
        "students.get" => handle_get(state, req),
        "students.create" => handle_create(state, req),
        "students.update" => handle_update(state, req),
        "students.toggleActive" => handle_toggle_active(state, req),
        "students.search" => handle_search(state, req),
        "students.qrPayload" => handle_qr_payload(state, req),
        _ => return None,
    };
    Some(respond(req, r))
}
