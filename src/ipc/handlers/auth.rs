use crate::auth::{self, UserInput};
use crate::ipc::error::{respond, OrResponse};
use crate::ipc::helpers::{
    current_admin, current_user, db_conn, optional_bool, optional_str, required_enum,
    required_i64, required_str,
};
use crate::ipc::types::{AppState, Request};
use crate::model::Role;
use serde_json::json;

const ROLES: &str = "admin, staff, monitor";

fn handle_login(state: &mut AppState, req: &Request) -> Result<serde_json::Value, serde_json::Value> {
    let conn = db_conn(state, req)?;
    let email = required_str(req, "email")?;
    let password = required_str(req, "password")?;
    let session = auth::login(conn, &email, &password).or_resp(req)?;
    let result = json!({ "token": session.token, "user": session.user });
    state.session = Some(session);
    Ok(result)
}

fn handle_logout(state: &mut AppState, req: &Request) -> Result<serde_json::Value, serde_json::Value> {
    let conn = db_conn(state, req)?;
    let closed = match state.session.as_ref() {
        Some(s) => auth::logout(conn, &s.token).or_resp(req)?,
        None => false,
    };
    state.session = None;
    Ok(json!({ "loggedOut": closed }))
}

fn handle_whoami(state: &mut AppState, req: &Request) -> Result<serde_json::Value, serde_json::Value> {
    let user = current_user(state, req)?;
    Ok(json!({ "user": user }))
}

fn user_input(req: &Request, password_required: bool) -> Result<UserInput, serde_json::Value> {
    let password = if password_required {
        Some(required_str(req, "password")?)
    } else {
        optional_str(req, "password")
    };
    Ok(UserInput {
        name: required_str(req, "name")?,
        email: required_str(req, "email")?,
        role: required_enum(req, "role", Role::parse, ROLES)?,
        active: optional_bool(req, "active")?.unwrap_or(true),
        password,
    })
}

fn handle_users_list(state: &mut AppState, req: &Request) -> Result<serde_json::Value, serde_json::Value> {
    current_admin(state, req)?;
    let conn = db_conn(state, req)?;
    let users = auth::list_users(conn).or_resp(req)?;
    Ok(json!({ "users": users }))
}

fn handle_users_create(state: &mut AppState, req: &Request) -> Result<serde_json::Value, serde_json::Value> {
    current_admin(state, req)?;
    let conn = db_conn(state, req)?;
    let input = user_input(req, true)?;
    let user = auth::create_user(conn, &input).or_resp(req)?;
    Ok(json!({ "user": user }))
}

fn handle_users_update(state: &mut AppState, req: &Request) -> Result<serde_json::Value, serde_json::Value> {
    current_admin(state, req)?;
    let conn = db_conn(state, req)?;
    let id = required_i64(req, "userId")?;
    let input = user_input(req, false)?;
    let user = auth::update_user(conn, id, &input).or_resp(req)?;
    Ok(json!({ "user": user }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let r = match req.method.as_str() {
        "auth.login" => handle_login(state, req),
        "auth.logout" => handle_logout(state, req),
        "auth.whoami" => handle_whoami(state, req),
        "users.list" => handle_users_list(state, req),
        "users.create" => handle_users_create(state, req),
        "users.update" => handle_users_update(state, req),
        _ => return None,
    };
    Some(respond(req, r))
}
