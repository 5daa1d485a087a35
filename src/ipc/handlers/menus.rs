use crate::ipc::error::{respond, OrResponse};
use crate::ipc::helpers::{
    current_user, db_conn, now, optional_date, optional_i64, optional_str, required_date,
    required_i64,
};
use crate::ipc::types::{AppState, Request};
use crate::menus::{self, MenuInput};
use crate::model::format_date;
use serde_json::json;

fn menu_input(req: &Request) -> Result<MenuInput, serde_json::Value> {
    Ok(MenuInput {
        date: required_date(req, "date")?,
        main_dish: optional_str(req, "mainDish").unwrap_or_default(),
        side: optional_str(req, "side"),
        dessert: optional_str(req, "dessert"),
        calories: optional_i64(req, "calories")?,
        notes: optional_str(req, "notes"),
    })
}

fn handle_list(state: &mut AppState, req: &Request) -> Result<serde_json::Value, serde_json::Value> {
    current_user(state, req)?;
    let conn = db_conn(state, req)?;
    let rows = menus::list(conn, optional_date(req, "from")?, optional_date(req, "to")?)
        .or_resp(req)?;
    Ok(json!({ "menus": rows }))
}

fn handle_get(state: &mut AppState, req: &Request) -> Result<serde_json::Value, serde_json::Value> {
    current_user(state, req)?;
    let conn = db_conn(state, req)?;
    let menu = menus::get(conn, required_i64(req, "menuId")?).or_resp(req)?;
    Ok(json!({ "menu": menu }))
}

fn handle_create(state: &mut AppState, req: &Request) -> Result<serde_json::Value, serde_json::Value> {
    current_user(state, req)?;
    let conn = db_conn(state, req)?;
    let menu = menus::create(conn, &menu_input(req)?).or_resp(req)?;
    Ok(json!({ "menu": menu }))
}

fn handle_update(state: &mut AppState, req: &Request) -> Result<serde_json::Value, serde_json::Value> {
    current_user(state, req)?;
    let conn = db_conn(state, req)?;
    let id = required_i64(req, "menuId")?;
    let menu = menus::update(conn, id, &menu_input(req)?).or_resp(req)?;
    Ok(json!({ "menu": menu }))
}

fn handle_delete(state: &mut AppState, req: &Request) -> Result<serde_json::Value, serde_json::Value> {
    current_user(state, req)?;
    let conn = db_conn(state, req)?;
    let id = required_i64(req, "menuId")?;
    menus::delete(conn, id).or_resp(req)?;
    Ok(json!({ "deleted": id }))
}

fn handle_week(state: &mut AppState, req: &Request) -> Result<serde_json::Value, serde_json::Value> {
    current_user(state, req)?;
    let conn = db_conn(state, req)?;
    let today = optional_date(req, "date")?.unwrap_or_else(|| now().date());
    let (start, end, rows) = menus::week(conn, today).or_resp(req)?;
    Ok(json!({
        "weekStart": format_date(start),
        "weekEnd": format_date(end),
        "menus": rows,
    }))
}

fn handle_today(state: &mut AppState, req: &Request) -> Result<serde_json::Value, serde_json::Value> {
    current_user(state, req)?;
    let conn = db_conn(state, req)?;
    let today = now().date();
    let menu = menus::for_date(conn, today).or_resp(req)?;
    Ok(json!({ "date": format_date(today), "menu": menu }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let r = match req.method.as_str() {
        "menus.list" => handle_list(state, req),
        "menus.get" => handle_get(state, req),
        "menus.create" => handle_create(state, req),
        "menus.update" => handle_update(state, req),
        "menus.delete" => handle_delete(state, req),
        "menus.week" => handle_week(state, req),
        "menus.today" => handle_today(state, req),
        _ => return None,
    };
    Some(respond(req, r))
}
