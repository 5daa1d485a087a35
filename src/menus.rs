use crate::error::{CafeteriaError, Result};
use crate::model::{date_col, format_date, MenuEntry};
use chrono::{Datelike, Days, NaiveDate};
use rusqlite::types::Value;
use rusqlite::{params_from_iter, Connection, OptionalExtension};
use tracing::info;

const MENU_COLUMNS: &str = "id, date, main_dish, side, dessert, calories, notes";

fn menu_from_row(r: &rusqlite::Row<'_>) -> rusqlite::Result<MenuEntry> {
    Ok(MenuEntry {
        id: r.get(0)?,
        date: date_col(r, 1)?,
        main_dish: r.get(2)?,
        side: r.get(3)?,
        dessert: r.get(4)?,
        calories: r.get(5)?,
        notes: r.get(6)?,
    })
}

#[derive(Debug, Clone)]
pub struct MenuInput {
    pub date: NaiveDate,
    pub main_dish: String,
    pub side: Option<String>,
    pub dessert: Option<String>,
    pub calories: Option<i64>,
    pub notes: Option<String>,
}

fn clean(v: &Option<String>) -> Option<String> {
    v.as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn validate(input: &MenuInput) -> Result<String> {
    let main_dish = input.main_dish.trim().to_string();
    if main_dish.is_empty() {
        return Err(CafeteriaError::validation(
            "mainDish",
            "main dish must not be empty",
        ));
    }
    if matches!(input.calories, Some(c) if c < 0) {
        return Err(CafeteriaError::validation(
            "calories",
            "calories must not be negative",
        ));
    }
    Ok(main_dish)
}

pub fn get(conn: &Connection, id: i64) -> Result<MenuEntry> {
    conn.query_row(
        &format!("SELECT {} FROM menus WHERE id = ?", MENU_COLUMNS),
        [id],
        menu_from_row,
    )
    .optional()?
    .ok_or_else(|| CafeteriaError::not_found("menu", id))
}

pub fn create(conn: &Connection, input: &MenuInput) -> Result<MenuEntry> {
    let main_dish = validate(input)?;
    conn.execute(
        "INSERT INTO menus(date, main_dish, side, dessert, calories, notes)
         VALUES(?, ?, ?, ?, ?, ?)",
        (
            format_date(input.date),
            &main_dish,
            clean(&input.side),
            clean(&input.dessert),
            input.calories,
            clean(&input.notes),
        ),
    )?;
    let id = conn.last_insert_rowid();
    info!(menu = id, date = %input.date, "menu created");
    get(conn, id)
}

pub fn update(conn: &Connection, id: i64, input: &MenuInput) -> Result<MenuEntry> {
    get(conn, id)?;
    let main_dish = validate(input)?;
    conn.execute(
        "UPDATE menus SET date = ?, main_dish = ?, side = ?, dessert = ?, calories = ?, notes = ?
         WHERE id = ?",
        (
            format_date(input.date),
            &main_dish,
            clean(&input.side),
            clean(&input.dessert),
            input.calories,
            clean(&input.notes),
            id,
        ),
    )?;
    info!(menu = id, "menu updated");
    get(conn, id)
}

pub fn delete(conn: &Connection, id: i64) -> Result<()> {
    let n = conn.execute("DELETE FROM menus WHERE id = ?", [id])?;
    if n == 0 {
        return Err(CafeteriaError::not_found("menu", id));
    }
    info!(menu = id, "menu deleted");
    Ok(())
}

/// Menus in the inclusive range, newest date first.
pub fn list(conn: &Connection, from: Option<NaiveDate>, to: Option<NaiveDate>) -> Result<Vec<MenuEntry>> {
    let mut clauses: Vec<&str> = Vec::new();
    let mut bind: Vec<Value> = Vec::new();
    if let Some(from) = from {
        clauses.push("date >= ?");
        bind.push(Value::Text(format_date(from)));
    }
    if let Some(to) = to {
        clauses.push("date <= ?");
        bind.push(Value::Text(format_date(to)));
    }
    let where_sql = if clauses.is_empty() {
        String::new()
    } else {
        format!("WHERE {}", clauses.join(" AND "))
    };
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM menus {} ORDER BY date DESC, id DESC",
        MENU_COLUMNS, where_sql
    ))?;
    let rows = stmt
        .query_map(params_from_iter(bind), menu_from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}

/// Monday through Sunday of the week containing `today`, ascending.
pub fn week(conn: &Connection, today: NaiveDate) -> Result<(NaiveDate, NaiveDate, Vec<MenuEntry>)> {
    let out_of_range = || CafeteriaError::validation("date", "date out of range");
    let start = today
        .checked_sub_days(Days::new(today.weekday().num_days_from_monday() as u64))
        .ok_or_else(out_of_range)?;
    let end = start
        .checked_add_days(Days::new(6))
        .ok_or_else(out_of_range)?;
    let mut menus = list(conn, Some(start), Some(end))?;
    menus.reverse();
    Ok((start, end, menus))
}

/// First menu recorded for a date. More than one per day is tolerated.
pub fn for_date(conn: &Connection, date: NaiveDate) -> Result<Option<MenuEntry>> {
    Ok(conn
        .query_row(
            &format!(
                "SELECT {} FROM menus WHERE date = ? ORDER BY id LIMIT 1",
                MENU_COLUMNS
            ),
            [format_date(date)],
            menu_from_row,
        )
        .optional()?)
}

pub fn count_from(conn: &Connection, date: NaiveDate) -> Result<i64> {
    Ok(conn.query_row(
        "SELECT COUNT(*) FROM menus WHERE date >= ?",
        [format_date(date)],
        |r| r.get(0),
    )?)
}
