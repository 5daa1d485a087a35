//! Attendance ledger: one immutable record per (student, day, meal type).
//!
//! The unique index `ux_attendance_student_day_meal` is the guard. Every
//! registration runs in an IMMEDIATE transaction, so a concurrent writer for
//! the same key either waits on the write lock and then hits the index, or
//! commits first and makes this one hit it. Both surface as
//! `DuplicateForPeriod`.

use crate::auth;
use crate::directory;
use crate::error::{is_unique_violation, CafeteriaError, Result};
use crate::model::{
    date_col, format_date, format_timestamp, text_col, timestamp_col, AttendanceRecord,
    FeeCategory, MealType, RegistrationMethod,
};
use chrono::{NaiveDate, NaiveDateTime};
use rusqlite::types::Value;
use rusqlite::{params_from_iter, Connection, OptionalExtension, Transaction, TransactionBehavior};
use serde::Serialize;
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct Registration<'a> {
    pub identifier: &'a str,
    pub meal_type: MealType,
    pub actor_id: i64,
    pub method: RegistrationMethod,
    pub note: Option<&'a str>,
}

const RECORD_COLUMNS: &str =
    "a.id, a.student_id, a.recorded_at, a.service_date, a.meal_type, a.method, a.recorded_by, a.note";

fn record_from_row(r: &rusqlite::Row<'_>) -> rusqlite::Result<AttendanceRecord> {
    Ok(AttendanceRecord {
        id: r.get(0)?,
        student_id: r.get(1)?,
        recorded_at: timestamp_col(r, 2)?,
        service_date: date_col(r, 3)?,
        meal_type: text_col(r, 4, MealType::parse)?,
        method: text_col(r, 5, RegistrationMethod::parse)?,
        recorded_by: r.get(6)?,
        note: r.get(7)?,
    })
}

pub fn get_record(conn: &Connection, id: i64) -> Result<AttendanceRecord> {
    conn.query_row(
        &format!("SELECT {} FROM attendance a WHERE a.id = ?", RECORD_COLUMNS),
        [id],
        record_from_row,
    )
    .optional()?
    .ok_or_else(|| CafeteriaError::not_found("attendance", id))
}

pub fn find_for_day(
    conn: &Connection,
    student_id: i64,
    day: NaiveDate,
    meal_type: MealType,
) -> Result<Option<AttendanceRecord>> {
    Ok(conn
        .query_row(
            &format!(
                "SELECT {} FROM attendance a
                 WHERE a.student_id = ? AND a.service_date = ? AND a.meal_type = ?",
                RECORD_COLUMNS
            ),
            (student_id, format_date(day), meal_type.as_str()),
            record_from_row,
        )
        .optional()?)
}

/// Registers one meal for a student at `now` (server local time).
pub fn register_attendance(
    conn: &Connection,
    reg: &Registration<'_>,
    now: NaiveDateTime,
) -> Result<AttendanceRecord> {
    auth::active_actor(conn, reg.actor_id)?;

    let tx = Transaction::new_unchecked(conn, TransactionBehavior::Immediate)?;
    let student = directory::get_by_identifier(&tx, reg.identifier)?;
    if !student.active {
        warn!(student = %student.identifier, meal_type = %reg.meal_type, "registration rejected: inactive");
        return Err(CafeteriaError::Inactive {
            identifier: student.identifier,
        });
    }

    let day = now.date();
    let note = reg.note.map(str::trim).filter(|n| !n.is_empty());
    let inserted = tx.execute(
        "INSERT INTO attendance(student_id, recorded_at, service_date, meal_type, method, recorded_by, note)
         VALUES(?, ?, ?, ?, ?, ?, ?)",
        (
            student.id,
            format_timestamp(now),
            format_date(day),
            reg.meal_type.as_str(),
            reg.method.as_str(),
            reg.actor_id,
            note,
        ),
    );
    if let Err(e) = inserted {
        if !is_unique_violation(&e) {
            return Err(e.into());
        }
        let existing = find_for_day(&tx, student.id, day, reg.meal_type)?;
        warn!(
            student = %student.identifier,
            meal_type = %reg.meal_type,
            date = %day,
            "registration rejected: already served"
        );
        return Err(CafeteriaError::DuplicateForPeriod {
            existing_id: existing.map(|r| r.id),
            meal_type: reg.meal_type,
            date: day,
        });
    }
    let id = tx.last_insert_rowid();
    let record = get_record(&tx, id)?;
    tx.commit()?;

    info!(
        student = %student.identifier,
        meal_type = %reg.meal_type,
        method = reg.method.as_str(),
        actor = reg.actor_id,
        "attendance registered"
    );
    Ok(record)
}

#[derive(Debug, Clone, Default)]
pub struct HistoryFilter {
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
    pub student_id: Option<i64>,
    pub limit: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryRow {
    #[serde(flatten)]
    pub record: AttendanceRecord,
    pub student_identifier: String,
    pub student_name: String,
    pub class_name: String,
    pub fee_category: FeeCategory,
}

/// Records inside the inclusive date range, newest day first, newest
/// registration first within a day.
pub fn history(conn: &Connection, filter: &HistoryFilter) -> Result<Vec<HistoryRow>> {
    if let (Some(from), Some(to)) = (filter.from, filter.to) {
        if from > to {
            return Err(CafeteriaError::validation(
                "from",
                "from must not be after to",
            ));
        }
    }

    let mut clauses: Vec<&str> = Vec::new();
    let mut bind: Vec<Value> = Vec::new();
    if let Some(from) = filter.from {
        clauses.push("a.service_date >= ?");
        bind.push(Value::Text(format_date(from)));
    }
    if let Some(to) = filter.to {
        clauses.push("a.service_date <= ?");
        bind.push(Value::Text(format_date(to)));
    }
    if let Some(sid) = filter.student_id {
        clauses.push("a.student_id = ?");
        bind.push(Value::Integer(sid));
    }
    let where_sql = if clauses.is_empty() {
        String::new()
    } else {
        format!("WHERE {}", clauses.join(" AND "))
    };
    let limit_sql = match filter.limit {
        Some(n) => format!("LIMIT {}", n),
        None => String::new(),
    };

    let sql = format!(
        "SELECT {}, s.identifier, s.name, s.class_name, s.fee_category
         FROM attendance a
         JOIN students s ON s.id = a.student_id
         {}
         ORDER BY a.service_date DESC, a.recorded_at DESC, a.id DESC
         {}",
        RECORD_COLUMNS, where_sql, limit_sql
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(params_from_iter(bind), |r| {
            Ok(HistoryRow {
                record: record_from_row(r)?,
                student_identifier: r.get(8)?,
                student_name: r.get(9)?,
                class_name: r.get(10)?,
                fee_category: text_col(r, 11, FeeCategory::parse)?,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    debug!(rows = rows.len(), "attendance history");
    Ok(rows)
}
