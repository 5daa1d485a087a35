use crate::error::{CafeteriaError, Result};
use crate::model::format_timestamp;
use chrono::{NaiveDateTime, NaiveTime};
use rusqlite::{Connection, OptionalExtension};
use serde::Serialize;
use tracing::info;

pub const KEY_HOURS_START: &str = "hora_inicio";
pub const KEY_HOURS_END: &str = "hora_fin";
pub const KEY_SERVICE_DAYS: &str = "dias_servicio";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigEntry {
    pub key: String,
    pub value: String,
    pub description: Option<String>,
    pub updated_at: String,
}

pub fn list(conn: &Connection) -> Result<Vec<ConfigEntry>> {
    let mut stmt =
        conn.prepare("SELECT key, value, description, updated_at FROM settings ORDER BY key")?;
    let rows = stmt
        .query_map([], |r| {
            Ok(ConfigEntry {
                key: r.get(0)?,
                value: r.get(1)?,
                description: r.get(2)?,
                updated_at: r.get(3)?,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}

pub fn get(conn: &Connection, key: &str) -> Result<Option<String>> {
    Ok(conn
        .query_row("SELECT value FROM settings WHERE key = ?", [key], |r| {
            r.get(0)
        })
        .optional()?)
}

/// Upserts all pairs in one transaction; an empty key rejects the batch.
pub fn set_many(conn: &Connection, pairs: &[(String, String)], now: NaiveDateTime) -> Result<()> {
    if let Some((k, _)) = pairs.iter().find(|(k, _)| k.trim().is_empty()) {
        return Err(CafeteriaError::validation(
            "key",
            format!("invalid setting key {:?}", k),
        ));
    }
    let tx = conn.unchecked_transaction()?;
    for (key, value) in pairs {
        tx.execute(
            "INSERT INTO settings(key, value, updated_at) VALUES(?, ?, ?)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
            (key.trim(), value, format_timestamp(now)),
        )?;
    }
    tx.commit()?;
    info!(keys = pairs.len(), "settings updated");
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceHours {
    pub start: Option<String>,
    pub end: Option<String>,
    pub days: Option<String>,
}

pub fn service_hours(conn: &Connection) -> Result<ServiceHours> {
    Ok(ServiceHours {
        start: get(conn, KEY_HOURS_START)?,
        end: get(conn, KEY_HOURS_END)?,
        days: get(conn, KEY_SERVICE_DAYS)?,
    })
}

fn parse_hhmm(field: &'static str, raw: &str) -> Result<NaiveTime> {
    NaiveTime::parse_from_str(raw.trim(), "%H:%M")
        .map_err(|_| CafeteriaError::validation(field, format!("{} must be HH:MM", field)))
}

pub fn set_service_hours(
    conn: &Connection,
    start: &str,
    end: &str,
    days: &str,
    now: NaiveDateTime,
) -> Result<ServiceHours> {
    let s = parse_hhmm("start", start)?;
    let e = parse_hhmm("end", end)?;
    if e <= s {
        return Err(CafeteriaError::validation("end", "end must be after start"));
    }
    set_many(
        conn,
        &[
            (KEY_HOURS_START.to_string(), s.format("%H:%M").to_string()),
            (KEY_HOURS_END.to_string(), e.format("%H:%M").to_string()),
            (KEY_SERVICE_DAYS.to_string(), days.trim().to_string()),
        ],
        now,
    )?;
    service_hours(conn)
}
