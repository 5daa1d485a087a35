use crate::export;
use crate::ipc::error::{err, respond, OrResponse};
use crate::ipc::helpers::{
    current_user, db_conn, now, optional_date, optional_enum, optional_i64, optional_str,
};
use crate::ipc::types::{AppState, Request};
use crate::ledger::{self, HistoryFilter};
use crate::model::{format_date, FeeCategory};
use crate::stats;
use serde_json::json;
use std::path::PathBuf;
use tracing::info;

const FEE_CATEGORIES: &str = "subsidized, paid";

fn month_params(req: &Request) -> Result<(u32, i32), serde_json::Value> {
    let (cur_month, cur_year) = stats::month_of(now().date());
    let month = optional_i64(req, "month")?.unwrap_or(cur_month as i64);
    let year = optional_i64(req, "year")?.unwrap_or(cur_year as i64);
    if !(1..=12).contains(&month) {
        return Err(err(
            &req.id,
            "bad_params",
            "month must be between 1 and 12",
            Some(json!({ "month": month })),
        ));
    }
    let year = i32::try_from(year).map_err(|_| {
        err(
            &req.id,
            "bad_params",
            "year out of range",
            Some(json!({ "year": year })),
        )
    })?;
    Ok((month as u32, year))
}

/// Export destination; defaults to `<workspace>/exports/<prefix>_<today>.csv`.
fn out_path(state: &AppState, req: &Request, prefix: &str) -> Result<PathBuf, serde_json::Value> {
    if let Some(p) = optional_str(req, "outPath").filter(|p| !p.trim().is_empty()) {
        return Ok(PathBuf::from(p));
    }
    let Some(workspace) = state.workspace.as_ref() else {
        return Err(err(&req.id, "no_workspace", "select a workspace first", None));
    };
    Ok(workspace
        .join("exports")
        .join(export::default_file_name(prefix, now().date())))
}

fn handle_dashboard(state: &mut AppState, req: &Request) -> Result<serde_json::Value, serde_json::Value> {
    current_user(state, req)?;
    let conn = db_conn(state, req)?;
    let dashboard = stats::dashboard(conn, now().date()).or_resp(req)?;
    Ok(json!(dashboard))
}

fn handle_daily(state: &mut AppState, req: &Request) -> Result<serde_json::Value, serde_json::Value> {
    current_user(state, req)?;
    let conn = db_conn(state, req)?;
    let date = optional_date(req, "date")?.unwrap_or_else(|| now().date());
    let count = stats::daily_count(conn, date).or_resp(req)?;
    let active = crate::directory::count_active(conn).or_resp(req)?;
    Ok(json!({
        "date": format_date(date),
        "count": count,
        "activeStudents": active,
        "rate": stats::attendance_rate(count, active),
    }))
}

fn handle_weekly(state: &mut AppState, req: &Request) -> Result<serde_json::Value, serde_json::Value> {
    current_user(state, req)?;
    let conn = db_conn(state, req)?;
    let end = optional_date(req, "endDate")?.unwrap_or_else(|| now().date());
    let series = stats::weekly_series(conn, end).or_resp(req)?;
    Ok(json!({ "endDate": format_date(end), "days": series }))
}

fn handle_breakdown(state: &mut AppState, req: &Request) -> Result<serde_json::Value, serde_json::Value> {
    current_user(state, req)?;
    let conn = db_conn(state, req)?;
    let (month, year) = month_params(req)?;
    let breakdown = stats::breakdown_by_category(conn, month, year).or_resp(req)?;
    Ok(json!(breakdown))
}

fn handle_monthly(state: &mut AppState, req: &Request) -> Result<serde_json::Value, serde_json::Value> {
    current_user(state, req)?;
    let conn = db_conn(state, req)?;
    let (month, year) = month_params(req)?;
    let summary = stats::monthly_summary(conn, month, year).or_resp(req)?;
    Ok(json!(summary))
}

fn handle_student_totals(state: &mut AppState, req: &Request) -> Result<serde_json::Value, serde_json::Value> {
    current_user(state, req)?;
    let conn = db_conn(state, req)?;
    let rows = stats::student_totals(
        conn,
        optional_date(req, "from")?,
        optional_date(req, "to")?,
        optional_enum(req, "feeCategory", FeeCategory::parse, FEE_CATEGORIES)?,
    )
    .or_resp(req)?;
    Ok(json!({ "rows": rows }))
}

fn handle_export_history_csv(state: &mut AppState, req: &Request) -> Result<serde_json::Value, serde_json::Value> {
    current_user(state, req)?;
    let conn = db_conn(state, req)?;
    let filter = HistoryFilter {
        from: optional_date(req, "from")?,
        to: optional_date(req, "to")?,
        ..HistoryFilter::default()
    };
    let rows = ledger::history(conn, &filter).or_resp(req)?;
    let path = out_path(state, req, "asistencias")?;
    export::write_file(&path, &export::history_csv(&rows)).map_err(|e| {
        err(
            &req.id,
            "export_failed",
            format!("{e:#}"),
            Some(json!({ "path": path.to_string_lossy() })),
        )
    })?;
    info!(path = %path.to_string_lossy(), rows = rows.len(), "history exported");
    Ok(json!({ "path": path.to_string_lossy(), "rowsExported": rows.len() }))
}

fn handle_export_totals_csv(state: &mut AppState, req: &Request) -> Result<serde_json::Value, serde_json::Value> {
    current_user(state, req)?;
    let conn = db_conn(state, req)?;
    let rows = stats::student_totals(
        conn,
        optional_date(req, "from")?,
        optional_date(req, "to")?,
        optional_enum(req, "feeCategory", FeeCategory::parse, FEE_CATEGORIES)?,
    )
    .or_resp(req)?;
    let path = out_path(state, req, "reporte_asistencias")?;
    export::write_file(&path, &export::totals_csv(&rows)).map_err(|e| {
        err(
            &req.id,
            "export_failed",
            format!("{e:#}"),
            Some(json!({ "path": path.to_string_lossy() })),
        )
    })?;
    info!(path = %path.to_string_lossy(), rows = rows.len(), "totals exported");
    Ok(json!({ "path": path.to_string_lossy(), "rowsExported": rows.len() }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let r = match req.method.as_str() {
        "reports.dashboard" => handle_dashboard(state, req),
        "reports.daily" => handle_daily(state, req),
        "reports.weekly" => handle_weekly(state, req),
        "reports.breakdown" => handle_breakdown(state, req),
        "reports.monthly" => handle_monthly(state, req),
        "reports.studentTotals" => handle_student_totals(state, req),
        "reports.exportHistoryCsv" => handle_export_history_csv(state, req),
        "reports.exportTotalsCsv" => handle_export_totals_csv(state, req),
        _ => return None,
    };
    Some(respond(req, r))
}
