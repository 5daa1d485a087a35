use crate::backup;
use crate::ipc::error::{err, respond};
use crate::ipc::handlers::core::select_workspace;
use crate::ipc::helpers::{current_admin, db_conn, required_str};
use crate::ipc::types::{AppState, Request};
use serde_json::json;
use std::path::PathBuf;
use tracing::{error, info};

fn workspace_path(state: &AppState, req: &Request) -> Result<PathBuf, serde_json::Value> {
    state
        .workspace
        .clone()
        .ok_or_else(|| err(&req.id, "no_workspace", "select a workspace first", None))
}

fn handle_export(state: &mut AppState, req: &Request) -> Result<serde_json::Value, serde_json::Value> {
    current_admin(state, req)?;
    let conn = db_conn(state, req)?;
    let out = PathBuf::from(required_str(req, "outPath")?);
    let workspace = workspace_path(state, req)?;

    // Fold the WAL into the main file so the bundle is self-contained.
    conn.query_row("PRAGMA wal_checkpoint(TRUNCATE)", [], |_| Ok(()))
        .map_err(|e| err(&req.id, "db_query_failed", e.to_string(), None))?;

    let summary = backup::export_workspace_bundle(&workspace, &out).map_err(|e| {
        err(
            &req.id,
            "backup_failed",
            format!("{e:#}"),
            Some(json!({ "path": out.to_string_lossy() })),
        )
    })?;
    info!(path = %out.to_string_lossy(), "workspace bundle exported");
    Ok(json!({
        "path": out.to_string_lossy(),
        "bundleFormat": summary.bundle_format,
        "entryCount": summary.entry_count,
        "dbSha256": summary.db_sha256,
    }))
}

/// Replaces the workspace database. The connection is closed for the swap
/// and reopened afterwards, which also ends the current session.
fn handle_import(state: &mut AppState, req: &Request) -> Result<serde_json::Value, serde_json::Value> {
    current_admin(state, req)?;
    let input = PathBuf::from(required_str(req, "inPath")?);
    let workspace = workspace_path(state, req)?;

    state.db = None;
    let imported = backup::import_workspace_bundle(&input, &workspace);
    if let Err(e) = select_workspace(state, &workspace) {
        error!(error = %e, "workspace reopen after import failed");
        return Err(err(&req.id, "db_open_failed", format!("{e:#}"), None));
    }
    let summary = imported.map_err(|e| {
        err(
            &req.id,
            "restore_failed",
            format!("{e:#}"),
            Some(json!({ "path": input.to_string_lossy() })),
        )
    })?;
    info!(path = %input.to_string_lossy(), "workspace bundle imported");
    Ok(json!({
        "bundleFormatDetected": summary.bundle_format_detected,
        "dbSha256": summary.db_sha256,
        "loggedIn": false,
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let r = match req.method.as_str() {
        "backup.export" => handle_export(state, req),
        "backup.import" => handle_import(state, req),
        _ => return None,
    };
    Some(respond(req, r))
}
