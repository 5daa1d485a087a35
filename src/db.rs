use crate::{auth, config::Config};
use anyhow::Context;
use rusqlite::{Connection, Transaction, TransactionBehavior};
use std::path::Path;
use tracing::info;

pub const DB_FILE: &str = "comedor.sqlite3";

pub fn open_db(workspace: &Path, config: &Config) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)
        .with_context(|| format!("failed to create workspace {}", workspace.to_string_lossy()))?;
    let db_path = workspace.join(DB_FILE);
    let conn = Connection::open(&db_path)
        .with_context(|| format!("failed to open {}", db_path.to_string_lossy()))?;
    conn.busy_timeout(config.busy_timeout)?;
    // WAL lets readers proceed while another checkout line is writing.
    conn.execute_batch("PRAGMA journal_mode=WAL;")?;
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    migrate(&conn)?;
    auth::ensure_seed_admin(&conn, &config.admin_password)?;

    info!(path = %db_path.to_string_lossy(), "workspace database ready");
    Ok(conn)
}

/// Creates every table and index. Safe to run on each open, including from
/// several processes at once: the write lock is taken up front.
pub fn migrate(conn: &Connection) -> anyhow::Result<()> {
    let tx = Transaction::new_unchecked(conn, TransactionBehavior::Immediate)?;
    create_tables(&tx)?;
    tx.commit()?;
    Ok(())
}

fn create_tables(conn: &Connection) -> anyhow::Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS users(
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL,
            email TEXT NOT NULL UNIQUE,
            password_hash TEXT NOT NULL,
            role TEXT NOT NULL,
            active INTEGER NOT NULL DEFAULT 1,
            created_at TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS sessions(
            token TEXT PRIMARY KEY,
            user_id INTEGER NOT NULL,
            created_at TEXT NOT NULL,
            FOREIGN KEY(user_id) REFERENCES users(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_sessions_user ON sessions(user_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS students(
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            identifier TEXT NOT NULL UNIQUE,
            name TEXT NOT NULL,
            class_name TEXT NOT NULL,
            fee_category TEXT NOT NULL,
            active INTEGER NOT NULL DEFAULT 1,
            registered_at TEXT NOT NULL DEFAULT ''
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_students_class ON students(class_name)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS attendance(
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            student_id INTEGER NOT NULL,
            recorded_at TEXT NOT NULL,
            service_date TEXT NOT NULL,
            meal_type TEXT NOT NULL,
            method TEXT NOT NULL DEFAULT 'manual',
            recorded_by INTEGER NOT NULL,
            note TEXT,
            FOREIGN KEY(student_id) REFERENCES students(id),
            FOREIGN KEY(recorded_by) REFERENCES users(id)
        )",
        [],
    )?;
    // The duplicate guard for registrations. Must exist before any write.
    conn.execute(
        "CREATE UNIQUE INDEX IF NOT EXISTS ux_attendance_student_day_meal
         ON attendance(student_id, service_date, meal_type)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_attendance_service_date ON attendance(service_date)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS menus(
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            date TEXT NOT NULL,
            main_dish TEXT NOT NULL,
            side TEXT,
            dessert TEXT,
            calories INTEGER,
            notes TEXT
        )",
        [],
    )?;
    conn.execute("CREATE INDEX IF NOT EXISTS idx_menus_date ON menus(date)", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS settings(
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL,
            description TEXT,
            updated_at TEXT NOT NULL
        )",
        [],
    )?;

    Ok(())
}
