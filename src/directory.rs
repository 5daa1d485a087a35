use crate::error::{is_unique_violation, CafeteriaError, Result};
use crate::model::{format_timestamp, text_col, FeeCategory, Student};
use chrono::NaiveDateTime;
use rusqlite::{Connection, OptionalExtension, Transaction, TransactionBehavior};
use tracing::{debug, info};

const STUDENT_COLUMNS: &str =
    "id, identifier, name, class_name, fee_category, active, registered_at";

fn student_from_row(r: &rusqlite::Row<'_>) -> rusqlite::Result<Student> {
    Ok(Student {
        id: r.get(0)?,
        identifier: r.get(1)?,
        name: r.get(2)?,
        class_name: r.get(3)?,
        fee_category: text_col(r, 4, FeeCategory::parse)?,
        active: r.get::<_, i64>(5)? != 0,
        registered_at: r.get(6)?,
    })
}

fn query_students(conn: &Connection, where_clause: &str) -> Result<Vec<Student>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM students {} ORDER BY name, id",
        STUDENT_COLUMNS, where_clause
    ))?;
    let rows = stmt
        .query_map([], student_from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}

pub fn get_by_identifier(conn: &Connection, identifier: &str) -> Result<Student> {
    let identifier = identifier.trim();
    conn.query_row(
        &format!("SELECT {} FROM students WHERE identifier = ?", STUDENT_COLUMNS),
        [identifier],
        student_from_row,
    )
    .optional()?
    .ok_or_else(|| CafeteriaError::not_found("student", identifier))
}

pub fn get_by_id(conn: &Connection, id: i64) -> Result<Student> {
    conn.query_row(
        &format!("SELECT {} FROM students WHERE id = ?", STUDENT_COLUMNS),
        [id],
        student_from_row,
    )
    .optional()?
    .ok_or_else(|| CafeteriaError::not_found("student", id))
}

pub fn list_active(conn: &Connection) -> Result<Vec<Student>> {
    query_students(conn, "WHERE active = 1")
}

pub fn list_all(conn: &Connection) -> Result<Vec<Student>> {
    query_students(conn, "")
}

pub fn count_active(conn: &Connection) -> Result<i64> {
    Ok(conn.query_row(
        "SELECT COUNT(*) FROM students WHERE active = 1",
        [],
        |r| r.get(0),
    )?)
}

#[derive(Debug, Clone)]
pub struct StudentInput {
    pub identifier: Option<String>,
    pub name: String,
    pub class_name: String,
    pub fee_category: FeeCategory,
    pub active: Option<bool>,
}

fn validated_fields(input: &StudentInput) -> Result<(String, String)> {
    let name = input.name.trim().to_string();
    let class_name = input.class_name.trim().to_string();
    if name.is_empty() {
        return Err(CafeteriaError::validation("name", "name must not be empty"));
    }
    if class_name.is_empty() {
        return Err(CafeteriaError::validation("class", "class must not be empty"));
    }
    Ok((name, class_name))
}

fn identifier_taken(conn: &Connection, identifier: &str) -> Result<bool> {
    Ok(conn
        .query_row(
            "SELECT 1 FROM students WHERE identifier = ?",
            [identifier],
            |r| r.get::<_, i64>(0),
        )
        .optional()?
        .is_some())
}

/// `EST` + local timestamp, with a numeric suffix when several students are
/// created within the same second.
fn generate_identifier(conn: &Connection, now: NaiveDateTime) -> Result<String> {
    let base = format!("EST{}", now.format("%Y%m%d%H%M%S"));
    if !identifier_taken(conn, &base)? {
        return Ok(base);
    }
    let mut n = 2;
    loop {
        let candidate = format!("{}-{}", base, n);
        if !identifier_taken(conn, &candidate)? {
            return Ok(candidate);
        }
        n += 1;
    }
}

pub fn create(conn: &Connection, input: &StudentInput, now: NaiveDateTime) -> Result<Student> {
    let (name, class_name) = validated_fields(input)?;
    let supplied = input
        .identifier
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty());

    let tx = Transaction::new_unchecked(conn, TransactionBehavior::Immediate)?;
    let identifier = match supplied {
        Some(id) => {
            if identifier_taken(&tx, id)? {
                return Err(CafeteriaError::validation(
                    "identifier",
                    format!("identifier {} already in use", id),
                ));
            }
            id.to_string()
        }
        None => generate_identifier(&tx, now)?,
    };

    let inserted = tx.execute(
        "INSERT INTO students(identifier, name, class_name, fee_category, active, registered_at)
         VALUES(?, ?, ?, ?, ?, ?)",
        (
            &identifier,
            &name,
            &class_name,
            input.fee_category.as_str(),
            input.active.unwrap_or(true) as i64,
            format_timestamp(now),
        ),
    );
    match inserted {
        Ok(_) => {}
        Err(e) if is_unique_violation(&e) => {
            return Err(CafeteriaError::validation(
                "identifier",
                format!("identifier {} already in use", identifier),
            ));
        }
        Err(e) => return Err(e.into()),
    }
    let id = tx.last_insert_rowid();
    tx.commit()?;

    info!(student = %identifier, class = %class_name, "student created");
    get_by_id(conn, id)
}

/// Replaces name, class and fee category. The identifier is immutable since
/// it is printed on QR badges.
pub fn update(conn: &Connection, id: i64, input: &StudentInput) -> Result<Student> {
    let current = get_by_id(conn, id)?;
    let (name, class_name) = validated_fields(input)?;
    let active = input.active.unwrap_or(current.active);
    conn.execute(
        "UPDATE students SET name = ?, class_name = ?, fee_category = ?, active = ? WHERE id = ?",
        (
            &name,
            &class_name,
            input.fee_category.as_str(),
            active as i64,
            id,
        ),
    )?;
    info!(student = %current.identifier, "student updated");
    get_by_id(conn, id)
}

pub fn toggle_active(conn: &Connection, id: i64) -> Result<Student> {
    let current = get_by_id(conn, id)?;
    conn.execute(
        "UPDATE students SET active = ? WHERE id = ?",
        (!current.active as i64, id),
    )?;
    info!(
        student = %current.identifier,
        active = !current.active,
        "student cafeteria access toggled"
    );
    get_by_id(conn, id)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchCriteria {
    Identifier,
    Name,
    Class,
}

impl SearchCriteria {
    pub fn as_str(self) -> &'static str {
        match self {
            SearchCriteria::Identifier => "identifier",
            SearchCriteria::Name => "name",
            SearchCriteria::Class => "class",
        }
    }

    pub fn parse(raw: &str) -> Result<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "identifier" | "cedula" => Ok(SearchCriteria::Identifier),
            "name" | "nombre" => Ok(SearchCriteria::Name),
            "class" | "curso" => Ok(SearchCriteria::Class),
            other => Err(CafeteriaError::InvalidCriteria(other.to_string())),
        }
    }

    fn field<'a>(self, s: &'a Student) -> &'a str {
        match self {
            SearchCriteria::Identifier => &s.identifier,
            SearchCriteria::Name => &s.name,
            SearchCriteria::Class => &s.class_name,
        }
    }
}

/// Case-insensitive substring match over active students. Matching happens
/// here rather than in SQL because SQLite's LIKE only folds ASCII.
pub fn search(conn: &Connection, criteria: SearchCriteria, text: &str) -> Result<Vec<Student>> {
    let needle = text.trim().to_lowercase();
    if needle.is_empty() {
        return Err(CafeteriaError::validation("text", "search text is required"));
    }
    let found: Vec<Student> = list_active(conn)?
        .into_iter()
        .filter(|s| criteria.field(s).to_lowercase().contains(&needle))
        .collect();
    debug!(criteria = criteria.as_str(), hits = found.len(), "student search");
    Ok(found)
}
