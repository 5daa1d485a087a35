use crate::config::DEFAULT_ADMIN_EMAIL;
use crate::error::{CafeteriaError, Result};
use crate::model::{format_timestamp, text_col, Role, User};
use chrono::Local;
use rusqlite::{Connection, OptionalExtension};
use tracing::{info, warn};
use uuid::Uuid;

/// Hashes a password with argon2id into a PHC string.
pub fn hash_password(password: &str) -> Result<String> {
    use argon2::Argon2;
    use password_hash::rand_core::OsRng;
    use password_hash::{PasswordHasher, SaltString};

    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|h| h.to_string())
        .map_err(|e| CafeteriaError::validation("password", e.to_string()))
}

pub fn verify_password(stored: &str, password: &str) -> bool {
    use argon2::Argon2;
    use password_hash::{PasswordHash, PasswordVerifier};

    match PasswordHash::new(stored) {
        Ok(parsed) => Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok(),
        Err(_) => false,
    }
}

/// Creates the bootstrap administrator on an empty user table.
pub fn ensure_seed_admin(conn: &Connection, password: &str) -> anyhow::Result<()> {
    // Single statement so two daemons opening a new workspace seed once.
    let inserted = conn.execute(
        "INSERT INTO users(name, email, password_hash, role, active, created_at)
         SELECT ?, ?, ?, ?, 1, ?
         WHERE NOT EXISTS (SELECT 1 FROM users)",
        (
            "Administrador",
            DEFAULT_ADMIN_EMAIL,
            hash_password(password)?,
            Role::Admin.as_str(),
            format_timestamp(Local::now().naive_local()),
        ),
    )?;
    if inserted > 0 {
        info!(email = DEFAULT_ADMIN_EMAIL, "seeded administrator account");
    }
    Ok(())
}

const USER_COLUMNS: &str = "id, name, email, role, active";

fn user_from_row(r: &rusqlite::Row<'_>) -> rusqlite::Result<User> {
    Ok(User {
        id: r.get(0)?,
        name: r.get(1)?,
        email: r.get(2)?,
        role: text_col(r, 3, Role::parse)?,
        active: r.get::<_, i64>(4)? != 0,
    })
}

pub fn get_user(conn: &Connection, id: i64) -> Result<User> {
    conn.query_row(
        &format!("SELECT {} FROM users WHERE id = ?", USER_COLUMNS),
        [id],
        user_from_row,
    )
    .optional()?
    .ok_or_else(|| CafeteriaError::not_found("user", id))
}

/// Resolves an actor id for a ledger write. Unknown or disabled users are
/// not valid identities.
pub fn active_actor(conn: &Connection, id: i64) -> Result<User> {
    match get_user(conn, id) {
        Ok(u) if u.active => Ok(u),
        Ok(_) | Err(CafeteriaError::NotFound { .. }) => Err(CafeteriaError::Unauthorized),
        Err(e) => Err(e),
    }
}

#[derive(Debug, Clone)]
pub struct Session {
    pub token: String,
    pub user: User,
}

pub fn login(conn: &Connection, email: &str, password: &str) -> Result<Session> {
    let email = email.trim().to_ascii_lowercase();
    let row = conn
        .query_row(
            &format!(
                "SELECT {}, password_hash FROM users WHERE lower(email) = ?",
                USER_COLUMNS
            ),
            [&email],
            |r| Ok((user_from_row(r)?, r.get::<_, String>(5)?)),
        )
        .optional()?;

    let Some((user, hash)) = row else {
        warn!(%email, "login rejected: unknown email");
        return Err(CafeteriaError::Unauthorized);
    };
    if !user.active || !verify_password(&hash, password) {
        warn!(%email, "login rejected");
        return Err(CafeteriaError::Unauthorized);
    }

    let token = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO sessions(token, user_id, created_at) VALUES(?, ?, ?)",
        (&token, user.id, format_timestamp(Local::now().naive_local())),
    )?;
    info!(user = user.id, "session opened");
    Ok(Session { token, user })
}

pub fn logout(conn: &Connection, token: &str) -> Result<bool> {
    let n = conn.execute("DELETE FROM sessions WHERE token = ?", [token])?;
    Ok(n > 0)
}

/// Looks up the user behind a session token. Sessions of deactivated users
/// stop working immediately.
pub fn resolve_session(conn: &Connection, token: &str) -> Result<User> {
    let user_id: Option<i64> = conn
        .query_row(
            "SELECT user_id FROM sessions WHERE token = ?",
            [token],
            |r| r.get(0),
        )
        .optional()?;
    let Some(user_id) = user_id else {
        return Err(CafeteriaError::Unauthorized);
    };
    active_actor(conn, user_id)
}

pub fn require_admin(user: &User) -> Result<()> {
    if user.role == Role::Admin {
        Ok(())
    } else {
        Err(CafeteriaError::Forbidden(
            "administrator privileges required".to_string(),
        ))
    }
}

pub fn list_users(conn: &Connection) -> Result<Vec<User>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM users ORDER BY name, id",
        USER_COLUMNS
    ))?;
    let users = stmt
        .query_map([], user_from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(users)
}

#[derive(Debug, Clone)]
pub struct UserInput {
    pub name: String,
    pub email: String,
    pub role: Role,
    pub active: bool,
    pub password: Option<String>,
}

fn validate_user(input: &UserInput) -> Result<(String, String)> {
    let name = input.name.trim().to_string();
    let email = input.email.trim().to_ascii_lowercase();
    if name.is_empty() {
        return Err(CafeteriaError::validation("name", "name must not be empty"));
    }
    if !email.contains('@') {
        return Err(CafeteriaError::validation("email", "email is not valid"));
    }
    Ok((name, email))
}

fn email_taken(conn: &Connection, email: &str, except_id: Option<i64>) -> Result<bool> {
    let found: Option<i64> = conn
        .query_row("SELECT id FROM users WHERE lower(email) = ?", [email], |r| {
            r.get(0)
        })
        .optional()?;
    Ok(matches!(found, Some(id) if Some(id) != except_id))
}

pub fn create_user(conn: &Connection, input: &UserInput) -> Result<User> {
    let (name, email) = validate_user(input)?;
    let password = input
        .password
        .as_deref()
        .filter(|p| !p.is_empty())
        .ok_or_else(|| CafeteriaError::validation("password", "password is required"))?;
    if email_taken(conn, &email, None)? {
        return Err(CafeteriaError::validation("email", "email already in use"));
    }
    conn.execute(
        "INSERT INTO users(name, email, password_hash, role, active, created_at)
         VALUES(?, ?, ?, ?, ?, ?)",
        (
            &name,
            &email,
            hash_password(password)?,
            input.role.as_str(),
            input.active as i64,
            format_timestamp(Local::now().naive_local()),
        ),
    )?;
    let id = conn.last_insert_rowid();
    info!(user = id, role = input.role.as_str(), "user created");
    get_user(conn, id)
}

pub fn update_user(conn: &Connection, id: i64, input: &UserInput) -> Result<User> {
    get_user(conn, id)?;
    let (name, email) = validate_user(input)?;
    if email_taken(conn, &email, Some(id))? {
        return Err(CafeteriaError::validation("email", "email already in use"));
    }

    let tx = conn.unchecked_transaction()?;
    tx.execute(
        "UPDATE users SET name = ?, email = ?, role = ?, active = ? WHERE id = ?",
        (&name, &email, input.role.as_str(), input.active as i64, id),
    )?;
    if let Some(password) = input.password.as_deref().filter(|p| !p.is_empty()) {
        tx.execute(
            "UPDATE users SET password_hash = ? WHERE id = ?",
            (hash_password(password)?, id),
        )?;
    }
    if !input.active {
        tx.execute("DELETE FROM sessions WHERE user_id = ?", [id])?;
    }
    tx.commit()?;
    info!(user = id, "user updated");
    get_user(conn, id)
}
