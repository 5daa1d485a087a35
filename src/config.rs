use std::path::PathBuf;
use std::time::Duration;
use std::{env, fmt::Display, str::FromStr};

use tracing::{info, warn};

pub const DEFAULT_ADMIN_EMAIL: &str = "admin@example.com";
const DEFAULT_ADMIN_PASSWORD: &str = "admin123";

/// Startup configuration read from the environment.
#[derive(Debug, Clone)]
pub struct Config {
    pub workspace: Option<PathBuf>,
    pub admin_password: String,
    pub busy_timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            workspace: None,
            admin_password: DEFAULT_ADMIN_PASSWORD.to_string(),
            busy_timeout: Duration::from_millis(5000),
        }
    }
}

impl Config {
    pub fn load() -> Self {
        let workspace = var("COMEDOR_WORKSPACE").ok().map(PathBuf::from);
        let admin_password = var("COMEDOR_ADMIN_PASSWORD").unwrap_or_else(|_| {
            warn!("COMEDOR_ADMIN_PASSWORD not set; new workspaces get the default admin password");
            DEFAULT_ADMIN_PASSWORD.to_string()
        });
        let busy_ms: u64 = try_load("COMEDOR_BUSY_TIMEOUT_MS", 5000);
        Self {
            workspace,
            admin_password,
            busy_timeout: Duration::from_millis(busy_ms),
        }
    }
}

fn var(key: &str) -> Result<String, ()> {
    match env::var(key) {
        Ok(v) if !v.trim().is_empty() => Ok(v.trim().to_string()),
        _ => {
            info!("{key} not set");
            Err(())
        }
    }
}

fn try_load<T>(key: &str, default: T) -> T
where
    T: FromStr + Display,
    T::Err: Display,
{
    let Ok(raw) = var(key) else {
        info!("{key} using default: {default}");
        return default;
    };
    raw.parse().unwrap_or_else(|e| {
        warn!("Invalid {key} value {raw:?}: {e}; using default: {default}");
        default
    })
}
