//! Environment knobs and default locations.

use std::env;
use std::path::PathBuf;

use anyhow::{Context, Result};

/// Overrides the database path when `--db` is not given.
pub const DB_ENV: &str = "CLAIMS_DB";
/// `EnvFilter` directives for the subscriber.
pub const LOG_ENV: &str = "CLAIMS_LOG";
/// `json` switches the subscriber to JSON lines.
pub const LOG_FORMAT_ENV: &str = "CLAIMS_LOG_FORMAT";
/// Directory for the daily rolling log file.
pub const LOG_DIR_ENV: &str = "CLAIMS_LOG_DIR";

pub const DEFAULT_LOG_FILTER: &str = "claims=info,sqlx=warn";

const APP_DIR: &str = "claims-desk";
const DB_FILE: &str = "claims.sqlite3";

pub fn default_db_path() -> Result<PathBuf> {
    let base = match dirs::data_dir() {
        Some(dir) => dir,
        None => env::current_dir().context("resolve current directory")?,
    };
    Ok(base.join(APP_DIR).join(DB_FILE))
}

/// Picks the database path: explicit flag, then `CLAIMS_DB`, then the
/// per-user data directory.
pub fn resolve_db_path(explicit: Option<PathBuf>) -> Result<PathBuf> {
    if let Some(path) = explicit {
        return Ok(path);
    }
    match env::var_os(DB_ENV).filter(|v| !v.is_empty()) {
        Some(path) => Ok(PathBuf::from(path)),
        None => default_db_path(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_path_wins() -> Result<()> {
        let path = resolve_db_path(Some(PathBuf::from("/tmp/x.sqlite3")))?;
        assert_eq!(path, PathBuf::from("/tmp/x.sqlite3"));
        Ok(())
    }

    #[test]
    fn default_path_ends_with_app_dir() -> Result<()> {
        let path = default_db_path()?;
        assert!(path.ends_with("claims-desk/claims.sqlite3"));
        Ok(())
    }
}
