use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::SqliteError;

/// Environment variable naming the database file.
pub const PATH_VAR: &str = "OCAP_SQLITE_PATH";

/// Environment variable overriding [`Settings::busy_timeout_ms`].
pub const BUSY_TIMEOUT_VAR: &str = "OCAP_SQLITE_BUSY_TIMEOUT_MS";

/// Configuration of a [`Sqlite`](crate::Sqlite) store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Database file. `None` opens a private in-memory database.
    pub path: Option<PathBuf>,
    /// How long a writer waits on a locked database before failing.
    pub busy_timeout_ms: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            path: None,
            busy_timeout_ms: 5000,
        }
    }
}

impl Settings {
    /// Read settings from the process environment, falling back to the
    /// defaults for unset variables.
    pub fn from_env() -> Result<Self, SqliteError> {
        Self::from_vars(|name| std::env::var(name).ok())
    }

    /// Read settings through `lookup`, which maps a variable name to its
    /// value.
    pub fn from_vars(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, SqliteError> {
        let mut settings = Self::default();

        if let Some(path) = lookup(PATH_VAR).filter(|path| !path.is_empty()) {
            settings.path = Some(PathBuf::from(path));
        }

        if let Some(value) = lookup(BUSY_TIMEOUT_VAR) {
            settings.busy_timeout_ms =
                value
                    .trim()
                    .parse()
                    .map_err(|_| SqliteError::InvalidSetting {
                        name: BUSY_TIMEOUT_VAR,
                        value,
                    })?;
        }

        Ok(settings)
    }
}
