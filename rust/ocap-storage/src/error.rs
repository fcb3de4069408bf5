use ocap_capability::StoreError;

/// Failure to configure or open a [`Sqlite`](crate::Sqlite) store.
#[derive(Debug, thiserror::Error)]
pub enum SqliteError {
    /// A setting could not be parsed.
    #[error("Invalid value for {name}: {value}")]
    InvalidSetting {
        /// Setting name, as read from the environment.
        name: &'static str,
        /// Rejected value.
        value: String,
    },

    /// The database could not be opened or migrated.
    #[error("Failed to open database: {0}")]
    Open(#[from] rusqlite::Error),
}

/// Map a database error onto the store contract.
///
/// Constraint violations other than the ones handled explicitly by the
/// store surface as conflicts, so a duplicate `public_id` is reported the
/// same way by every backend. A lookup that finds no row is `NotFound`.
pub(crate) fn store_error(error: rusqlite::Error) -> StoreError {
    if let rusqlite::Error::QueryReturnedNoRows = error {
        return StoreError::NotFound(error.to_string());
    }
    match error.sqlite_error_code() {
        Some(rusqlite::ErrorCode::ConstraintViolation) => StoreError::Conflict(error.to_string()),
        _ => StoreError::Backend(error.to_string()),
    }
}

pub(crate) fn encoding_error(error: impl std::fmt::Display) -> StoreError {
    StoreError::Backend(error.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn it_maps_missing_rows_to_not_found() {
        assert!(store_error(rusqlite::Error::QueryReturnedNoRows).is_not_found());
    }
}
