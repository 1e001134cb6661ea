//! Helpers for reading TEXT-encoded ids out of SQLite rows.

use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use uuid::Uuid;

use crate::authz::StoreError;

pub fn parse_uuid(row: &SqliteRow, column: &str) -> Result<Uuid, StoreError> {
    let raw: String = row.try_get(column)?;
    Uuid::parse_str(raw.trim())
        .map_err(|e| StoreError::Malformed(format!("invalid uuid in column {column}: {e}")))
}

pub fn parse_opt_uuid(row: &SqliteRow, column: &str) -> Result<Option<Uuid>, StoreError> {
    let raw: Option<String> = row.try_get(column)?;
    match raw.as_deref().map(str::trim) {
        None | Some("") => Ok(None),
        Some(s) => Uuid::parse_str(s)
            .map(Some)
            .map_err(|e| StoreError::Malformed(format!("invalid uuid in column {column}: {e}"))),
    }
}

/// Parses a UUID string coming from a `FromRow` struct field.
pub fn uuid_field(value: &str, field: &str) -> Result<Uuid, StoreError> {
    Uuid::parse_str(value.trim()).map_err(|e| StoreError::Malformed(format!("invalid uuid in {field}: {e}")))
}

pub fn opt_uuid_field(value: Option<&str>, field: &str) -> Result<Option<Uuid>, StoreError> {
    match value.map(str::trim) {
        None | Some("") => Ok(None),
        Some(s) => uuid_field(s, field).map(Some),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_optional_ids_read_as_none() {
        assert_eq!(opt_uuid_field(Some("  "), "assigned_to").unwrap(), None);
        assert_eq!(opt_uuid_field(None, "assigned_to").unwrap(), None);
    }

    #[test]
    fn garbage_ids_are_malformed() {
        let err = uuid_field("not-a-uuid", "id").unwrap_err();
        assert!(matches!(err, StoreError::Malformed(_)));
    }
}
