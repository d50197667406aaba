//! Migration bookkeeping models.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::mysql::MySqlRow;
use sqlx::{FromRow, Row};
use std::fmt;
use std::str::FromStr;

/// Outcome recorded for a migration script.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum MigrationStatus {
    Success,
    Error,
}

impl MigrationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "SUCCESS",
            Self::Error => "ERROR",
        }
    }
}

impl fmt::Display for MigrationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MigrationStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "SUCCESS" => Ok(Self::Success),
            "ERROR" => Ok(Self::Error),
            other => Err(format!("unknown migration status '{other}'")),
        }
    }
}

/// One row of the `schema_version` table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaVersion {
    pub id: i64,
    /// Migration file name
    pub script: String,
    /// Decimal FNV-1 64-bit hash of the file content
    pub checksum: String,
    /// Go-style duration, e.g. "35ms" or "1m"
    pub execution_time: String,
    pub status: MigrationStatus,
    pub created_time: Option<DateTime<Utc>>,
}

impl SchemaVersion {
    pub fn is_error(&self) -> bool {
        self.status == MigrationStatus::Error
    }
}

impl<'r> FromRow<'r, MySqlRow> for SchemaVersion {
    fn from_row(row: &'r MySqlRow) -> Result<Self, sqlx::Error> {
        let status: String = row.try_get("status")?;
        let status = status.parse().map_err(|e: String| sqlx::Error::ColumnDecode {
            index: "status".to_string(),
            source: e.into(),
        })?;

        Ok(Self {
            id: row.try_get("id")?,
            script: row.try_get("script")?,
            checksum: row.try_get("checksum")?,
            execution_time: row.try_get("execution_time")?,
            status,
            created_time: row.try_get("created_time")?,
        })
    }
}

/// Scripts touched by a completed migration run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MigrationReport {
    /// Newly executed, in application order.
    pub applied: Vec<String>,
    /// Already recorded with a matching checksum.
    pub verified: Vec<String>,
}

impl MigrationReport {
    pub fn is_noop(&self) -> bool {
        self.applied.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_round_trip_text() {
        assert_eq!(MigrationStatus::Success.to_string(), "SUCCESS");
        assert_eq!("ERROR".parse::<MigrationStatus>().unwrap(), MigrationStatus::Error);
        assert!("error".parse::<MigrationStatus>().is_err());
    }

    #[test]
    fn test_status_serializes_uppercase() {
        let json = serde_json::to_string(&MigrationStatus::Error).unwrap();
        assert_eq!(json, "\"ERROR\"");
    }

    #[test]
    fn test_report_noop() {
        let mut report = MigrationReport::default();
        assert!(report.is_noop());
        report.applied.push("V1__init.sql".into());
        assert!(!report.is_noop());
    }
}
