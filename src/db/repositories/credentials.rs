use anyhow::Result;
use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension};

use crate::db::{helpers::parse_datetime, Database};

#[derive(Debug, Clone, PartialEq)]
pub struct StoredCredential {
    pub value: String,
    pub updated_at: DateTime<Utc>,
}

impl Database {
    pub async fn get_credential(&self, key: &str) -> Result<Option<StoredCredential>> {
        let key = key.to_string();
        self.execute(move |conn| {
            let row: Option<(String, String)> = conn
                .query_row(
                    "SELECT value, updated_at FROM credentials WHERE key = ?1",
                    params![key],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )
                .optional()?;

            row.map(|(value, updated_at)| {
                Ok(StoredCredential {
                    value,
                    updated_at: parse_datetime(&updated_at, "updated_at")?,
                })
            })
            .transpose()
        })
        .await
    }

    /// Upsert: a key holds at most one credential.
    pub async fn put_credential(&self, key: &str, value: &str) -> Result<()> {
        let key = key.to_string();
        let value = value.to_string();
        self.execute(move |conn| {
            conn.execute(
                "INSERT INTO credentials (key, value, updated_at) VALUES (?1, ?2, ?3)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
                params![key, value, Utc::now().to_rfc3339()],
            )?;
            Ok(())
        })
        .await
    }

    pub async fn delete_credential(&self, key: &str) -> Result<()> {
        let key = key.to_string();
        self.execute(move |conn| {
            conn.execute("DELETE FROM credentials WHERE key = ?1", params![key])?;
            Ok(())
        })
        .await
    }
}
