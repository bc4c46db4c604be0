use std::sync::Mutex;

use anyhow::{anyhow, Result};
use async_trait::async_trait;

use crate::db::Database;

/// Durable key under which the session credential is kept.
pub const CREDENTIAL_KEY: &str = "session_token";

/// Persistence capability behind the credential store.
#[async_trait]
pub trait CredentialStorage: Send + Sync {
    async fn get(&self) -> Result<Option<String>>;
    async fn set(&self, token: &str) -> Result<()>;
    async fn clear(&self) -> Result<()>;
}

pub struct SqliteCredentialStorage {
    db: Database,
}

impl SqliteCredentialStorage {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

#[async_trait]
impl CredentialStorage for SqliteCredentialStorage {
    async fn get(&self) -> Result<Option<String>> {
        Ok(self
            .db
            .get_credential(CREDENTIAL_KEY)
            .await?
            .map(|stored| stored.value))
    }

    async fn set(&self, token: &str) -> Result<()> {
        self.db.put_credential(CREDENTIAL_KEY, token).await
    }

    async fn clear(&self) -> Result<()> {
        self.db.delete_credential(CREDENTIAL_KEY).await
    }
}

/// Process-local storage for tests and throwaway runs.
#[derive(Default)]
pub struct MemoryCredentialStorage {
    slot: Mutex<Option<String>>,
}

impl MemoryCredentialStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_token(token: impl Into<String>) -> Self {
        Self {
            slot: Mutex::new(Some(token.into())),
        }
    }
}

#[async_trait]
impl CredentialStorage for MemoryCredentialStorage {
    async fn get(&self) -> Result<Option<String>> {
        let guard = self
            .slot
            .lock()
            .map_err(|_| anyhow!("credential slot poisoned"))?;
        Ok(guard.clone())
    }

    async fn set(&self, token: &str) -> Result<()> {
        let mut guard = self
            .slot
            .lock()
            .map_err(|_| anyhow!("credential slot poisoned"))?;
        *guard = Some(token.to_string());
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        let mut guard = self
            .slot
            .lock()
            .map_err(|_| anyhow!("credential slot poisoned"))?;
        *guard = None;
        Ok(())
    }
}
