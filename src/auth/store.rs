use std::sync::Arc;

use log::{error, info};

use crate::api::MonitoringApi;
use crate::error::{MonitorError, MonitorResult};

use super::storage::CredentialStorage;

/// Holder of the session credential.
///
/// Every read goes to the backing storage so a logout is visible to the
/// navigator and the connection manager on their next call. Storage failures
/// are logged and degrade to "unauthenticated"; they never reach callers.
#[derive(Clone)]
pub struct CredentialStore {
    storage: Arc<dyn CredentialStorage>,
}

impl CredentialStore {
    pub fn new(storage: Arc<dyn CredentialStorage>) -> Self {
        Self { storage }
    }

    pub async fn get_credential(&self) -> Option<String> {
        match self.storage.get().await {
            Ok(token) => token.filter(|token| !token.is_empty()),
            Err(err) => {
                report("read", err);
                None
            }
        }
    }

    pub async fn set_credential(&self, token: &str) {
        if let Err(err) = self.storage.set(token).await {
            report("write", err);
        }
    }

    pub async fn clear_credential(&self) {
        if let Err(err) = self.storage.clear().await {
            report("clear", err);
        }
    }

    pub async fn is_authenticated(&self) -> bool {
        self.get_credential().await.is_some()
    }

    /// Exchanges operator credentials for a bearer token and stores it.
    pub async fn login(
        &self,
        api: &dyn MonitoringApi,
        username: &str,
        password: &str,
    ) -> MonitorResult<()> {
        let token = api.login(username, password).await?;
        self.set_credential(&token.access_token).await;
        info!("Operator '{username}' logged in");
        Ok(())
    }

    pub async fn logout(&self) {
        self.clear_credential().await;
        info!("Session credential cleared");
    }
}

fn report(operation: &str, err: anyhow::Error) {
    let err = MonitorError::StorageUnavailable(format!("{err:#}"));
    error!("Credential {operation} failed: {err}");
}
