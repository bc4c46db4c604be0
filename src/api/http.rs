use std::time::Duration;

use async_trait::async_trait;
use log::debug;
use reqwest::{Client, RequestBuilder, Response, StatusCode, Url};
use serde::de::DeserializeOwned;
use serde_json::json;

use crate::auth::CredentialStore;
use crate::error::{MonitorError, MonitorResult};
use crate::telemetry::{AnomalyCycle, Anomaly, LoginResponse, MachineLive, Page, Part, PartDetail};

use super::MonitoringApi;

/// `reqwest` client for the monitoring backend. Every request reads the
/// credential store and attaches `Authorization: Bearer` when a token exists.
#[derive(Clone)]
pub struct HttpMonitoringApi {
    http: Client,
    base: Url,
    credentials: CredentialStore,
}

impl HttpMonitoringApi {
    pub fn new(base: &str, timeout: Duration, credentials: CredentialStore) -> MonitorResult<Self> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|err| MonitorError::Transport(format!("failed to build HTTP client: {err}")))?;
        Self::with_client(http, base, credentials)
    }

    pub fn with_client(http: Client, base: &str, credentials: CredentialStore) -> MonitorResult<Self> {
        let base = Url::parse(base)
            .map_err(|err| MonitorError::Transport(format!("invalid API base '{base}': {err}")))?;
        if base.cannot_be_a_base() {
            return Err(MonitorError::Transport(format!(
                "API base '{base}' cannot carry a path"
            )));
        }
        Ok(Self {
            http,
            base,
            credentials,
        })
    }

    pub fn base(&self) -> &Url {
        &self.base
    }

    fn endpoint(&self, segments: &[&str]) -> Url {
        let mut url = self.base.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    async fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match self.credentials.get_credential().await {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn send<T: DeserializeOwned>(&self, request: RequestBuilder, what: &str) -> MonitorResult<T> {
        let response = self.authorize(request).await.send().await?;
        let response = check_status(response, what)?;
        Ok(response.json::<T>().await?)
    }
}

fn check_status(response: Response, what: &str) -> MonitorResult<Response> {
    let status = response.status();
    debug!("{} {} -> {}", what, response.url().path(), status);
    match status {
        s if s.is_success() => Ok(response),
        StatusCode::UNAUTHORIZED => Err(MonitorError::Unauthorized),
        StatusCode::NOT_FOUND => Err(MonitorError::NotFound(what.to_string())),
        s => Err(MonitorError::Http { status: s.as_u16() }),
    }
}

#[async_trait]
impl MonitoringApi for HttpMonitoringApi {
    async fn login(&self, username: &str, password: &str) -> MonitorResult<LoginResponse> {
        let request = self
            .http
            .post(self.endpoint(&["api", "auth", "login"]))
            .json(&json!({ "username": username, "password": password }));
        // Login is the one call that never carries a stale bearer.
        let response = request.send().await?;
        let response = check_status(response, "login")?;
        Ok(response.json::<LoginResponse>().await?)
    }

    async fn list_anomalies(&self, page: u32, page_size: u32) -> MonitorResult<Page<Anomaly>> {
        let request = self
            .http
            .get(self.endpoint(&["api", "anomalies"]))
            .query(&[("page", page), ("page_size", page_size)]);
        self.send(request, "anomalies").await
    }

    async fn get_anomaly_cycle(&self, anomaly_id: &str) -> MonitorResult<AnomalyCycle> {
        let request = self
            .http
            .get(self.endpoint(&["api", "anomalies", anomaly_id, "cycle"]));
        self.send(request, &format!("anomaly {anomaly_id}")).await
    }

    async fn list_parts(&self, page: u32, page_size: u32) -> MonitorResult<Page<Part>> {
        let request = self
            .http
            .get(self.endpoint(&["api", "parts"]))
            .query(&[("page", page), ("page_size", page_size)]);
        self.send(request, "parts").await
    }

    async fn get_part_detail(&self, part_id: &str) -> MonitorResult<PartDetail> {
        let request = self.http.get(self.endpoint(&["api", "parts", part_id]));
        self.send(request, &format!("part {part_id}")).await
    }

    async fn machines_live(&self) -> MonitorResult<Vec<MachineLive>> {
        let request = self.http.get(self.endpoint(&["api", "machines", "live"]));
        self.send(request, "machines").await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::MemoryCredentialStorage;
    use std::sync::Arc;

    fn api(base: &str) -> MonitorResult<HttpMonitoringApi> {
        let store = CredentialStore::new(Arc::new(MemoryCredentialStorage::new()));
        HttpMonitoringApi::new(base, Duration::from_secs(1), store)
    }

    #[test]
    fn endpoints_escape_path_segments() {
        let api = api("http://localhost:5000/").unwrap();
        assert_eq!(
            api.endpoint(&["api", "anomalies", "a b/c", "cycle"]).as_str(),
            "http://localhost:5000/api/anomalies/a%20b%2Fc/cycle"
        );
    }

    #[test]
    fn base_with_prefix_is_kept() {
        let api = api("https://plant.example/monitoring").unwrap();
        assert_eq!(
            api.endpoint(&["api", "parts"]).as_str(),
            "https://plant.example/monitoring/api/parts"
        );
    }

    #[test]
    fn rejects_unusable_base() {
        assert!(api("not a url").is_err());
        assert!(api("mailto:ops@example.com").is_err());
    }
}
