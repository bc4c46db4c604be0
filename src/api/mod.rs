//! The monitoring backend's request/response surface.

mod http;

use async_trait::async_trait;

use crate::error::MonitorResult;
use crate::telemetry::{AnomalyCycle, Anomaly, LoginResponse, MachineLive, Page, Part, PartDetail};

pub use http::HttpMonitoringApi;

#[async_trait]
pub trait MonitoringApi: Send + Sync {
    async fn login(&self, username: &str, password: &str) -> MonitorResult<LoginResponse>;

    async fn list_anomalies(&self, page: u32, page_size: u32) -> MonitorResult<Page<Anomaly>>;

    async fn get_anomaly_cycle(&self, anomaly_id: &str) -> MonitorResult<AnomalyCycle>;

    async fn list_parts(&self, page: u32, page_size: u32) -> MonitorResult<Page<Part>>;

    async fn get_part_detail(&self, part_id: &str) -> MonitorResult<PartDetail>;

    async fn machines_live(&self) -> MonitorResult<Vec<MachineLive>>;
}
