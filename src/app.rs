use std::sync::Arc;

use anyhow::Result;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use crate::api::{HttpMonitoringApi, MonitoringApi};
use crate::auth::{CredentialStorage, CredentialStore};
use crate::error::{MonitorError, MonitorResult};
use crate::navigation::{Navigation, Navigator, RouteTable, HOME_PATH};
use crate::settings::{Profile, SettingsStore};
use crate::stream::{
    ConnectionManager, ConnectionState, NegotiatedTransport, StreamEvent, Transport,
};
use crate::telemetry::{
    Anomaly, AnomalyCycle, CorrelationService, CycleClassifier, LiveBoard, Page, Part, PartDetail,
};

const ENABLE_LOGS: bool = true;

use crate::{log_info, log_warn};

const DASHBOARD_ROUTE: &str = "dashboard";

/// Composition root: one credential store, one navigator, one live
/// connection and the board it feeds.
pub struct MonitorApp {
    profile: Profile,
    credentials: CredentialStore,
    api: Arc<dyn MonitoringApi>,
    navigator: Navigator,
    connection: ConnectionManager,
    correlation: CorrelationService,
    fold_task: Mutex<Option<JoinHandle<()>>>,
}

impl MonitorApp {
    pub fn new(settings: &SettingsStore, storage: Arc<dyn CredentialStorage>) -> Result<Self> {
        let profile = settings.active_profile()?;
        let credentials = CredentialStore::new(storage);
        let api = HttpMonitoringApi::new(
            &profile.monitoring_base,
            profile.request_timeout(),
            credentials.clone(),
        )?;
        let transport = NegotiatedTransport::from_profile(&profile)?;

        log_info!(
            "monitoring {} (stream transports: {:?})",
            profile.monitoring_base,
            transport.names()
        );

        Ok(Self::from_parts(
            profile,
            credentials,
            Arc::new(api),
            Arc::new(transport),
        ))
    }

    /// Wires the app around explicit collaborators.
    pub fn from_parts(
        profile: Profile,
        credentials: CredentialStore,
        api: Arc<dyn MonitoringApi>,
        transport: Arc<dyn Transport>,
    ) -> Self {
        let navigator = Navigator::new(RouteTable::default(), credentials.clone());
        let connection =
            ConnectionManager::new(transport, credentials.clone(), profile.reconnect.clone());
        let correlation = CorrelationService::new(
            Arc::clone(&api),
            LiveBoard::new(),
            CycleClassifier::new(profile.cycle_tolerance_s),
        );

        Self {
            profile,
            credentials,
            api,
            navigator,
            connection,
            correlation,
            fold_task: Mutex::new(None),
        }
    }

    pub fn profile(&self) -> &Profile {
        &self.profile
    }

    pub fn credentials(&self) -> &CredentialStore {
        &self.credentials
    }

    pub fn navigator(&self) -> &Navigator {
        &self.navigator
    }

    pub fn connection(&self) -> &ConnectionManager {
        &self.connection
    }

    pub fn board(&self) -> &LiveBoard {
        self.correlation.board()
    }

    pub async fn login(&self, username: &str, password: &str) -> MonitorResult<()> {
        self.credentials
            .login(self.api.as_ref(), username, password)
            .await
    }

    /// Drops the live connection before forgetting the credential.
    pub async fn logout(&self) {
        self.shutdown().await;
        self.credentials.logout().await;
    }

    /// Guarded navigation to the dashboard. When the guard lets us in, the
    /// board is seeded and the live connection is attached exactly once.
    pub async fn enter_dashboard(&self) -> Navigation {
        let outcome = self.navigator.navigate(HOME_PATH).await;
        if outcome.route() != Some(DASHBOARD_ROUTE) {
            return outcome;
        }

        if let Err(err) = self.correlation.hydrate_board().await {
            log_warn!("live board hydration failed: {err}");
            if err.is_unauthorized() {
                self.handle_api_error(&err).await;
                return self.navigator.navigate(HOME_PATH).await;
            }
        }

        self.attach_stream().await;
        outcome
    }

    async fn attach_stream(&self) {
        let mut fold_task = self.fold_task.lock().await;
        if fold_task.as_ref().is_some_and(|task| !task.is_finished()) {
            return;
        }

        let mut events = self.connection.subscribe();
        let mut state = self.connection.watch_state();
        let connection = self.connection.clone();
        let credentials = self.credentials.clone();
        let board = self.correlation.board().clone();
        *fold_task = Some(tokio::spawn(async move {
            loop {
                tokio::select! {
                    event = events.recv() => match event {
                        Some(StreamEvent::Telemetry(event)) => board.apply_telemetry_event(&event),
                        Some(StreamEvent::MachinesLive(rows)) => board.apply_machines_live(&rows),
                        Some(StreamEvent::Ping) => {}
                        None => break,
                    },
                    changed = state.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        if *state.borrow_and_update() != ConnectionState::Errored {
                            continue;
                        }
                        if let Some(failure) = connection.last_failure() {
                            forget_rejected_credential(&credentials, &failure).await;
                        }
                    }
                }
            }
        }));

        self.connection.start().await;
    }

    /// Stops the live connection and waits for the board to stop folding.
    pub async fn shutdown(&self) {
        self.connection.stop().await;
        if let Some(task) = self.fold_task.lock().await.take() {
            if let Err(err) = task.await {
                log_warn!("board fold task failed to join: {err}");
            }
        }
    }

    /// A 401 anywhere means the credential is dead; forget it so the next
    /// navigation lands on the login view.
    pub async fn handle_api_error(&self, err: &MonitorError) {
        forget_rejected_credential(&self.credentials, err).await;
    }

    async fn observe<T>(&self, result: MonitorResult<T>) -> MonitorResult<T> {
        if let Err(err) = &result {
            self.handle_api_error(err).await;
        }
        result
    }

    pub async fn load_anomalies(&self, page: u32, page_size: u32) -> MonitorResult<Page<Anomaly>> {
        let result = self.correlation.load_anomalies(page, page_size).await;
        self.observe(result).await
    }

    pub async fn load_anomaly_cycle(&self, anomaly_id: &str) -> MonitorResult<AnomalyCycle> {
        let result = self.correlation.load_anomaly_cycle(anomaly_id).await;
        self.observe(result).await
    }

    pub async fn load_parts(&self, page: u32, page_size: u32) -> MonitorResult<Page<Part>> {
        let result = self.correlation.load_parts(page, page_size).await;
        self.observe(result).await
    }

    pub async fn load_part_detail(&self, part_id: &str) -> MonitorResult<PartDetail> {
        let result = self.correlation.load_part_detail(part_id).await;
        self.observe(result).await
    }
}

async fn forget_rejected_credential(credentials: &CredentialStore, err: &MonitorError) {
    if err.is_unauthorized() {
        log_warn!("backend rejected the session credential; logging out");
        credentials.clear_credential().await;
    }
}
