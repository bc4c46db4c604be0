use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, fs, path::PathBuf, sync::RwLock, time::Duration};

use crate::stream::ReconnectPolicy;

pub const PROFILE_ENV: &str = "FLOORLINK_PROFILE";
pub const API_BASE_ENV: &str = "FLOORLINK_API_BASE";

const MIN_POLL_INTERVAL_MS: u64 = 100;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    /// Persistent server-sent event stream.
    Sse,
    /// Request-based polling of the live machine board.
    Polling,
}

/// One deployment's endpoints and client policies.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Profile {
    pub monitoring_base: String,
    /// Analytics/chat backend. Carried for the views that talk to it; the core
    /// never calls it.
    pub analytics_base: String,
    pub stream_path: String,
    pub live_path: String,
    pub poll_interval_ms: u64,
    pub transports: Vec<TransportKind>,
    pub request_timeout_ms: u64,
    /// Silence allowed on an open event stream before it counts as dead.
    pub stream_idle_timeout_ms: u64,
    pub reconnect: ReconnectPolicy,
    pub cycle_tolerance_s: f64,
}

impl Default for Profile {
    fn default() -> Self {
        Self {
            monitoring_base: "http://localhost:5000".into(),
            analytics_base: "http://localhost:5000".into(),
            stream_path: "/api/plc/stream".into(),
            live_path: "/api/machines/live".into(),
            poll_interval_ms: 500,
            transports: vec![TransportKind::Sse, TransportKind::Polling],
            request_timeout_ms: 10_000,
            stream_idle_timeout_ms: 5_000,
            reconnect: ReconnectPolicy::default(),
            cycle_tolerance_s: 1.0,
        }
    }
}

impl Profile {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(MIN_POLL_INTERVAL_MS))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn stream_idle_timeout(&self) -> Duration {
        Duration::from_millis(self.stream_idle_timeout_ms)
    }

    pub fn stream_url(&self) -> String {
        join_url(&self.monitoring_base, &self.stream_path)
    }

    pub fn live_url(&self) -> String {
        join_url(&self.monitoring_base, &self.live_path)
    }
}

pub fn join_url(base: &str, path: &str) -> String {
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
struct ClientSettings {
    active_profile: String,
    profiles: BTreeMap<String, Profile>,
}

impl Default for ClientSettings {
    fn default() -> Self {
        let mut profiles = BTreeMap::new();
        profiles.insert("flask".to_string(), Profile::default());
        profiles.insert(
            "spring".to_string(),
            Profile {
                monitoring_base: "http://localhost:8080".into(),
                analytics_base: "http://localhost:5000".into(),
                ..Profile::default()
            },
        );

        Self {
            active_profile: "flask".into(),
            profiles,
        }
    }
}

pub struct SettingsStore {
    path: Option<PathBuf>,
    data: RwLock<ClientSettings>,
}

impl SettingsStore {
    pub fn new(path: PathBuf) -> Result<Self> {
        let data = if path.exists() {
            let contents = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read settings from {}", path.display()))?;
            match serde_json::from_str(&contents) {
                Ok(data) => data,
                Err(err) => {
                    log::warn!(
                        "Ignoring malformed settings at {}: {err}",
                        path.display()
                    );
                    ClientSettings::default()
                }
            }
        } else {
            ClientSettings::default()
        };

        Ok(Self {
            path: Some(path),
            data: RwLock::new(data),
        })
    }

    /// Settings that live only in memory; `persist` is a no-op.
    pub fn in_memory() -> Self {
        Self {
            path: None,
            data: RwLock::new(ClientSettings::default()),
        }
    }

    pub fn profile_names(&self) -> Vec<String> {
        let guard = self.data.read().unwrap_or_else(|p| p.into_inner());
        guard.profiles.keys().cloned().collect()
    }

    /// Resolves the active profile, honouring `FLOORLINK_PROFILE` and
    /// `FLOORLINK_API_BASE` over the persisted choice.
    pub fn active_profile(&self) -> Result<Profile> {
        let profile_override = std::env::var(PROFILE_ENV).ok();
        let base_override = std::env::var(API_BASE_ENV).ok();
        self.resolve_profile(profile_override.as_deref(), base_override.as_deref())
    }

    pub fn resolve_profile(
        &self,
        profile_override: Option<&str>,
        base_override: Option<&str>,
    ) -> Result<Profile> {
        let guard = self.data.read().unwrap_or_else(|p| p.into_inner());
        let name = profile_override
            .filter(|name| !name.trim().is_empty())
            .unwrap_or(guard.active_profile.as_str());

        let mut profile = guard
            .profiles
            .get(name)
            .cloned()
            .ok_or_else(|| anyhow!("unknown profile '{name}'"))?;

        if let Some(base) = base_override.filter(|base| !base.trim().is_empty()) {
            profile.monitoring_base = base.trim().to_string();
        }

        Ok(profile)
    }

    pub fn set_active_profile(&self, name: &str) -> Result<()> {
        let mut guard = self.data.write().unwrap_or_else(|p| p.into_inner());
        if !guard.profiles.contains_key(name) {
            return Err(anyhow!("unknown profile '{name}'"));
        }
        guard.active_profile = name.to_string();
        self.persist(&guard)
    }

    pub fn upsert_profile(&self, name: &str, profile: Profile) -> Result<()> {
        let mut guard = self.data.write().unwrap_or_else(|p| p.into_inner());
        guard.profiles.insert(name.to_string(), profile);
        self.persist(&guard)
    }

    fn persist(&self, data: &ClientSettings) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let serialized = serde_json::to_string_pretty(data)?;
        fs::write(path, serialized)
            .with_context(|| format!("Failed to write settings to {}", path.display()))
    }
}
