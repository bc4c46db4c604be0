//! Wire and view types for machines, parts, steps, cycles and anomalies.
//!
//! The two backends disagree on casing (snake_case vs camelCase), on id
//! types (integer vs string) and on timestamp formats, so the deserializers
//! here are deliberately lenient and the in-memory types are not.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One `plc_event` frame: the latest telemetry reported by a machine.
/// Absent (or null) fields leave the snapshot's previous value untouched.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct TelemetryEvent {
    pub machine: String,
    #[serde(default, with = "flexible_ts::option")]
    pub ts: Option<DateTime<Utc>>,
    #[serde(default)]
    pub part_id: Option<String>,
    #[serde(default)]
    pub level: Option<String>,
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub cycle: Option<i64>,
    #[serde(default)]
    pub step_id: Option<String>,
    #[serde(default)]
    pub step_name: Option<String>,
    #[serde(default)]
    pub duration: Option<f64>,
    #[serde(default)]
    pub payload: Option<serde_json::Value>,
}

/// A row of the live machine board as served by `/api/machines/live`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct MachineLive {
    pub machine: String,
    #[serde(default)]
    pub machine_name: Option<String>,
    #[serde(default)]
    pub nominal_duration_s: Option<f64>,
    #[serde(default, with = "flexible_ts::option")]
    pub last_ts: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_part_id: Option<String>,
    #[serde(default)]
    pub last_level: Option<String>,
    #[serde(default)]
    pub last_code: Option<String>,
    #[serde(default)]
    pub last_message: Option<String>,
    #[serde(default)]
    pub last_cycle: Option<i64>,
    #[serde(default)]
    pub last_step_id: Option<String>,
    #[serde(default)]
    pub last_step_name: Option<String>,
    #[serde(default)]
    pub last_duration: Option<f64>,
    #[serde(default)]
    pub last_payload: Option<serde_json::Value>,
}

impl MachineLive {
    pub fn to_event(&self) -> TelemetryEvent {
        TelemetryEvent {
            machine: self.machine.clone(),
            ts: self.last_ts,
            part_id: self.last_part_id.clone(),
            level: self.last_level.clone(),
            code: self.last_code.clone(),
            message: self.last_message.clone(),
            cycle: self.last_cycle,
            step_id: self.last_step_id.clone(),
            step_name: self.last_step_name.clone(),
            duration: self.last_duration,
            payload: self.last_payload.clone(),
        }
    }
}

/// Last known state of one machine.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct MachineSnapshot {
    pub machine: String,
    pub machine_name: String,
    pub nominal_duration_s: Option<f64>,
    pub last_ts: Option<DateTime<Utc>>,
    pub last_part_id: Option<String>,
    pub last_level: Option<String>,
    pub last_code: Option<String>,
    pub last_message: Option<String>,
    pub last_cycle: Option<i64>,
    pub last_step_id: Option<String>,
    pub last_step_name: Option<String>,
    pub last_duration: Option<f64>,
    pub last_payload: Option<serde_json::Value>,
}

impl MachineSnapshot {
    /// Until the live board names it, a machine is displayed by its id.
    pub fn new(machine: &str) -> Self {
        Self {
            machine: machine.to_string(),
            machine_name: machine.to_string(),
            nominal_duration_s: None,
            last_ts: None,
            last_part_id: None,
            last_level: None,
            last_code: None,
            last_message: None,
            last_cycle: None,
            last_step_id: None,
            last_step_name: None,
            last_duration: None,
            last_payload: None,
        }
    }

    pub fn merge_event(&mut self, event: &TelemetryEvent) {
        fn overwrite<T: Clone>(slot: &mut Option<T>, value: &Option<T>) {
            if let Some(value) = value {
                *slot = Some(value.clone());
            }
        }

        overwrite(&mut self.last_ts, &event.ts);
        overwrite(&mut self.last_part_id, &event.part_id);
        overwrite(&mut self.last_level, &event.level);
        overwrite(&mut self.last_code, &event.code);
        overwrite(&mut self.last_message, &event.message);
        overwrite(&mut self.last_cycle, &event.cycle);
        overwrite(&mut self.last_step_id, &event.step_id);
        overwrite(&mut self.last_step_name, &event.step_name);
        overwrite(&mut self.last_duration, &event.duration);
        overwrite(&mut self.last_payload, &event.payload);
    }

    pub fn is_error(&self) -> bool {
        self.last_level.as_deref() == Some("ERROR")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum PartStatus {
    InProgress,
    Finished,
    Rejected,
    Scrapped,
    Other(String),
}

impl PartStatus {
    pub fn as_str(&self) -> &str {
        match self {
            PartStatus::InProgress => "IN_PROGRESS",
            PartStatus::Finished => "FINISHED",
            PartStatus::Rejected => "REJECTED",
            PartStatus::Scrapped => "SCRAPPED",
            PartStatus::Other(raw) => raw,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            PartStatus::Finished | PartStatus::Rejected | PartStatus::Scrapped
        )
    }
}

impl From<String> for PartStatus {
    fn from(value: String) -> Self {
        match value.to_ascii_uppercase().as_str() {
            "IN_PROGRESS" => PartStatus::InProgress,
            "FINISHED" => PartStatus::Finished,
            "REJECTED" => PartStatus::Rejected,
            "SCRAPPED" => PartStatus::Scrapped,
            _ => PartStatus::Other(value),
        }
    }
}

impl From<PartStatus> for String {
    fn from(value: PartStatus) -> Self {
        value.as_str().to_string()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Part {
    #[serde(alias = "partId", alias = "externalPartId")]
    pub part_id: String,
    pub status: PartStatus,
    #[serde(default, alias = "createdAt", with = "flexible_ts::option")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, alias = "finishedAt", with = "flexible_ts::option")]
    pub finished_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PartStep {
    #[serde(default, alias = "partId")]
    pub part_id: String,
    pub machine: String,
    #[serde(default, alias = "stepId")]
    pub step_id: String,
    #[serde(default, alias = "stepName")]
    pub step_name: String,
    pub cycle: i64,
    #[serde(default, alias = "startTime", with = "flexible_ts::option")]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(default, alias = "endTime", with = "flexible_ts::option")]
    pub end_time: Option<DateTime<Utc>>,
    #[serde(alias = "realDurationS", alias = "real_cycle_time_s")]
    pub real_duration_s: f64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CycleStatus {
    OnTime,
    Over,
    Under,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PartMachineCycle {
    pub machine: String,
    pub cycle: i64,
    #[serde(alias = "realCycleTimeS")]
    pub real_cycle_time_s: f64,
    #[serde(alias = "nominalDurationS")]
    pub nominal_duration_s: f64,
    #[serde(alias = "deltaS")]
    pub delta_s: f64,
    pub status: CycleStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PartDetail {
    pub part_id: String,
    #[serde(default)]
    pub machines: Vec<PartMachineCycle>,
    #[serde(default)]
    pub steps: Vec<PartStep>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Anomaly {
    #[serde(deserialize_with = "lenient::string_or_number")]
    pub id: String,
    #[serde(default, alias = "partId")]
    pub part_id: Option<String>,
    #[serde(default, alias = "machineCode")]
    pub machine: Option<String>,
    #[serde(default, alias = "stepId")]
    pub step_id: Option<String>,
    #[serde(default, alias = "stepName")]
    pub step_name: Option<String>,
    #[serde(default)]
    pub cycle: Option<i64>,
    #[serde(default, alias = "anomalyScore")]
    pub anomaly_score: Option<f64>,
    #[serde(default, alias = "ruleAnomaly")]
    pub rule_anomaly: Option<bool>,
    #[serde(
        default,
        alias = "ruleReasons",
        deserialize_with = "lenient::string_list"
    )]
    pub rule_reasons: Vec<String>,
    #[serde(default, alias = "hasStepError")]
    pub has_step_error: Option<bool>,
    #[serde(default, alias = "nStepErrors")]
    pub n_step_errors: Option<i64>,
    #[serde(default, alias = "cycleDurationS")]
    pub cycle_duration_s: Option<f64>,
    #[serde(default, alias = "durationOverrunS")]
    pub duration_overrun_s: Option<f64>,
    #[serde(default)]
    pub severity: Option<String>,
    #[serde(default, alias = "tsDetected", with = "flexible_ts::option")]
    pub ts_detected: Option<DateTime<Utc>>,
}

/// An anomaly with the steps of its cycle and the derived cycle record.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AnomalyCycle {
    pub anomaly: Anomaly,
    #[serde(default)]
    pub steps: Vec<PartStep>,
    #[serde(default)]
    pub cycle: Option<PartMachineCycle>,
}

/// One page of a listing. A bare JSON array decodes as a single page
/// holding every item.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: u64,
    pub page: u32,
    pub page_size: u32,
}

#[derive(Deserialize)]
struct PageEnvelope<T> {
    items: Vec<T>,
    #[serde(default)]
    total: u64,
    #[serde(default)]
    page: u32,
    #[serde(default, alias = "pageSize")]
    page_size: u32,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum PageShape<T> {
    Envelope(PageEnvelope<T>),
    Bare(Vec<T>),
}

impl<'de, T: Deserialize<'de>> Deserialize<'de> for Page<T> {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Ok(match PageShape::deserialize(deserializer)? {
            PageShape::Envelope(envelope) => Page {
                items: envelope.items,
                total: envelope.total,
                page: envelope.page,
                page_size: envelope.page_size,
            },
            PageShape::Bare(items) => Page {
                total: items.len() as u64,
                page: 1,
                page_size: u32::try_from(items.len()).unwrap_or(u32::MAX),
                items,
            },
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LoginResponse {
    pub access_token: String,
    #[serde(default)]
    pub token_type: Option<String>,
}

/// Timestamps arrive as RFC 3339, as naive ISO-8601 (treated as UTC) or as
/// RFC 2822 from Flask's JSON encoder.
pub(crate) mod flexible_ts {
    use chrono::{DateTime, NaiveDateTime, Utc};

    pub fn parse(raw: &str) -> Option<DateTime<Utc>> {
        let raw = raw.trim();
        if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
            return Some(dt.with_timezone(&Utc));
        }
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f") {
            return Some(naive.and_utc());
        }
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S%.f") {
            return Some(naive.and_utc());
        }
        DateTime::parse_from_rfc2822(raw)
            .ok()
            .map(|dt| dt.with_timezone(&Utc))
    }

    pub mod option {
        use chrono::{DateTime, Utc};
        use serde::{de::Error, Deserialize, Deserializer, Serializer};

        pub fn serialize<S>(value: &Option<DateTime<Utc>>, serializer: S) -> Result<S::Ok, S::Error>
        where
            S: Serializer,
        {
            match value {
                Some(dt) => serializer.serialize_some(&dt.to_rfc3339()),
                None => serializer.serialize_none(),
            }
        }

        pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
        where
            D: Deserializer<'de>,
        {
            let raw: Option<String> = Option::deserialize(deserializer)?;
            match raw {
                None => Ok(None),
                Some(raw) if raw.trim().is_empty() => Ok(None),
                Some(raw) => super::parse(&raw)
                    .map(Some)
                    .ok_or_else(|| D::Error::custom(format!("unrecognised timestamp '{raw}'"))),
            }
        }
    }
}

mod lenient {
    use serde::{de::Error, Deserialize, Deserializer};
    use serde_json::Value;

    pub fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
    where
        D: Deserializer<'de>,
    {
        match Value::deserialize(deserializer)? {
            Value::String(s) => Ok(s),
            Value::Number(n) => Ok(n.to_string()),
            other => Err(D::Error::custom(format!("expected id, got {other}"))),
        }
    }

    /// Accepts a JSON list, a JSON-encoded list inside a string, or null.
    pub fn string_list<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
    where
        D: Deserializer<'de>,
    {
        fn collect(values: Vec<Value>) -> Vec<String> {
            values
                .into_iter()
                .map(|value| match value {
                    Value::String(s) => s,
                    other => other.to_string(),
                })
                .collect()
        }

        match Value::deserialize(deserializer)? {
            Value::Null => Ok(Vec::new()),
            Value::Array(values) => Ok(collect(values)),
            Value::String(encoded) => match serde_json::from_str::<Value>(&encoded) {
                Ok(Value::Array(values)) => Ok(collect(values)),
                _ if encoded.is_empty() => Ok(Vec::new()),
                _ => Ok(vec![encoded]),
            },
            other => Err(D::Error::custom(format!("expected list, got {other}"))),
        }
    }
}
