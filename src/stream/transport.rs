use std::{collections::VecDeque, sync::Arc, time::Duration};

use async_trait::async_trait;
use futures::{stream::BoxStream, StreamExt};
use reqwest::{header, Client, StatusCode};
use tokio::time::{self, MissedTickBehavior};

use crate::error::{MonitorError, MonitorResult};
use crate::settings::{Profile, TransportKind};
use crate::telemetry::{MachineLive, TelemetryEvent};

use super::sse::{SseDecoder, SseFrame};

const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_warn};

/// Decoded server push.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    Telemetry(TelemetryEvent),
    MachinesLive(Vec<MachineLive>),
    Ping,
}

/// An open channel. An `Err` item or the end of the stream means the channel
/// is gone and must be re-opened.
pub type EventStream = BoxStream<'static, MonitorResult<StreamEvent>>;

#[async_trait]
pub trait Transport: Send + Sync {
    fn name(&self) -> &'static str;

    /// Opens the channel. Returning `Ok` is the backend's acknowledgment.
    async fn open(&self, credential: Option<String>) -> MonitorResult<EventStream>;
}

fn decode_frame(frame: &SseFrame) -> Option<StreamEvent> {
    let decoded = match frame.event.as_str() {
        "plc_event" => serde_json::from_str::<TelemetryEvent>(&frame.data).map(StreamEvent::Telemetry),
        "machines_live" => {
            serde_json::from_str::<Vec<MachineLive>>(&frame.data).map(StreamEvent::MachinesLive)
        }
        "ping" => return Some(StreamEvent::Ping),
        other => {
            log_debug!("Ignoring stream event '{other}'");
            return None;
        }
    };

    match decoded {
        Ok(event) => Some(event),
        Err(err) => {
            log_warn!("Dropping malformed '{}' frame: {err}", frame.event);
            None
        }
    }
}

fn status_error(status: StatusCode, endpoint: &str) -> MonitorError {
    if status == StatusCode::UNAUTHORIZED {
        MonitorError::Unauthorized
    } else {
        MonitorError::Transport(format!("{endpoint} answered {status}"))
    }
}

/// Primary transport: one long-lived `text/event-stream` response.
pub struct SseTransport {
    http: Client,
    url: String,
    /// Bound on waiting for the response head.
    open_timeout: Duration,
    /// Longest silence tolerated once the stream is flowing.
    idle_timeout: Duration,
}

impl SseTransport {
    pub fn new(http: Client, url: String, open_timeout: Duration, idle_timeout: Duration) -> Self {
        Self {
            http,
            url,
            open_timeout,
            idle_timeout,
        }
    }
}

#[async_trait]
impl Transport for SseTransport {
    fn name(&self) -> &'static str {
        "sse"
    }

    async fn open(&self, credential: Option<String>) -> MonitorResult<EventStream> {
        let mut request = self
            .http
            .get(&self.url)
            .header(header::ACCEPT, "text/event-stream");
        if let Some(token) = credential {
            request = request.bearer_auth(token);
        }

        let response = time::timeout(self.open_timeout, request.send())
            .await
            .map_err(|_| {
                MonitorError::Transport(format!(
                    "{} did not answer within {}ms",
                    self.url,
                    self.open_timeout.as_millis()
                ))
            })?
            .map_err(|err| MonitorError::Transport(err.to_string()))?;
        if !response.status().is_success() {
            return Err(status_error(response.status(), &self.url));
        }

        let is_event_stream = response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(|value| value.starts_with("text/event-stream"))
            .unwrap_or(false);
        if !is_event_stream {
            return Err(MonitorError::Transport(format!(
                "{} did not answer with an event stream",
                self.url
            )));
        }

        let body = response.bytes_stream().boxed();
        let idle_timeout = self.idle_timeout;
        let stream = futures::stream::unfold(
            (body, SseDecoder::new(), VecDeque::new()),
            move |(mut body, mut decoder, mut pending)| async move {
                loop {
                    if let Some(event) = pending.pop_front() {
                        return Some((Ok(event), (body, decoder, pending)));
                    }
                    let failure = match time::timeout(idle_timeout, body.next()).await {
                        Ok(Some(Ok(chunk))) => match decoder.push(&chunk) {
                            Ok(frames) => {
                                pending.extend(frames.iter().filter_map(decode_frame));
                                continue;
                            }
                            Err(err) => err,
                        },
                        Ok(Some(Err(err))) => MonitorError::Transport(err.to_string()),
                        Ok(None) => return None,
                        Err(_) => MonitorError::Transport(format!(
                            "event stream silent for {}ms",
                            idle_timeout.as_millis()
                        )),
                    };
                    return Some((Err(failure), (body, decoder, pending)));
                }
            },
        );

        Ok(stream.boxed())
    }
}

/// Fallback transport: repeated requests against the live machine board.
pub struct PollingTransport {
    http: Client,
    url: String,
    interval: Duration,
    request_timeout: Duration,
}

impl PollingTransport {
    pub fn new(http: Client, url: String, interval: Duration, request_timeout: Duration) -> Self {
        Self {
            http,
            url,
            interval,
            request_timeout,
        }
    }
}

async fn fetch_live(
    http: &Client,
    url: &str,
    credential: Option<&str>,
    request_timeout: Duration,
) -> MonitorResult<Vec<MachineLive>> {
    let mut request = http.get(url).timeout(request_timeout);
    if let Some(token) = credential {
        request = request.bearer_auth(token);
    }
    let response = request
        .send()
        .await
        .map_err(|err| MonitorError::Transport(err.to_string()))?;
    if !response.status().is_success() {
        return Err(status_error(response.status(), url));
    }
    response
        .json::<Vec<MachineLive>>()
        .await
        .map_err(|err| MonitorError::Decode(err.to_string()))
}

#[async_trait]
impl Transport for PollingTransport {
    fn name(&self) -> &'static str {
        "polling"
    }

    async fn open(&self, credential: Option<String>) -> MonitorResult<EventStream> {
        let first = fetch_live(&self.http, &self.url, credential.as_deref(), self.request_timeout).await?;

        let mut ticker = time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let http = self.http.clone();
        let url = self.url.clone();
        let request_timeout = self.request_timeout;

        let stream = futures::stream::unfold(
            (Some(first), ticker),
            move |(first, mut ticker)| {
                let http = http.clone();
                let url = url.clone();
                let credential = credential.clone();
                async move {
                    if let Some(rows) = first {
                        // The interval's first tick completes immediately.
                        ticker.tick().await;
                        return Some((Ok(StreamEvent::MachinesLive(rows)), (None, ticker)));
                    }
                    ticker.tick().await;
                    let item = fetch_live(&http, &url, credential.as_deref(), request_timeout)
                        .await
                        .map(StreamEvent::MachinesLive);
                    Some((item, (None, ticker)))
                }
            },
        );

        Ok(stream.boxed())
    }
}

/// Tries each transport in preference order. A 401 is final; any other
/// failure moves on to the next candidate.
pub struct NegotiatedTransport {
    candidates: Vec<Arc<dyn Transport>>,
}

impl NegotiatedTransport {
    pub fn new(candidates: Vec<Arc<dyn Transport>>) -> Self {
        Self { candidates }
    }

    pub fn from_profile(profile: &Profile) -> MonitorResult<Self> {
        // No overall timeout: the SSE response lives as long as the session.
        // Each transport bounds its own waits.
        let http = Client::builder()
            .connect_timeout(profile.request_timeout())
            .build()
            .map_err(|err| MonitorError::Transport(format!("failed to build HTTP client: {err}")))?;

        let candidates = profile
            .transports
            .iter()
            .map(|kind| -> Arc<dyn Transport> {
                match kind {
                    TransportKind::Sse => Arc::new(SseTransport::new(
                        http.clone(),
                        profile.stream_url(),
                        profile.request_timeout(),
                        profile.stream_idle_timeout(),
                    )),
                    TransportKind::Polling => Arc::new(PollingTransport::new(
                        http.clone(),
                        profile.live_url(),
                        profile.poll_interval(),
                        profile.request_timeout(),
                    )),
                }
            })
            .collect();

        Ok(Self::new(candidates))
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.candidates.iter().map(|t| t.name()).collect()
    }
}

#[async_trait]
impl Transport for NegotiatedTransport {
    fn name(&self) -> &'static str {
        "negotiated"
    }

    async fn open(&self, credential: Option<String>) -> MonitorResult<EventStream> {
        let mut last_error =
            MonitorError::Transport("no transport configured".to_string());

        for candidate in &self.candidates {
            match candidate.open(credential.clone()).await {
                Ok(stream) => {
                    log_debug!("Live stream opened over {}", candidate.name());
                    return Ok(stream);
                }
                Err(MonitorError::Unauthorized) => return Err(MonitorError::Unauthorized),
                Err(err) => {
                    log_warn!("Transport {} unavailable: {err}", candidate.name());
                    last_error = err;
                }
            }
        }

        Err(last_error)
    }
}
