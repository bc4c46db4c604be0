use std::sync::{Arc, Mutex};

use futures::StreamExt;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;

use crate::auth::CredentialStore;
use crate::error::MonitorError;

use super::reconnect::ReconnectPolicy;
use super::state::ConnectionState;
use super::transport::{StreamEvent, Transport};

// Set to true to enable verbose logging in this module
const ENABLE_LOGS: bool = true;

use crate::{log_error, log_info, log_warn};

pub(super) type Listeners = Arc<Mutex<Vec<mpsc::UnboundedSender<StreamEvent>>>>;

/// Most recent failure of the current worker; cleared on every Connected.
pub(super) type LastFailure = Arc<Mutex<Option<MonitorError>>>;

fn record_failure(last_failure: &LastFailure, failure: Option<MonitorError>) {
    *last_failure.lock().unwrap_or_else(|p| p.into_inner()) = failure;
}

pub(super) fn deliver(listeners: &Listeners, event: StreamEvent) {
    let mut senders = listeners.lock().unwrap_or_else(|p| p.into_inner());
    senders.retain(|tx| tx.send(event.clone()).is_ok());
}

pub(super) async fn connection_loop(
    transport: Arc<dyn Transport>,
    credentials: CredentialStore,
    policy: ReconnectPolicy,
    state_tx: Arc<watch::Sender<ConnectionState>>,
    listeners: Listeners,
    last_failure: LastFailure,
    cancel_token: CancellationToken,
) {
    let mut attempt: u32 = 0;

    'session: loop {
        state_tx.send_replace(ConnectionState::Connecting);
        let credential = credentials.get_credential().await;

        let opened = tokio::select! {
            result = transport.open(credential) => result,
            _ = cancel_token.cancelled() => break 'session,
        };

        let failure = match opened {
            Ok(mut stream) => {
                attempt = 0;
                record_failure(&last_failure, None);
                state_tx.send_replace(ConnectionState::Connected);
                log_info!("live stream connected via {}", transport.name());

                loop {
                    tokio::select! {
                        item = stream.next() => match item {
                            Some(Ok(event)) => deliver(&listeners, event),
                            Some(Err(err)) => break err,
                            None => break MonitorError::Transport("stream closed by server".to_string()),
                        },
                        _ = cancel_token.cancelled() => break 'session,
                    }
                }
            }
            Err(err) => err,
        };

        // Must precede the Errored transition.
        record_failure(&last_failure, Some(failure.clone()));
        state_tx.send_replace(ConnectionState::Errored);
        log_error!("live stream failed: {failure}");

        if failure.is_unauthorized() {
            log_warn!("live stream rejected the credential; not reconnecting");
            break;
        }

        attempt += 1;
        let Some(delay) = policy.delay_for(attempt) else {
            log_error!("giving up on live stream after {} failed attempt(s)", attempt);
            break;
        };
        log_info!("reconnecting in {}ms (attempt {attempt})", delay.as_millis());

        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = cancel_token.cancelled() => break,
        }
    }

    log_info!("connection loop shutting down");
}
