use std::sync::{Arc, Mutex as StdMutex};

use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::auth::CredentialStore;
use crate::error::{MonitorError, MonitorResult};

use super::reconnect::ReconnectPolicy;
use super::state::ConnectionState;
use super::transport::{StreamEvent, Transport};
use super::worker::{connection_loop, LastFailure, Listeners};

const ENABLE_LOGS: bool = true;

use crate::{log_error, log_info};

/// A view of the live channel handed out by [`ConnectionManager::get_connection`].
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    id: Uuid,
    state: watch::Receiver<ConnectionState>,
}

impl ConnectionHandle {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Resolves once the state satisfies `predicate`, or with `false` if the
    /// manager went away first.
    pub async fn wait_until(&mut self, predicate: impl Fn(ConnectionState) -> bool) -> bool {
        loop {
            if predicate(*self.state.borrow_and_update()) {
                return true;
            }
            if self.state.changed().await.is_err() {
                return false;
            }
        }
    }
}

#[derive(Default)]
struct WorkerSlot {
    handle: Option<JoinHandle<()>>,
    cancel_token: Option<CancellationToken>,
    connection_id: Option<Uuid>,
}

struct Inner {
    transport: Arc<dyn Transport>,
    credentials: CredentialStore,
    policy: ReconnectPolicy,
    slot: Mutex<WorkerSlot>,
    state_tx: Arc<watch::Sender<ConnectionState>>,
    listeners: Listeners,
    last_failure: LastFailure,
}

/// Owner of the single live channel. Clones share the same channel.
#[derive(Clone)]
pub struct ConnectionManager {
    inner: Arc<Inner>,
}

impl ConnectionManager {
    pub fn new(
        transport: Arc<dyn Transport>,
        credentials: CredentialStore,
        policy: ReconnectPolicy,
    ) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Unstarted);
        Self {
            inner: Arc::new(Inner {
                transport,
                credentials,
                policy,
                slot: Mutex::new(WorkerSlot::default()),
                state_tx: Arc::new(state_tx),
                listeners: Arc::new(StdMutex::new(Vec::new())),
                last_failure: Arc::new(StdMutex::new(None)),
            }),
        }
    }

    /// Opens the channel unless one was already started. Calls made while a
    /// worker exists, including one that gave up, leave it untouched.
    pub async fn start(&self) {
        let mut slot = self.inner.slot.lock().await;
        if slot.handle.is_some() {
            return;
        }

        let cancel_token = CancellationToken::new();
        let connection_id = Uuid::new_v4();
        self.clear_failure();
        self.inner.state_tx.send_replace(ConnectionState::Connecting);

        let handle = tokio::spawn(connection_loop(
            Arc::clone(&self.inner.transport),
            self.inner.credentials.clone(),
            self.inner.policy.clone(),
            Arc::clone(&self.inner.state_tx),
            Arc::clone(&self.inner.listeners),
            Arc::clone(&self.inner.last_failure),
            cancel_token.clone(),
        ));

        log_info!("live connection {connection_id} started");
        slot.handle = Some(handle);
        slot.cancel_token = Some(cancel_token);
        slot.connection_id = Some(connection_id);
    }

    pub async fn get_connection(&self) -> MonitorResult<ConnectionHandle> {
        let slot = self.inner.slot.lock().await;
        match slot.connection_id {
            Some(id) => Ok(ConnectionHandle {
                id,
                state: self.inner.state_tx.subscribe(),
            }),
            None => {
                log_error!("live connection requested before start()");
                Err(MonitorError::NotInitialized)
            }
        }
    }

    /// Cancels the worker, drops every listener and resets to Unstarted.
    pub async fn stop(&self) {
        let mut slot = self.inner.slot.lock().await;

        if let Some(token) = slot.cancel_token.take() {
            token.cancel();
        }
        if let Some(handle) = slot.handle.take() {
            if let Err(err) = handle.await {
                log_error!("connection worker failed to join: {err}");
            }
        }
        if let Some(id) = slot.connection_id.take() {
            log_info!("live connection {id} stopped");
        }

        self.inner
            .listeners
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .clear();
        self.clear_failure();
        self.inner.state_tx.send_replace(ConnectionState::Unstarted);
    }

    /// Registers a listener for every event delivered from now on.
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<StreamEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner
            .listeners
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push(tx);
        rx
    }

    pub fn state(&self) -> ConnectionState {
        *self.inner.state_tx.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state_tx.subscribe()
    }

    /// Why the worker last entered Errored. A worker that stopped on its own
    /// leaves its terminal failure here until the next `start()` or `stop()`.
    pub fn last_failure(&self) -> Option<MonitorError> {
        self.inner
            .last_failure
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
    }

    fn clear_failure(&self) {
        *self
            .inner
            .last_failure
            .lock()
            .unwrap_or_else(|p| p.into_inner()) = None;
    }

    /// True while a worker is connecting, connected or waiting to reconnect.
    pub async fn is_running(&self) -> bool {
        let slot = self.inner.slot.lock().await;
        slot.handle.as_ref().is_some_and(|handle| !handle.is_finished())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::MemoryCredentialStorage;
    use crate::stream::EventStream;
    use async_trait::async_trait;
    use futures::StreamExt;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    enum Outcome {
        Events(Vec<StreamEvent>),
        Fail(MonitorError),
    }

    #[derive(Default)]
    struct FakeTransport {
        opens: AtomicUsize,
        script: StdMutex<VecDeque<Outcome>>,
        credentials_seen: StdMutex<Vec<Option<String>>>,
    }

    impl FakeTransport {
        fn scripted(outcomes: Vec<Outcome>) -> Arc<Self> {
            Arc::new(Self {
                script: StdMutex::new(outcomes.into()),
                ..Self::default()
            })
        }

        fn opens(&self) -> usize {
            self.opens.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Transport for FakeTransport {
        fn name(&self) -> &'static str {
            "fake"
        }

        async fn open(&self, credential: Option<String>) -> MonitorResult<EventStream> {
            self.opens.fetch_add(1, Ordering::SeqCst);
            self.credentials_seen.lock().unwrap().push(credential);
            let next = self.script.lock().unwrap().pop_front();
            match next {
                Some(Outcome::Fail(err)) => Err(err),
                Some(Outcome::Events(events)) => Ok(futures::stream::iter(events.into_iter().map(Ok))
                    .chain(futures::stream::pending())
                    .boxed()),
                None => Err(MonitorError::Transport("connection refused".into())),
            }
        }
    }

    fn fast_policy(max_attempts: u32) -> ReconnectPolicy {
        ReconnectPolicy {
            max_attempts,
            initial_delay_ms: 5,
            max_delay_ms: 20,
            multiplier: 2.0,
            jitter: 0.0,
        }
    }

    fn manager(transport: Arc<FakeTransport>, policy: ReconnectPolicy) -> ConnectionManager {
        let storage = Arc::new(MemoryCredentialStorage::with_token("tok-1"));
        ConnectionManager::new(transport, CredentialStore::new(storage), policy)
    }

    async fn wait_for_state(manager: &ConnectionManager, target: ConnectionState) {
        let mut handle = manager.get_connection().await.unwrap();
        let reached = tokio::time::timeout(Duration::from_secs(2), handle.wait_until(|s| s == target))
            .await
            .unwrap();
        assert!(reached);
    }

    async fn wait_for_worker_exit(manager: &ConnectionManager) {
        tokio::time::timeout(Duration::from_secs(2), async {
            while manager.is_running().await {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn double_start_opens_once_and_delivers_once() {
        let transport = FakeTransport::scripted(vec![Outcome::Events(vec![StreamEvent::Ping])]);
        let manager = manager(transport.clone(), fast_policy(3));
        let mut events = manager.subscribe();

        manager.start().await;
        manager.start().await;
        wait_for_state(&manager, ConnectionState::Connected).await;

        assert_eq!(events.recv().await, Some(StreamEvent::Ping));
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(events.try_recv().is_err());
        assert_eq!(transport.opens(), 1);

        manager.stop().await;
    }

    #[tokio::test]
    async fn concurrent_starts_coalesce() {
        let transport = FakeTransport::scripted(vec![Outcome::Events(Vec::new())]);
        let manager = manager(transport.clone(), fast_policy(3));

        let (a, b) = (manager.clone(), manager.clone());
        tokio::join!(a.start(), b.start());
        wait_for_state(&manager, ConnectionState::Connected).await;

        assert_eq!(transport.opens(), 1);
        manager.stop().await;
    }

    #[tokio::test]
    async fn connection_is_not_initialized_outside_start_stop() {
        let manager = manager(FakeTransport::scripted(vec![Outcome::Events(Vec::new())]), fast_policy(1));
        assert!(matches!(
            manager.get_connection().await,
            Err(MonitorError::NotInitialized)
        ));

        manager.start().await;
        let first = manager.get_connection().await.unwrap();
        let again = manager.get_connection().await.unwrap();
        assert_eq!(first.id(), again.id());

        manager.stop().await;
        assert!(matches!(
            manager.get_connection().await,
            Err(MonitorError::NotInitialized)
        ));
    }

    #[tokio::test]
    async fn stop_without_start_is_safe() {
        let manager = manager(FakeTransport::scripted(Vec::new()), fast_policy(1));
        manager.stop().await;
        manager.stop().await;
        assert_eq!(manager.state(), ConnectionState::Unstarted);
    }

    #[tokio::test]
    async fn stop_tears_down_listeners() {
        let transport = FakeTransport::scripted(vec![Outcome::Events(Vec::new())]);
        let manager = manager(transport, fast_policy(1));
        let mut events = manager.subscribe();

        manager.start().await;
        wait_for_state(&manager, ConnectionState::Connected).await;
        manager.stop().await;

        assert_eq!(events.recv().await, None);
        assert_eq!(manager.state(), ConnectionState::Unstarted);
    }

    #[tokio::test]
    async fn credential_is_read_at_open_time() {
        let transport = FakeTransport::scripted(vec![Outcome::Events(Vec::new())]);
        let manager = manager(transport.clone(), fast_policy(1));

        manager.start().await;
        wait_for_state(&manager, ConnectionState::Connected).await;

        assert_eq!(
            *transport.credentials_seen.lock().unwrap(),
            vec![Some("tok-1".to_string())]
        );
        manager.stop().await;
    }

    #[tokio::test]
    async fn reconnects_after_transport_failure() {
        let transport = FakeTransport::scripted(vec![
            Outcome::Fail(MonitorError::Transport("reset".into())),
            Outcome::Events(vec![StreamEvent::Ping]),
        ]);
        let manager = manager(transport.clone(), fast_policy(3));
        let mut events = manager.subscribe();

        manager.start().await;
        assert_eq!(
            tokio::time::timeout(Duration::from_secs(2), events.recv()).await.unwrap(),
            Some(StreamEvent::Ping)
        );
        assert_eq!(manager.state(), ConnectionState::Connected);
        assert_eq!(transport.opens(), 2);

        manager.stop().await;
    }

    #[tokio::test]
    async fn gives_up_and_stays_errored() {
        let transport = FakeTransport::scripted(Vec::new());
        let manager = manager(transport.clone(), fast_policy(2));

        manager.start().await;
        wait_for_worker_exit(&manager).await;

        assert_eq!(transport.opens(), 3);
        assert_eq!(manager.state(), ConnectionState::Errored);

        // An exhausted worker still occupies the slot until stop().
        manager.start().await;
        assert_eq!(transport.opens(), 3);
    }

    #[tokio::test]
    async fn unauthorized_is_not_retried() {
        let transport = FakeTransport::scripted(vec![Outcome::Fail(MonitorError::Unauthorized)]);
        let manager = manager(transport.clone(), fast_policy(5));

        manager.start().await;
        wait_for_worker_exit(&manager).await;

        assert_eq!(transport.opens(), 1);
        assert_eq!(manager.state(), ConnectionState::Errored);
        assert!(manager.last_failure().is_some_and(|err| err.is_unauthorized()));
    }

    #[tokio::test]
    async fn errored_watchers_see_the_failure() {
        let transport = FakeTransport::scripted(vec![
            Outcome::Fail(MonitorError::Transport("reset".into())),
            Outcome::Events(Vec::new()),
        ]);
        let policy = ReconnectPolicy {
            initial_delay_ms: 200,
            max_delay_ms: 200,
            ..fast_policy(3)
        };
        let manager = manager(transport, policy);
        let mut state = manager.watch_state();

        manager.start().await;
        tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                state.changed().await.unwrap();
                if *state.borrow_and_update() == ConnectionState::Errored {
                    break;
                }
            }
        })
        .await
        .unwrap();
        assert!(matches!(
            manager.last_failure(),
            Some(MonitorError::Transport(_))
        ));

        wait_for_state(&manager, ConnectionState::Connected).await;
        assert!(manager.last_failure().is_none());

        manager.stop().await;
        assert!(manager.last_failure().is_none());
    }

    #[tokio::test]
    async fn restart_after_stop_opens_a_new_connection() {
        let transport = FakeTransport::scripted(vec![
            Outcome::Fail(MonitorError::Unauthorized),
            Outcome::Events(Vec::new()),
        ]);
        let manager = manager(transport.clone(), fast_policy(1));

        manager.start().await;
        wait_for_worker_exit(&manager).await;
        manager.stop().await;

        manager.start().await;
        wait_for_state(&manager, ConnectionState::Connected).await;
        assert_eq!(transport.opens(), 2);

        manager.stop().await;
    }
}
