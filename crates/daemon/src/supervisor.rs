//! Connection supervision for the document store.
//!
//! The [`Supervisor`] owns every piece of shared mutable state of the
//! service behind one coarse lock: the connection state and its retry
//! timer, the write buffer, the log-id counter and the task cache. The lock
//! is only ever held for short synchronous sections, never across `.await`.
//!
//! State machine:
//!
//! ```text
//! Disconnected --connect--> Connecting --ok--> Connected
//!      ^                        |                  |
//!      +-------failure----------+                  |
//!      +---------------error / close---------------+
//! ```
//!
//! Every transition back to `Disconnected` schedules one reconnect after
//! the configured delay; a second failure while a timer is pending does not
//! add another timer.

use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use actionlog_core::model::{LogId, ACTION_COLLECTION};
use actionlog_core::{ActionDraft, DocumentStore, OperationType, StoreError};
use futures::StreamExt;
use serde::Serialize;
use tokio::task::AbortHandle;
use tracing::{debug, error, info, warn};

use crate::buffer::WriteBuffer;
use crate::log_id::LogIdCounter;
use crate::task_cache::TaskCache;

/// Delay before a reconnect attempt.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_millis(5_000);

#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    pub retry_delay: Duration,
    /// Upper bound for a single store operation. `None` waits forever.
    pub store_timeout: Option<Duration>,
    /// Drop actions whose `taskId` does not name an existing task.
    pub filter_invalid_tasks: bool,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            retry_delay: DEFAULT_RETRY_DELAY,
            store_timeout: None,
            filter_invalid_tasks: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// Point-in-time view of the supervisor.
#[derive(Debug, Clone, Serialize)]
pub struct Status {
    pub state: ConnectionState,
    pub connected: bool,
    pub retry_pending: bool,
    pub buffered: usize,
    pub max_log_id: LogId,
    pub cached_tasks: usize,
}

/// Supervises the store connection and persists actions through it.
///
/// Cheap to clone; clones share the same state.
#[derive(Clone)]
pub struct Supervisor {
    inner: Arc<Inner>,
}

struct Inner {
    store: Arc<dyn DocumentStore>,
    config: SupervisorConfig,
    shared: Mutex<Shared>,
}

pub(crate) struct Shared {
    pub(crate) state: ConnectionState,
    /// Bumped on every successful connect.
    session: u64,
    retry_timer: Option<AbortHandle>,
    /// Close listener and change subscription of the current session.
    session_tasks: Vec<AbortHandle>,
    pub(crate) buffer: WriteBuffer,
    pub(crate) log_ids: LogIdCounter,
    /// Whether the counter was recovered on the current connection.
    pub(crate) recovered: bool,
    pub(crate) tasks: TaskCache,
}

impl Supervisor {
    /// Creates a disconnected supervisor. Nothing happens until [`connect`](Self::connect).
    pub fn new(store: Arc<dyn DocumentStore>, config: SupervisorConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                store,
                config,
                shared: Mutex::new(Shared {
                    state: ConnectionState::Disconnected,
                    session: 0,
                    retry_timer: None,
                    session_tasks: Vec::new(),
                    buffer: WriteBuffer::default(),
                    log_ids: LogIdCounter::default(),
                    recovered: false,
                    tasks: TaskCache::default(),
                }),
            }),
        }
    }

    pub(crate) fn shared(&self) -> MutexGuard<'_, Shared> {
        self.inner.shared.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn store(&self) -> &dyn DocumentStore {
        self.inner.store.as_ref()
    }

    pub(crate) fn config(&self) -> &SupervisorConfig {
        &self.inner.config
    }

    /// Whether the store connection is currently established.
    pub fn connection_ready(&self) -> bool {
        self.shared().state == ConnectionState::Connected
    }

    pub fn status(&self) -> Status {
        let shared = self.shared();
        Status {
            state: shared.state,
            connected: shared.state == ConnectionState::Connected,
            retry_pending: shared.retry_timer.is_some(),
            buffered: shared.buffer.len(),
            max_log_id: shared.log_ids.current(),
            cached_tasks: shared.tasks.len(),
        }
    }

    /// Drafts waiting in the write buffer, oldest first.
    pub fn buffered(&self) -> Vec<ActionDraft> {
        self.shared().buffer.snapshot()
    }

    /// Establishes the store connection.
    ///
    /// No-op while connected or while another attempt is in flight. Cancels a
    /// pending reconnect timer. On failure a reconnect is scheduled.
    pub async fn connect(&self) {
        {
            let mut shared = self.shared();
            if shared.state != ConnectionState::Disconnected {
                debug!(state = ?shared.state, "connect ignored");
                return;
            }
            shared.state = ConnectionState::Connecting;
            if let Some(timer) = shared.retry_timer.take() {
                timer.abort();
            }
        }

        info!("connecting to document store");
        let attempt = self.timed(self.store().connect()).await;
        match attempt {
            Ok(()) => self.on_connected().await,
            Err(e) => {
                self.shared().state = ConnectionState::Disconnected;
                error!(error = %e, "document store connection failed");
                self.schedule_retry();
            }
        }
    }

    /// Starts [`connect`](Self::connect) in the background.
    pub(crate) fn spawn_connect(&self) {
        let sup = self.clone();
        tokio::spawn(async move { sup.connect().await });
    }

    async fn on_connected(&self) {
        let session = {
            let mut shared = self.shared();
            shared.state = ConnectionState::Connected;
            shared.recovered = false;
            shared.session += 1;
            shared.session
        };
        info!(session, "document store connected");

        let listener = {
            let sup = self.clone();
            tokio::spawn(async move {
                let err = sup.store().closed().await;
                sup.on_connection_lost(session, err);
            })
        };
        self.track(session, listener.abort_handle());

        // Subscribe before recovering so a delete racing the recovery query
        // still triggers another recovery.
        self.subscribe_changes(session).await;
        self.recover_max_log_id().await;
    }

    async fn subscribe_changes(&self, session: u64) {
        let mut changes = match self.timed(self.store().watch()).await {
            Ok(changes) => changes,
            Err(e) => {
                warn!(error = %e, "change notification subscription failed");
                return;
            }
        };

        let sup = self.clone();
        let watcher = tokio::spawn(async move {
            while let Some(change) = changes.next().await {
                match change {
                    Ok(ev)
                        if ev.collection == ACTION_COLLECTION
                            && ev.operation == OperationType::Delete =>
                    {
                        debug!("action deleted, recomputing max log id");
                        sup.recover_max_log_id().await;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        warn!(error = %e, "change notification stream failed");
                        break;
                    }
                }
            }
            debug!(session, "change notification stream ended");
        });
        self.track(session, watcher.abort_handle());
    }

    /// Keeps `task` alive for as long as `session` is the live connection.
    fn track(&self, session: u64, task: AbortHandle) {
        let mut shared = self.shared();
        if shared.session == session && shared.state == ConnectionState::Connected {
            shared.session_tasks.push(task);
        } else {
            task.abort();
        }
    }

    fn on_connection_lost(&self, session: u64, err: StoreError) {
        {
            let mut shared = self.shared();
            if shared.session != session || shared.state != ConnectionState::Connected {
                return;
            }
            shared.state = ConnectionState::Disconnected;
            for task in shared.session_tasks.drain(..) {
                task.abort();
            }
        }
        error!(error = %err, session, "document store connection lost");
        self.schedule_retry();
    }

    fn schedule_retry(&self) {
        let mut shared = self.shared();
        if shared.retry_timer.is_some() {
            debug!("reconnect already scheduled");
            return;
        }

        let delay = self.config().retry_delay;
        let sup = self.clone();
        let timer = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            sup.shared().retry_timer = None;
            sup.connect().await;
        });
        shared.retry_timer = Some(timer.abort_handle());
        info!(delay_ms = delay.as_millis() as u64, "reconnect scheduled");
    }

    /// Applies the configured store timeout to `op`.
    pub(crate) async fn timed<T>(
        &self,
        op: impl Future<Output = Result<T, StoreError>>,
    ) -> Result<T, StoreError> {
        match self.config().store_timeout {
            Some(limit) => tokio::time::timeout(limit, op)
                .await
                .unwrap_or(Err(StoreError::Timeout(limit))),
            None => op.await,
        }
    }
}

#[cfg(test)]
mod tests {
    use actionlog_core::MemoryStore;

    use super::*;

    fn supervisor(store: &Arc<MemoryStore>) -> Supervisor {
        Supervisor::new(store.clone(), SupervisorConfig::default())
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn starts_disconnected() {
        let store = Arc::new(MemoryStore::new());
        let sup = supervisor(&store);
        assert!(!sup.connection_ready());
        assert_eq!(sup.status().state, ConnectionState::Disconnected);
        assert_eq!(store.connect_attempts(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn connect_is_idempotent_once_connected() {
        let store = Arc::new(MemoryStore::new());
        let sup = supervisor(&store);
        sup.connect().await;
        sup.connect().await;
        assert!(sup.connection_ready());
        assert_eq!(store.connect_attempts(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_connect_schedules_one_retry() {
        let store = Arc::new(MemoryStore::new());
        store.set_reachable(false);
        let sup = supervisor(&store);

        sup.connect().await;
        let status = sup.status();
        assert_eq!(status.state, ConnectionState::Disconnected);
        assert!(status.retry_pending);

        store.set_reachable(true);
        tokio::time::sleep(DEFAULT_RETRY_DELAY + Duration::from_millis(1)).await;
        assert!(sup.connection_ready());
        assert!(!sup.status().retry_pending);
        assert_eq!(store.connect_attempts(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn store_timeout_fails_hung_operations() {
        let store = Arc::new(MemoryStore::new());
        let sup = Supervisor::new(
            store,
            SupervisorConfig {
                store_timeout: Some(Duration::from_millis(50)),
                ..SupervisorConfig::default()
            },
        );
        let res: Result<(), StoreError> = sup.timed(std::future::pending()).await;
        assert_eq!(res, Err(StoreError::Timeout(Duration::from_millis(50))));
    }

    #[tokio::test(start_paused = true)]
    async fn lost_connection_returns_to_disconnected() {
        let store = Arc::new(MemoryStore::new());
        let sup = supervisor(&store);
        sup.connect().await;
        settle().await;

        store.drop_connection("socket closed");
        settle().await;
        let status = sup.status();
        assert_eq!(status.state, ConnectionState::Disconnected);
        assert!(status.retry_pending);
    }
}
