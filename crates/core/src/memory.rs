use std::collections::HashSet;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, watch};

use crate::model::{ActionRecord, LogId, ACTION_COLLECTION, TASK_COLLECTION};
use crate::store::{
    ActionFilter, ChangeEvent, ChangeStream, DocumentStore, OperationType, Sort, StoreError,
};

/// In-memory document store for tests and local runs. Not durable.
///
/// Faults can be injected to simulate outages: an unreachable server, a
/// dropped connection, failing writes for chosen tasks and failing queries.
pub struct MemoryStore {
    inner: Mutex<Inner>,
    link: watch::Sender<Link>,
}

#[derive(Default)]
struct Inner {
    unreachable: bool,
    connected: bool,
    fail_queries: bool,
    records: Vec<ActionRecord>,
    tasks: HashSet<String>,
    failing_creates: HashSet<String>,
    watchers: Vec<mpsc::UnboundedSender<Result<ChangeEvent, StoreError>>>,
    connect_attempts: usize,
    task_lookups: usize,
    query_delay: Duration,
    write_delay: Duration,
}

#[derive(Clone, Default)]
struct Link {
    connected: bool,
    reason: String,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        let (link, _) = watch::channel(Link::default());
        Self {
            inner: Mutex::new(Inner::default()),
            link,
        }
    }

    fn inner(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Makes subsequent `connect` calls fail (or succeed again).
    pub fn set_reachable(&self, reachable: bool) {
        self.inner().unreachable = !reachable;
    }

    /// Drops the live connection: `closed()` resolves and change streams end.
    pub fn drop_connection(&self, reason: &str) {
        tracing::debug!(reason, "memory store dropping connection");
        {
            let mut inner = self.inner();
            inner.connected = false;
            inner.watchers.clear();
        }
        self.link.send_replace(Link {
            connected: false,
            reason: reason.to_string(),
        });
    }

    /// Makes every query fail until reset.
    pub fn set_fail_queries(&self, fail: bool) {
        self.inner().fail_queries = fail;
    }

    /// Delays every `find` by `delay` before it reads the records.
    pub fn set_query_delay(&self, delay: Duration) {
        self.inner().query_delay = delay;
    }

    /// Delays every `create` by `delay` before the record lands.
    pub fn set_write_delay(&self, delay: Duration) {
        self.inner().write_delay = delay;
    }

    /// Makes `create` fail for records of `task_id`.
    pub fn fail_creates_for(&self, task_id: &str) {
        self.inner().failing_creates.insert(task_id.to_string());
    }

    pub fn clear_create_failures(&self) {
        self.inner().failing_creates.clear();
    }

    pub fn insert_task(&self, task_id: &str) {
        self.inner().tasks.insert(task_id.to_string());
    }

    /// Removes a task and notifies watchers.
    pub fn delete_task(&self, task_id: &str) {
        let mut inner = self.inner();
        inner.tasks.remove(task_id);
        inner.notify(TASK_COLLECTION, OperationType::Delete);
    }

    /// Seeds a record as if it had been written earlier. No notification.
    pub fn insert_record(&self, record: ActionRecord) {
        self.inner().records.push(record);
    }

    /// Removes the record with `log_id` and notifies watchers.
    pub fn delete_action(&self, log_id: LogId) {
        let mut inner = self.inner();
        inner.records.retain(|r| r.log_id != log_id);
        inner.notify(ACTION_COLLECTION, OperationType::Delete);
    }

    /// Every stored record, in insertion order.
    pub fn records(&self) -> Vec<ActionRecord> {
        self.inner().records.clone()
    }

    pub fn connect_attempts(&self) -> usize {
        self.inner().connect_attempts
    }

    pub fn task_lookups(&self) -> usize {
        self.inner().task_lookups
    }

    pub fn is_connected(&self) -> bool {
        self.inner().connected
    }
}

impl Inner {
    fn ensure_queryable(&self) -> Result<(), StoreError> {
        if !self.connected {
            return Err(StoreError::Unavailable("not connected".into()));
        }
        if self.fail_queries {
            return Err(StoreError::Query("injected query failure".into()));
        }
        Ok(())
    }

    fn notify(&mut self, collection: &str, operation: OperationType) {
        let event = ChangeEvent {
            collection: collection.to_string(),
            operation,
        };
        self.watchers.retain(|tx| tx.send(Ok(event.clone())).is_ok());
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn connect(&self) -> Result<(), StoreError> {
        {
            let mut inner = self.inner();
            inner.connect_attempts += 1;
            if inner.unreachable {
                tracing::debug!(attempt = inner.connect_attempts, "memory store refusing connection");
                return Err(StoreError::Unavailable("connection refused".into()));
            }
            inner.connected = true;
        }
        self.link.send_replace(Link {
            connected: true,
            reason: String::new(),
        });
        Ok(())
    }

    async fn closed(&self) -> StoreError {
        let mut rx = self.link.subscribe();
        let reason = match rx.wait_for(|link| !link.connected).await {
            Ok(link) => link.reason.clone(),
            Err(_) => "store dropped".to_string(),
        };
        StoreError::Closed(reason)
    }

    async fn find(
        &self,
        filter: &ActionFilter,
        sort: Sort,
        limit: usize,
    ) -> Result<Vec<ActionRecord>, StoreError> {
        let delay = self.inner().query_delay;
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        let inner = self.inner();
        inner.ensure_queryable()?;
        let mut hits: Vec<ActionRecord> = inner
            .records
            .iter()
            .filter(|r| filter.matches(r))
            .cloned()
            .collect();
        hits.sort_by(|a, b| sort.compare(a, b));
        hits.truncate(limit);
        Ok(hits)
    }

    async fn task_exists(&self, task_id: &str) -> Result<bool, StoreError> {
        let mut inner = self.inner();
        inner.task_lookups += 1;
        inner.ensure_queryable()?;
        Ok(inner.tasks.contains(task_id))
    }

    async fn create(&self, record: &ActionRecord) -> Result<ActionRecord, StoreError> {
        let delay = self.inner().write_delay;
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        let mut inner = self.inner();
        if !inner.connected {
            return Err(StoreError::Unavailable("not connected".into()));
        }
        if inner.failing_creates.contains(&record.task_id) {
            return Err(StoreError::Write("injected write failure".into()));
        }
        inner.records.push(record.clone());
        inner.notify(ACTION_COLLECTION, OperationType::Insert);
        Ok(record.clone())
    }

    async fn watch(&self) -> Result<ChangeStream, StoreError> {
        let mut inner = self.inner();
        if !inner.connected {
            return Err(StoreError::Unavailable("not connected".into()));
        }
        let (tx, rx) = mpsc::unbounded_channel();
        inner.watchers.push(tx);
        let stream = futures::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|event| (event, rx))
        });
        Ok(Box::pin(stream))
    }
}
