use std::sync::{PoisonError, RwLock};
use std::time::Duration;

use actionlog_core::model::{ACTION_COLLECTION, TASK_COLLECTION};
use actionlog_core::{
    ActionFilter, ActionRecord, ChangeEvent, ChangeStream, DocumentStore, OperationType, Sort,
    StoreError,
};
use async_trait::async_trait;
use futures::StreamExt;
use serde::de::IgnoredAny;
use serde::Deserialize;
use surrealdb::engine::any::{self, Any};
use surrealdb::{Action, Notification, Surreal};

/// [`DocumentStore`] backed by SurrealDB.
///
/// The endpoint scheme selects the engine: `ws://` / `wss://` for a remote
/// server, `mem://` or `surrealkv://<dir>` for an embedded one.
pub struct SurrealStore {
    url: String,
    ns: String,
    db: String,
    health_interval: Duration,
    conn: RwLock<Option<Surreal<Any>>>,
}

#[derive(Deserialize)]
struct TaskCount {
    total: i64,
}

impl SurrealStore {
    pub fn new(url: &str, ns: &str, db: &str, health_interval: Duration) -> Self {
        Self {
            url: url.to_string(),
            ns: ns.to_string(),
            db: db.to_string(),
            health_interval,
            conn: RwLock::new(None),
        }
    }

    fn handle(&self) -> Result<Surreal<Any>, StoreError> {
        self.conn
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or_else(|| StoreError::Unavailable("not connected".into()))
    }
}

#[async_trait]
impl DocumentStore for SurrealStore {
    async fn connect(&self) -> Result<(), StoreError> {
        let db = any::connect(self.url.as_str()).await.map_err(unavailable)?;
        db.use_ns(self.ns.as_str())
            .use_db(self.db.as_str())
            .await
            .map_err(unavailable)?;
        db.query(include_str!("../schema.surql"))
            .await
            .and_then(|resp| resp.check())
            .map_err(unavailable)?;

        *self.conn.write().unwrap_or_else(PoisonError::into_inner) = Some(db);
        Ok(())
    }

    async fn closed(&self) -> StoreError {
        let mut tick = tokio::time::interval(self.health_interval);
        loop {
            tick.tick().await;
            let db = match self.handle() {
                Ok(db) => db,
                Err(e) => return e,
            };
            if let Err(e) = db.health().await {
                return StoreError::Closed(e.to_string());
            }
        }
    }

    async fn find(
        &self,
        filter: &ActionFilter,
        sort: Sort,
        limit: usize,
    ) -> Result<Vec<ActionRecord>, StoreError> {
        let db = self.handle()?;
        let mut query = db.query(select_sql(filter, sort, limit));
        if let Some(task_id) = &filter.task_id {
            query = query.bind(("task_id", task_id.clone()));
        }
        if let Some(user_id) = &filter.user_id {
            query = query.bind(("user_id", user_id.clone()));
        }
        if let Some(after) = filter.after {
            query = query.bind(("after", after));
        }
        if let Some(before) = filter.before {
            query = query.bind(("before", before));
        }

        let mut resp = query.await.map_err(query_failed)?;
        resp.take(0).map_err(query_failed)
    }

    async fn task_exists(&self, task_id: &str) -> Result<bool, StoreError> {
        let db = self.handle()?;
        let sql = format!(
            "SELECT count() AS total FROM {TASK_COLLECTION} \
             WHERE id = type::thing('{TASK_COLLECTION}', $id) GROUP ALL;"
        );
        let mut resp = db
            .query(sql)
            .bind(("id", task_id.to_string()))
            .await
            .map_err(query_failed)?;
        let count: Option<TaskCount> = resp.take(0).map_err(query_failed)?;
        Ok(count.is_some_and(|c| c.total > 0))
    }

    async fn create(&self, record: &ActionRecord) -> Result<ActionRecord, StoreError> {
        let db = self.handle()?;
        let created: Option<ActionRecord> = db
            .create(ACTION_COLLECTION)
            .content(record.clone())
            .await
            .map_err(|e| StoreError::Write(e.to_string()))?;
        created.ok_or_else(|| StoreError::Write("create returned no record".into()))
    }

    async fn watch(&self) -> Result<ChangeStream, StoreError> {
        let db = self.handle()?;
        let live: surrealdb::method::Stream<Vec<IgnoredAny>> = db
            .select(ACTION_COLLECTION)
            .live()
            .await
            .map_err(query_failed)?;

        let changes = live.filter_map(|item: surrealdb::Result<Notification<IgnoredAny>>| async move {
            match item {
                Ok(notification) => operation_of(notification.action).map(|operation| {
                    Ok(ChangeEvent {
                        collection: ACTION_COLLECTION.to_string(),
                        operation,
                    })
                }),
                Err(e) => Some(Err(StoreError::Query(e.to_string()))),
            }
        });
        Ok(Box::pin(changes))
    }
}

fn operation_of(action: Action) -> Option<OperationType> {
    match action {
        Action::Create => Some(OperationType::Insert),
        Action::Update => Some(OperationType::Update),
        Action::Delete => Some(OperationType::Delete),
        #[allow(unreachable_patterns)]
        _ => None,
    }
}

fn select_sql(filter: &ActionFilter, sort: Sort, limit: usize) -> String {
    let mut clauses = Vec::new();
    if filter.task_id.is_some() {
        clauses.push("taskId = $task_id");
    }
    if filter.user_id.is_some() {
        clauses.push("userId = $user_id");
    }
    if filter.with_code_state {
        clauses.push("codeState != NONE AND codeState != NULL");
    }
    if filter.after.is_some() {
        clauses.push("timestamp > $after");
    }
    if filter.before.is_some() {
        clauses.push("timestamp < $before");
    }

    let where_clause = if clauses.is_empty() {
        String::new()
    } else {
        format!(" WHERE {}", clauses.join(" AND "))
    };
    let order = match sort {
        Sort::TimestampAsc => "timestamp ASC",
        Sort::TimestampDesc => "timestamp DESC",
        Sort::LogIdDesc => "logId DESC",
    };
    format!("SELECT * FROM {ACTION_COLLECTION}{where_clause} ORDER BY {order} LIMIT {limit};")
}

fn unavailable(e: surrealdb::Error) -> StoreError {
    StoreError::Unavailable(e.to_string())
}

fn query_failed(e: surrealdb::Error) -> StoreError {
    StoreError::Query(e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn max_log_id_query_has_no_filter() {
        assert_eq!(
            select_sql(&ActionFilter::all(), Sort::LogIdDesc, 1),
            "SELECT * FROM action ORDER BY logId DESC LIMIT 1;"
        );
    }

    #[test]
    fn snapshot_query_binds_every_bound() {
        let filter = ActionFilter::snapshots("t1", "u1").after(10).before(20);
        let sql = select_sql(&filter, Sort::TimestampAsc, 1);
        assert_eq!(
            sql,
            "SELECT * FROM action WHERE taskId = $task_id AND userId = $user_id \
             AND codeState != NONE AND codeState != NULL AND timestamp > $after \
             AND timestamp < $before ORDER BY timestamp ASC LIMIT 1;"
        );
    }

    #[test]
    fn handle_requires_connection() {
        let store = SurrealStore::new("mem://", "actionlog", "main", Duration::from_secs(1));
        assert_eq!(
            store.handle().err(),
            Some(StoreError::Unavailable("not connected".into()))
        );
    }

    #[tokio::test]
    async fn embedded_store_round_trip() {
        let store = SurrealStore::new("mem://", "actionlog", "main", Duration::from_secs(1));
        store.connect().await.unwrap();

        for (ts, log_id) in [(10, 1), (30, 3), (20, 2)] {
            let record = ActionRecord {
                task_id: "t1".into(),
                user_id: "u1".into(),
                timestamp: ts,
                kind: "edit".into(),
                code_state: Some(serde_json::json!("x")),
                log_id,
            };
            store.create(&record).await.unwrap();
        }

        let top = store
            .find_one(&ActionFilter::all(), Sort::LogIdDesc)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(top.log_id, 3);

        let next = store
            .find_one(&ActionFilter::snapshots("t1", "u1").after(10), Sort::TimestampAsc)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(next.timestamp, 20);

        assert!(!store.task_exists("nope").await.unwrap());
    }
}
