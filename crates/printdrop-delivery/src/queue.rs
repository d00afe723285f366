// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Message queue capability and an at-least-once queue backed by SQLite.
//
// A receive hands out visible messages, stamps each with a fresh receipt
// handle, bumps its receive count and hides it for the invisibility window.
// A message that is not deleted before the window ends becomes visible again
// and is redelivered.  Deleting needs the receipt handle of the latest
// receive, so a consumer whose window lapsed cannot delete a message another
// consumer now holds.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use rusqlite::{Connection, ErrorCode, OptionalExtension, TransactionBehavior, params};
use tracing::{debug, info, instrument};

use printdrop_core::error::{PrintdropError, Result};
use printdrop_core::types::QueueMessage;

/// How often a long poll re-checks for visible messages.
const POLL_INTERVAL: Duration = Duration::from_millis(250);

/// SQLite schema for queues and their messages.
const CREATE_TABLES_SQL: &str = r#"
    CREATE TABLE IF NOT EXISTS queues (
        name TEXT PRIMARY KEY,
        attributes TEXT NOT NULL DEFAULT '{}',
        created_at TEXT NOT NULL
    );
    CREATE TABLE IF NOT EXISTS messages (
        id TEXT PRIMARY KEY,
        queue TEXT NOT NULL,
        body TEXT NOT NULL,
        sent_at INTEGER NOT NULL,
        visible_at INTEGER NOT NULL,
        receive_count INTEGER NOT NULL DEFAULT 0,
        receipt_handle TEXT
    );
    CREATE INDEX IF NOT EXISTS idx_messages_visible ON messages(queue, visible_at);
    CREATE UNIQUE INDEX IF NOT EXISTS idx_messages_receipt ON messages(receipt_handle);
"#;

/// Consumer-side queue operations used by the delivery loop.
#[async_trait]
pub trait MessageQueue: Send + Sync {
    /// Receive up to `max_batch` messages, waiting up to `wait` for the first
    /// one.  Received messages stay hidden for `invisibility`.
    async fn receive(
        &self,
        max_batch: u32,
        wait: Duration,
        invisibility: Duration,
    ) -> Result<Vec<QueueMessage>>;

    /// Acknowledge a receipt.  Deleting an unknown handle is not an error.
    async fn delete(&self, receipt_handle: &str) -> Result<()>;
}

/// Control-plane queue operations used when provisioning a worker.
#[async_trait]
pub trait QueueAdmin: Send + Sync {
    /// URL of the named queue, if it exists.
    async fn queue_url(&self, name: &str) -> Result<Option<String>>;

    /// Create the named queue (no-op if it exists) and return its URL.
    async fn create_queue(&self, name: &str, attributes: &HashMap<String, String>)
        -> Result<String>;
}

/// At-least-once message queue persisted in a SQLite database.
///
/// `rusqlite` is synchronous; every call runs on the blocking pool.
#[derive(Clone)]
pub struct SqliteQueue {
    conn: Arc<Mutex<Connection>>,
    /// Queue this handle sends to and receives from.
    queue: String,
    location: String,
}

/// Map a SQLite error, treating "cannot reach the database" as connectivity.
fn db_err(context: &str, e: rusqlite::Error) -> PrintdropError {
    let unreachable = matches!(
        &e,
        rusqlite::Error::SqliteFailure(f, _) if matches!(
            f.code,
            ErrorCode::CannotOpen
                | ErrorCode::DatabaseBusy
                | ErrorCode::DatabaseLocked
                | ErrorCode::SystemIoFailure
        )
    );
    if unreachable {
        PrintdropError::QueueUnavailable(format!("{context}: {e}"))
    } else {
        PrintdropError::Queue(format!("{context}: {e}"))
    }
}

fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

impl SqliteQueue {
    /// Open (or create) the queue database at `path`, bound to queue `name`.
    #[instrument(skip_all, fields(path = %path.as_ref().display(), queue = name))]
    pub fn open(path: impl AsRef<Path>, name: &str) -> Result<Self> {
        let conn = Connection::open(path.as_ref()).map_err(|e| db_err("open", e))?;

        // WAL lets a producer append while the worker holds a read.
        conn.pragma_update(None, "journal_mode", "WAL")
            .map_err(|e| db_err("WAL pragma", e))?;
        conn.busy_timeout(Duration::from_secs(5))
            .map_err(|e| db_err("busy timeout", e))?;

        let location = format!("sqlite://{}", path.as_ref().display());
        Self::with_connection(conn, name, location)
    }

    /// Open an in-memory queue (useful for tests).
    pub fn open_in_memory(name: &str) -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(|e| db_err("open in-memory", e))?;
        Self::with_connection(conn, name, "sqlite://:memory:".into())
    }

    fn with_connection(conn: Connection, name: &str, location: String) -> Result<Self> {
        conn.execute_batch(CREATE_TABLES_SQL)
            .map_err(|e| db_err("create tables", e))?;
        info!(queue = name, "message queue database opened");
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            queue: name.to_owned(),
            location,
        })
    }

    pub fn name(&self) -> &str {
        &self.queue
    }

    fn url_for(&self, name: &str) -> String {
        format!("{}#{name}", self.location)
    }

    /// Run `f` against the connection on the blocking pool.
    async fn with_conn<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut guard = conn
                .lock()
                .map_err(|_| PrintdropError::Queue("queue connection lock poisoned".into()))?;
            f(&mut guard)
        })
        .await
        .map_err(|e| PrintdropError::Queue(format!("blocking task: {e}")))?
    }

    /// Enqueue `body`, visible immediately.  Returns the message id.
    ///
    /// Producers are external to the worker; this exists for fixtures.
    #[cfg(test)]
    #[instrument(skip(self, body), fields(queue = %self.queue))]
    pub(crate) async fn send(&self, body: &str) -> Result<String> {
        let id = uuid::Uuid::new_v4().to_string();
        let queue = self.queue.clone();
        let body = body.to_owned();
        let message_id = id.clone();
        self.with_conn(move |conn| {
            let now = now_millis();
            conn.execute(
                "INSERT INTO messages (id, queue, body, sent_at, visible_at) VALUES (?1, ?2, ?3, ?4, ?4)",
                params![message_id, queue, body, now],
            )
            .map_err(|e| db_err("send", e))?;
            Ok(())
        })
        .await?;
        debug!(message_id = %id, "message sent");
        Ok(id)
    }

    /// Messages in this queue, visible or not.
    pub async fn depth(&self) -> Result<usize> {
        let queue = self.queue.clone();
        self.with_conn(move |conn| {
            conn.query_row(
                "SELECT COUNT(*) FROM messages WHERE queue = ?1",
                params![queue],
                |row| row.get::<_, i64>(0),
            )
            .map(|n| n as usize)
            .map_err(|e| db_err("depth", e))
        })
        .await
    }

    /// Claim up to `max_batch` visible messages without waiting.
    async fn claim(&self, max_batch: u32, invisibility: Duration) -> Result<Vec<QueueMessage>> {
        let queue = self.queue.clone();
        let hide_ms = i64::try_from(invisibility.as_millis()).map_err(|_| {
            PrintdropError::Queue(format!("invisibility window {invisibility:?} out of range"))
        })?;
        self.with_conn(move |conn| {
            // Take the write lock up front.  A deferred transaction that reads
            // before a producer commits cannot upgrade and fails without
            // honouring the busy timeout.
            let tx = conn
                .transaction_with_behavior(TransactionBehavior::Immediate)
                .map_err(|e| db_err("begin receive", e))?;
            let now = now_millis();
            let visible_at = now.checked_add(hide_ms).ok_or_else(|| {
                PrintdropError::Queue("invisibility window overflows the clock".into())
            })?;

            let candidates: Vec<(String, String, i64)> = {
                let mut stmt = tx
                    .prepare(
                        "SELECT id, body, receive_count FROM messages
                         WHERE queue = ?1 AND visible_at <= ?2
                         ORDER BY sent_at ASC LIMIT ?3",
                    )
                    .map_err(|e| db_err("prepare receive", e))?;
                stmt.query_map(params![queue, now, max_batch as i64], |row| {
                    Ok((row.get(0)?, row.get(1)?, row.get(2)?))
                })
                .map_err(|e| db_err("query receive", e))?
                .collect::<std::result::Result<Vec<_>, _>>()
                .map_err(|e| db_err("collect receive", e))?
            };

            let mut messages = Vec::with_capacity(candidates.len());
            for (id, body, count) in candidates {
                let receipt = uuid::Uuid::new_v4().to_string();
                tx.execute(
                    "UPDATE messages SET visible_at = ?1, receive_count = receive_count + 1,
                     receipt_handle = ?2 WHERE id = ?3",
                    params![visible_at, receipt, id],
                )
                .map_err(|e| db_err("hide message", e))?;
                messages.push(QueueMessage {
                    id,
                    body,
                    receipt_handle: receipt,
                    approx_receive_count: (count + 1) as u32,
                });
            }

            tx.commit().map_err(|e| db_err("commit receive", e))?;
            Ok(messages)
        })
        .await
    }
}

#[async_trait]
impl MessageQueue for SqliteQueue {
    #[instrument(skip(self), fields(queue = %self.queue))]
    async fn receive(
        &self,
        max_batch: u32,
        wait: Duration,
        invisibility: Duration,
    ) -> Result<Vec<QueueMessage>> {
        let deadline = tokio::time::Instant::now()
            .checked_add(wait)
            .ok_or_else(|| PrintdropError::Queue(format!("receive wait {wait:?} out of range")))?;
        loop {
            let messages = self.claim(max_batch, invisibility).await?;
            let now = tokio::time::Instant::now();
            if !messages.is_empty() || now >= deadline {
                debug!(count = messages.len(), "receive returned");
                return Ok(messages);
            }
            tokio::time::sleep(POLL_INTERVAL.min(deadline - now)).await;
        }
    }

    #[instrument(skip(self), fields(queue = %self.queue))]
    async fn delete(&self, receipt_handle: &str) -> Result<()> {
        let receipt = receipt_handle.to_owned();
        let rows = self
            .with_conn(move |conn| {
                conn.execute("DELETE FROM messages WHERE receipt_handle = ?1", params![receipt])
                    .map_err(|e| db_err("delete", e))
            })
            .await?;
        debug!(deleted = rows, "message acknowledged");
        Ok(())
    }
}

#[async_trait]
impl QueueAdmin for SqliteQueue {
    async fn queue_url(&self, name: &str) -> Result<Option<String>> {
        let lookup = name.to_owned();
        let found = self
            .with_conn(move |conn| {
                conn.query_row(
                    "SELECT name FROM queues WHERE name = ?1",
                    params![lookup],
                    |row| row.get::<_, String>(0),
                )
                .optional()
                .map_err(|e| db_err("queue url", e))
            })
            .await?;
        Ok(found.map(|n| self.url_for(&n)))
    }

    #[instrument(skip(self, attributes))]
    async fn create_queue(
        &self,
        name: &str,
        attributes: &HashMap<String, String>,
    ) -> Result<String> {
        let attrs = serde_json::to_string(attributes)?;
        let queue = name.to_owned();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT OR IGNORE INTO queues (name, attributes, created_at) VALUES (?1, ?2, ?3)",
                params![queue, attrs, Utc::now().to_rfc3339()],
            )
            .map_err(|e| db_err("create queue", e))?;
            Ok(())
        })
        .await?;
        info!(queue = name, "queue ready");
        Ok(self.url_for(name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HIDE: Duration = Duration::from_secs(300);

    #[tokio::test]
    async fn received_messages_are_hidden() {
        let queue = SqliteQueue::open_in_memory("jobs").expect("open");
        queue.send("one").await.expect("send");
        queue.send("two").await.expect("send");

        let first = queue.receive(10, Duration::ZERO, HIDE).await.expect("receive");
        assert_eq!(first.len(), 2);
        assert_eq!(first[0].body, "one");
        assert!(first.iter().all(|m| m.approx_receive_count == 1));

        let second = queue.receive(10, Duration::ZERO, HIDE).await.expect("receive");
        assert!(second.is_empty());
    }

    #[tokio::test]
    async fn batch_size_is_respected() {
        let queue = SqliteQueue::open_in_memory("jobs").expect("open");
        for i in 0..5 {
            queue.send(&format!("m{i}")).await.expect("send");
        }
        let batch = queue.receive(3, Duration::ZERO, HIDE).await.expect("receive");
        assert_eq!(batch.len(), 3);
    }

    #[tokio::test]
    async fn unacknowledged_messages_are_redelivered() {
        let queue = SqliteQueue::open_in_memory("jobs").expect("open");
        queue.send("job").await.expect("send");

        let first = queue.receive(10, Duration::ZERO, Duration::ZERO).await.expect("receive");
        let second = queue.receive(10, Duration::ZERO, HIDE).await.expect("receive");
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].id, first[0].id);
        assert_eq!(second[0].approx_receive_count, 2);
        assert_ne!(second[0].receipt_handle, first[0].receipt_handle);

        // The lapsed receipt no longer deletes anything.
        queue.delete(&first[0].receipt_handle).await.expect("delete");
        assert_eq!(queue.depth().await.expect("depth"), 1);

        queue.delete(&second[0].receipt_handle).await.expect("delete");
        assert_eq!(queue.depth().await.expect("depth"), 0);
    }

    #[tokio::test]
    async fn long_poll_returns_when_a_message_arrives() {
        let queue = SqliteQueue::open_in_memory("jobs").expect("open");
        let producer = queue.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            producer.send("late").await.expect("send");
        });

        let batch = queue
            .receive(10, Duration::from_secs(5), HIDE)
            .await
            .expect("receive");
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].body, "late");
    }

    #[tokio::test]
    async fn queues_are_isolated() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("queue.db");
        let a = SqliteQueue::open(&path, "a").expect("open a");
        let b = SqliteQueue::open(&path, "b").expect("open b");
        a.send("for-a").await.expect("send");
        assert!(b.receive(10, Duration::ZERO, HIDE).await.expect("receive").is_empty());
        assert_eq!(a.receive(10, Duration::ZERO, HIDE).await.expect("receive").len(), 1);
    }

    #[tokio::test]
    async fn receive_waits_out_a_producer_holding_the_write_lock() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("queue.db");
        let consumer = SqliteQueue::open(&path, "jobs").expect("open");

        let (locked_tx, locked_rx) = std::sync::mpsc::channel();
        let producer_path = path.clone();
        let producer = std::thread::spawn(move || {
            let mut conn = Connection::open(&producer_path).expect("producer open");
            let tx = conn
                .transaction_with_behavior(TransactionBehavior::Immediate)
                .expect("producer lock");
            tx.execute(
                "INSERT INTO messages (id, queue, body, sent_at, visible_at)
                 VALUES ('m1', 'jobs', 'late', 0, 0)",
                [],
            )
            .expect("insert");
            locked_tx.send(()).expect("signal");
            std::thread::sleep(Duration::from_millis(200));
            tx.commit().expect("commit");
        });
        locked_rx.recv().expect("producer holds the lock");

        let batch = consumer
            .receive(10, Duration::ZERO, HIDE)
            .await
            .expect("a busy producer is not a connectivity failure");
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].body, "late");
        producer.join().expect("producer thread");
    }

    #[tokio::test]
    async fn out_of_range_durations_are_errors() {
        let queue = SqliteQueue::open_in_memory("jobs").expect("open");
        assert!(matches!(
            queue.receive(10, Duration::MAX, HIDE).await,
            Err(PrintdropError::Queue(_))
        ));
        queue.send("job").await.expect("send");
        assert!(matches!(
            queue.receive(10, Duration::ZERO, Duration::MAX).await,
            Err(PrintdropError::Queue(_))
        ));
        // Nothing was claimed by the failed receive.
        assert_eq!(queue.receive(10, Duration::ZERO, HIDE).await.expect("receive").len(), 1);
    }

    #[tokio::test]
    async fn create_queue_is_idempotent() {
        let queue = SqliteQueue::open_in_memory("jobs").expect("open");
        assert_eq!(queue.queue_url("jobs").await.expect("url"), None);

        let attrs = HashMap::from([("VisibilityTimeout".to_owned(), "300".to_owned())]);
        let url = queue.create_queue("jobs", &attrs).await.expect("create");
        assert_eq!(queue.create_queue("jobs", &attrs).await.expect("create again"), url);
        assert_eq!(queue.queue_url("jobs").await.expect("url"), Some(url));
    }
}
