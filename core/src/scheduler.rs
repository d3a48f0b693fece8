//! Delayed scheduler (spec §4.2): time-indexed secondary storage of
//! envelopes awaiting promotion, plus the promotion protocol that moves
//! ready items onto their destination primary queues.

use chrono::Utc;
use events::{Event, EventArgs, EventBus};
use keystore::{AsyncCommands, KeyStorePool};
use serde::Deserialize;
use serde_json::Value;

use crate::error::Error;
use crate::job::DelayedEnvelope;
use crate::queue::QueueEngine;

#[derive(Clone)]
pub struct DelayedScheduler {
    pool: KeyStorePool,
    prefix: String,
    events: EventBus,
}

#[derive(Deserialize)]
struct QueueField {
    queue: String,
}

impl DelayedScheduler {
    pub fn new(pool: KeyStorePool, prefix: impl Into<String>, events: EventBus) -> Self {
        DelayedScheduler {
            pool,
            prefix: prefix.into(),
            events,
        }
    }

    fn schedule_key(&self) -> String {
        format!("{}delayed_queue_schedule", self.prefix)
    }

    fn timestamp_list_key(&self, ts: i64) -> String {
        format!("{}delayed:{}", self.prefix, ts)
    }

    pub async fn enqueue_at(
        &self,
        timestamp: i64,
        queue: &str,
        class: &str,
        args: Option<Value>,
    ) -> Result<(), Error> {
        if queue.is_empty() {
            return Err(Error::Config("queue name must not be empty".to_string()));
        }
        if class.is_empty() {
            return Err(Error::Config("class name must not be empty".to_string()));
        }

        let hook_args = EventArgs::new()
            .with("queue", queue)
            .with("class", class)
            .with("timestamp", timestamp);
        if let Err(veto) = self.events.emit(Event::BeforeSchedule, &hook_args) {
            tracing::debug!(?veto, "before_schedule listener returned a veto, ignoring");
        }

        let envelope = DelayedEnvelope::new(queue, class, args);
        let json = envelope.canonical_json()?;

        let mut conn = self.pool.get().await?;
        redis::pipe()
            .rpush(self.timestamp_list_key(timestamp), &json)
            .ignore()
            .zadd(self.schedule_key(), timestamp, timestamp)
            .ignore()
            .query_async(&mut *conn)
            .await
            .map_err(keystore::Error::from)?;

        if let Err(veto) = self.events.emit(Event::AfterSchedule, &hook_args) {
            tracing::debug!(?veto, "after_schedule listener returned a veto, ignoring");
        }

        Ok(())
    }

    pub async fn enqueue_in(
        &self,
        seconds: i64,
        queue: &str,
        class: &str,
        args: Option<Value>,
    ) -> Result<(), Error> {
        let at = Utc::now().timestamp() + seconds;
        self.enqueue_at(at, queue, class, args).await
    }

    /// Scans every `delayed:*` list and removes every element byte-equal to
    /// the canonical envelope for `(queue, class, args)`. Does not prune
    /// emptied lists from the sorted set; a later `next_item_for_timestamp`
    /// or `cleanup_timestamp` call restores the invariant.
    pub async fn remove_delayed(
        &self,
        queue: &str,
        class: &str,
        args: Option<Value>,
    ) -> Result<i64, Error> {
        let canonical = DelayedEnvelope::new(queue, class, args).canonical_json()?;
        let mut conn = self.pool.get().await?;

        let pattern = format!("{}delayed:*", self.prefix);
        let mut removed = 0i64;
        let mut cursor: u64 = 0;
        loop {
            let (next_cursor, keys): (u64, Vec<String>) = redis::cmd("SCAN")
                .cursor_arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(100)
                .query_async(&mut *conn)
                .await
                .map_err(keystore::Error::from)?;

            for key in keys {
                let n: i64 = conn
                    .lrem(&key, 0, &canonical)
                    .await
                    .map_err(keystore::Error::from)?;
                removed += n;
            }

            if next_cursor == 0 {
                break;
            }
            cursor = next_cursor;
        }

        Ok(removed)
    }

    /// Removes matching entries only from `delayed:<ts>`, then prunes `ts`
    /// from the sorted set immediately if the list is now empty.
    pub async fn remove_delayed_job_from_timestamp(
        &self,
        ts: i64,
        queue: &str,
        class: &str,
        args: Option<Value>,
    ) -> Result<i64, Error> {
        let canonical = DelayedEnvelope::new(queue, class, args).canonical_json()?;
        let mut conn = self.pool.get().await?;
        let key = self.timestamp_list_key(ts);

        let removed: i64 = conn
            .lrem(&key, 0, &canonical)
            .await
            .map_err(keystore::Error::from)?;

        self.cleanup_timestamp_with_conn(&mut conn, ts).await?;

        Ok(removed)
    }

    /// Smallest score in the sorted set that is `<= at` (defaults to now).
    /// Any past-due timestamp is eventually observed by this call,
    /// regardless of when the scheduler last ran.
    pub async fn next_delayed_timestamp(&self, at: Option<i64>) -> Result<Option<i64>, Error> {
        let at = at.unwrap_or_else(|| Utc::now().timestamp());
        let mut conn = self.pool.get().await?;
        let found: Vec<i64> = conn
            .zrangebyscore_limit(self.schedule_key(), "-inf", at, 0, 1)
            .await
            .map_err(keystore::Error::from)?;
        Ok(found.into_iter().next())
    }

    /// Head-pops `delayed:<ts>`, pruning the timestamp if the list becomes
    /// empty.
    pub async fn next_item_for_timestamp(&self, ts: i64) -> Result<Option<String>, Error> {
        let mut conn = self.pool.get().await?;
        let key = self.timestamp_list_key(ts);
        let item: Option<String> = conn.lpop(&key, None).await.map_err(keystore::Error::from)?;

        if item.is_some() {
            self.cleanup_timestamp_with_conn(&mut conn, ts).await?;
        }

        Ok(item)
    }

    /// Restores the invariant "`ts` is a member of the sorted set iff
    /// `delayed:<ts>` is non-empty" for a single timestamp.
    pub async fn cleanup_timestamp(&self, ts: i64) -> Result<(), Error> {
        let mut conn = self.pool.get().await?;
        self.cleanup_timestamp_with_conn(&mut conn, ts).await
    }

    async fn cleanup_timestamp_with_conn(
        &self,
        conn: &mut keystore::Connection,
        ts: i64,
    ) -> Result<(), Error> {
        let key = self.timestamp_list_key(ts);
        let len: i64 = conn.llen(&key).await.map_err(keystore::Error::from)?;
        if len == 0 {
            conn.zrem::<_, _, ()>(self.schedule_key(), ts)
                .await
                .map_err(keystore::Error::from)?;
        }
        Ok(())
    }

    pub async fn delayed_schedule_size(&self) -> Result<i64, Error> {
        let mut conn = self.pool.get().await?;
        let size: i64 = conn
            .zcard(self.schedule_key())
            .await
            .map_err(keystore::Error::from)?;
        Ok(size)
    }

    pub async fn size_at_timestamp(&self, ts: i64) -> Result<i64, Error> {
        let mut conn = self.pool.get().await?;
        let size: i64 = conn
            .llen(self.timestamp_list_key(ts))
            .await
            .map_err(keystore::Error::from)?;
        Ok(size)
    }

    /// Runs one full promotion pass: every timestamp at or before now, every
    /// item at that timestamp, pushed onto its destination queue. Stateless
    /// between calls, so a crash mid-pass loses at most the one envelope
    /// that was popped but not yet pushed (see the at-most-once decision in
    /// DESIGN.md).
    pub async fn promote_ready(&self, queues: &QueueEngine) -> Result<usize, Error> {
        let mut promoted = 0usize;

        while let Some(ts) = self.next_delayed_timestamp(None).await? {
            loop {
                let raw = match self.next_item_for_timestamp(ts).await? {
                    Some(raw) => raw,
                    None => break,
                };

                let queue_name = match serde_json::from_str::<QueueField>(&raw) {
                    Ok(QueueField { queue }) => queue,
                    Err(e) => {
                        tracing::error!(error = %e, timestamp = ts, "malformed delayed envelope, dropping");
                        continue;
                    }
                };

                match queues.push(&queue_name, &raw).await {
                    Ok(()) => promoted += 1,
                    Err(e) => {
                        // At-most-once: the item already left `delayed:<ts>`
                        // and is not reinserted on a failed push.
                        tracing::error!(error = %e, queue = %queue_name, timestamp = ts, "failed to promote delayed job, dropping");
                    }
                }
            }
        }

        Ok(promoted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schedule_and_list_keys_are_prefixed() {
        let scheduler = DelayedScheduler {
            pool: unreachable_pool(),
            prefix: "app:".to_string(),
            events: EventBus::new(),
        };
        assert_eq!(scheduler.schedule_key(), "app:delayed_queue_schedule");
        assert_eq!(scheduler.timestamp_list_key(100), "app:delayed:100");
    }

    fn unreachable_pool() -> KeyStorePool {
        // Constructing a pool never touches the network; connections are
        // established lazily on first `.get()`.
        KeyStorePool::from_url("redis://localhost:6379").expect("valid dsn")
    }
}
