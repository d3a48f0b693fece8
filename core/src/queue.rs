//! Queue engine (spec §4.1): enqueue/dequeue, queue registry, size queries.

use std::collections::HashSet;
use std::time::{SystemTime, UNIX_EPOCH};

use events::{Event, EventArgs, EventBus};
use keystore::{AsyncCommands, KeyStorePool};
use serde_json::Value;

use crate::error::Error;
use crate::job::{JobEnvelope, JobId};
use crate::status::StatusTracker;

fn monotone_now_secs() -> f64 {
    let dur = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    dur.as_secs_f64()
}

#[derive(Clone)]
pub struct QueueEngine {
    pool: KeyStorePool,
    prefix: String,
    events: EventBus,
}

impl QueueEngine {
    pub fn new(pool: KeyStorePool, prefix: impl Into<String>, events: EventBus) -> Self {
        QueueEngine {
            pool,
            prefix: prefix.into(),
            events,
        }
    }

    fn queues_key(&self) -> String {
        format!("{}queues", self.prefix)
    }

    fn queue_key(&self, queue: &str) -> String {
        format!("{}queue:{}", self.prefix, queue)
    }

    fn queue_name_from_key<'a>(&self, key: &'a str) -> &'a str {
        Self::strip_queue_key_prefix(&self.prefix, key)
    }

    fn strip_queue_key_prefix<'a>(prefix: &str, key: &'a str) -> &'a str {
        key.strip_prefix(prefix)
            .and_then(|s| s.strip_prefix("queue:"))
            .unwrap_or(key)
    }

    /// Adds `queue` to the registry and appends `envelope_json` to its tail.
    pub async fn push(&self, queue: &str, envelope_json: &str) -> Result<(), Error> {
        let mut conn = self.pool.get().await?;
        redis::pipe()
            .sadd(self.queues_key(), queue)
            .ignore()
            .rpush(self.queue_key(queue), envelope_json)
            .ignore()
            .query_async(&mut *conn)
            .await
            .map_err(keystore::Error::from)?;
        Ok(())
    }

    /// Removes and returns the head (oldest) envelope. Non-blocking.
    pub async fn pop(&self, queue: &str) -> Result<Option<String>, Error> {
        let mut conn = self.pool.get().await?;
        let item: Option<String> = conn
            .lpop(self.queue_key(queue), None)
            .await
            .map_err(keystore::Error::from)?;
        Ok(item)
    }

    /// Blocks up to `timeout_secs` across the supplied queues, server-side
    /// leftmost-ready semantics deciding ties. `timeout_secs` of `0.0` means
    /// block indefinitely, matching Redis's own `BLPOP` contract; callers
    /// that want an immediate non-blocking check should use `pop` instead.
    pub async fn blocking_pop(
        &self,
        queues: &[String],
        timeout_secs: f64,
    ) -> Result<Option<(String, String)>, Error> {
        if queues.is_empty() {
            return Ok(None);
        }

        let mut conn = self.pool.get().await?;
        let keys: Vec<String> = queues.iter().map(|q| self.queue_key(q)).collect();
        let result: Option<(String, String)> = redis::cmd("BLPOP")
            .arg(&keys)
            .arg(timeout_secs)
            .query_async(&mut *conn)
            .await
            .map_err(keystore::Error::from)?;

        Ok(result.map(|(key, value)| (self.queue_name_from_key(&key).to_string(), value)))
    }

    pub async fn size(&self, queue: &str) -> Result<i64, Error> {
        let mut conn = self.pool.get().await?;
        let len: i64 = conn
            .llen(self.queue_key(queue))
            .await
            .map_err(keystore::Error::from)?;
        Ok(len)
    }

    pub async fn queues(&self) -> Result<HashSet<String>, Error> {
        let mut conn = self.pool.get().await?;
        let members: HashSet<String> = conn
            .smembers(self.queues_key())
            .await
            .map_err(keystore::Error::from)?;
        Ok(members)
    }

    /// Builds the envelope, fires `before_enqueue`/`after_enqueue`, and
    /// appends it to `queue`. Returns `Ok(None)` (the `false` result in
    /// spec.md) if a listener vetoes via `DoNotCreate`, without touching
    /// Redis and without firing `after_enqueue`.
    #[allow(clippy::too_many_arguments)]
    pub async fn enqueue(
        &self,
        queue: &str,
        class: &str,
        args: Option<Value>,
        id: JobId<'_>,
        track_status: bool,
        status: &StatusTracker,
    ) -> Result<Option<String>, Error> {
        let id = id.make_id();
        let hook_args = EventArgs::new()
            .with("queue", queue)
            .with("class", class)
            .with("id", id.clone())
            .with("args", args.clone().unwrap_or(Value::Null));

        if self.events.emit(Event::BeforeEnqueue, &hook_args).is_err() {
            return Ok(None);
        }

        let envelope = JobEnvelope {
            args: [args],
            class: class.to_string(),
            id: id.clone(),
            prefix: self.prefix.clone(),
            queue_time: monotone_now_secs(),
        };
        let json = serde_json::to_string(&envelope)?;
        self.push(queue, &json).await?;

        if track_status {
            status.create(&id).await?;
        }

        // After-the-fact hooks are informational; a veto here has nothing
        // left to undo, so any error is logged and otherwise ignored.
        if let Err(veto) = self.events.emit(Event::AfterEnqueue, &hook_args) {
            tracing::debug!(?veto, "after_enqueue listener returned a veto, ignoring");
        }

        Ok(Some(id))
    }

    /// Appends every item in one round trip. Does not fire per-item
    /// enqueue events; callers that need per-item hooks should call
    /// `enqueue` in a loop instead.
    pub async fn enqueue_multiple(
        &self,
        queue: &str,
        envelopes: &[JobEnvelope],
    ) -> Result<(), Error> {
        if envelopes.is_empty() {
            return Ok(());
        }

        let mut conn = self.pool.get().await?;
        let mut pipe = redis::pipe();
        pipe.sadd(self.queues_key(), queue).ignore();
        for envelope in envelopes {
            let json = serde_json::to_string(envelope)?;
            pipe.rpush(self.queue_key(queue), json).ignore();
        }
        pipe.query_async(&mut *conn)
            .await
            .map_err(keystore::Error::from)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn queue_name_from_key_strips_prefix() {
        assert_eq!(
            QueueEngine::strip_queue_key_prefix("app:", "app:queue:default"),
            "default"
        );
    }
}
