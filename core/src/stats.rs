//! Monotone integer counters keyed by name (spec component 3), backed
//! directly by Redis `INCRBY`/`GET` so increments are atomic across workers.

use keystore::{AsyncCommands, KeyStorePool};

use crate::error::Error;

#[derive(Clone)]
pub struct StatCounter {
    pool: KeyStorePool,
    prefix: String,
}

impl StatCounter {
    pub fn new(pool: KeyStorePool, prefix: impl Into<String>) -> Self {
        StatCounter {
            pool,
            prefix: prefix.into(),
        }
    }

    fn key(&self, name: &str) -> String {
        format!("{}stat:{}", self.prefix, name)
    }

    pub async fn incr(&self, name: &str) -> Result<i64, Error> {
        self.incr_by(name, 1).await
    }

    pub async fn incr_by(&self, name: &str, amount: i64) -> Result<i64, Error> {
        let mut conn = self.pool.get().await?;
        conn.incr(self.key(name), amount)
            .await
            .map_err(keystore::Error::from)
            .map_err(Error::from)
    }

    pub async fn get(&self, name: &str) -> Result<i64, Error> {
        let mut conn = self.pool.get().await?;
        let value: Option<i64> = conn
            .get(self.key(name))
            .await
            .map_err(keystore::Error::from)?;
        Ok(value.unwrap_or(0))
    }

    /// `stat:processed:<workerId>` / `stat:failed:<workerId>` are plain
    /// composed counter names keyed on the worker id *string* (see the
    /// worker-identity open question resolved in SPEC_FULL.md §4.3).
    pub async fn incr_for_worker(&self, name: &str, worker_id: &str) -> Result<i64, Error> {
        self.incr(&format!("{}:{}", name, worker_id)).await
    }
}
