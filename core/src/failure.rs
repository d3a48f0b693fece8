//! Pluggable failure recording (spec §4.7). The default backend writes one
//! JSON envelope per failure to a `failed` list; callers may swap in any
//! other sink behind the same `record` entry point (e.g. to forward to an
//! external error tracker).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use keystore::{AsyncCommands, KeyStorePool};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Error;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailurePayload {
    pub payload: Value,
    pub error_kind: String,
    pub error_message: String,
    pub backtrace: Option<String>,
    pub worker_id: String,
    pub queue: String,
    pub failed_at: DateTime<Utc>,
}

#[async_trait]
pub trait FailureSink: Send + Sync {
    async fn record(&self, failure: FailurePayload) -> Result<(), Error>;
}

#[derive(Clone)]
pub struct RedisFailureSink {
    pool: KeyStorePool,
    prefix: String,
}

impl RedisFailureSink {
    pub fn new(pool: KeyStorePool, prefix: impl Into<String>) -> Self {
        RedisFailureSink {
            pool,
            prefix: prefix.into(),
        }
    }

    fn key(&self) -> String {
        format!("{}failed", self.prefix)
    }
}

#[async_trait]
impl FailureSink for RedisFailureSink {
    async fn record(&self, failure: FailurePayload) -> Result<(), Error> {
        let mut conn = self.pool.get().await?;
        let json = serde_json::to_string(&failure)?;
        conn.lpush::<_, _, ()>(self.key(), json)
            .await
            .map_err(keystore::Error::from)?;
        Ok(())
    }
}
