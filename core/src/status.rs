//! Per-job status records (spec §4.4): state, timestamps, optional result.

use chrono::{DateTime, Utc};
use keystore::{AsyncCommands, KeyStorePool};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Error;

const STATUS_TTL_SECONDS: usize = 86_400;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum JobState {
    Waiting,
    Running,
    Failed,
    Complete,
}

impl JobState {
    /// Encodes the partial order WAITING < RUNNING < {COMPLETE, FAILED}.
    fn rank(self) -> u8 {
        match self {
            JobState::Waiting => 0,
            JobState::Running => 1,
            JobState::Failed => 2,
            JobState::Complete => 2,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, JobState::Failed | JobState::Complete)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusRecord {
    pub state: JobState,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub result: Option<Value>,
}

#[derive(Clone)]
pub struct StatusTracker {
    pool: KeyStorePool,
    prefix: String,
}

impl StatusTracker {
    pub fn new(pool: KeyStorePool, prefix: impl Into<String>) -> Self {
        StatusTracker {
            pool,
            prefix: prefix.into(),
        }
    }

    fn key(&self, id: &str) -> String {
        format!("{}job:{}:status", self.prefix, id)
    }

    pub async fn create(&self, id: &str) -> Result<(), Error> {
        let now = Utc::now();
        let record = StatusRecord {
            state: JobState::Waiting,
            started_at: now,
            updated_at: now,
            result: None,
        };
        let mut conn = self.pool.get().await?;
        let json = serde_json::to_string(&record)?;
        conn.set(self.key(id), json).await.map_err(keystore::Error::from)?;
        Ok(())
    }

    pub async fn update(
        &self,
        id: &str,
        state: JobState,
        result: Option<Value>,
    ) -> Result<(), Error> {
        let mut conn = self.pool.get().await?;
        let key = self.key(id);

        let existing: Option<String> = conn.get(&key).await.map_err(keystore::Error::from)?;
        if let Some(existing) = &existing {
            if let Ok(current) = serde_json::from_str::<StatusRecord>(existing) {
                if state.rank() < current.state.rank() {
                    tracing::debug!(
                        job_id = %id,
                        from = ?current.state,
                        to = ?state,
                        "ignoring out-of-order status transition"
                    );
                    return Ok(());
                }
            }
        }

        let record = StatusRecord {
            state,
            started_at: existing
                .as_deref()
                .and_then(|s| serde_json::from_str::<StatusRecord>(s).ok())
                .map(|r| r.started_at)
                .unwrap_or_else(Utc::now),
            updated_at: Utc::now(),
            result,
        };

        let json = serde_json::to_string(&record)?;
        conn.set::<_, _, ()>(&key, json)
            .await
            .map_err(keystore::Error::from)?;

        if state.is_terminal() {
            conn.expire::<_, ()>(&key, STATUS_TTL_SECONDS)
                .await
                .map_err(keystore::Error::from)?;
        }

        Ok(())
    }

    pub async fn get(&self, id: &str) -> Result<Option<StatusRecord>, Error> {
        let mut conn = self.pool.get().await?;
        let raw: Option<String> = conn.get(self.key(id)).await.map_err(keystore::Error::from)?;
        match raw {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    pub async fn is_tracking(&self, id: &str) -> Result<bool, Error> {
        let mut conn = self.pool.get().await?;
        let exists: bool = conn.exists(self.key(id)).await.map_err(keystore::Error::from)?;
        Ok(exists)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_rank_orders_waiting_below_terminal() {
        assert!(JobState::Waiting.rank() < JobState::Running.rank());
        assert!(JobState::Running.rank() < JobState::Complete.rank());
        assert!(JobState::Running.rank() < JobState::Failed.rank());
    }

    #[test]
    fn complete_and_failed_are_both_terminal() {
        assert!(JobState::Complete.is_terminal());
        assert!(JobState::Failed.is_terminal());
        assert!(!JobState::Running.is_terminal());
        assert!(!JobState::Waiting.is_terminal());
    }
}
