//! Worker registry (spec §3): the set of live worker identifiers, each
//! with a start time and an optional "working on" record describing the
//! job currently in flight.

use chrono::{DateTime, Utc};
use redwork_core::keystore::{AsyncCommands, KeyStorePool};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Error;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkingOn {
    pub queue: String,
    pub class: String,
    pub id: Option<String>,
    pub payload: Value,
    pub run_at: DateTime<Utc>,
}

#[derive(Clone)]
pub struct WorkerRegistry {
    pool: KeyStorePool,
    prefix: String,
}

impl WorkerRegistry {
    pub fn new(pool: KeyStorePool, prefix: impl Into<String>) -> Self {
        WorkerRegistry {
            pool,
            prefix: prefix.into(),
        }
    }

    fn workers_key(&self) -> String {
        format!("{}workers", self.prefix)
    }

    fn worker_key(&self, worker_id: &str) -> String {
        format!("{}worker:{}", self.prefix, worker_id)
    }

    fn started_key(&self, worker_id: &str) -> String {
        format!("{}worker:{}:started", self.prefix, worker_id)
    }

    fn pid_key(&self, job_id: &str) -> String {
        format!("{}job:{}:pid", self.prefix, job_id)
    }

    pub async fn register(&self, worker_id: &str) -> Result<(), Error> {
        let mut conn = self.pool.get().await?;
        redis::pipe()
            .sadd(self.workers_key(), worker_id)
            .ignore()
            .set(self.started_key(worker_id), Utc::now().to_rfc3339())
            .ignore()
            .query_async(&mut *conn)
            .await
            .map_err(redwork_core::keystore::Error::from)?;
        Ok(())
    }

    pub async fn unregister(&self, worker_id: &str) -> Result<(), Error> {
        let mut conn = self.pool.get().await?;
        redis::pipe()
            .srem(self.workers_key(), worker_id)
            .ignore()
            .del(self.worker_key(worker_id))
            .ignore()
            .del(self.started_key(worker_id))
            .ignore()
            .query_async(&mut *conn)
            .await
            .map_err(redwork_core::keystore::Error::from)?;
        Ok(())
    }

    pub async fn all_workers(&self) -> Result<std::collections::HashSet<String>, Error> {
        let mut conn = self.pool.get().await?;
        let members = conn
            .smembers(self.workers_key())
            .await
            .map_err(redwork_core::keystore::Error::from)?;
        Ok(members)
    }

    pub async fn set_working_on(&self, worker_id: &str, job: &WorkingOn) -> Result<(), Error> {
        let mut conn = self.pool.get().await?;
        let json = serde_json::to_string(job)?;
        conn.set::<_, _, ()>(self.worker_key(worker_id), json)
            .await
            .map_err(redwork_core::keystore::Error::from)?;
        Ok(())
    }

    pub async fn working_on(&self, worker_id: &str) -> Result<Option<WorkingOn>, Error> {
        let mut conn = self.pool.get().await?;
        let raw: Option<String> = conn
            .get(self.worker_key(worker_id))
            .await
            .map_err(redwork_core::keystore::Error::from)?;
        match raw {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    pub async fn clear_working_on(&self, worker_id: &str) -> Result<(), Error> {
        let mut conn = self.pool.get().await?;
        conn.del::<_, ()>(self.worker_key(worker_id))
            .await
            .map_err(redwork_core::keystore::Error::from)?;
        Ok(())
    }

    pub async fn set_pid(&self, job_id: &str, pid: i32) -> Result<(), Error> {
        let mut conn = self.pool.get().await?;
        conn.set::<_, _, ()>(self.pid_key(job_id), pid)
            .await
            .map_err(redwork_core::keystore::Error::from)?;
        Ok(())
    }

    pub async fn clear_pid(&self, job_id: &str) -> Result<(), Error> {
        let mut conn = self.pool.get().await?;
        conn.del::<_, ()>(self.pid_key(job_id))
            .await
            .map_err(redwork_core::keystore::Error::from)?;
        Ok(())
    }
}

/// Builds the `host:pid:queue,queue` worker identity string the data model
/// requires.
pub fn worker_identity(host: &str, pid: u32, queues: &[String]) -> String {
    format!("{}:{}:{}", host, pid, queues.join(","))
}

/// Splits a worker identity string back into `(host, pid)`, ignoring the
/// queue list, for orphan-liveness checks.
pub fn parse_identity_host_pid(identity: &str) -> Option<(&str, u32)> {
    let mut parts = identity.splitn(3, ':');
    let host = parts.next()?;
    let pid = parts.next()?.parse().ok()?;
    Some((host, pid))
}

/// `kill(pid, 0)`: sends no signal, just reports whether the process still
/// exists and is visible to us.
pub fn pid_is_alive(pid: u32) -> bool {
    unsafe { libc::kill(pid as libc::pid_t, 0) == 0 }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_identity_string() {
        let id = worker_identity("host1", 999, &["q1".to_string(), "q2".to_string()]);
        assert_eq!(id, "host1:999:q1,q2");
    }

    #[test]
    fn parses_host_and_pid() {
        let (host, pid) = parse_identity_host_pid("host1:999:q1,q2").unwrap();
        assert_eq!(host, "host1");
        assert_eq!(pid, 999);
    }

    #[test]
    fn rejects_malformed_identity() {
        assert!(parse_identity_host_pid("not-an-identity").is_none());
    }
}
