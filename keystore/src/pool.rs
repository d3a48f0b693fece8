use deadpool_redis::{Connection, Pool};

use crate::dsn::RedisDsn;
use crate::error::Error;

/// The CORE's only window onto Redis. Everything above this wrapper talks in
/// terms of list/sorted-set/hash/string operations issued against the
/// connection this returns; `KeyStorePool` itself knows nothing about queues,
/// jobs, or schedules.
#[derive(Clone)]
pub struct KeyStorePool {
    pool: Pool,
}

impl KeyStorePool {
    pub fn from_dsn(dsn: &RedisDsn) -> Result<KeyStorePool, Error> {
        let cfg = deadpool_redis::Config {
            url: Some(dsn.to_connection_url()),
            pool: None,
            connection: None,
        };
        let pool = cfg.create_pool(Some(deadpool_redis::Runtime::Tokio1))?;
        Ok(KeyStorePool { pool })
    }

    pub fn from_url(url: &str) -> Result<KeyStorePool, Error> {
        let dsn = crate::dsn::parse_dsn(url)?;
        KeyStorePool::from_dsn(&dsn)
    }

    pub async fn get(&self) -> Result<Connection, Error> {
        self.pool.get().await.map_err(Error::from)
    }
}

impl std::fmt::Debug for KeyStorePool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyStorePool").finish_non_exhaustive()
    }
}
