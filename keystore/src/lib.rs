pub mod dsn;
mod error;
mod pool;

pub use dsn::{parse_dsn, RedisDsn, Scheme};
pub use error::Error;
pub use pool::KeyStorePool;

pub use deadpool_redis::Connection;
pub use redis::AsyncCommands;
