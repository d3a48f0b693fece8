use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Redis error {0}")]
    Transport(#[from] redis::RedisError),

    #[error("Redis connection error {0}")]
    Pool(#[from] deadpool::managed::PoolError<redis::RedisError>),

    #[error("Redis pool creation error {0}")]
    PoolCreation(#[from] deadpool_redis::CreatePoolError),

    #[error("Invalid Redis DSN: {0}")]
    Config(String),
}
