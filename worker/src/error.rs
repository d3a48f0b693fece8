use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Core(#[from] redwork_core::Error),

    #[error(transparent)]
    KeyStore(#[from] redwork_core::keystore::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error("fork failed: {0}")]
    Fork(nix::Error),

    #[error("signal handling error: {0}")]
    Signal(nix::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("worker process exited without reporting a result (signal {0:?})")]
    DirtyExit(Option<i32>),
}
