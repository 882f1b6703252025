use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("Store: {0}")]
    Store(#[from] gm_store::StoreError),
    #[error("Config: {0}")]
    Config(#[from] crate::config::ConfigError),
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),
}

pub type CoreResult<T> = Result<T, CoreError>;
