use thiserror::Error;

#[derive(Error, Debug)]
pub enum ServerError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(#[from] cacheconfig::ConfigError),

    #[error("Connection state error: {0}")]
    State(#[from] connstate::Error),

    #[error("Invalid listen address: {0}")]
    InvalidAddress(String),

    #[error("Security enabled but no keyring configured")]
    MissingKeyring,
}

pub type Result<T> = std::result::Result<T, ServerError>;
