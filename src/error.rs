use thiserror::Error;

#[derive(Error, Debug)]
pub enum RxformsError {
    #[error("Config error: {0}")]
    Config(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Template source error: {0}")]
    Source(String),
    #[error("Name registry error: {0}")]
    Registry(String),
    #[error("No free name for '{base}' after {attempts} attempts")]
    NameExhausted { base: String, attempts: usize },
    #[error("Lock poisoned: {0}")]
    Lock(String),
}

pub type Result<T> = std::result::Result<T, RxformsError>;

// Helper conversions
impl From<config::ConfigError> for RxformsError {
    fn from(e: config::ConfigError) -> Self { Self::Config(e.to_string()) }
}

impl<T> From<std::sync::PoisonError<T>> for RxformsError {
    fn from(e: std::sync::PoisonError<T>) -> Self { Self::Lock(e.to_string()) }
}
