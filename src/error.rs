use thiserror::Error;

#[derive(Error, Debug)]
pub enum GraphlateError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parsing error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Translation error: {0}")]
    Translation(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Graph error: {0}")]
    Graph(String),

    #[error("Installation error: {0}")]
    Install(String),

    #[error("Submission error: {0}")]
    Submit(String),

    #[error("Translation cancelled")]
    Cancelled,

    #[error("Translation timed out after {0}s")]
    Timeout(u64),

    #[error("File not found: {0}")]
    FileNotFound(String),
}

pub type Result<T> = std::result::Result<T, GraphlateError>;
