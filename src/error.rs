use thiserror::Error;

// Main Application Error Type

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Failed to read image: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to decode image header: {0}")]
    Image(#[from] image::ImageError),
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),
    #[error("Failed to start vision engine '{0}': {1}")]
    EngineSpawn(String, std::io::Error),
    #[error("Failed to send job to vision engine: {0}")]
    EngineSend(String),
    #[error("The vision engine failed to initialize.")]
    EngineUnavailable,
    #[error("Malformed engine notification: {0}")]
    Protocol(#[from] serde_json::Error),
    #[error("The analyzer has been shut down.")]
    Disposed,
    #[error("{0}")]
    Usage(String),
}
