use thiserror::Error;

/// Domain-specific error types for adcue
#[derive(Error, Debug)]
pub enum AdCueError {
    #[error("Failed to fetch VAST from ad server: {0}")]
    VastFetch(#[from] reqwest::Error),

    #[error("Failed to parse VAST XML: {0}")]
    VastParse(String),

    #[error("No playable ads in VAST response: {0}")]
    NoAds(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("VPAID protocol error: {0}")]
    SandboxProtocol(String),

    #[error("Timed out waiting for {0}")]
    Timeout(String),

    #[error("Ad playback cancelled: {0}")]
    Cancelled(String),
}

// Convenience type alias for Results
pub type Result<T> = std::result::Result<T, AdCueError>;
