use thiserror::Error;

/// Recoverable failures at the edges of the access layer
///
/// Register accesses never return these: once a backend is open, a failed
/// access is a fatal invariant violation.
#[derive(Error, Debug)]
pub enum ZenregError {
    #[error("PCI operation failed: {0}")]
    PciError(String),

    #[error("Port I/O unavailable: {0}")]
    PortIoError(String),

    #[error("Physical memory mapping failed: {0}")]
    MapError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Prometheus error: {0}")]
    PrometheusError(#[from] prometheus::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Unsupported architecture: {0}")]
    UnsupportedArchitecture(String),
}

pub type Result<T> = std::result::Result<T, ZenregError>;
