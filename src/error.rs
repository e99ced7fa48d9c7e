use thiserror::Error;

/// Errors that abort a scan before or while it runs.
///
/// Per-port network failures are never reported through this type; they are
/// folded into [`crate::types::ProbeOutcome`].
#[derive(Debug, Error)]
pub enum ScanError {
    #[error("invalid port value: {0}")]
    InvalidPort(String),

    #[error("invalid port range {start}-{end} (start > end)")]
    InvalidRange { start: u16, end: u16 },

    #[error("concurrency must be at least 1")]
    InvalidConcurrency,

    #[error("invalid timeout: {0}")]
    InvalidTimeout(String),

    #[error("invalid host: {0:?}")]
    InvalidHost(String),

    #[error("failed to resolve host {host}: {source}")]
    Resolve {
        host: String,
        #[source]
        source: std::io::Error,
    },

    #[error("out of file descriptors while probing port {port}: {source}")]
    ResourceExhausted {
        port: u16,
        #[source]
        source: std::io::Error,
    },

    #[error("scan worker failed: {0}")]
    Worker(#[from] tokio::task::JoinError),
}

pub type Result<T> = std::result::Result<T, ScanError>;
