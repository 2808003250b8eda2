use thiserror::Error;

/// Failures of the command channel that are not capacity exhaustion.
///
/// Running out of command memory is reported as `None` by the allocation
/// calls, not through this type.
#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("invalid channel configuration: {0}")]
    InvalidConfig(String),

    /// The other half of the channel has been dropped.
    #[error("command channel disconnected")]
    Disconnected,

    #[error("config i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("config parse error: {0}")]
    Json(#[from] serde_json::Error),
}
