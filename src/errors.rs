use std::io;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DriverError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("bus transport error: {0}")]
    Transport(String),
    #[error("short bus transfer: requested {requested} bytes, transferred {transferred}")]
    ShortTransfer { requested: usize, transferred: usize },
    #[error("bus session configuration failed: {0}")]
    Session(String),
    #[error("frame sync lost: {0}")]
    SyncLost(String),
    #[error("sensor still busy after {polls} extended config polls")]
    DeviceBusyTimeout { polls: u32 },
    #[error("telemetry error: {0}")]
    Telemetry(String),
    #[error("invalid configuration: {0}")]
    Config(String),
}

impl DriverError {
    /// True for failures of the bus itself, as opposed to data-level problems.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            DriverError::Transport(_) | DriverError::ShortTransfer { .. } | DriverError::Io(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, DriverError>;
