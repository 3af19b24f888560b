use thiserror::Error;

/// Failure categories shared by every subsystem of the node.
///
/// None of these is fatal to the process: hardware errors disable the
/// affected subsystem, transient errors are skipped, link errors are
/// retried by the reconnect policy and validation errors are reported
/// back to whoever sent the bad value.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum NodeError {
    /// Driver or device setup failed; only the owning subsystem is affected
    #[error("hardware init failed: {0}")]
    HardwareInit(String),

    /// A single read or write failed or timed out
    #[error("transient I/O error: {0}")]
    TransientIo(String),

    /// Connect, publish or subscribe failure with the transport's cause code
    #[error("link error (code {code}): {message}")]
    Link { code: i32, message: String },

    /// Out-of-range or malformed configuration value
    #[error("{0}")]
    Validation(String),

    /// Execution context could not be created
    #[error("resource exhausted: {0}")]
    ResourceExhaustion(String),
}

impl NodeError {
    pub fn link(code: i32, message: impl Into<String>) -> Self {
        Self::Link {
            code,
            message: message.into(),
        }
    }

    /// Whether the acquisition loop may simply skip past this error
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::TransientIo(_))
    }
}

pub type NodeResult<T> = std::result::Result<T, NodeError>;
