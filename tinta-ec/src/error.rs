use thiserror::Error;

/// Failure of a single EC operation.
///
/// A readback that differs from the written value is not an error; it is
/// reported through [`crate::Verified`] with `success == false`.
#[derive(Debug, Error)]
pub enum EcError {
    /// A buffer handshake gate did not open before the deadline. Hardware
    /// state after this is unknown.
    #[error("EC {stage} buffer timeout")]
    Timeout { stage: TimeoutStage },

    /// Malformed parameters; no hardware was touched.
    #[error("{0}")]
    InvalidArgument(String),

    /// Port access was never established at startup.
    #[error("EC access unavailable: {0}")]
    Unavailable(String),

    #[error("EC port I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Which handshake gate timed out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutStage {
    /// Waiting for IBF to clear.
    InputBuffer,
    /// Waiting for OBF to be set.
    OutputBuffer,
}

impl std::fmt::Display for TimeoutStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TimeoutStage::InputBuffer => f.write_str("input (IBF)"),
            TimeoutStage::OutputBuffer => f.write_str("output (OBF)"),
        }
    }
}

/// Why port access did not become available at startup.
#[derive(Debug, Error)]
pub enum AccessError {
    #[error("Secure Boot is enabled; kernel lockdown blocks direct I/O port access")]
    SecureBootBlocked,

    #[error("could not determine Secure Boot state: {0}")]
    SecureBootUnknown(std::io::Error),

    #[error("failed to get I/O port access (are you root?): {0}")]
    PermissionDenied(std::io::Error),

    #[error("EC read verification failed: {0}")]
    VerificationFailed(EcError),
}
