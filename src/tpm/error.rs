use thiserror::Error;

use super::constants::{TPM_ERR_DEACTIVATED, TPM_ERR_DISABLED};

pub type TpmResult<T> = Result<T, TpmError>;

/// Failures of a TPM transfer or of the operations built on it.
///
/// Everything except [`TpmError::Tpm`] is a local or bus failure; `Tpm`
/// carries a non-zero status code the device returned for a command that was
/// otherwise transferred correctly.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum TpmError {
    /// The command buffer is shorter than its header, its handle area, or
    /// declares a length smaller than the header.
    #[error("malformed command buffer")]
    InvalidCommand,

    /// The header declares more bytes than the buffer holds.
    #[error("command length {count} exceeds buffer size {bufsiz}")]
    CommandTooLarge { count: usize, bufsiz: usize },

    /// A caller-supplied argument is out of range.
    #[error("invalid argument")]
    InvalidArgument,

    /// The transport lost the device.
    #[error("device disconnected")]
    Pipe,

    /// Any other transport failure, with a transport-defined code.
    #[error("transport error {0}")]
    Bus(i32),

    /// The requested locality was not granted.
    #[error("locality {0} not granted")]
    Locality(u8),

    /// The device reported the command as canceled.
    #[error("operation canceled")]
    Canceled,

    /// The device did not complete within the ordinal duration.
    #[error("operation timed out")]
    Timeout,

    /// The response is shorter than expected or disagrees with its header.
    #[error("malformed response: {len} bytes received, {expected} expected")]
    ShortResponse { len: usize, expected: usize },

    /// The session space failed to translate the command or its response.
    /// The underlying error is logged.
    #[error("session space error")]
    Space,

    /// The device answered every request without returning any data.
    #[error("device returned no data")]
    NoData,

    /// The operation is not available on this device.
    #[error("no such device")]
    NoDevice,

    /// More digest banks than the fixed bank table holds.
    #[error("{count} active banks exceed capacity {capacity}")]
    TooManyBanks { count: usize, capacity: usize },

    /// The device executed the command and returned a non-zero status.
    #[error("TPM returned status {0:#x}")]
    Tpm(u32),
}

impl TpmError {
    /// Device status code, if this is a device-reported failure.
    pub fn rc(&self) -> Option<u32> {
        match self {
            TpmError::Tpm(rc) => Some(*rc),
            _ => None,
        }
    }

    /// True for the TPM1 "disabled"/"deactivated" statuses, which are routine
    /// on platforms where the owner turned the device off.
    pub fn is_soft(&self) -> bool {
        matches!(self, TpmError::Tpm(TPM_ERR_DISABLED | TPM_ERR_DEACTIVATED))
    }
}
