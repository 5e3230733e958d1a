use log::debug;

use super::constants::{TPM_HANDLE_SIZE, TPM_HEADER_SIZE};
use super::types::{CommandAttributes, header_code};

/// Outcome of inspecting a raw command before it goes near the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Validation {
    Valid,
    /// Shorter than the header, or than the handle area the command declares.
    MalformedLength,
    /// The device does not implement the command code.
    UnsupportedOperation,
}

/// Check `cmd` against the header size and, when a non-empty attribute table
/// is supplied, against the command's handle arity.
pub fn validate_command(cmd: &[u8], attrs: Option<&dyn CommandAttributes>) -> Validation {
    if cmd.len() < TPM_HEADER_SIZE {
        return Validation::MalformedLength;
    }

    let Some(attrs) = attrs.filter(|a| !a.is_empty()) else {
        return Validation::Valid;
    };

    let cc = header_code(cmd);
    let Some(nr_handles) = attrs.handle_count(cc) else {
        debug!("{cc:#06x} is an invalid command");
        return Validation::UnsupportedOperation;
    };

    if cmd.len() < TPM_HEADER_SIZE + TPM_HANDLE_SIZE * nr_handles {
        debug!("insufficient command length {} for {nr_handles} handles", cmd.len());
        return Validation::MalformedLength;
    }

    Validation::Valid
}
