pub mod buf;
pub mod chip;
pub mod constants;
pub mod error;
pub mod interface;
pub mod ops;
pub mod poll;
pub mod protocol;
pub mod sequencer;
pub mod tpm_core;
pub mod types;
pub mod validate;

#[cfg(test)]
pub(crate) mod testing;

pub use buf::{ResponseReader, TpmBuf};
pub use chip::{BankTable, ChipConfig, TpmChip};
pub use error::{TpmError, TpmResult};
pub use ops::*;
pub use poll::{Completion, wait_for_completion};
pub use protocol::{TPM1, TPM2, TpmProtocol};
pub use tpm_core::Backoff;
pub use types::*;
pub use validate::{Validation, validate_command};
