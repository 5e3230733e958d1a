//! Version-specific command encoders, selected once when a chip is attached.

mod tpm1;
mod tpm2;

pub use tpm1::Tpm1;
pub use tpm2::Tpm2;

use super::chip::BankTable;
use super::constants::TPM_DIGEST_SIZE;
use super::error::{TpmError, TpmResult};
use super::ops::CommandChannel;
use super::types::{CcAttrTable, Timing, TpmDigest, TpmVersion, TrustedKeyOptions, TrustedKeyPayload};

pub static TPM1: Tpm1 = Tpm1;
pub static TPM2: Tpm2 = Tpm2;

pub fn for_version(version: TpmVersion) -> &'static dyn TpmProtocol {
    match version {
        TpmVersion::Tpm1 => &TPM1,
        TpmVersion::Tpm2 => &TPM2,
    }
}

/// Command set of one TPM family.
///
/// Every command goes through the chip's [`CommandChannel`], so the retry
/// loop and status checks apply uniformly.
pub trait TpmProtocol: Sync {
    fn version(&self) -> TpmVersion;

    /// Longest time `ordinal` may take, in milliseconds.
    fn ordinal_duration(&self, timing: &Timing, ordinal: u32) -> u64;

    /// Query (or, for TPM2, fix) the interface timeouts and durations.
    fn get_timeouts(&self, chip: &dyn CommandChannel) -> TpmResult<Timing>;

    /// Bring the device to an operational state: start it if needed and run
    /// its self test.
    fn startup(&self, chip: &dyn CommandChannel, timing: &Timing) -> TpmResult<()>;

    /// Command attribute table used for validation.
    fn command_attributes(&self, _chip: &dyn CommandChannel) -> TpmResult<Option<CcAttrTable>> {
        Ok(None)
    }

    /// Allocated PCR banks.
    fn pcr_allocation(&self, _chip: &dyn CommandChannel) -> TpmResult<Option<BankTable>> {
        Ok(None)
    }

    /// Read the SHA-1 bank of `pcr_idx`.
    fn pcr_read(&self, chip: &dyn CommandChannel, pcr_idx: u32, out: &mut [u8; TPM_DIGEST_SIZE]) -> TpmResult<()>;

    fn pcr_extend(&self, chip: &dyn CommandChannel, pcr_idx: u32, digests: &[TpmDigest]) -> TpmResult<()>;

    /// Fill `out` with device randomness, returning how many bytes arrived.
    fn get_random(&self, chip: &dyn CommandChannel, out: &mut [u8]) -> TpmResult<usize>;

    /// Save device state ahead of a power transition.
    fn pm_suspend(&self, chip: &dyn CommandChannel, suspend_pcr: u32) -> TpmResult<()>;

    fn seal_trusted(
        &self,
        _chip: &dyn CommandChannel,
        _payload: &mut TrustedKeyPayload,
        _options: &TrustedKeyOptions,
    ) -> TpmResult<()> {
        Err(TpmError::NoDevice)
    }

    fn unseal_trusted(
        &self,
        _chip: &dyn CommandChannel,
        _payload: &mut TrustedKeyPayload,
        _options: &TrustedKeyOptions,
    ) -> TpmResult<()> {
        Err(TpmError::NoDevice)
    }
}
