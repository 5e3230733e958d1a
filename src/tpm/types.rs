use alloc::vec::Vec;

use bitfield::bitfield;
use bitflags::bitflags;

use super::constants::*;

bitflags! {
    /// Per-transfer flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct TransmitFlags: u32 {
        /// The caller already holds the bus lock.
        const UNLOCKED = 1 << 0;
        /// Issued from inside another transfer; skip lock, locality and
        /// ready/idle handling.
        const NESTED = 1 << 1;
    }
}

impl TransmitFlags {
    pub(crate) fn takes_lock(self) -> bool {
        !self.intersects(TransmitFlags::UNLOCKED | TransmitFlags::NESTED)
    }

    pub(crate) fn is_nested(self) -> bool {
        self.contains(TransmitFlags::NESTED)
    }
}

bitflags! {
    /// Properties of an attached device.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct ChipFlags: u32 {
        const TPM2 = 1 << 0;
        const IRQ = 1 << 1;
        const HAVE_TIMEOUTS = 1 << 2;
        const ALWAYS_POWERED = 1 << 3;
        const AUTO_STARTUP = 1 << 4;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TpmVersion {
    Tpm1,
    #[default]
    Tpm2,
}

/// Interface timeouts A-D, milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TpmTimeout {
    pub timeout_a: u64,
    pub timeout_b: u64,
    pub timeout_c: u64,
    pub timeout_d: u64,
}

impl Default for TpmTimeout {
    fn default() -> Self {
        Self { timeout_a: TIMEOUT_A, timeout_b: TIMEOUT_B, timeout_c: TIMEOUT_C, timeout_d: TIMEOUT_D }
    }
}

/// Command duration classes, milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TpmDuration {
    pub short: u64,
    pub medium: u64,
    pub long: u64,
    pub long_long: u64,
}

impl Default for TpmDuration {
    fn default() -> Self {
        Self {
            short: TPM1_DURATION_SHORT,
            medium: TPM1_DURATION_MEDIUM,
            long: TPM1_DURATION_LONG,
            long_long: TPM1_DURATION_LONG,
        }
    }
}

/// Timeouts and durations discovered for a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Timing {
    pub timeout: TpmTimeout,
    pub duration: TpmDuration,
}

pub(crate) fn be16_at(buf: &[u8], off: usize) -> u16 {
    u16::from_be_bytes([buf[off], buf[off + 1]])
}

pub(crate) fn be32_at(buf: &[u8], off: usize) -> u32 {
    u32::from_be_bytes([buf[off], buf[off + 1], buf[off + 2], buf[off + 3]])
}

/// Tag field of a header. `buf` must hold at least a header.
pub fn header_tag(buf: &[u8]) -> u16 {
    be16_at(buf, HEADER_TAG_OFFSET)
}

/// Length field of a header. `buf` must hold at least a header.
pub fn header_length(buf: &[u8]) -> u32 {
    be32_at(buf, HEADER_SIZE_OFFSET)
}

/// Ordinal of a command, or return code of a response.
pub fn header_code(buf: &[u8]) -> u32 {
    be32_at(buf, HEADER_CODE_OFFSET)
}

pub fn write_header(buf: &mut [u8], tag: u16, length: u32, code: u32) {
    buf[HEADER_TAG_OFFSET..HEADER_SIZE_OFFSET].copy_from_slice(&tag.to_be_bytes());
    buf[HEADER_SIZE_OFFSET..HEADER_CODE_OFFSET].copy_from_slice(&length.to_be_bytes());
    buf[HEADER_CODE_OFFSET..TPM_HEADER_SIZE].copy_from_slice(&code.to_be_bytes());
}

bitfield! {
    /// TPMA_CC: one entry of the device's command attribute list.
    #[derive(Clone, Copy, PartialEq, Eq)]
    pub struct TpmaCc(u32);
    impl Debug;
    pub u16, command_index, _: 15, 0;
    pub nv, _: 22;
    pub extensive, _: 23;
    pub flushed, _: 24;
    pub u8, c_handles, _: 27, 25;
    pub r_handle, _: 28;
    pub vendor, _: 29;
}

impl From<u32> for TpmaCc {
    fn from(raw: u32) -> Self {
        TpmaCc(raw)
    }
}

impl TpmaCc {
    const CC_MASK: u32 = 1 << 29 | 0xFFFF;

    fn matches(&self, cc: u32) -> bool {
        cc & !Self::CC_MASK == 0 && cc == self.0 & Self::CC_MASK
    }
}

/// Lookup of the handle arity a command declares.
pub trait CommandAttributes {
    /// Number of handles in the command area of `cc`, `None` if the device
    /// does not implement `cc`.
    fn handle_count(&self, cc: u32) -> Option<usize>;

    fn is_empty(&self) -> bool;
}

/// Command attribute table as reported by TPM2_GetCapability(TPM_CAP_COMMANDS).
#[derive(Debug, Clone, Default)]
pub struct CcAttrTable {
    attrs: Vec<TpmaCc>,
}

impl CcAttrTable {
    pub fn new(raw: impl IntoIterator<Item = u32>) -> Self {
        Self { attrs: raw.into_iter().map(TpmaCc::from).collect() }
    }

    pub fn len(&self) -> usize {
        self.attrs.len()
    }

    pub fn find(&self, cc: u32) -> Option<TpmaCc> {
        self.attrs.iter().copied().find(|a| a.matches(cc))
    }
}

impl CommandAttributes for CcAttrTable {
    fn handle_count(&self, cc: u32) -> Option<usize> {
        self.find(cc).map(|a| usize::from(a.c_handles()))
    }

    fn is_empty(&self) -> bool {
        self.attrs.is_empty()
    }
}

/// One bank's digest for PCR_Extend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TpmDigest {
    pub alg_id: u16,
    pub digest: [u8; TPM_MAX_DIGEST_SIZE],
}

impl TpmDigest {
    /// `hash` zero-padded to the bank's digest size.
    pub fn from_sha1(alg_id: u16, hash: &[u8; TPM_DIGEST_SIZE]) -> Self {
        let mut digest = [0u8; TPM_MAX_DIGEST_SIZE];
        digest[..TPM_DIGEST_SIZE].copy_from_slice(hash);
        Self { alg_id, digest }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        digest_size(self.alg_id).map(|n| &self.digest[..n])
    }
}

/// Key material sealed to, or unsealed from, the device.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TrustedKeyPayload {
    pub key: Vec<u8>,
    pub migratable: bool,
    /// Sealed blob: TPM2B_PRIVATE followed by TPM2B_PUBLIC.
    pub blob: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrustedKeyOptions {
    /// Parent storage key.
    pub key_handle: u32,
    pub key_auth: Vec<u8>,
    pub blob_auth: Vec<u8>,
    pub hash: u16,
    /// Authorization policy bound to the sealed object; empty for none.
    pub policy_digest: Vec<u8>,
    /// Policy session authorizing the unseal; 0 uses the password session.
    pub policy_handle: u32,
}

impl Default for TrustedKeyOptions {
    fn default() -> Self {
        Self {
            key_handle: 0,
            key_auth: Vec::new(),
            blob_auth: Vec::new(),
            hash: TPM_ALG_SHA256,
            policy_digest: Vec::new(),
            policy_handle: 0,
        }
    }
}
