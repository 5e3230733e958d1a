use core::sync::atomic::{AtomicU8, Ordering};

use arrayvec::ArrayVec;

use super::constants::{TPM_ALG_ERROR, TPM_ALG_SHA1, TPM_MAX_ACTIVE_BANKS};
use super::error::{TpmError, TpmResult};
use super::ops::{CommandChannel, SessionSpace, Timer, Transport};
use super::protocol::{self, TpmProtocol};
use super::types::{CcAttrTable, ChipFlags, CommandAttributes, Timing, TpmVersion, TransmitFlags};

const NO_LOCALITY: u8 = u8::MAX;

pub type BankTable = ArrayVec<u16, TPM_MAX_ACTIVE_BANKS>;

/// Attach-time configuration of a chip.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChipConfig {
    pub version: TpmVersion,
    /// Completion is signalled by interrupt; the core does not poll.
    pub irq: bool,
    /// The device keeps its state across suspend; skip the suspend sequence.
    pub always_powered: bool,
    pub auto_startup: bool,
    /// PCR extended with a dummy value before a TPM1 SaveState; 0 disables.
    pub suspend_pcr: u32,
    pub active_banks: BankTable,
}

impl Default for ChipConfig {
    fn default() -> Self {
        let mut active_banks = BankTable::new();
        active_banks.push(TPM_ALG_SHA1);
        Self {
            version: TpmVersion::Tpm2,
            irq: false,
            always_powered: false,
            auto_startup: true,
            suspend_pcr: 0,
            active_banks,
        }
    }
}

/// One attached TPM.
///
/// Transfers take `&self` and serialize on the internal bus lock; the
/// attach-time setters take `&mut self`.
pub struct TpmChip<T, K> {
    pub(crate) transport: T,
    pub(crate) timer: K,
    pub(crate) protocol: &'static dyn TpmProtocol,
    pub(crate) flags: ChipFlags,
    locality: AtomicU8,
    pub(crate) bus: spin::Mutex<()>,
    pub(crate) timing: Timing,
    cc_attrs: CcAttrTable,
    active_banks: BankTable,
    pub(crate) suspend_pcr: u32,
}

impl<T: Transport, K: Timer> TpmChip<T, K> {
    pub fn new(transport: T, timer: K, config: ChipConfig) -> Self {
        let mut flags = ChipFlags::empty();
        flags.set(ChipFlags::TPM2, config.version == TpmVersion::Tpm2);
        flags.set(ChipFlags::IRQ, config.irq);
        flags.set(ChipFlags::ALWAYS_POWERED, config.always_powered);
        flags.set(ChipFlags::AUTO_STARTUP, config.auto_startup);

        let mut active_banks = config.active_banks;
        active_banks.retain(|alg| *alg != TPM_ALG_ERROR);

        Self {
            transport,
            timer,
            protocol: protocol::for_version(config.version),
            flags,
            locality: AtomicU8::new(NO_LOCALITY),
            bus: spin::Mutex::new(()),
            timing: Timing::default(),
            cc_attrs: CcAttrTable::default(),
            active_banks,
            suspend_pcr: config.suspend_pcr,
        }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn timer(&self) -> &K {
        &self.timer
    }

    pub fn flags(&self) -> ChipFlags {
        self.flags
    }

    pub fn is_tpm2(&self) -> bool {
        self.flags.contains(ChipFlags::TPM2)
    }

    pub fn version(&self) -> TpmVersion {
        self.protocol.version()
    }

    /// Locality currently owned, if any.
    pub fn locality(&self) -> Option<u8> {
        match self.locality.load(Ordering::Acquire) {
            NO_LOCALITY => None,
            locality => Some(locality),
        }
    }

    pub(crate) fn set_locality(&self, locality: Option<u8>) {
        self.locality.store(locality.unwrap_or(NO_LOCALITY), Ordering::Release);
    }

    /// True while some transfer holds the bus lock.
    pub fn is_busy(&self) -> bool {
        self.bus.is_locked()
    }

    pub fn timing(&self) -> &Timing {
        &self.timing
    }

    pub fn set_timing(&mut self, timing: Timing) {
        self.timing = timing;
        self.flags.insert(ChipFlags::HAVE_TIMEOUTS);
    }

    pub fn cc_attrs(&self) -> &CcAttrTable {
        &self.cc_attrs
    }

    pub fn set_cc_attrs(&mut self, table: CcAttrTable) {
        self.cc_attrs = table;
    }

    pub fn active_banks(&self) -> &[u16] {
        &self.active_banks
    }

    /// Replace the active bank table. More banks than the table holds is an
    /// error rather than a silent truncation.
    pub fn set_active_banks(&mut self, banks: &[u16]) -> TpmResult<()> {
        let mut table = BankTable::new();
        for alg in banks.iter().copied().filter(|alg| *alg != TPM_ALG_ERROR) {
            table
                .try_push(alg)
                .map_err(|_| TpmError::TooManyBanks { count: banks.len(), capacity: TPM_MAX_ACTIVE_BANKS })?;
        }
        self.active_banks = table;
        Ok(())
    }

    /// Longest time the device may take for `ordinal`, in milliseconds.
    pub fn calc_ordinal_duration(&self, ordinal: u32) -> u64 {
        self.protocol.ordinal_duration(&self.timing, ordinal)
    }

    /// The attribute table consulted by command validation: only for TPM2
    /// and only once loaded.
    pub(crate) fn validation_attrs(&self) -> Option<&dyn CommandAttributes> {
        (self.is_tpm2() && !self.cc_attrs.is_empty()).then_some(&self.cc_attrs as &dyn CommandAttributes)
    }
}

impl<T: Transport, K: Timer> CommandChannel for TpmChip<T, K> {
    fn transmit(
        &self,
        space: Option<&mut dyn SessionSpace>,
        buf: &mut [u8],
        flags: TransmitFlags,
    ) -> TpmResult<usize> {
        TpmChip::transmit(self, space, buf, flags)
    }

    fn transmit_cmd(
        &self,
        space: Option<&mut dyn SessionSpace>,
        buf: &mut [u8],
        min_rsp_body_length: usize,
        flags: TransmitFlags,
        desc: Option<&str>,
    ) -> TpmResult<usize> {
        TpmChip::transmit_cmd(self, space, buf, min_rsp_body_length, flags, desc)
    }

    fn lock_bus(&self) -> spin::MutexGuard<'_, ()> {
        self.bus.lock()
    }

    fn timer(&self) -> &dyn Timer {
        &self.timer
    }
}
