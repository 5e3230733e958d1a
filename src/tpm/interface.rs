//! Typed operations over an attached chip. Each one dispatches to the chip's
//! protocol strategy, which builds the command and runs it through the
//! retry loop.

use arrayvec::ArrayVec;
use log::info;

use super::chip::TpmChip;
use super::constants::{TPM_ALG_SHA1, TPM_DIGEST_SIZE, TPM_ERR_INVALID_POSTINIT, TPM_MAX_ACTIVE_BANKS, TPM_MAX_RNG_DATA};
use super::error::{TpmError, TpmResult};
use super::ops::{Timer, Transport};
use super::types::{ChipFlags, TpmDigest, TransmitFlags, TrustedKeyOptions, TrustedKeyPayload};

impl<T: Transport, K: Timer> TpmChip<T, K> {
    /// Read a PCR from the SHA-1 bank.
    pub fn pcr_read(&self, pcr_idx: u32) -> TpmResult<[u8; TPM_DIGEST_SIZE]> {
        let mut out = [0u8; TPM_DIGEST_SIZE];
        self.protocol.pcr_read(self, pcr_idx, &mut out)?;
        Ok(out)
    }

    /// Extend a PCR with a SHA-1 hash.
    ///
    /// A TPM2 device has every active bank extended, with `hash` zero-padded
    /// to each bank's digest size, so no bank is left open to arbitrary
    /// extends.
    pub fn pcr_extend(&self, pcr_idx: u32, hash: &[u8; TPM_DIGEST_SIZE]) -> TpmResult<()> {
        if !self.is_tpm2() {
            return self.protocol.pcr_extend(self, pcr_idx, &[TpmDigest::from_sha1(TPM_ALG_SHA1, hash)]);
        }

        let digests: ArrayVec<TpmDigest, TPM_MAX_ACTIVE_BANKS> =
            self.active_banks().iter().map(|alg| TpmDigest::from_sha1(*alg, hash)).collect();
        self.protocol.pcr_extend(self, pcr_idx, &digests)
    }

    /// Send a caller-built command. The response overwrites `buf`; its
    /// length is returned.
    pub fn send(&self, buf: &mut [u8]) -> TpmResult<usize> {
        self.transmit_cmd(None, buf, 0, TransmitFlags::empty(), Some("attempting to a send a command"))
    }

    /// Fill `out` with random bytes from the device, returning how many were
    /// written.
    pub fn get_random(&self, out: &mut [u8]) -> TpmResult<usize> {
        if out.is_empty() || out.len() > TPM_MAX_RNG_DATA {
            return Err(TpmError::InvalidArgument);
        }
        self.protocol.get_random(self, out)
    }

    pub fn seal_trusted(&self, payload: &mut TrustedKeyPayload, options: &TrustedKeyOptions) -> TpmResult<()> {
        if !self.is_tpm2() {
            return Err(TpmError::NoDevice);
        }
        self.protocol.seal_trusted(self, payload, options)
    }

    pub fn unseal_trusted(&self, payload: &mut TrustedKeyPayload, options: &TrustedKeyOptions) -> TpmResult<()> {
        if !self.is_tpm2() {
            return Err(TpmError::NoDevice);
        }
        self.protocol.unseal_trusted(self, payload, options)
    }

    /// Discover the interface timeouts and command durations. Runs once;
    /// later calls keep the first result.
    pub fn get_timeouts(&mut self) -> TpmResult<()> {
        if self.flags.contains(ChipFlags::HAVE_TIMEOUTS) {
            return Ok(());
        }
        let protocol = self.protocol;
        let timing = protocol.get_timeouts(&*self)?;
        self.set_timing(timing);
        Ok(())
    }

    /// Bring the device up after attach: timeouts, startup and self test,
    /// then for TPM2 the command attribute table and PCR allocation.
    ///
    /// Device-reported failures become [`TpmError::NoDevice`].
    pub fn auto_startup(&mut self) -> TpmResult<()> {
        if !self.flags.contains(ChipFlags::AUTO_STARTUP) {
            return Ok(());
        }
        match self.bring_up() {
            Err(TpmError::Tpm(TPM_ERR_INVALID_POSTINIT)) if !self.is_tpm2() => Ok(()),
            Err(TpmError::Tpm(rc)) => {
                info!("TPM startup failed with status {rc:#x}");
                Err(TpmError::NoDevice)
            }
            rc => rc,
        }
    }

    fn bring_up(&mut self) -> TpmResult<()> {
        self.get_timeouts()?;

        let protocol = self.protocol;
        let timing = self.timing;
        match protocol.startup(&*self, &timing) {
            // Started by firmware: its state survives suspend without us.
            Err(TpmError::Tpm(TPM_ERR_INVALID_POSTINIT)) if !self.is_tpm2() => {
                info!("TPM not ready ({TPM_ERR_INVALID_POSTINIT})");
                self.flags.insert(ChipFlags::ALWAYS_POWERED);
                return Ok(());
            }
            rc => rc?,
        }

        if let Some(banks) = protocol.pcr_allocation(&*self)? {
            self.set_active_banks(&banks)?;
        }
        // Every later command is checked against this table.
        if let Some(table) = protocol.command_attributes(&*self)? {
            self.set_cc_attrs(table);
        }
        Ok(())
    }

    /// Save device state before the platform suspends.
    pub fn pm_suspend(&self) -> TpmResult<()> {
        if self.flags.contains(ChipFlags::ALWAYS_POWERED) {
            return Ok(());
        }
        self.protocol.pm_suspend(self, self.suspend_pcr)
    }

    /// Firmware restores device state on resume; nothing to do.
    pub fn pm_resume(&self) -> TpmResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use alloc::vec;
    use alloc::vec::Vec;

    use super::*;
    use crate::tpm::chip::{BankTable, ChipConfig};
    use crate::tpm::constants::*;
    use crate::tpm::testing::*;
    use crate::tpm::types::{TpmVersion, header_code};
    use test_log::test;

    fn tpm1_chip(transport: MockTransport) -> TpmChip<MockTransport, FakeTimer> {
        let config = ChipConfig { version: TpmVersion::Tpm1, ..ChipConfig::default() };
        TpmChip::new(transport, FakeTimer::new(), config)
    }

    fn tpm2_chip(transport: MockTransport, banks: &[u16]) -> TpmChip<MockTransport, FakeTimer> {
        let active_banks: BankTable = banks.iter().copied().collect();
        let config = ChipConfig { active_banks, ..ChipConfig::default() };
        TpmChip::new(transport, FakeTimer::new(), config)
    }

    fn sent_codes(chip: &TpmChip<MockTransport, FakeTimer>) -> Vec<u32> {
        chip.transport().sent().iter().map(|cmd| header_code(cmd)).collect()
    }

    #[test]
    fn pcr_extend_covers_every_active_bank() {
        let chip = tpm2_chip(MockTransport::new(), &[TPM_ALG_SHA1, TPM_ALG_SHA256]);
        chip.pcr_extend(3, &[0xAB; TPM_DIGEST_SIZE]).unwrap();

        let sent = &chip.transport().sent()[0];
        assert_eq!(&sent[27..31], &2u32.to_be_bytes());
        assert_eq!(&sent[31..33], &TPM_ALG_SHA1.to_be_bytes());
        assert_eq!(&sent[53..55], &TPM_ALG_SHA256.to_be_bytes());
        assert_eq!(sent.len(), 55 + 32);
    }

    #[test]
    fn tpm1_pcr_extend_sends_sha1() {
        let chip = tpm1_chip(MockTransport::new().with_response(tpm1_response(0, &[0; TPM_DIGEST_SIZE])));
        chip.pcr_extend(8, &[0xCD; TPM_DIGEST_SIZE]).unwrap();
        assert_eq!(sent_codes(&chip), [TPM_ORD_PCR_EXTEND]);
    }

    #[test]
    fn pcr_read_returns_value() {
        let chip = tpm1_chip(MockTransport::new().with_response(tpm1_response(0, &[0x42; TPM_DIGEST_SIZE])));
        assert_eq!(chip.pcr_read(0), Ok([0x42; TPM_DIGEST_SIZE]));
    }

    #[test]
    fn send_surfaces_device_status() {
        let chip = tpm2_chip(MockTransport::new().with_response(tpm2_response(TPM2_RC_INITIALIZE, &[])), &[]);
        let mut cmd = command(TPM2_CC_GET_RANDOM, 12);
        assert_eq!(chip.send(&mut cmd), Err(TpmError::Tpm(TPM2_RC_INITIALIZE)));

        chip.transport().push_response(tpm2_response(0, &[1, 2]));
        let mut cmd = command(TPM2_CC_GET_RANDOM, 12);
        assert_eq!(chip.send(&mut cmd), Ok(12));
    }

    #[test]
    fn get_random_checks_size_before_sending() {
        let chip = tpm2_chip(MockTransport::new(), &[]);
        assert_eq!(chip.get_random(&mut [0u8; 0]), Err(TpmError::InvalidArgument));
        assert_eq!(chip.get_random(&mut [0; TPM_MAX_RNG_DATA + 1]), Err(TpmError::InvalidArgument));
        assert_eq!(chip.transport().counts().sends, 0);
    }

    #[test]
    fn sealing_requires_tpm2() {
        let chip = tpm1_chip(MockTransport::new());
        let mut payload = TrustedKeyPayload::default();
        let options = TrustedKeyOptions::default();
        assert_eq!(chip.seal_trusted(&mut payload, &options), Err(TpmError::NoDevice));
        assert_eq!(chip.unseal_trusted(&mut payload, &options), Err(TpmError::NoDevice));
        assert_eq!(chip.transport().counts().sends, 0);
    }

    #[test]
    fn timeouts_are_discovered_once() {
        let mut chip = tpm2_chip(MockTransport::new(), &[]);
        chip.get_timeouts().unwrap();
        assert!(chip.flags().contains(ChipFlags::HAVE_TIMEOUTS));
        assert_eq!(chip.timing().timeout.timeout_c, TPM2_TIMEOUT_C);

        chip.set_timing(crate::tpm::types::Timing::default());
        chip.get_timeouts().unwrap();
        assert_eq!(chip.timing().timeout.timeout_c, TIMEOUT_C);
    }

    #[test]
    fn auto_startup_can_be_disabled() {
        let config = ChipConfig { auto_startup: false, ..ChipConfig::default() };
        let mut chip = TpmChip::new(MockTransport::new(), FakeTimer::new(), config);
        assert_eq!(chip.auto_startup(), Ok(()));
        assert_eq!(chip.transport().counts().sends, 0);
        assert!(!chip.flags().contains(ChipFlags::HAVE_TIMEOUTS));
    }

    #[test]
    fn tpm2_auto_startup_loads_tables() {
        let mut properties = vec![0];
        properties.extend_from_slice(&TPM2_CAP_TPM_PROPERTIES.to_be_bytes());
        properties.extend_from_slice(&1u32.to_be_bytes());
        properties.extend_from_slice(&TPM2_PT_TOTAL_COMMANDS.to_be_bytes());
        properties.extend_from_slice(&2u32.to_be_bytes());

        let mut commands = vec![0];
        commands.extend_from_slice(&TPM2_CAP_COMMANDS.to_be_bytes());
        commands.extend_from_slice(&2u32.to_be_bytes());
        commands.extend_from_slice(&(TPM2_CC_PCR_EXTEND | (1 << 25)).to_be_bytes());
        commands.extend_from_slice(&TPM2_CC_GET_CAPABILITY.to_be_bytes());

        let mut pcrs = vec![0];
        pcrs.extend_from_slice(&TPM2_CAP_PCRS.to_be_bytes());
        pcrs.extend_from_slice(&2u32.to_be_bytes());
        for alg in [TPM_ALG_SHA1, TPM_ALG_SHA384] {
            pcrs.extend_from_slice(&alg.to_be_bytes());
            pcrs.extend_from_slice(&[3, 0xFF, 0xFF, 0xFF]);
        }

        let mut chip = tpm2_chip(
            MockTransport::new()
                .with_response(tpm2_response(0, &[]))
                .with_response(tpm2_response(0, &pcrs))
                .with_response(tpm2_response(0, &properties))
                .with_response(tpm2_response(0, &commands))
                .with_response(tpm2_response(0, &pcrs)),
            &[TPM_ALG_SHA1],
        );
        chip.auto_startup().unwrap();

        assert_eq!(
            sent_codes(&chip),
            [TPM2_CC_SELF_TEST, TPM2_CC_GET_CAPABILITY, TPM2_CC_GET_CAPABILITY, TPM2_CC_GET_CAPABILITY]
        );
        assert_eq!(chip.cc_attrs().len(), 2);
        assert_eq!(chip.active_banks(), &[TPM_ALG_SHA1, TPM_ALG_SHA384]);
        assert_eq!(chip.timing().duration.long, TPM2_DURATION_LONG);

        // GetCapability is in the loaded table, so it still reaches the device.
        let mut cmd = command_in(TPM2_CC_GET_CAPABILITY, TPM_HEADER_SIZE + 12, 64);
        assert_eq!(chip.send(&mut cmd), Ok(TPM_HEADER_SIZE + pcrs.len()));
        assert_eq!(chip.transport().counts().sends, 5);
    }

    #[test]
    fn device_errors_during_startup_mean_no_device() {
        let mut chip = tpm2_chip(
            MockTransport::new()
                .with_response(tpm2_response(0x101, &[]))
                .with_response(tpm2_response(0x101, &[])),
            &[],
        );
        assert_eq!(chip.auto_startup(), Err(TpmError::NoDevice));
    }

    #[test]
    fn firmware_started_tpm1_is_always_powered() {
        let mut chip = tpm1_chip(
            MockTransport::new()
                .with_response(tpm1_response(0, &[0, 0, 0, 16, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0]))
                .with_response(tpm1_response(0, &[0, 0, 0, 12, 0, 0x1E, 0x84, 0x80, 0, 0x1E, 0x84, 0x80, 0, 0x1E, 0x84, 0x80]))
                .with_response(tpm1_response(TPM_ERR_INVALID_POSTINIT, &[])),
        );
        assert_eq!(chip.auto_startup(), Ok(()));
        assert!(chip.flags().contains(ChipFlags::ALWAYS_POWERED));
        assert_eq!(sent_codes(&chip), [TPM_ORD_GET_CAP, TPM_ORD_GET_CAP, TPM_ORD_CONTINUE_SELFTEST]);

        assert_eq!(chip.pm_suspend(), Ok(()));
        assert_eq!(chip.transport().counts().sends, 3);
    }

    #[test]
    fn suspend_dispatches_to_strategy() {
        let config = ChipConfig { version: TpmVersion::Tpm1, suspend_pcr: 0, ..ChipConfig::default() };
        let chip = TpmChip::new(MockTransport::new(), FakeTimer::new(), config);
        assert_eq!(chip.pm_suspend(), Ok(()));
        assert_eq!(sent_codes(&chip), [TPM_ORD_SAVESTATE]);
        assert_eq!(chip.pm_resume(), Ok(()));
    }
}
