//! `Transport` for the TCG PTP Command Response Buffer interface.
//!
//! The command and response share the locality's data buffer. A command is
//! started by setting CTRL_START; the device clears it when the response is
//! ready.

pub mod constants;
pub mod crb_core;
pub mod types;

use core::sync::atomic::{AtomicU8, Ordering};

use log::{debug, trace};

use self::constants::*;
use self::crb_core::{RegisterWindow, locality_offset, wait_for_reg};
use self::types::*;
use crate::tpm::error::{TpmError, TpmResult};
use crate::tpm::ops::{Timer, Transport};
use crate::tpm::types::{TpmTimeout, header_length};

pub use self::crb_core::MmioWindow;

/// CRB transport over a register window.
pub struct CrbTransport<W, K> {
    window: W,
    timer: K,
    timeout: TpmTimeout,
    locality: AtomicU8,
}

impl<W: RegisterWindow, K: Timer> CrbTransport<W, K> {
    pub fn new(window: W, timer: K) -> Self {
        Self::with_timeouts(window, timer, TpmTimeout::default())
    }

    /// Locality requests wait up to timeout A, command-ready and idle
    /// transitions up to timeout C.
    pub fn with_timeouts(window: W, timer: K, timeout: TpmTimeout) -> Self {
        Self { window, timer, timeout, locality: AtomicU8::new(0) }
    }

    pub fn window(&self) -> &W {
        &self.window
    }

    fn current(&self) -> u8 {
        self.locality.load(Ordering::Acquire)
    }

    fn offset(&self, reg: usize) -> usize {
        locality_offset(self.current(), reg)
    }

    fn read_reg<R: Register>(&self) -> R {
        R::from_raw(self.window.read32(self.offset(R::OFFSET)))
    }

    fn write_reg<R: Register>(&self, value: R) {
        self.window.write32(self.offset(R::OFFSET), value.raw());
    }

    fn read_buffer(&self, from: usize, out: &mut [u8]) {
        let base = self.offset(TPM_CRB_DATA_BUFFER) + from;
        for (i, byte) in out.iter_mut().enumerate() {
            *byte = self.window.read8(base + i);
        }
    }

    fn write_buffer(&self, data: &[u8]) {
        let base = self.offset(TPM_CRB_DATA_BUFFER);
        for (i, byte) in data.iter().enumerate() {
            self.window.write8(base + i, *byte);
        }
    }

    /// Issue a CTRL_REQ bit and wait for the device to clear it.
    fn request(&self, req: TpmRegCtrlRequest) -> TpmResult<()> {
        self.write_reg(req);
        let bits = req.raw();
        let cleared = wait_for_reg(
            &self.window,
            &self.timer,
            self.current(),
            self.timeout.timeout_c,
            |reg: &TpmRegCtrlRequest| reg.raw() & bits == 0,
        );
        if cleared {
            Ok(())
        } else {
            debug!("crb: request {bits:#x} not acknowledged");
            Err(TpmError::Timeout)
        }
    }
}

impl<W: RegisterWindow, K: Timer> Transport for CrbTransport<W, K> {
    fn send(&self, buf: &[u8]) -> TpmResult<()> {
        if buf.len() > TPMCRBBUF_LEN {
            return Err(TpmError::CommandTooLarge { count: buf.len(), bufsiz: TPMCRBBUF_LEN });
        }

        // A cancel left from a previous command would abort this one.
        self.write_reg(TpmRegCtrlCancel(0));

        self.write_buffer(buf);
        let addr = self.window.phys_addr(self.offset(TPM_CRB_DATA_BUFFER));
        self.window.write32(self.offset(TPM_CRB_CTRL_CMD_LADDR), addr as u32);
        self.window.write32(self.offset(TPM_CRB_CTRL_CMD_HADDR), (addr >> 32) as u32);
        self.window.write32(self.offset(TPM_CRB_CTRL_CMD_SIZE), TPMCRBBUF_LEN as u32);
        self.window.write32(self.offset(TPM_CRB_CTRL_RSP_ADDR), addr as u32);
        self.window.write32(self.offset(TPM_CRB_CTRL_RSP_ADDR + 4), (addr >> 32) as u32);
        self.window.write32(self.offset(TPM_CRB_CTRL_RSP_SIZE), TPMCRBBUF_LEN as u32);

        let mut start = TpmRegCtrlStart(0);
        start.set_start(true);
        self.write_reg(start);
        trace!("crb: started {} byte command at locality {}", buf.len(), self.current());
        Ok(())
    }

    fn recv(&self, buf: &mut [u8]) -> TpmResult<usize> {
        if self.read_reg::<TpmRegCtrlStatus>().error() {
            debug!("crb: device reported an error");
            return Err(TpmError::Bus(-5));
        }
        if buf.len() < CRB_RSP_HEADER_LEN {
            return Err(TpmError::ShortResponse { len: buf.len(), expected: CRB_RSP_HEADER_LEN });
        }

        self.read_buffer(0, &mut buf[..CRB_RSP_HEADER_LEN]);
        let expected = header_length(buf) as usize;
        if expected < CRB_RSP_HEADER_LEN || expected > buf.len() || expected > TPMCRBBUF_LEN {
            return Err(TpmError::ShortResponse { len: buf.len(), expected });
        }
        self.read_buffer(CRB_RSP_HEADER_LEN, &mut buf[CRB_RSP_HEADER_LEN..expected]);
        Ok(expected)
    }

    fn status(&self) -> u8 {
        let mut sts = 0;
        if !self.read_reg::<TpmRegCtrlStart>().start() {
            sts |= CRB_STS_COMPLETE;
        }
        if self.read_reg::<TpmRegCtrlCancel>().cancel() {
            sts |= CRB_STS_CANCELED;
        }
        sts
    }

    fn cancel(&self) {
        let mut cancel = TpmRegCtrlCancel(0);
        cancel.set_cancel(true);
        self.write_reg(cancel);
    }

    fn req_complete_mask(&self) -> u8 {
        CRB_STS_COMPLETE
    }

    fn req_complete_val(&self) -> u8 {
        CRB_STS_COMPLETE
    }

    fn req_canceled(&self, status: u8) -> bool {
        status & CRB_STS_CANCELED != 0
    }

    fn request_locality(&self, locality: u8) -> Option<TpmResult<u8>> {
        if locality >= TPM_NR_LOCALITIES {
            return Some(Err(TpmError::Locality(locality)));
        }
        self.locality.store(locality, Ordering::Release);
        self.write_reg(TpmRegLocCtrl::request());

        let granted = wait_for_reg(
            &self.window,
            &self.timer,
            locality,
            self.timeout.timeout_a,
            |state: &TpmRegLocState| state.reg_valid_sts() && state.loc_assigned() && state.active_locality() == locality,
        );
        if !granted {
            debug!("crb: locality {locality} not granted");
            return Some(Err(TpmError::Locality(locality)));
        }
        Some(Ok(locality))
    }

    fn relinquish_locality(&self, locality: u8) -> Option<TpmResult<()>> {
        if locality >= TPM_NR_LOCALITIES {
            return Some(Err(TpmError::Locality(locality)));
        }
        self.window.write32(locality_offset(locality, TPM_REG_LOC_CTRL), TpmRegLocCtrl::release().raw());

        let released = wait_for_reg(
            &self.window,
            &self.timer,
            locality,
            self.timeout.timeout_a,
            |state: &TpmRegLocState| state.reg_valid_sts() && !state.loc_assigned(),
        );
        Some(if released { Ok(()) } else { Err(TpmError::Timeout) })
    }

    fn cmd_ready(&self) -> Option<TpmResult<()>> {
        Some(self.request(TpmRegCtrlRequest::ready()))
    }

    fn go_idle(&self) -> Option<TpmResult<()>> {
        Some(self.request(TpmRegCtrlRequest::idle()))
    }
}
