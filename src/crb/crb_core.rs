use core::ptr;

use crate::crb::constants::*;
use crate::crb::types::Register;
use crate::tpm::constants::TPM_TIMEOUT_POLL;
use crate::tpm::ops::Timer;

/// Access to the CRB register space of all localities. Offsets are from the
/// locality 0 block.
pub trait RegisterWindow {
    fn read32(&self, offset: usize) -> u32;

    fn write32(&self, offset: usize, value: u32);

    fn read8(&self, offset: usize) -> u8;

    fn write8(&self, offset: usize, value: u8);

    /// Physical address the device sees for `offset`, used to program the
    /// command and response buffer addresses.
    fn phys_addr(&self, offset: usize) -> u64;
}

/// Register window over mapped MMIO.
pub struct MmioWindow {
    base: *mut u8,
    phys: u64,
}

impl MmioWindow {
    /// # Safety
    ///
    /// `base` must map `TPM_NR_LOCALITIES` register blocks of the device at
    /// physical address `phys`, valid for volatile access for as long as the
    /// window lives.
    pub const unsafe fn new(base: *mut u8, phys: u64) -> Self {
        Self { base, phys }
    }

    /// Window over the standard CRB address range, identity mapped.
    ///
    /// # Safety
    ///
    /// As for [`MmioWindow::new`] with `TPM_LOCALITY_BASE` mapped at itself.
    pub unsafe fn identity() -> Self {
        unsafe { Self::new(TPM_LOCALITY_BASE as usize as *mut u8, TPM_LOCALITY_BASE) }
    }
}

// SAFETY: the window only hands out volatile reads and writes of device
// registers, never references into the mapping. Callers that share it
// serialize register sequences through the chip's bus lock.
unsafe impl Send for MmioWindow {}

// SAFETY: as for `Send`. A lone volatile access from any thread is sound on
// MMIO; ordering between sequences is the bus lock's job.
unsafe impl Sync for MmioWindow {}

impl RegisterWindow for MmioWindow {
    fn read32(&self, offset: usize) -> u32 {
        unsafe { ptr::read_volatile(self.base.add(offset) as *const u32) }
    }

    fn write32(&self, offset: usize, value: u32) {
        unsafe { ptr::write_volatile(self.base.add(offset) as *mut u32, value) }
    }

    fn read8(&self, offset: usize) -> u8 {
        unsafe { ptr::read_volatile(self.base.add(offset)) }
    }

    fn write8(&self, offset: usize, value: u8) {
        unsafe { ptr::write_volatile(self.base.add(offset), value) }
    }

    fn phys_addr(&self, offset: usize) -> u64 {
        self.phys + offset as u64
    }
}

pub fn locality_offset(locality: u8, reg: usize) -> usize {
    usize::from(locality) * TPM_LOCALITY_STRIDE + reg
}

/// Poll register `R` of `locality` until `done` holds, giving up once
/// `timeout_ms` has passed. The register is sampled one last time at the
/// deadline.
pub fn wait_for_reg<R, W, K, F>(window: &W, timer: &K, locality: u8, timeout_ms: u64, done: F) -> bool
where
    R: Register,
    F: Fn(&R) -> bool,
    W: RegisterWindow + ?Sized,
    K: Timer + ?Sized,
{
    let stop = timer.now_ms().saturating_add(timeout_ms);
    loop {
        let reg = R::from_raw(window.read32(locality_offset(locality, R::OFFSET)));
        if done(&reg) {
            return true;
        }
        if timer.now_ms() > stop {
            return false;
        }
        timer.msleep(TPM_TIMEOUT_POLL);
    }
}
