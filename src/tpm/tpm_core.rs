//! One transfer attempt, the retry loop around it, and the status-checking
//! wrapper the typed operations use.

use log::{error, warn};

use super::chip::TpmChip;
use super::constants::*;
use super::error::{TpmError, TpmResult};
use super::ops::{SessionSpace, Timer, Transport};
use super::poll::{Completion, wait_for_completion};
use super::types::{ChipFlags, TransmitFlags, header_code, header_length, write_header};
use super::validate::{Validation, validate_command};

const SAVE_SIZE: usize = TPM_HEADER_SIZE + TPM_SAVED_HANDLES * TPM_HANDLE_SIZE;

/// Keeps the device clock running for the guard's lifetime.
struct ClockGate<'a, T: Transport> {
    transport: &'a T,
}

impl<'a, T: Transport> ClockGate<'a, T> {
    fn enable(transport: &'a T) -> Self {
        transport.clk_enable(true);
        Self { transport }
    }
}

impl<T: Transport> Drop for ClockGate<'_, T> {
    fn drop(&mut self) {
        self.transport.clk_enable(false);
    }
}

/// Releases a locality this attempt acquired.
struct LocalityGuard<'a, T: Transport, K: Timer> {
    chip: &'a TpmChip<T, K>,
    flags: TransmitFlags,
}

impl<T: Transport, K: Timer> Drop for LocalityGuard<'_, T, K> {
    fn drop(&mut self) {
        self.chip.relinquish_locality(self.flags);
    }
}

/// Returns the device to idle once it has been made ready.
struct IdleGuard<'a, T: Transport, K: Timer> {
    chip: &'a TpmChip<T, K>,
    flags: TransmitFlags,
}

impl<T: Transport, K: Timer> Drop for IdleGuard<'_, T, K> {
    fn drop(&mut self) {
        if let Err(e) = self.chip.go_idle(self.flags) {
            warn!("go idle: error {e}");
        }
    }
}

/// Doubling delay between retries, from a floor until it passes a ceiling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    delay: u64,
    ceiling: u64,
}

impl Backoff {
    pub fn new() -> Self {
        Self::with_bounds(TPM2_DURATION_SHORT, TPM2_DURATION_LONG)
    }

    pub fn with_bounds(floor: u64, ceiling: u64) -> Self {
        Self { delay: floor, ceiling }
    }

    /// Delay before the next attempt, or `None` once the ceiling is passed.
    pub fn next_delay(&mut self) -> Option<u64> {
        if self.delay > self.ceiling {
            return None;
        }
        let delay = self.delay;
        self.delay = delay.saturating_mul(2);
        Some(delay)
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new()
    }
}

fn reborrow<'s>(space: &'s mut Option<&mut dyn SessionSpace>) -> Option<&'s mut dyn SessionSpace> {
    match space {
        Some(space) => Some(&mut **space),
        None => None,
    }
}

impl<T: Transport, K: Timer> TpmChip<T, K> {
    /// Send `buf` once and read the response back into it.
    ///
    /// Every resource taken here (bus lock, clock, locality, ready state) is
    /// released on the way out whatever the outcome; teardown faults are
    /// logged and never replace the attempt's own result.
    pub fn try_transmit(
        &self,
        mut space: Option<&mut dyn SessionSpace>,
        buf: &mut [u8],
        flags: TransmitFlags,
    ) -> TpmResult<usize> {
        let bufsiz = buf.len().min(TPM_BUFSIZE);
        let count = match buf.get(..TPM_HEADER_SIZE) {
            Some(header) => header_length(header) as usize,
            None => 0,
        };

        match validate_command(&buf[..count.min(bufsiz)], self.validation_attrs()) {
            Validation::Valid => {}
            Validation::MalformedLength => return Err(TpmError::InvalidCommand),
            Validation::UnsupportedOperation => {
                write_header(
                    buf,
                    TPM2_ST_NO_SESSIONS,
                    TPM_HEADER_SIZE as u32,
                    TSS2_RESMGR_TPM_RC_LAYER | TPM2_RC_COMMAND_CODE,
                );
                return Ok(TPM_HEADER_SIZE);
            }
        }

        if count > bufsiz {
            error!("invalid command count {count} (bufsiz {bufsiz})");
            return Err(TpmError::CommandTooLarge { count, bufsiz });
        }
        let ordinal = header_code(buf);

        let _bus = flags.takes_lock().then(|| self.bus.lock());
        let _clock = ClockGate::enable(&self.transport);

        let _locality = match self.locality() {
            Some(_) => None,
            None => {
                self.request_locality(flags)?;
                Some(LocalityGuard { chip: self, flags })
            }
        };

        self.cmd_ready(flags)?;
        let _idle = IdleGuard { chip: self, flags };

        if let Some(space) = reborrow(&mut space) {
            space.prepare(self, ordinal, buf).map_err(|e| {
                error!("prepare space: error {e}");
                TpmError::Space
            })?;
        }

        if let Err(e) = self.transport.send(&buf[..count]) {
            if e != TpmError::Pipe {
                error!("send: error {e}");
            }
            return Err(e);
        }

        if !self.flags.contains(ChipFlags::IRQ) {
            match wait_for_completion(&self.transport, &self.timer, self.calc_ordinal_duration(ordinal)) {
                Completion::Ready => {}
                Completion::Canceled => {
                    error!("operation canceled");
                    return Err(TpmError::Canceled);
                }
                Completion::TimedOut => {
                    self.transport.cancel();
                    error!("operation timed out");
                    return Err(TpmError::Timeout);
                }
            }
        }

        let mut len = self.transport.recv(&mut buf[..bufsiz]).inspect_err(|e| error!("recv: error {e}"))?;
        if len < TPM_HEADER_SIZE {
            error!("response of {len} bytes is shorter than a header");
            return Err(TpmError::ShortResponse { len, expected: TPM_HEADER_SIZE });
        }
        let declared = header_length(buf) as usize;
        if len != declared {
            error!("response declares {declared} bytes, {len} received");
            return Err(TpmError::ShortResponse { len, expected: declared });
        }

        if let Some(space) = reborrow(&mut space) {
            space.commit(self, ordinal, buf, &mut len).map_err(|e| {
                error!("commit space: error {e}");
                TpmError::Space
            })?;
        }

        Ok(len)
    }

    /// Send `buf`, re-issuing it while the device answers "retry" or
    /// "self test running".
    ///
    /// The header, and with a session space the first three handles, are
    /// restored before each re-send. Once the backoff passes its ceiling the
    /// last response is returned as is.
    pub fn transmit(
        &self,
        mut space: Option<&mut dyn SessionSpace>,
        buf: &mut [u8],
        flags: TransmitFlags,
    ) -> TpmResult<usize> {
        if buf.len() < TPM_HEADER_SIZE {
            return Err(TpmError::InvalidCommand);
        }

        let save_size = if space.is_some() { SAVE_SIZE } else { TPM_HEADER_SIZE }.min(buf.len());
        let mut save = [0u8; SAVE_SIZE];
        save[..save_size].copy_from_slice(&buf[..save_size]);
        let cc = header_code(buf);

        let mut backoff = Backoff::new();
        loop {
            let len = self.try_transmit(reborrow(&mut space), buf, flags)?;
            let rc = header_code(buf);
            if rc != TPM2_RC_RETRY && rc != TPM2_RC_TESTING {
                return Ok(len);
            }
            if rc == TPM2_RC_TESTING && cc == TPM2_CC_SELF_TEST {
                return Ok(len);
            }
            let Some(delay) = backoff.next_delay() else {
                if rc == TPM2_RC_RETRY {
                    error!("in retry loop");
                } else {
                    error!("self test is still running");
                }
                return Ok(len);
            };
            self.timer.msleep(delay);
            buf[..save_size].copy_from_slice(&save[..save_size]);
        }
    }

    /// [`TpmChip::transmit`], then reject a non-zero device status and a body
    /// shorter than `min_rsp_body_length`. Returns the response length.
    pub fn transmit_cmd(
        &self,
        space: Option<&mut dyn SessionSpace>,
        buf: &mut [u8],
        min_rsp_body_length: usize,
        flags: TransmitFlags,
        desc: Option<&str>,
    ) -> TpmResult<usize> {
        let len = self.transmit(space, buf, flags)?;

        let rc = header_code(buf);
        if rc != 0 {
            let err = TpmError::Tpm(rc);
            if let Some(desc) = desc.filter(|_| !err.is_soft()) {
                error!("A TPM error ({rc}) occurred {desc}");
            }
            return Err(err);
        }

        let expected = min_rsp_body_length + TPM_HEADER_SIZE;
        if len < expected {
            return Err(TpmError::ShortResponse { len, expected });
        }
        Ok(len)
    }
}
