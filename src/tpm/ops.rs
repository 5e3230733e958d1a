//! Collaborators the transmission core drives.

use super::error::TpmResult;
use super::buf::TpmBuf;
use super::types::TransmitFlags;

/// Byte-level access to one device.
///
/// The optional capabilities (`request_locality`, `relinquish_locality`,
/// `cmd_ready`, `go_idle`) return `None` when the interface has no such
/// operation; the core treats that as success.
pub trait Transport {
    fn send(&self, buf: &[u8]) -> TpmResult<()>;

    /// Read a response into `buf`, returning the number of bytes read.
    fn recv(&self, buf: &mut [u8]) -> TpmResult<usize>;

    fn status(&self) -> u8;

    fn cancel(&self);

    fn req_complete_mask(&self) -> u8;

    fn req_complete_val(&self) -> u8;

    fn req_canceled(&self, status: u8) -> bool;

    /// Returns the granted locality.
    fn request_locality(&self, _locality: u8) -> Option<TpmResult<u8>> {
        None
    }

    fn relinquish_locality(&self, _locality: u8) -> Option<TpmResult<()>> {
        None
    }

    fn cmd_ready(&self) -> Option<TpmResult<()>> {
        None
    }

    fn go_idle(&self) -> Option<TpmResult<()>> {
        None
    }

    fn clk_enable(&self, _enable: bool) {}
}

/// Monotonic millisecond clock plus a blocking sleep.
pub trait Timer {
    fn now_ms(&self) -> u64;

    fn msleep(&self, ms: u64);
}

/// Issue commands through an attached device. Implemented by `TpmChip`, and
/// handed to protocol strategies and session spaces so they can issue their
/// own helper commands.
pub trait CommandChannel {
    /// Transmit with retry, returning the response length.
    fn transmit(
        &self,
        space: Option<&mut dyn SessionSpace>,
        buf: &mut [u8],
        flags: TransmitFlags,
    ) -> TpmResult<usize>;

    /// [`CommandChannel::transmit`] plus status and body-length checks.
    fn transmit_cmd(
        &self,
        space: Option<&mut dyn SessionSpace>,
        buf: &mut [u8],
        min_rsp_body_length: usize,
        flags: TransmitFlags,
        desc: Option<&str>,
    ) -> TpmResult<usize>;

    /// Take the bus lock so a sequence of `UNLOCKED` transfers runs as one.
    fn lock_bus(&self) -> spin::MutexGuard<'_, ()>;

    fn timer(&self) -> &dyn Timer;

    /// Build-buffer convenience over [`CommandChannel::transmit_cmd`].
    fn transmit_buf(
        &self,
        buf: &mut TpmBuf,
        min_rsp_body_length: usize,
        flags: TransmitFlags,
        desc: &str,
    ) -> TpmResult<usize> {
        buf.check()?;
        self.transmit_cmd(None, buf.as_mut_slice(), min_rsp_body_length, flags, Some(desc))
    }
}

/// Translates caller-visible handles to device handles around a transfer.
pub trait SessionSpace {
    /// Rewrite handles in the command before it is sent.
    fn prepare(&mut self, chip: &dyn CommandChannel, cc: u32, buf: &mut [u8]) -> TpmResult<()>;

    /// Rewrite handles in the response, possibly changing its length.
    fn commit(
        &mut self,
        chip: &dyn CommandChannel,
        cc: u32,
        buf: &mut [u8],
        len: &mut usize,
    ) -> TpmResult<()>;
}

#[cfg(feature = "std")]
pub use self::std_timer::StdTimer;

#[cfg(feature = "std")]
mod std_timer {
    use std::time::{Duration, Instant};

    use super::Timer;

    /// Wall-clock [`Timer`] that blocks the calling thread.
    #[derive(Debug, Clone, Copy)]
    pub struct StdTimer {
        start: Instant,
    }

    impl StdTimer {
        pub fn new() -> Self {
            Self { start: Instant::now() }
        }
    }

    impl Default for StdTimer {
        fn default() -> Self {
            Self::new()
        }
    }

    impl Timer for StdTimer {
        fn now_ms(&self) -> u64 {
            self.start.elapsed().as_millis() as u64
        }

        fn msleep(&self, ms: u64) {
            std::thread::sleep(Duration::from_millis(ms));
        }
    }
}
