//! Locality and power-state steps bracketing a transfer. Every step is a
//! no-op for nested transfers and for transports without the capability.

use log::warn;

use super::chip::TpmChip;
use super::error::TpmResult;
use super::ops::{Timer, Transport};
use super::types::TransmitFlags;

impl<T: Transport, K: Timer> TpmChip<T, K> {
    pub(crate) fn request_locality(&self, flags: TransmitFlags) -> TpmResult<()> {
        if flags.is_nested() {
            return Ok(());
        }
        let Some(granted) = self.transport.request_locality(0) else {
            return Ok(());
        };
        self.set_locality(Some(granted?));
        Ok(())
    }

    pub(crate) fn relinquish_locality(&self, flags: TransmitFlags) {
        if flags.is_nested() {
            return;
        }
        let locality = self.locality().unwrap_or(0);
        let Some(rc) = self.transport.relinquish_locality(locality) else {
            return;
        };
        if let Err(e) = rc {
            warn!("relinquish locality {locality}: error {e}");
        }
        self.set_locality(None);
    }

    pub(crate) fn cmd_ready(&self, flags: TransmitFlags) -> TpmResult<()> {
        if flags.is_nested() {
            return Ok(());
        }
        self.transport.cmd_ready().unwrap_or(Ok(()))
    }

    pub(crate) fn go_idle(&self, flags: TransmitFlags) -> TpmResult<()> {
        if flags.is_nested() {
            return Ok(());
        }
        self.transport.go_idle().unwrap_or(Ok(()))
    }
}
