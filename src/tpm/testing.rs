//! Scripted transport and virtual clock for unit tests.

use alloc::boxed::Box;
use alloc::collections::VecDeque;
use alloc::vec;
use alloc::vec::Vec;
use core::cell::{Cell, RefCell};

use super::constants::*;
use super::error::{TpmError, TpmResult};
use super::ops::{Timer, Transport};
use super::types::write_header;

pub const STS_COMPLETE: u8 = 0x01;
pub const STS_CANCELED: u8 = 0x02;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    RequestLocality,
    CmdReady,
    Send,
    SendPipe,
    Recv,
    GoIdle,
    Relinquish,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Counts {
    pub locality_requests: usize,
    pub locality_releases: usize,
    pub cmd_ready: usize,
    pub go_idle: usize,
    pub clk_on: usize,
    pub clk_off: usize,
    pub sends: usize,
    pub recvs: usize,
    pub cancels: usize,
    pub status_reads: usize,
}

type Responder = Box<dyn FnMut(&[u8]) -> Vec<u8>>;

pub struct MockTransport {
    responses: RefCell<VecDeque<Vec<u8>>>,
    responder: RefCell<Option<Responder>>,
    sent: RefCell<Vec<Vec<u8>>>,
    statuses: RefCell<VecDeque<u8>>,
    idle_status: u8,
    faults: RefCell<Vec<Fault>>,
    counts: Cell<Counts>,
    locality: u8,
    power_ops: bool,
}

impl MockTransport {
    pub fn new() -> Self {
        Self {
            responses: RefCell::new(VecDeque::new()),
            responder: RefCell::new(None),
            sent: RefCell::new(Vec::new()),
            statuses: RefCell::new(VecDeque::new()),
            idle_status: STS_COMPLETE,
            faults: RefCell::new(Vec::new()),
            counts: Cell::new(Counts::default()),
            locality: 0,
            power_ops: true,
        }
    }

    pub fn with_response(self, response: Vec<u8>) -> Self {
        self.responses.borrow_mut().push_back(response);
        self
    }

    pub fn with_responder(self, responder: impl FnMut(&[u8]) -> Vec<u8> + 'static) -> Self {
        *self.responder.borrow_mut() = Some(Box::new(responder));
        self
    }

    /// Statuses returned by successive `status()` calls before falling back
    /// to the idle status.
    pub fn with_statuses(self, statuses: &[u8]) -> Self {
        self.statuses.borrow_mut().extend(statuses.iter().copied());
        self
    }

    /// Status reported once the script runs out.
    pub fn with_idle_status(mut self, status: u8) -> Self {
        self.idle_status = status;
        self
    }

    pub fn with_fault(self, fault: Fault) -> Self {
        self.faults.borrow_mut().push(fault);
        self
    }

    pub fn with_locality(mut self, locality: u8) -> Self {
        self.locality = locality;
        self
    }

    pub fn without_power_ops(mut self) -> Self {
        self.power_ops = false;
        self
    }

    pub fn push_response(&self, response: Vec<u8>) {
        self.responses.borrow_mut().push_back(response);
    }

    pub fn counts(&self) -> Counts {
        self.counts.get()
    }

    pub fn sent(&self) -> Vec<Vec<u8>> {
        self.sent.borrow().clone()
    }

    fn bump(&self, f: impl FnOnce(&mut Counts)) {
        let mut counts = self.counts.get();
        f(&mut counts);
        self.counts.set(counts);
    }

    fn faulted(&self, fault: Fault) -> bool {
        self.faults.borrow().contains(&fault)
    }
}

impl Transport for MockTransport {
    fn send(&self, buf: &[u8]) -> TpmResult<()> {
        self.bump(|c| c.sends += 1);
        if self.faulted(Fault::SendPipe) {
            return Err(TpmError::Pipe);
        }
        if self.faulted(Fault::Send) {
            return Err(TpmError::Bus(-5));
        }
        self.sent.borrow_mut().push(buf.to_vec());
        let scripted = self.responses.borrow_mut().pop_front();
        let response = match scripted {
            Some(response) => response,
            None => match self.responder.borrow_mut().as_mut() {
                Some(responder) => responder(buf),
                None => response(TPM2_ST_NO_SESSIONS, TPM2_RC_SUCCESS, &[]),
            },
        };
        // Queued at the front so recv sees it next.
        self.responses.borrow_mut().push_front(response);
        Ok(())
    }

    fn recv(&self, buf: &mut [u8]) -> TpmResult<usize> {
        self.bump(|c| c.recvs += 1);
        if self.faulted(Fault::Recv) {
            return Err(TpmError::Bus(-5));
        }
        let response = self.responses.borrow_mut().pop_front().unwrap_or_default();
        let n = response.len().min(buf.len());
        buf[..n].copy_from_slice(&response[..n]);
        Ok(n)
    }

    fn status(&self) -> u8 {
        self.bump(|c| c.status_reads += 1);
        self.statuses.borrow_mut().pop_front().unwrap_or(self.idle_status)
    }

    fn cancel(&self) {
        self.bump(|c| c.cancels += 1);
    }

    fn req_complete_mask(&self) -> u8 {
        STS_COMPLETE
    }

    fn req_complete_val(&self) -> u8 {
        STS_COMPLETE
    }

    fn req_canceled(&self, status: u8) -> bool {
        status & STS_CANCELED != 0
    }

    fn request_locality(&self, _locality: u8) -> Option<TpmResult<u8>> {
        if !self.power_ops {
            return None;
        }
        self.bump(|c| c.locality_requests += 1);
        if self.faulted(Fault::RequestLocality) {
            return Some(Err(TpmError::Locality(0)));
        }
        Some(Ok(self.locality))
    }

    fn relinquish_locality(&self, _locality: u8) -> Option<TpmResult<()>> {
        if !self.power_ops {
            return None;
        }
        self.bump(|c| c.locality_releases += 1);
        if self.faulted(Fault::Relinquish) {
            return Some(Err(TpmError::Bus(-5)));
        }
        Some(Ok(()))
    }

    fn cmd_ready(&self) -> Option<TpmResult<()>> {
        if !self.power_ops {
            return None;
        }
        self.bump(|c| c.cmd_ready += 1);
        if self.faulted(Fault::CmdReady) {
            return Some(Err(TpmError::Timeout));
        }
        Some(Ok(()))
    }

    fn go_idle(&self) -> Option<TpmResult<()>> {
        if !self.power_ops {
            return None;
        }
        self.bump(|c| c.go_idle += 1);
        if self.faulted(Fault::GoIdle) {
            return Some(Err(TpmError::Timeout));
        }
        Some(Ok(()))
    }

    fn clk_enable(&self, enable: bool) {
        if enable {
            self.bump(|c| c.clk_on += 1);
        } else {
            self.bump(|c| c.clk_off += 1);
        }
    }
}

/// Clock that only moves when something sleeps.
#[derive(Debug, Default)]
pub struct FakeTimer {
    now: Cell<u64>,
    sleeps: RefCell<Vec<u64>>,
}

impl FakeTimer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sleeps(&self) -> Vec<u64> {
        self.sleeps.borrow().clone()
    }

    /// Sleeps longer than the poll interval, i.e. the backoff delays.
    pub fn backoff_sleeps(&self) -> Vec<u64> {
        self.sleeps.borrow().iter().copied().filter(|ms| *ms > TPM_TIMEOUT_POLL).collect()
    }
}

impl Timer for FakeTimer {
    fn now_ms(&self) -> u64 {
        self.now.get()
    }

    fn msleep(&self, ms: u64) {
        self.now.set(self.now.get() + ms);
        self.sleeps.borrow_mut().push(ms);
    }
}

/// A well-formed response with the given tag, code and body.
pub fn response(tag: u16, rc: u32, body: &[u8]) -> Vec<u8> {
    let mut buf = vec![0u8; TPM_HEADER_SIZE + body.len()];
    let len = buf.len() as u32;
    write_header(&mut buf, tag, len, rc);
    buf[TPM_HEADER_SIZE..].copy_from_slice(body);
    buf
}

pub fn tpm2_response(rc: u32, body: &[u8]) -> Vec<u8> {
    response(TPM2_ST_NO_SESSIONS, rc, body)
}

pub fn tpm1_response(rc: u32, body: &[u8]) -> Vec<u8> {
    response(TPM_TAG_RSP_COMMAND, rc, body)
}

/// A command of `len` bytes whose header declares `len`.
pub fn command(cc: u32, len: usize) -> Vec<u8> {
    let mut buf = vec![0u8; len.max(TPM_HEADER_SIZE)];
    write_header(&mut buf, TPM2_ST_NO_SESSIONS, len as u32, cc);
    buf.truncate(len);
    buf
}

/// Like [`command`], with room for a response of up to `capacity` bytes.
pub fn command_in(cc: u32, len: usize, capacity: usize) -> Vec<u8> {
    let mut buf = command(cc, len);
    buf.resize(capacity.max(len), 0);
    buf
}
