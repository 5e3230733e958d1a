//! TPM command transmission core.
//!
//! Takes an opaque command buffer, hands it to a polling-only transport,
//! waits for completion, validates the response and retries the transient
//! "retry" / "self-test running" conditions with bounded backoff. Locality,
//! command-ready/idle and clock gating are sequenced around every transfer.
//!
//! ```text
//! facade (interface.rs)
//!   -> transmit_cmd / transmit (retry loop)
//!     -> try_transmit (one attempt)
//!       -> validate, sequencer, poll, Transport
//! ```
//!
//! [`crb`] provides a `Transport` for the TCG PTP Command Response Buffer
//! interface.

#![cfg_attr(not(any(test, feature = "std")), no_std)]

extern crate alloc;

pub mod crb;
pub mod tpm;

pub use tpm::*;
