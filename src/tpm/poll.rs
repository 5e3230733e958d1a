use super::constants::TPM_TIMEOUT_POLL;
use super::ops::{Timer, Transport};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    Ready,
    Canceled,
    TimedOut,
}

/// Sample the transport status until it reports completion or cancellation,
/// or until `budget_ms` has strictly elapsed.
///
/// The deadline is fixed before the first sample. Cancellation is checked
/// first, so a sample that is both canceled and complete reads as canceled.
pub fn wait_for_completion<T, K>(transport: &T, timer: &K, budget_ms: u64) -> Completion
where
    T: Transport + ?Sized,
    K: Timer + ?Sized,
{
    let stop = timer.now_ms().saturating_add(budget_ms);
    let mask = transport.req_complete_mask();
    let val = transport.req_complete_val();

    loop {
        let status = transport.status();
        if transport.req_canceled(status) {
            return Completion::Canceled;
        }
        if status & mask == val {
            return Completion::Ready;
        }
        timer.msleep(TPM_TIMEOUT_POLL);
        if timer.now_ms() > stop {
            return Completion::TimedOut;
        }
    }
}
