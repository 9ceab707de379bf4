//! Wire layout of the request/response rendezvous slots.
//!
//! One slot per proxy I/O thread. The proxy writes a request and posts
//! `request_ready`; the worker that wins the wait processes it and, for
//! operations with a response, writes the summary back and posts
//! `response_ready`. Post-payment intake has no response rendezvous.
//!
//! Every structure here is `repr(C)` so its in-memory layout is identical
//! in every process mapping the region (same toolchain is assumed).

use std::cell::UnsafeCell;
use std::io;

use crate::ipc::sync::ShmSemaphore;
use crate::types::{CorrelationId, DateTimeMillis, PaymentsSummary};

/// Sentinel for an absent lower summary bound: scan from the first key.
pub const TIME_UNBOUNDED_FROM: DateTimeMillis = DateTimeMillis::MIN;
/// Sentinel for an absent upper summary bound: scan to the last key.
pub const TIME_UNBOUNDED_TO: DateTimeMillis = DateTimeMillis::MAX;

/// Discriminated request payload written by the proxy into a slot.
#[repr(C, u8)]
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum IpcRequest {
    PostPayment {
        amount: f64,
        correlation_id: CorrelationId,
    },
    PaymentsSummary {
        from: DateTimeMillis,
        to: DateTimeMillis,
    },
    PurgePayments,
}

/// One rendezvous slot in the shared region.
#[repr(C)]
pub struct IpcSlot {
    pub request_ready: ShmSemaphore,
    pub response_ready: ShmSemaphore,
    request: UnsafeCell<IpcRequest>,
    response: UnsafeCell<PaymentsSummary>,
}

// Per-slot ownership discipline: at most one proxy thread writes the request
// side, at most one worker at a time consumes it, and the semaphores order
// every access to the payload cells.
unsafe impl Send for IpcSlot {}
unsafe impl Sync for IpcSlot {}

impl IpcSlot {
    /// In-place construction on the freshly created region. Coordinator only.
    ///
    /// # Safety
    /// `this` must point into a writable mapping with room and alignment for
    /// an `IpcSlot`, before any peer uses the slot.
    pub unsafe fn init(this: *mut IpcSlot) -> io::Result<()> {
        unsafe {
            ShmSemaphore::init(&raw mut (*this).request_ready)?;
            ShmSemaphore::init(&raw mut (*this).response_ready)?;
            // A read-only request as the resting value, in case of a stray
            // wake-up before the first real request lands.
            (*this).request.get().write(IpcRequest::PaymentsSummary {
                from: TIME_UNBOUNDED_FROM,
                to: TIME_UNBOUNDED_TO,
            });
            (*this).response.get().write(PaymentsSummary::default());
        }
        Ok(())
    }

    /// Publish a request and wake the worker side.
    pub fn send_request(&self, request: IpcRequest) {
        unsafe {
            self.request.get().write(request);
        }
        self.request_ready.post();
    }

    /// Worker side: snapshot the current request payload.
    ///
    /// Call only after winning a `request_ready` wait.
    pub fn take_request(&self) -> IpcRequest {
        unsafe { self.request.get().read() }
    }

    /// Worker side: publish a summary response and wake the proxy thread.
    pub fn send_response(&self, response: PaymentsSummary) {
        unsafe {
            self.response.get().write(response);
        }
        self.response_ready.post();
    }

    /// Worker side: acknowledge an operation with no response payload.
    pub fn acknowledge(&self) {
        self.response_ready.post();
    }

    /// Proxy side: read the response after `response_ready` was granted.
    pub fn read_response(&self) -> PaymentsSummary {
        unsafe { self.response.get().read() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::GatewaySummary;
    use std::sync::Arc;
    use std::time::Duration;

    fn boxed_slot() -> Arc<IpcSlot> {
        let slot: Arc<IpcSlot> = Arc::new(unsafe { std::mem::zeroed() });
        unsafe {
            IpcSlot::init(Arc::as_ptr(&slot) as *mut IpcSlot).unwrap();
        }
        slot
    }

    #[test]
    fn request_round_trip() {
        let slot = boxed_slot();
        let request = IpcRequest::PostPayment {
            amount: 19.9,
            correlation_id: *b"4a7901b8-7d63-4ff3-8ed5-99fc1d154by1",
        };

        slot.send_request(request);
        assert!(slot.request_ready.wait_timeout(Duration::from_millis(100)));
        assert_eq!(slot.take_request(), request);
    }

    #[test]
    fn response_round_trip() {
        let slot = boxed_slot();
        let summary = PaymentsSummary {
            default: GatewaySummary {
                total_requests: 3,
                total_amount: 61.5,
            },
            fallback: GatewaySummary::default(),
        };

        slot.send_response(summary);
        assert!(slot.response_ready.wait_timeout(Duration::from_millis(100)));
        assert_eq!(slot.read_response(), summary);
    }

    #[test]
    fn resting_request_is_read_only() {
        let slot = boxed_slot();
        match slot.take_request() {
            IpcRequest::PaymentsSummary { from, to } => {
                assert_eq!(from, TIME_UNBOUNDED_FROM);
                assert_eq!(to, TIME_UNBOUNDED_TO);
            }
            other => panic!("unexpected resting request: {other:?}"),
        }
    }
}
