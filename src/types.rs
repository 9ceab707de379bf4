//! Core types used throughout the system
//!
//! These are the fundamental payment-domain types shared by the proxy,
//! the IPC protocol, the repositories and the processor.

/// Milliseconds since the Unix epoch.
pub type DateTimeMillis = i64;

/// The client-supplied correlation id, stored verbatim.
///
/// The benchmark sends UUID-shaped strings; we never parse them, we only
/// require the exact length and carry the raw bytes end to end.
pub const CORRELATION_ID_LEN: usize = 36;

pub type CorrelationId = [u8; CORRELATION_ID_LEN];

/// One of the two upstream payment processors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Gateway {
    Default = 0,
    Fallback = 1,
}

impl Gateway {
    /// Number of gateways, used to size per-gateway arrays.
    pub const SIZE: usize = 2;

    pub fn from_u8(value: u8) -> Gateway {
        match value {
            1 => Gateway::Fallback,
            _ => Gateway::Default,
        }
    }

    pub fn other(self) -> Gateway {
        match self {
            Gateway::Default => Gateway::Fallback,
            Gateway::Fallback => Gateway::Default,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Gateway::Default => "DEFAULT",
            Gateway::Fallback => "FALLBACK",
        }
    }
}

/// A payment accepted from a client but not yet submitted upstream.
///
/// Created when a worker receives a post-payment request over IPC; consumed
/// by the payment processor after a successful upstream submit, or dropped
/// on purge.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PendingPayment {
    pub amount: f64,
    pub correlation_id: CorrelationId,
}

/// Aggregate over one gateway's stored payments.
///
/// `repr(C)`: this struct crosses the process boundary inside an IPC slot.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct GatewaySummary {
    pub total_requests: u32,
    pub total_amount: f64,
}

/// Aggregate over both gateways, as answered to `GET /payments-summary`.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PaymentsSummary {
    pub default: GatewaySummary,
    pub fallback: GatewaySummary,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gateway_other_flips() {
        assert_eq!(Gateway::Default.other(), Gateway::Fallback);
        assert_eq!(Gateway::Fallback.other(), Gateway::Default);
    }

    #[test]
    fn gateway_from_u8_defaults_on_unknown() {
        assert_eq!(Gateway::from_u8(0), Gateway::Default);
        assert_eq!(Gateway::from_u8(1), Gateway::Fallback);
        assert_eq!(Gateway::from_u8(7), Gateway::Default);
    }
}
