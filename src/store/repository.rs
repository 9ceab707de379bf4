//! Per-gateway payment repository over a duplicate-sorted sub-database.
//!
//! Key: millisecond timestamp, big-endian encoded so LMDB's bytewise
//! comparator yields chronological order on any host. Value: packed
//! 44-byte record (amount + correlation id); one timestamp may carry many
//! records (`DUP_SORT | DUP_FIXED`).

use std::borrow::Cow;
use std::ops::Bound;

use heed::byteorder::BE;
use heed::types::I64;
use heed::{BoxedError, BytesDecode, BytesEncode, Database, DatabaseFlags, Env, RoTxn, RwTxn};

use crate::store::StoreError;
use crate::types::{CORRELATION_ID_LEN, CorrelationId, DateTimeMillis, Gateway, GatewaySummary};

/// On-disk value: `f64` amount followed by the verbatim correlation id.
pub const PAYMENT_RECORD_LEN: usize = 8 + CORRELATION_ID_LEN;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PaymentRecord {
    pub amount: f64,
    pub correlation_id: CorrelationId,
}

/// Fixed-size codec for [`PaymentRecord`]; `DUP_FIXED` requires every
/// duplicate value to have the same byte length.
pub struct PaymentCodec;

impl<'a> BytesEncode<'a> for PaymentCodec {
    type EItem = PaymentRecord;

    fn bytes_encode(item: &'a Self::EItem) -> Result<Cow<'a, [u8]>, BoxedError> {
        let mut bytes = [0u8; PAYMENT_RECORD_LEN];
        bytes[..8].copy_from_slice(&item.amount.to_le_bytes());
        bytes[8..].copy_from_slice(&item.correlation_id);
        Ok(Cow::Owned(bytes.to_vec()))
    }
}

impl<'a> BytesDecode<'a> for PaymentCodec {
    type DItem = PaymentRecord;

    fn bytes_decode(bytes: &'a [u8]) -> Result<Self::DItem, BoxedError> {
        let bytes: &[u8; PAYMENT_RECORD_LEN] = bytes
            .try_into()
            .map_err(|_| format!("payment record must be {PAYMENT_RECORD_LEN} bytes"))?;

        let mut amount = [0u8; 8];
        amount.copy_from_slice(&bytes[..8]);
        let mut correlation_id = [0u8; CORRELATION_ID_LEN];
        correlation_id.copy_from_slice(&bytes[8..]);

        Ok(PaymentRecord {
            amount: f64::from_le_bytes(amount),
            correlation_id,
        })
    }
}

type PaymentDb = Database<I64<BE>, PaymentCodec>;

pub struct PaymentRepository {
    db: PaymentDb,
}

impl PaymentRepository {
    /// Open (or, on the coordinator, create) the gateway's sub-database.
    pub fn open(env: &Env, gateway: Gateway, create: bool) -> Result<Self, StoreError> {
        let name = match gateway {
            Gateway::Default => "default",
            Gateway::Fallback => "fallback",
        };
        let flags = DatabaseFlags::DUP_SORT | DatabaseFlags::DUP_FIXED;

        let db = if create {
            let mut wtxn = env.write_txn()?;
            let db = env
                .database_options()
                .types::<I64<BE>, PaymentCodec>()
                .name(name)
                .flags(flags)
                .create(&mut wtxn)?;
            wtxn.commit()?;
            db
        } else {
            let rtxn = env.read_txn()?;
            env.database_options()
                .types::<I64<BE>, PaymentCodec>()
                .name(name)
                .flags(flags)
                .open(&rtxn)?
                .ok_or(StoreError::MissingDatabase(name))?
        };

        Ok(Self { db })
    }

    /// Append one duplicate record under the submit timestamp.
    pub fn append(
        &self,
        wtxn: &mut RwTxn,
        amount: f64,
        correlation_id: &CorrelationId,
        requested_at: DateTimeMillis,
    ) -> Result<(), StoreError> {
        let record = PaymentRecord {
            amount,
            correlation_id: *correlation_id,
        };
        self.db.put(wtxn, &requested_at, &record)?;
        Ok(())
    }

    /// Count and sum every record with `requested_at ∈ [from, to]`,
    /// duplicates included.
    pub fn summary(
        &self,
        rtxn: &RoTxn,
        from: Option<DateTimeMillis>,
        to: Option<DateTimeMillis>,
    ) -> Result<GatewaySummary, StoreError> {
        let range = (
            from.map_or(Bound::Unbounded, Bound::Included),
            to.map_or(Bound::Unbounded, Bound::Included),
        );

        let mut summary = GatewaySummary::default();
        for entry in self.db.range(rtxn, &range)? {
            let (_, record) = entry?;
            summary.total_requests += 1;
            summary.total_amount += record.amount;
        }

        Ok(summary)
    }

    /// Empty the sub-database without deleting it.
    pub fn purge(&self, wtxn: &mut RwTxn) -> Result<(), StoreError> {
        self.db.clear(wtxn)?;
        Ok(())
    }
}
