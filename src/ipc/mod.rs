//! Shared-memory IPC fabric between the front-end proxy and the replicas.
//!
//! The region is laid out as an [`IpcHeader`] (readiness gate) followed by
//! `N` [`IpcSlot`]s, `N` being the coordinator's worker count. The
//! coordinator constructs every slot in place and then opens the gate;
//! peers map the region and block on the gate before touching any slot.

pub mod protocol;
pub mod shm;
pub mod sync;

use std::io;

use thiserror::Error;

use crate::ipc::protocol::IpcSlot;
use crate::ipc::shm::SharedMemory;
use crate::ipc::sync::ReadyGate;

const IPC_SHM_NAME: &str = "/payrail-ipc";

#[derive(Debug, Error)]
pub enum IpcError {
    #[error("shared memory object {name}: {source}")]
    SharedMemory {
        name: &'static str,
        source: io::Error,
    },
    #[error("shared region too small: {len} bytes for {slots} slots")]
    RegionTooSmall { len: usize, slots: usize },
    #[error("synchronization primitive init: {0}")]
    SyncInit(#[from] io::Error),
}

/// Region head: the readiness gate peers block on.
#[repr(C)]
pub struct IpcHeader {
    pub ready_gate: ReadyGate,
}

const fn slots_offset() -> usize {
    size_align_up(std::mem::size_of::<IpcHeader>(), std::mem::align_of::<IpcSlot>())
}

const fn size_align_up(value: usize, align: usize) -> usize {
    (value + align - 1) / align * align
}

fn region_len(slots: usize) -> usize {
    slots_offset() + slots * std::mem::size_of::<IpcSlot>()
}

/// A mapped IPC region plus the slot count it was sized for.
pub struct IpcConnection {
    shm: SharedMemory,
    slots: usize,
}

impl IpcConnection {
    /// Create and initialize the region. Coordinator only.
    pub fn create(slots: usize) -> Result<Self, IpcError> {
        let shm = SharedMemory::create(IPC_SHM_NAME, region_len(slots)).map_err(|source| {
            IpcError::SharedMemory {
                name: IPC_SHM_NAME,
                source,
            }
        })?;

        let connection = Self { shm, slots };

        unsafe {
            ReadyGate::init(&raw mut (*connection.header_ptr()).ready_gate)?;
            for index in 0..slots {
                IpcSlot::init(connection.slot_ptr(index))?;
            }
        }

        connection.header().ready_gate.set_ready();
        tracing::info!(slots, "IPC connection initialized");

        Ok(connection)
    }

    /// Map the coordinator's region and wait for readiness. The slot count
    /// is derived from the mapped length.
    pub fn open() -> Result<Self, IpcError> {
        let shm = SharedMemory::open(IPC_SHM_NAME).map_err(|source| IpcError::SharedMemory {
            name: IPC_SHM_NAME,
            source,
        })?;

        let len = shm.len();
        if len < region_len(1) {
            return Err(IpcError::RegionTooSmall { len, slots: 1 });
        }
        let slots = (len - slots_offset()) / std::mem::size_of::<IpcSlot>();

        let connection = Self { shm, slots };
        connection.header().ready_gate.wait_ready();
        tracing::info!(slots, "IPC connection initialized by other process");

        Ok(connection)
    }

    pub fn slots(&self) -> usize {
        self.slots
    }

    pub fn slot(&self, index: usize) -> &IpcSlot {
        assert!(index < self.slots, "slot index {index} out of range");
        unsafe { &*self.slot_ptr(index) }
    }

    fn header_ptr(&self) -> *mut IpcHeader {
        self.shm.as_ptr() as *mut IpcHeader
    }

    fn header(&self) -> &IpcHeader {
        unsafe { &*self.header_ptr() }
    }

    fn slot_ptr(&self, index: usize) -> *mut IpcSlot {
        unsafe { self.shm.as_ptr().add(slots_offset()).cast::<IpcSlot>().add(index) }
    }
}
