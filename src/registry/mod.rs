//! Variable registry
//!
//! A fixed table of byte slots, indexed by registration order, behind a
//! single exclusive lock. Slots are registered during start-up, the table is
//! then sealed and only slot contents change for the rest of the run. Every
//! write replaces a whole buffer while the lock is held, so readers never see
//! a partially written value.

use tokio::sync::{Mutex, MutexGuard};

use crate::core::{Error, Result};

/// Largest slot size expressible in a variable list entry
pub const MAX_SLOT_SIZE: usize = 127;

/// Largest number of slots addressable by a one byte id
pub const MAX_SLOTS: usize = 256;

/// Stable index of a registered slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VarId(u8);

impl VarId {
    /// Id as carried on the wire
    pub const fn new(raw: u8) -> Self {
        VarId(raw)
    }

    /// Raw wire value
    pub const fn raw(self) -> u8 {
        self.0
    }

    /// Position in the table
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

/// Immutable layout of one slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotInfo {
    pub id: VarId,
    pub size: usize,
    pub writable: bool,
}

#[derive(Debug)]
struct Slot {
    info: SlotInfo,
    data: Box<[u8]>,
}

#[derive(Debug, Default)]
struct Inner {
    slots: Vec<Slot>,
    sealed: bool,
}

impl Inner {
    fn slot(&self, id: VarId) -> Result<&Slot> {
        self.slots
            .get(id.index())
            .ok_or(Error::UnknownVariable(id.raw()))
    }

    fn slot_mut(&mut self, id: VarId) -> Result<&mut Slot> {
        self.slots
            .get_mut(id.index())
            .ok_or(Error::UnknownVariable(id.raw()))
    }
}

/// Shared variable table
#[derive(Debug, Default)]
pub struct Registry {
    inner: Mutex<Inner>,
}

impl Registry {
    /// Creates an empty, unsealed registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a zeroed slot of `size` bytes and returns its id.
    ///
    /// Fails once the registry is sealed.
    pub async fn register(&self, size: usize, writable: bool) -> Result<VarId> {
        let mut inner = self.inner.lock().await;
        if inner.sealed {
            return Err(Error::registry("registration after start"));
        }
        if size == 0 || size > MAX_SLOT_SIZE {
            return Err(Error::registry(format!(
                "slot size {} outside 1..={}",
                size, MAX_SLOT_SIZE
            )));
        }
        if inner.slots.len() >= MAX_SLOTS {
            return Err(Error::registry("variable table full"));
        }

        let id = VarId(inner.slots.len() as u8);
        inner.slots.push(Slot {
            info: SlotInfo { id, size, writable },
            data: vec![0u8; size].into_boxed_slice(),
        });
        Ok(id)
    }

    /// Freezes the layout; later registrations fail
    pub async fn seal(&self) {
        self.inner.lock().await.sealed = true;
    }

    /// Whether the layout is frozen
    pub async fn is_sealed(&self) -> bool {
        self.inner.lock().await.sealed
    }

    /// Number of registered slots
    pub async fn len(&self) -> usize {
        self.inner.lock().await.slots.len()
    }

    /// Whether no slot has been registered
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Acquires the registry lock for a sequence of operations
    pub async fn lock(&self) -> RegistryGuard<'_> {
        RegistryGuard {
            inner: self.inner.lock().await,
        }
    }

    /// Snapshot copy of one slot
    pub async fn read(&self, id: VarId) -> Result<Vec<u8>> {
        self.lock().await.read(id)
    }

    /// Replaces one slot's contents
    pub async fn write(&self, id: VarId, bytes: &[u8]) -> Result<()> {
        self.lock().await.write(id, bytes)
    }

    /// Snapshot of several slots taken under one lock acquisition
    pub async fn read_many(&self, ids: &[VarId]) -> Result<Vec<Vec<u8>>> {
        let guard = self.lock().await;
        ids.iter().map(|&id| guard.read(id)).collect()
    }

    /// Applies several writes under one lock acquisition.
    ///
    /// Every write is validated before any slot changes.
    pub async fn write_many(&self, writes: &[(VarId, Vec<u8>)]) -> Result<()> {
        let mut guard = self.lock().await;
        for (id, bytes) in writes {
            guard.check_size(*id, bytes.len())?;
        }
        for (id, bytes) in writes {
            guard.write(*id, bytes)?;
        }
        Ok(())
    }

    /// Layout of every slot, in id order
    pub async fn describe(&self) -> Vec<SlotInfo> {
        self.lock().await.describe()
    }
}

/// Exclusive access to the registry, released on drop
pub struct RegistryGuard<'a> {
    inner: MutexGuard<'a, Inner>,
}

impl RegistryGuard<'_> {
    /// Layout of one slot
    pub fn info(&self, id: VarId) -> Result<SlotInfo> {
        Ok(self.inner.slot(id)?.info)
    }

    /// Layout of every slot, in id order
    pub fn describe(&self) -> Vec<SlotInfo> {
        self.inner.slots.iter().map(|slot| slot.info).collect()
    }

    /// Snapshot copy of one slot
    pub fn read(&self, id: VarId) -> Result<Vec<u8>> {
        Ok(self.inner.slot(id)?.data.to_vec())
    }

    /// Replaces one slot's contents; `bytes` must match the slot size.
    ///
    /// Writability only restricts clients, see [`RegistryGuard::write_client`].
    pub fn write(&mut self, id: VarId, bytes: &[u8]) -> Result<()> {
        self.check_size(id, bytes.len())?;
        self.inner.slot_mut(id)?.data.copy_from_slice(bytes);
        Ok(())
    }

    /// Client write: like [`RegistryGuard::write`] but refuses read-only slots
    pub fn write_client(&mut self, id: VarId, bytes: &[u8]) -> Result<()> {
        if !self.info(id)?.writable {
            return Err(Error::ReadOnly(id.raw()));
        }
        self.write(id, bytes)
    }

    fn check_size(&self, id: VarId, actual: usize) -> Result<()> {
        let expected = self.inner.slot(id)?.info.size;
        if expected != actual {
            return Err(Error::SizeMismatch {
                id: id.raw(),
                expected,
                actual,
            });
        }
        Ok(())
    }
}
