//! Per-server table of request slots
//!
//! Every server owns exactly [`POOL_CAPACITY`] slots, one per RADIUS
//! identifier, and the identifier of a slot is its index in the table. Free
//! slots form a singly linked list threaded through the table by index:
//! acquisition pops the head, release appends at the tail, so a just-freed
//! identifier is the last one to be reused.

use crate::transaction::AuthHandle;
use std::time::Instant;
use thiserror::Error;
use tracing::warn;

/// Number of slots per server (the whole one-byte identifier space)
pub const POOL_CAPACITY: usize = 256;

/// Every identifier of the server is in flight
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("all {POOL_CAPACITY} request identifiers are in flight")]
pub struct PoolExhausted;

/// One reusable transaction record
#[derive(Debug, Clone)]
pub struct RequestSlot {
    /// RADIUS identifier, equal to the slot's index
    pub identifier: u8,
    /// Request Authenticator of the most recent send from this slot
    pub authenticator: [u8; 16],
    /// Whether a transaction currently owns the slot
    pub active: bool,
    /// Transaction that owns the slot while active
    pub owner: Option<AuthHandle>,
    /// When the armed response timer fires, if one is armed
    pub deadline: Option<Instant>,
    next: Option<u8>,
}

impl RequestSlot {
    fn new(identifier: u8) -> Self {
        RequestSlot {
            identifier,
            authenticator: [0u8; 16],
            active: false,
            owner: None,
            deadline: None,
            next: None,
        }
    }
}

/// Fixed table of request slots with an index-linked free list
#[derive(Debug)]
pub struct SlotPool {
    slots: Vec<RequestSlot>,
    head: Option<u8>,
    tail: Option<u8>,
    free: usize,
}

impl SlotPool {
    /// Create a pool with every slot free, linked in identifier order
    pub fn new() -> Self {
        let mut slots: Vec<RequestSlot> = (0..=u8::MAX).map(RequestSlot::new).collect();
        for id in 0..u8::MAX {
            slots[id as usize].next = Some(id + 1);
        }

        SlotPool {
            slots,
            head: Some(0),
            tail: Some(u8::MAX),
            free: POOL_CAPACITY,
        }
    }

    /// Take the slot at the head of the free list for `owner`
    pub fn acquire(&mut self, owner: AuthHandle) -> Result<u8, PoolExhausted> {
        let id = self.head.ok_or(PoolExhausted)?;
        let slot = &mut self.slots[id as usize];

        self.head = slot.next.take();
        if self.head.is_none() {
            self.tail = None;
        }
        self.free -= 1;

        slot.active = true;
        slot.owner = Some(owner);
        slot.deadline = None;
        Ok(id)
    }

    /// Return a slot to the tail of the free list
    ///
    /// Releasing a slot that is already free is ignored and reported as
    /// `false`; the free list is left untouched.
    pub fn release(&mut self, id: u8) -> bool {
        let slot = &mut self.slots[id as usize];
        if !slot.active {
            warn!(identifier = id, "Ignoring release of a request slot that is already free");
            return false;
        }

        slot.active = false;
        slot.owner = None;
        slot.deadline = None;
        slot.next = None;

        match self.tail {
            Some(tail) => self.slots[tail as usize].next = Some(id),
            None => self.head = Some(id),
        }
        self.tail = Some(id);
        self.free += 1;
        true
    }

    pub fn slot(&self, id: u8) -> &RequestSlot {
        &self.slots[id as usize]
    }

    pub fn slot_mut(&mut self, id: u8) -> &mut RequestSlot {
        &mut self.slots[id as usize]
    }

    /// The slot for `id`, only if a transaction owns it
    pub fn active_slot(&self, id: u8) -> Option<&RequestSlot> {
        let slot = &self.slots[id as usize];
        slot.active.then_some(slot)
    }

    /// Number of free slots
    pub fn available(&self) -> usize {
        self.free
    }

    /// Number of active slots
    pub fn in_flight(&self) -> usize {
        POOL_CAPACITY - self.free
    }

    /// Release every active slot and return the transactions that owned them
    pub fn drain(&mut self) -> Vec<AuthHandle> {
        let active: Vec<(u8, Option<AuthHandle>)> = self
            .slots
            .iter()
            .filter(|slot| slot.active)
            .map(|slot| (slot.identifier, slot.owner))
            .collect();

        active
            .into_iter()
            .filter_map(|(id, owner)| {
                self.release(id);
                owner
            })
            .collect()
    }
}

impl Default for SlotPool {
    fn default() -> Self {
        Self::new()
    }
}
