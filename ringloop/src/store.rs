//! Storage for accepted read requests.
//!
//! [`RequestStore`] owns every request between [`Engine::submit`] and the
//! moment its completion is delivered. The kernel only ever sees the store
//! key as its 64-bit user data, never a pointer.
//!
//! # Design
//!
//! Each key is a generational index:
//! - **Slot**: position in the underlying Vec (low 32 bits)
//! - **Generation**: bumped every time the slot is freed (high 32 bits)
//!
//! A completion carrying a key whose slot has since been reused is rejected
//! instead of being delivered to the wrong request.
//!
//! [`Engine::submit`]: crate::Engine::submit

use std::collections::VecDeque;

use crate::request::Request;

struct Slot {
  generation: u32,
  entry: Option<Request>,
}

/// Generational key, packed into a `u64` as `generation << 32 | slot`.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) struct Index {
  generation: u32,
  slot: u32,
}

impl Index {
  pub fn as_u64(&self) -> u64 {
    ((self.generation as u64) << 32) | (self.slot as u64)
  }

  pub fn from_u64(packed: u64) -> Self {
    Index {
      slot: (packed & 0xFFFF_FFFF) as u32,
      generation: (packed >> 32) as u32,
    }
  }

  pub fn slot(&self) -> u32 {
    self.slot
  }

  pub fn generation(&self) -> u32 {
    self.generation
  }
}

/// Fixed-capacity owner of pending requests, keyed by generational index.
pub(crate) struct RequestStore {
  slots: Vec<Slot>,
  /// Freed slot indices, reused oldest first.
  free_list: VecDeque<u32>,
  /// Next never-used slot.
  next_slot: u32,
  capacity: u32,
  len: usize,
}

impl RequestStore {
  pub fn with_capacity(cap: usize) -> Self {
    let capacity = cap.min(u32::MAX as usize) as u32;

    Self {
      slots: Vec::with_capacity(capacity as usize),
      free_list: VecDeque::new(),
      next_slot: 0,
      capacity,
      len: 0,
    }
  }

  fn next_id(&mut self) -> Option<Index> {
    if let Some(slot_idx) = self.free_list.pop_front() {
      let slot = &self.slots[slot_idx as usize];
      // Generation was bumped when the slot was freed.
      return Some(Index { slot: slot_idx, generation: slot.generation });
    }

    if self.next_slot < self.capacity {
      let slot_idx = self.next_slot;
      self.next_slot += 1;
      self.slots.push(Slot { generation: 0, entry: None });
      return Some(Index { slot: slot_idx, generation: 0 });
    }

    None
  }

  /// Takes ownership of `request` and returns its key, or hands the request
  /// back if every slot is occupied.
  pub fn insert(&mut self, request: Request) -> Result<u64, Request> {
    let Some(index) = self.next_id() else {
      return Err(request);
    };

    let slot = &mut self.slots[index.slot() as usize];
    debug_assert!(
      slot.entry.is_none(),
      "RequestStore: slot {} should be empty",
      index.slot()
    );
    debug_assert_eq!(slot.generation, index.generation());

    slot.entry = Some(request);
    self.len += 1;

    Ok(index.as_u64())
  }

  /// Removes and returns the request stored under `id`.
  ///
  /// Returns `None` for unknown, already removed, or stale keys.
  pub fn remove(&mut self, id: u64) -> Option<Request> {
    let index = Index::from_u64(id);
    let slot = self.slots.get_mut(index.slot() as usize)?;

    if slot.generation != index.generation() {
      return None;
    }

    let request = slot.entry.take()?;
    slot.generation = slot.generation.wrapping_add(1);
    self.free_list.push_back(index.slot());
    self.len -= 1;

    Some(request)
  }

  pub fn get(&self, id: u64) -> Option<&Request> {
    let index = Index::from_u64(id);
    let slot = self.slots.get(index.slot() as usize)?;

    if slot.generation == index.generation() {
      slot.entry.as_ref()
    } else {
      None
    }
  }

  #[cfg(test)]
  pub fn get_mut(&mut self, id: u64) -> Option<&mut Request> {
    let index = Index::from_u64(id);
    let slot = self.slots.get_mut(index.slot() as usize)?;

    if slot.generation == index.generation() {
      slot.entry.as_mut()
    } else {
      None
    }
  }

  pub fn len(&self) -> usize {
    self.len
  }

  pub fn is_empty(&self) -> bool {
    self.len == 0
  }

  /// Removes every stored request.
  pub fn drain(&mut self) -> Vec<Request> {
    let mut out = Vec::with_capacity(self.len);
    for (idx, slot) in self.slots.iter_mut().enumerate() {
      if let Some(request) = slot.entry.take() {
        slot.generation = slot.generation.wrapping_add(1);
        self.free_list.push_back(idx as u32);
        out.push(request);
      }
    }
    self.len = 0;
    out
  }
}
