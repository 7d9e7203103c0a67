use crate::constants::{NUM_OF_SLOTS, PACKET_MAX};

use super::slot::{CapacityError, Slot};

/// Array of up to `NUM_OF_SLOTS` accumulators for the currently-filling
/// packet, plus the running projected size of that packet (`active_bytes`).
/// All storage is allocated once, at construction; slots are logically
/// created on first sight of a name and logically destroyed by `reset`.
pub struct SlotTable {
    slots: Vec<Slot>,
    slots_used: usize,
    active_bytes: usize,
}

impl SlotTable {
    pub fn new() -> Self {
        SlotTable {
            slots: (0..NUM_OF_SLOTS).map(|_| Slot::empty()).collect(),
            slots_used: 0,
            active_bytes: 0,
        }
    }

    pub fn active_bytes(&self) -> usize {
        self.active_bytes
    }

    pub fn slots_used(&self) -> usize {
        self.slots_used
    }

    pub fn is_empty(&self) -> bool {
        self.slots_used == 0
    }

    pub fn used_slots(&self) -> &[Slot] {
        &self.slots[..self.slots_used]
    }

    pub fn slot(&self, idx: usize) -> &Slot {
        &self.slots[idx]
    }

    pub fn slot_mut(&mut self, idx: usize) -> &mut Slot {
        &mut self.slots[idx]
    }

    fn find(&self, name: &[u8]) -> Option<usize> {
        self.slots[..self.slots_used].iter().position(|s| s.name() == name)
    }

    /// Finds the slot for `name`, or creates it if there's room.
    /// Returns `None` if the caller must flush first (mirrors the
    /// source's `find_slot`'s capacity precheck, which only accounts for
    /// the name itself — a line whose *values* overflow the packet is
    /// only caught later, segment by segment; kept for parity, see
    /// DESIGN.md).
    pub fn find_or_add(&mut self, name: &[u8]) -> Option<usize> {
        if let Some(idx) = self.find(name) {
            return Some(idx);
        }
        if self.active_bytes + name.len() > PACKET_MAX {
            return None;
        }
        Some(self.add(name))
    }

    fn add(&mut self, name: &[u8]) -> usize {
        debug_assert!(self.slots_used < self.slots.len(), "NUM_OF_SLOTS exceeded despite active_bytes bound");
        let idx = self.slots_used.min(self.slots.len() - 1);
        self.slots[idx].init(name);
        self.active_bytes += name.len();
        self.slots_used = (self.slots_used + 1).min(self.slots.len());
        idx
    }

    /// Closes the currently-filling packet: all slots are logically
    /// destroyed and `active_bytes` returns to zero.
    pub fn reset(&mut self) {
        self.slots_used = 0;
        self.active_bytes = 0;
    }

    /// Adds a rate-adjusted counter contribution to the slot at `idx` and
    /// keeps `active_bytes` in sync with the slot's re-serialized length.
    pub fn add_counter(&mut self, idx: usize, contribution: f64) -> Result<(), CapacityError> {
        let old_len = self.slots[idx].payload().len();
        self.slots[idx].add_counter(contribution)?;
        let new_len = self.slots[idx].payload().len();
        self.active_bytes = self.active_bytes + new_len - old_len;
        Ok(())
    }

    /// Appends a raw OTHER segment to the slot at `idx` and keeps
    /// `active_bytes` in sync.
    pub fn append_other(&mut self, idx: usize, content: &[u8]) -> Result<(), CapacityError> {
        let old_len = self.slots[idx].payload().len();
        self.slots[idx].append_other(content)?;
        let new_len = self.slots[idx].payload().len();
        self.active_bytes = self.active_bytes + new_len - old_len;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn find_or_add_creates_then_reuses() {
        let mut table = SlotTable::new();
        let a = table.find_or_add(b"foo:").unwrap();
        let b = table.find_or_add(b"foo:").unwrap();
        assert_eq!(a, b);
        assert_eq!(table.slots_used(), 1);
        assert_eq!(table.active_bytes(), 4);
    }

    #[test]
    fn reset_clears_usage() {
        let mut table = SlotTable::new();
        table.find_or_add(b"foo:").unwrap();
        table.reset();
        assert_eq!(table.slots_used(), 0);
        assert_eq!(table.active_bytes(), 0);
    }
}
