//! Frame storage for suspended generators.
//!
//! A suspended generator keeps no register file. At each suspension the
//! registers live across that resume point are packed densely into a
//! `FrameStorage`, in ascending register order; on resume they are
//! unpacked into a fresh register file.
//!
//! # Storage Layout
//!
//! ```text
//! liveness  {r0, r3, r7}
//! storage   [ r0 | r3 | r7 ]      inline up to INLINE_CAPACITY values,
//!                                 spilled to the heap beyond that
//! ```
//!
//! Slots are `Option<Value>` so a local that is live but still unbound
//! (read on some later path before assignment) round-trips as unbound.

use relay_compiler::LivenessMap;
use relay_core::Value;
use smallvec::SmallVec;
use std::fmt;

/// Maximum inline values before spilling to the heap.
pub const INLINE_CAPACITY: usize = 8;

/// Saved live registers of one suspended activation.
#[derive(Clone, Default)]
pub struct FrameStorage {
    values: SmallVec<[Option<Value>; INLINE_CAPACITY]>,
}

impl FrameStorage {
    /// Empty inline storage.
    #[inline]
    pub fn new() -> Self {
        Self {
            values: SmallVec::new(),
        }
    }

    /// Storage pre-sized for `capacity` values (the frame layout's
    /// largest resume point).
    #[inline]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            values: SmallVec::with_capacity(capacity),
        }
    }

    /// Number of stored values.
    #[inline(always)]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Returns true if nothing is stored.
    #[inline(always)]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Returns true once the values no longer fit inline.
    #[inline(always)]
    pub fn is_spilled(&self) -> bool {
        self.values.spilled()
    }

    /// Current capacity.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.values.capacity()
    }

    /// Stored value at dense position `index`.
    #[inline]
    pub fn get(&self, index: usize) -> Option<&Value> {
        self.values.get(index).and_then(Option::as_ref)
    }

    /// Replace the contents with the live registers of `registers`.
    pub fn capture(&mut self, registers: &[Option<Value>], liveness: LivenessMap) {
        self.values.clear();
        self.values.extend(
            liveness
                .iter()
                .map(|reg| registers.get(reg.0 as usize).cloned().flatten()),
        );
    }

    /// Move the stored values back into `registers`.
    ///
    /// `liveness` must be the map the values were captured under.
    pub fn restore(&mut self, registers: &mut [Option<Value>], liveness: LivenessMap) {
        debug_assert_eq!(self.values.len(), liveness.count());
        for (reg, value) in liveness.iter().zip(self.values.drain(..)) {
            if let Some(slot) = registers.get_mut(reg.0 as usize) {
                *slot = value;
            }
        }
    }

    /// Drop every stored value.
    #[inline]
    pub fn clear(&mut self) {
        self.values.clear();
    }
}

impl fmt::Debug for FrameStorage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FrameStorage")
            .field("len", &self.len())
            .field("spilled", &self.is_spilled())
            .finish()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use relay_compiler::Register;

    fn regs(values: &[Option<i64>]) -> Vec<Option<Value>> {
        values.iter().map(|v| v.map(Value::Int)).collect()
    }

    #[test]
    fn test_capture_only_live() {
        let registers = regs(&[Some(10), Some(20), Some(30), Some(40)]);
        let liveness: LivenessMap = [Register(1), Register(3)].into_iter().collect();
        let mut storage = FrameStorage::new();
        storage.capture(&registers, liveness);

        assert_eq!(storage.len(), 2);
        assert_eq!(storage.get(0), Some(&Value::Int(20)));
        assert_eq!(storage.get(1), Some(&Value::Int(40)));
    }

    #[test]
    fn test_restore_into_fresh_file() {
        let registers = regs(&[Some(1), Some(2), Some(3)]);
        let liveness: LivenessMap = [Register(0), Register(2)].into_iter().collect();
        let mut storage = FrameStorage::new();
        storage.capture(&registers, liveness);

        let mut fresh = vec![None; 3];
        storage.restore(&mut fresh, liveness);
        assert_eq!(fresh, regs(&[Some(1), None, Some(3)]));
        assert!(storage.is_empty());
    }

    #[test]
    fn test_unbound_round_trips() {
        let registers = regs(&[None, Some(5)]);
        let liveness = LivenessMap::first(2);
        let mut storage = FrameStorage::new();
        storage.capture(&registers, liveness);
        assert_eq!(storage.len(), 2);
        assert_eq!(storage.get(0), None);

        let mut fresh = vec![Some(Value::Int(99)); 2];
        storage.restore(&mut fresh, liveness);
        assert_eq!(fresh, regs(&[None, Some(5)]));
    }

    #[test]
    fn test_spill_beyond_inline() {
        let registers: Vec<Option<Value>> = (0..20).map(|i| Some(Value::Int(i))).collect();
        let mut storage = FrameStorage::new();
        storage.capture(&registers, LivenessMap::first(4));
        assert!(!storage.is_spilled());
        storage.capture(&registers, LivenessMap::first(20));
        assert!(storage.is_spilled());
        assert_eq!(storage.get(19), Some(&Value::Int(19)));
    }
}
