//! Register liveness for suspension points.
//!
//! A generator's registers do not survive a suspension; only the values
//! recorded in its frame storage do. This module decides which registers
//! must be recorded at each resume point by running a backward dataflow
//! analysis over the lowered bytecode.
//!
//! # Control-Flow Edges
//!
//! ```text
//! fallthrough     pc -> pc + 1          kills defs(pc)
//! branch          pc -> target          kills defs(pc)
//! loop exit       ForIter -> exit       kills nothing (no item was produced)
//! exception       pc -> handler(pc)     kills nothing (pc did not complete)
//! ```
//!
//! The live set across a suspension at `pc` is therefore
//! `(live_in[pc + 1] - {dst}) ∪ live_in[handler(pc)]`: a resumption value
//! overwrites `dst`, but an injected exception leaves it untouched.

use crate::bytecode::{CodeObject, Instruction, Register};
use smallvec::SmallVec;
use std::fmt;

// ============================================================================
// Liveness Map
// ============================================================================

const WORDS: usize = 4;

/// Bitmap of live registers.
///
/// Covers the full 256-register file, so it stays `Copy` and never
/// allocates.
#[derive(Clone, Copy, PartialEq, Eq, Default, Hash)]
pub struct LivenessMap {
    bits: [u64; WORDS],
}

impl LivenessMap {
    /// Empty liveness (no registers live).
    pub const EMPTY: Self = Self { bits: [0; WORDS] };

    /// Creates an empty liveness map.
    #[inline(always)]
    pub const fn empty() -> Self {
        Self::EMPTY
    }

    /// Creates a map with registers `0..count` live.
    pub fn first(count: usize) -> Self {
        (0..count.min(256)).fold(Self::EMPTY, |map, r| map.with_live(Register(r as u8)))
    }

    /// Returns true if no registers are live.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.bits.iter().all(|w| *w == 0)
    }

    /// Returns the number of live registers.
    #[inline]
    pub fn count(&self) -> usize {
        self.bits.iter().map(|w| w.count_ones() as usize).sum()
    }

    /// Checks if a register is live.
    #[inline(always)]
    pub const fn is_live(&self, reg: Register) -> bool {
        let r = reg.0 as usize;
        (self.bits[r / 64] & (1u64 << (r % 64))) != 0
    }

    /// Marks a register live.
    #[inline]
    #[must_use]
    pub const fn with_live(mut self, reg: Register) -> Self {
        let r = reg.0 as usize;
        self.bits[r / 64] |= 1u64 << (r % 64);
        self
    }

    /// Clears a register.
    #[inline]
    #[must_use]
    pub const fn without(mut self, reg: Register) -> Self {
        let r = reg.0 as usize;
        self.bits[r / 64] &= !(1u64 << (r % 64));
        self
    }

    /// Set union.
    #[inline]
    #[must_use]
    pub fn union(mut self, other: Self) -> Self {
        for (w, o) in self.bits.iter_mut().zip(other.bits) {
            *w |= o;
        }
        self
    }

    /// Set intersection.
    #[inline]
    #[must_use]
    pub fn intersect(mut self, other: Self) -> Self {
        for (w, o) in self.bits.iter_mut().zip(other.bits) {
            *w &= o;
        }
        self
    }

    /// Iterate over live registers in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = Register> + '_ {
        (0..=255u8).map(Register).filter(|r| self.is_live(*r))
    }

    /// Position of a live register among the live registers.
    /// This is its slot in the saved frame.
    #[inline]
    pub fn compact_index(&self, reg: Register) -> usize {
        debug_assert!(self.is_live(reg));
        let r = reg.0 as usize;
        let word = r / 64;
        let below: usize = self.bits[..word].iter().map(|w| w.count_ones() as usize).sum();
        let mask = (1u64 << (r % 64)) - 1;
        below + (self.bits[word] & mask).count_ones() as usize
    }
}

impl fmt::Debug for LivenessMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("LivenessMap{")?;
        for (i, reg) in self.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{}", reg)?;
        }
        f.write_str("}")
    }
}

impl FromIterator<Register> for LivenessMap {
    fn from_iter<I: IntoIterator<Item = Register>>(iter: I) -> Self {
        iter.into_iter().fold(Self::EMPTY, Self::with_live)
    }
}

// ============================================================================
// Analysis
// ============================================================================

/// One outgoing control-flow edge: `(successor, kills_defs)`.
type Edge = (usize, bool);

/// Per-instruction live-in sets for one code object.
#[derive(Debug, Clone)]
pub struct LivenessAnalysis {
    live_in: Vec<LivenessMap>,
}

impl LivenessAnalysis {
    /// Run the backward fixpoint over `code`.
    pub fn compute(code: &CodeObject) -> Self {
        let len = code.instructions.len();
        let mut live_in = vec![LivenessMap::EMPTY; len];
        let uses: Vec<LivenessMap> = code
            .instructions
            .iter()
            .map(|inst| inst.uses().into_iter().collect())
            .collect();
        let defs: Vec<LivenessMap> = code
            .instructions
            .iter()
            .map(|inst| inst.defs().into_iter().collect())
            .collect();

        let mut changed = true;
        while changed {
            changed = false;
            for pc in (0..len).rev() {
                let mut live = uses[pc];
                for (succ, kills) in edges(code, pc) {
                    live = live.union(flow(live_in[succ], defs[pc], kills));
                }
                if live != live_in[pc] {
                    live_in[pc] = live;
                    changed = true;
                }
            }
        }
        Self { live_in }
    }

    /// Registers live on entry to `pc`.
    #[inline]
    pub fn live_in(&self, pc: usize) -> LivenessMap {
        self.live_in.get(pc).copied().unwrap_or_default()
    }

    /// Registers that must survive a suspension at `pc`.
    pub fn live_across(&self, code: &CodeObject, pc: usize) -> LivenessMap {
        let defs: LivenessMap = code
            .instructions
            .get(pc)
            .map(|inst| inst.defs().into_iter().collect())
            .unwrap_or_default();
        edges(code, pc)
            .into_iter()
            .fold(LivenessMap::EMPTY, |acc, (succ, kills)| {
                acc.union(flow(self.live_in[succ], defs, kills))
            })
    }
}

#[inline]
fn flow(succ_live: LivenessMap, defs: LivenessMap, kills: bool) -> LivenessMap {
    if kills {
        let mut out = succ_live;
        for reg in defs.iter() {
            out = out.without(reg);
        }
        out
    } else {
        succ_live
    }
}

fn edges(code: &CodeObject, pc: usize) -> SmallVec<[Edge; 3]> {
    let mut out = SmallVec::new();
    let len = code.instructions.len();
    let inst = &code.instructions[pc];
    if inst.falls_through() && pc + 1 < len {
        out.push((pc + 1, true));
    }
    if let Some(target) = inst.jump_target() {
        let kills = !matches!(inst, Instruction::ForIter { .. });
        if (target as usize) < len {
            out.push((target as usize, kills));
        }
    }
    if let Some(entry) = code.handler_for(pc as u32) {
        if (entry.handler_pc as usize) < len {
            out.push((entry.handler_pc as usize, false));
        }
    }
    out
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_map_basics() {
        let map = LivenessMap::EMPTY
            .with_live(Register(0))
            .with_live(Register(70))
            .with_live(Register(255));
        assert_eq!(map.count(), 3);
        assert!(map.is_live(Register(70)));
        assert!(!map.is_live(Register(1)));
        assert_eq!(map.compact_index(Register(70)), 1);
        assert_eq!(map.compact_index(Register(255)), 2);
        assert_eq!(
            map.iter().collect::<Vec<_>>(),
            vec![Register(0), Register(70), Register(255)]
        );
        assert!(map.without(Register(70)).without(Register(0)).without(Register(255)).is_empty());
    }

    #[test]
    fn test_map_set_ops() {
        let a: LivenessMap = [Register(1), Register(2)].into_iter().collect();
        let b: LivenessMap = [Register(2), Register(3)].into_iter().collect();
        assert_eq!(a.union(b).count(), 3);
        assert_eq!(a.intersect(b).iter().collect::<Vec<_>>(), vec![Register(2)]);
        assert_eq!(LivenessMap::first(3).count(), 3);
    }

    #[test]
    fn test_map_debug() {
        let map: LivenessMap = [Register(1), Register(4)].into_iter().collect();
        assert_eq!(format!("{:?}", map), "LivenessMap{r1, r4}");
    }
}
