//! Generator state management.
//!
//! `GeneratorHeader` packs the lifecycle state and the resume index into a
//! single `u32`, so checking "may this generator run?" and finding where to
//! re-enter it is one load.
//!
//! # Encoding
//!
//! ```text
//! Bits 0-1:  State (Created=0, Running=1, Suspended=2, Completed=3)
//! Bits 2-31: Resume index (max 2^30 - 1 suspension points)
//! ```
//!
//! The header is a `Cell`: generators are `!Send` and the header is read
//! before any interior `RefCell` borrow, which is what turns a re-entrant
//! resume into `AlreadyRunning` instead of a borrow panic.

use relay_compiler::bytecode::MAX_RESUME_POINTS;
use std::cell::Cell;
use std::fmt;

// ============================================================================
// Generator State
// ============================================================================

/// Generator lifecycle state.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum GeneratorState {
    /// Created but never started.
    #[default]
    Created = 0,
    /// Currently executing.
    Running = 1,
    /// Parked at a suspension point.
    Suspended = 2,
    /// Returned, raised or closed. Terminal.
    Completed = 3,
}

impl GeneratorState {
    /// Number of bits used to encode state.
    pub const BITS: u32 = 2;

    /// Mask for extracting state from header.
    pub const MASK: u32 = (1 << Self::BITS) - 1;

    /// Decode the low two bits.
    #[inline(always)]
    pub const fn from_bits(bits: u32) -> Self {
        match bits & Self::MASK {
            0 => Self::Created,
            1 => Self::Running,
            2 => Self::Suspended,
            _ => Self::Completed,
        }
    }

    /// Returns true if a resume call may start the body.
    #[inline(always)]
    pub const fn is_resumable(self) -> bool {
        matches!(self, Self::Created | Self::Suspended)
    }

    /// Guest-visible name, as reported by `inspect.getgeneratorstate`.
    #[inline]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Created => "GEN_CREATED",
            Self::Running => "GEN_RUNNING",
            Self::Suspended => "GEN_SUSPENDED",
            Self::Completed => "GEN_CLOSED",
        }
    }
}

impl fmt::Display for GeneratorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ============================================================================
// Generator Header
// ============================================================================

/// Tagged header combining state and resume index.
///
/// ```text
/// +-------------------+-------+
/// | Resume Index (30) | State |
/// +-------------------+-------+
/// MSB                       LSB
/// ```
#[repr(transparent)]
pub struct GeneratorHeader {
    bits: Cell<u32>,
}

impl GeneratorHeader {
    /// Maximum resume index.
    pub const MAX_RESUME_INDEX: u32 = MAX_RESUME_POINTS;

    const RESUME_SHIFT: u32 = GeneratorState::BITS;

    /// A header in `Created` with resume index 0.
    #[inline]
    pub fn new() -> Self {
        Self {
            bits: Cell::new(GeneratorState::Created as u32),
        }
    }

    #[inline(always)]
    const fn pack(state: GeneratorState, resume_index: u32) -> u32 {
        (resume_index << Self::RESUME_SHIFT) | (state as u32)
    }

    /// Current state.
    #[inline(always)]
    pub fn state(&self) -> GeneratorState {
        GeneratorState::from_bits(self.bits.get())
    }

    /// Resume index of the last suspension.
    #[inline(always)]
    pub fn resume_index(&self) -> u32 {
        self.bits.get() >> Self::RESUME_SHIFT
    }

    /// Both fields from one read.
    #[inline(always)]
    pub fn state_and_index(&self) -> (GeneratorState, u32) {
        let bits = self.bits.get();
        (GeneratorState::from_bits(bits), bits >> Self::RESUME_SHIFT)
    }

    /// Move to `Running` if resumable; returns the previous state.
    #[inline]
    pub fn try_start(&self) -> Option<GeneratorState> {
        let old = self.bits.get();
        let old_state = GeneratorState::from_bits(old);
        if !old_state.is_resumable() {
            return None;
        }
        self.bits
            .set((old & !GeneratorState::MASK) | GeneratorState::Running as u32);
        Some(old_state)
    }

    /// Park at `resume_index`. Only valid while `Running`.
    #[inline]
    pub fn suspend(&self, resume_index: u32) {
        debug_assert_eq!(self.state(), GeneratorState::Running);
        debug_assert!(resume_index <= Self::MAX_RESUME_INDEX);
        self.bits
            .set(Self::pack(GeneratorState::Suspended, resume_index));
    }

    /// Move to `Completed`, keeping the last resume index for debugging.
    #[inline]
    pub fn complete(&self) {
        let old = self.bits.get();
        self.bits
            .set((old & !GeneratorState::MASK) | GeneratorState::Completed as u32);
    }

    /// Returns true while the body is executing.
    #[inline(always)]
    pub fn is_running(&self) -> bool {
        self.state() == GeneratorState::Running
    }
}

impl Default for GeneratorHeader {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for GeneratorHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (state, index) = self.state_and_index();
        f.debug_struct("GeneratorHeader")
            .field("state", &state)
            .field("resume_index", &index)
            .finish()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_roundtrip() {
        for state in [
            GeneratorState::Created,
            GeneratorState::Running,
            GeneratorState::Suspended,
            GeneratorState::Completed,
        ] {
            assert_eq!(GeneratorState::from_bits(state as u32), state);
        }
    }

    #[test]
    fn test_lifecycle() {
        let header = GeneratorHeader::new();
        assert_eq!(header.state_and_index(), (GeneratorState::Created, 0));

        assert_eq!(header.try_start(), Some(GeneratorState::Created));
        assert!(header.is_running());
        assert_eq!(header.try_start(), None);

        header.suspend(7);
        assert_eq!(header.state_and_index(), (GeneratorState::Suspended, 7));

        assert_eq!(header.try_start(), Some(GeneratorState::Suspended));
        assert_eq!(header.resume_index(), 7);

        header.complete();
        assert_eq!(header.state(), GeneratorState::Completed);
        assert_eq!(header.resume_index(), 7);
        assert_eq!(header.try_start(), None);
    }

    #[test]
    fn test_max_resume_index() {
        let header = GeneratorHeader::new();
        header.try_start();
        header.suspend(GeneratorHeader::MAX_RESUME_INDEX);
        assert_eq!(header.resume_index(), GeneratorHeader::MAX_RESUME_INDEX);
        assert_eq!(header.state(), GeneratorState::Suspended);
    }

    #[test]
    fn test_names() {
        assert_eq!(GeneratorState::Created.to_string(), "GEN_CREATED");
        assert_eq!(GeneratorState::Completed.name(), "GEN_CLOSED");
    }
}
