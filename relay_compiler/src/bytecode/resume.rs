//! Resume tables and frame layouts for lowered generators.
//!
//! The lowering pass numbers suspension points densely in emission order.
//! Resume index `k` maps to a [`ResumePoint`] describing where execution
//! continues and which registers were saved. The table is built once per
//! generator function and shared by all of its instances.

use crate::liveness::LivenessMap;

/// Maximum number of suspension points in one generator.
///
/// Bounded by the 30-bit resume index packed into the generator header.
pub const MAX_RESUME_POINTS: u32 = (1 << 30) - 1;

// ============================================================================
// Resume Points
// ============================================================================

/// A resume point descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResumePoint {
    /// Instruction index of the suspension instruction.
    pub ip: u32,
    /// Registers saved into the frame at this point.
    pub liveness: LivenessMap,
    /// Whether this is the suspension inside a `yield from` loop.
    pub is_delegate: bool,
}

impl ResumePoint {
    /// Creates a plain-yield resume point.
    #[inline]
    pub const fn new(ip: u32, liveness: LivenessMap) -> Self {
        Self {
            ip,
            liveness,
            is_delegate: false,
        }
    }

    /// Creates a resume point for the delegation loop.
    #[inline]
    pub const fn delegate(ip: u32, liveness: LivenessMap) -> Self {
        Self {
            ip,
            liveness,
            is_delegate: true,
        }
    }
}

// ============================================================================
// Resume Table
// ============================================================================

/// Dispatch table from resume index to resume point.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResumeTable {
    points: Vec<ResumePoint>,
}

impl ResumeTable {
    /// Creates an empty resume table.
    #[inline]
    pub const fn new() -> Self {
        Self { points: Vec::new() }
    }

    /// Gets a resume point by index.
    #[inline]
    pub fn get(&self, index: u32) -> Option<&ResumePoint> {
        self.points.get(index as usize)
    }

    /// Number of resume points.
    #[inline]
    pub fn len(&self) -> usize {
        self.points.len()
    }

    /// Returns true if there are no resume points.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Iterate resume points in index order.
    pub fn iter(&self) -> std::slice::Iter<'_, ResumePoint> {
        self.points.iter()
    }
}

/// Builder that assigns dense resume indices.
#[derive(Debug, Default)]
pub struct ResumeTableBuilder {
    points: Vec<ResumePoint>,
}

impl ResumeTableBuilder {
    /// Creates an empty builder.
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a plain-yield point; returns its index.
    pub fn add_yield(&mut self, ip: u32, liveness: LivenessMap) -> u32 {
        self.push(ResumePoint::new(ip, liveness))
    }

    /// Adds a delegation point; returns its index.
    pub fn add_delegate(&mut self, ip: u32, liveness: LivenessMap) -> u32 {
        self.push(ResumePoint::delegate(ip, liveness))
    }

    fn push(&mut self, point: ResumePoint) -> u32 {
        let index = self.points.len() as u32;
        self.points.push(point);
        index
    }

    /// Number of points added so far.
    #[inline]
    pub fn len(&self) -> usize {
        self.points.len()
    }

    /// Returns true if nothing was added.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Finish building.
    pub fn build(self) -> ResumeTable {
        ResumeTable {
            points: self.points,
        }
    }
}

// ============================================================================
// Frame Layout
// ============================================================================

/// Shape of a generator's saved local frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FrameLayout {
    /// Every register saved at some resume point.
    pub registers: LivenessMap,
    /// Largest number of values saved at once; the storage capacity.
    pub capacity: usize,
    /// Parameters saved when the generator is created.
    pub entry: LivenessMap,
}

impl FrameLayout {
    /// Derive the layout from a resume table and the entry liveness.
    pub fn from_table(table: &ResumeTable, entry: LivenessMap) -> Self {
        let registers = table
            .iter()
            .fold(entry, |acc, point| acc.union(point.liveness));
        let capacity = table
            .iter()
            .map(|point| point.liveness.count())
            .chain(std::iter::once(entry.count()))
            .max()
            .unwrap_or(0);
        Self {
            registers,
            capacity,
            entry,
        }
    }
}
