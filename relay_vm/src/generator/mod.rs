//! Generator runtime.
//!
//! This module provides the runtime half of generator support:
//!
//! - [`GeneratorObject`]: the object returned by calling a generator function
//! - [`GeneratorHeader`]: lifecycle state and resume index packed in one word
//! - [`FrameStorage`]: the registers saved across a suspension
//! - [`DelegationFrame`]: the driver behind `yield from`
//! - [`Resumption`]: what a resume call delivers at the suspension point
//!
//! # Execution Model
//!
//! A generator never keeps a live interpreter frame. Each resume builds a
//! fresh register file from the saved values, runs the body until the next
//! suspension or completion, and saves the registers the resume table marks
//! live at that point:
//!
//! ```text
//!   Created ──advance──► Running ──yield──► Suspended ──advance──► Running
//!                           │                                         │
//!                           └──────return / raise──► Completed ◄──────┘
//! ```

mod delegation;
mod object;
mod state;
mod storage;
mod suspend;

pub use delegation::{DelegateStep, DelegationFrame};
pub use object::GeneratorObject;
pub use state::{GeneratorHeader, GeneratorState};
pub use storage::{FrameStorage, INLINE_CAPACITY};
pub use suspend::Resumption;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fresh_header_is_created() {
        let header = GeneratorHeader::new();
        assert_eq!(header.state(), GeneratorState::Created);
        assert_eq!(header.resume_index(), 0);
    }

    #[test]
    fn test_default_resumption_is_next() {
        assert_eq!(Resumption::default(), Resumption::next());
    }
}
