//! Instruction-level patching of method bodies.
//!
//! [`InstructionBuilder`] produces typed [`Block`]s, [`MethodEditor`] splices them into a
//! method while keeping labels, branch encodings and the register frame consistent, and
//! [`validate_method`] checks the resulting body before any edit is committed.

mod builder;
mod editor;
pub mod validation;

pub use builder::{Block, InstructionBuilder};
pub use editor::{ExternalLabel, MethodEditor};
pub use validation::validate_method;
