//! In-memory model of disassembled classes and methods.
//!
//! The model is deliberately independent of any container format: a [`Corpus`] holds
//! [`Class`]es, a class holds [`Method`]s and a method holds validated [`Instruction`]s plus a
//! label map. The [`listing`] module provides the text serialisation used to load and store a
//! corpus.

pub(crate) mod corpus;
pub(crate) mod descriptor;
pub(crate) mod instruction;
pub mod listing;
pub(crate) mod method;
pub(crate) mod opcode;

pub use corpus::{Class, Corpus, MethodHandle};
pub use descriptor::{FieldRef, MethodDescriptor, MethodRef, TypeDescriptor, ValueKind};
pub use instruction::{Instruction, Operand, Register};
pub use method::{AccessFlags, Method, MethodId, MethodState};
pub use opcode::{FlowType, Format, Opcode, RefKind};
