//! # dexpatch Prelude
//!
//! This module provides a convenient prelude for the most commonly used types and traits
//! from the dexpatch library. Import this module to get quick access to the essential
//! types for resolving and patching methods.

// ================================================================================================
// Core Types and Error Handling
// ================================================================================================

/// The main error type for all dexpatch operations
pub use crate::Error;

/// The result type used throughout dexpatch
pub use crate::Result;

/// Engine configuration
pub use crate::config::{AmbiguityPolicy, EngineConfig};

// ================================================================================================
// Method Model
// ================================================================================================

/// Corpus, classes and methods
pub use crate::model::{AccessFlags, Class, Corpus, Method, MethodHandle, MethodId, MethodState};

/// Instructions and operands
pub use crate::model::{FlowType, Format, Instruction, Opcode, Operand, Register};

/// Type, method and field descriptors
pub use crate::model::{FieldRef, MethodDescriptor, MethodRef, TypeDescriptor, ValueKind};

// ================================================================================================
// Resolution
// ================================================================================================

/// Fingerprints and their resolution
pub use crate::fingerprint::{
    Fingerprint, FingerprintBuilder, InstructionMatcher, PatternEntry, PatternMatch, Placement,
    Resolution, Resolver, StringMatch,
};

// ================================================================================================
// Patching
// ================================================================================================

/// Instruction blocks and the method editor
pub use crate::patch::{Block, ExternalLabel, InstructionBuilder, MethodEditor};

/// Condition gates
pub use crate::gate::{ConditionGate, FlagReader, SettingsLookup, StaticAccessor};

/// Method neutralization
pub use crate::neutralize::{BlockReport, BlockStyle, BlockedMethod, Neutralizer, ReturnSpec};

/// Patch orchestration
pub use crate::{AppliedPatch, Patch, PatchContext};

/// Declarative plans
pub use crate::plan::PatchPlan;
