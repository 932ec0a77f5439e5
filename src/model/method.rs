//! Methods, their identity and access flags.
//!
//! A [`Method`] owns its instruction list and a label map binding label names to instruction
//! indices. The label map is the single source of truth for branch targets; instructions only
//! carry label names. All mutation goes through [`crate::patch::MethodEditor`], which keeps the
//! two consistent and validates before committing.

use std::{collections::BTreeMap, fmt};

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

use crate::{
    model::{
        descriptor::{MethodDescriptor, MethodRef, TypeDescriptor},
        instruction::Instruction,
    },
    patch::{validation::validate_method, MethodEditor},
    Error, Result,
};

bitflags! {
    /// Access flags of a class or method, with the values used by the DEX format.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct AccessFlags: u32 {
        /// `public`
        const PUBLIC = 0x0001;
        /// `private`
        const PRIVATE = 0x0002;
        /// `protected`
        const PROTECTED = 0x0004;
        /// `static`
        const STATIC = 0x0008;
        /// `final`
        const FINAL = 0x0010;
        /// `synchronized`
        const SYNCHRONIZED = 0x0020;
        /// `bridge`
        const BRIDGE = 0x0040;
        /// `varargs`
        const VARARGS = 0x0080;
        /// `native`
        const NATIVE = 0x0100;
        /// `interface`
        const INTERFACE = 0x0200;
        /// `abstract`
        const ABSTRACT = 0x0400;
        /// `strictfp`
        const STRICT = 0x0800;
        /// `synthetic`
        const SYNTHETIC = 0x1000;
        /// `annotation`
        const ANNOTATION = 0x2000;
        /// `enum`
        const ENUM = 0x4000;
        /// `constructor`
        const CONSTRUCTOR = 0x1_0000;
        /// `declared-synchronized`
        const DECLARED_SYNCHRONIZED = 0x2_0000;
    }
}

const FLAG_KEYWORDS: &[(AccessFlags, &str)] = &[
    (AccessFlags::PUBLIC, "public"),
    (AccessFlags::PRIVATE, "private"),
    (AccessFlags::PROTECTED, "protected"),
    (AccessFlags::STATIC, "static"),
    (AccessFlags::FINAL, "final"),
    (AccessFlags::SYNCHRONIZED, "synchronized"),
    (AccessFlags::BRIDGE, "bridge"),
    (AccessFlags::VARARGS, "varargs"),
    (AccessFlags::NATIVE, "native"),
    (AccessFlags::INTERFACE, "interface"),
    (AccessFlags::ABSTRACT, "abstract"),
    (AccessFlags::STRICT, "strictfp"),
    (AccessFlags::SYNTHETIC, "synthetic"),
    (AccessFlags::ANNOTATION, "annotation"),
    (AccessFlags::ENUM, "enum"),
    (AccessFlags::CONSTRUCTOR, "constructor"),
    (AccessFlags::DECLARED_SYNCHRONIZED, "declared-synchronized"),
];

impl AccessFlags {
    /// Looks up a single flag by its smali keyword.
    #[must_use]
    pub fn from_keyword(keyword: &str) -> Option<AccessFlags> {
        FLAG_KEYWORDS
            .iter()
            .find(|(_, name)| *name == keyword)
            .map(|(flag, _)| *flag)
    }

    /// The smali keywords of all set flags, in canonical order.
    #[must_use]
    pub fn keywords(&self) -> Vec<&'static str> {
        FLAG_KEYWORDS
            .iter()
            .filter(|(flag, _)| self.contains(*flag))
            .map(|(_, name)| *name)
            .collect()
    }
}

/// Identity of a method: declaring type, name and prototype.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MethodId {
    /// Declaring type
    pub owner: TypeDescriptor,
    /// Method name
    pub name: String,
    /// Prototype
    pub descriptor: MethodDescriptor,
}

impl MethodId {
    /// Creates a method identity.
    #[must_use]
    pub fn new(owner: TypeDescriptor, name: impl Into<String>, descriptor: MethodDescriptor) -> Self {
        MethodId {
            owner,
            name: name.into(),
            descriptor,
        }
    }

    /// The identity as an invocable method reference.
    #[must_use]
    pub fn to_method_ref(&self) -> MethodRef {
        MethodRef {
            owner: self.owner.clone(),
            name: self.name.clone(),
            descriptor: self.descriptor.clone(),
        }
    }
}

impl fmt::Display for MethodId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}->{}{}", self.owner, self.name, self.descriptor)
    }
}

/// Whether a method may still be edited.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MethodState {
    /// Edits are accepted
    #[default]
    Mutable,
    /// The method was validated and frozen; edits fail with [`crate::Error::MethodFinalized`]
    Finalized,
}

/// A method with its instruction body.
#[derive(Debug, Clone)]
pub struct Method {
    id: MethodId,
    flags: AccessFlags,
    locals: u16,
    instructions: Vec<Instruction>,
    labels: BTreeMap<String, usize>,
    state: MethodState,
}

impl PartialEq for Method {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
            && self.flags == other.flags
            && self.locals == other.locals
            && self.instructions == other.instructions
            && self.labels == other.labels
    }
}

impl Method {
    /// Creates a method without a body (abstract or native, or one to be filled by an editor).
    #[must_use]
    pub fn new(id: MethodId, flags: AccessFlags) -> Self {
        Method {
            id,
            flags,
            locals: 0,
            instructions: Vec::new(),
            labels: BTreeMap::new(),
            state: MethodState::Mutable,
        }
    }

    /// Creates a method with a body and validates it.
    ///
    /// `locals` is the number of `v` registers; parameter registers are derived from the
    /// descriptor and the `static` flag.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::CorpusIntegrity`] if a label is out of bounds, a branch targets
    /// an undeclared label or a register lies outside the frame.
    pub fn with_body(
        id: MethodId,
        flags: AccessFlags,
        locals: u16,
        instructions: Vec<Instruction>,
        labels: BTreeMap<String, usize>,
    ) -> Result<Self> {
        let method = Method {
            id,
            flags,
            locals,
            instructions,
            labels,
            state: MethodState::Mutable,
        };
        validate_method(&method)?;
        Ok(method)
    }

    /// The method identity.
    #[must_use]
    pub fn id(&self) -> &MethodId {
        &self.id
    }

    /// The method name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.id.name
    }

    /// The method prototype.
    #[must_use]
    pub fn descriptor(&self) -> &MethodDescriptor {
        &self.id.descriptor
    }

    /// The declared return type.
    #[must_use]
    pub fn return_type(&self) -> &TypeDescriptor {
        &self.id.descriptor.return_type
    }

    /// Access flags.
    #[must_use]
    pub fn flags(&self) -> AccessFlags {
        self.flags
    }

    /// Whether the method is static (has no implicit `this`).
    #[must_use]
    pub fn is_static(&self) -> bool {
        self.flags.contains(AccessFlags::STATIC)
    }

    /// Whether the method can carry code at all.
    #[must_use]
    pub fn has_body(&self) -> bool {
        !self
            .flags
            .intersects(AccessFlags::ABSTRACT | AccessFlags::NATIVE)
    }

    /// Number of local (`v`) registers.
    #[must_use]
    pub fn locals(&self) -> u16 {
        self.locals
    }

    /// Number of parameter (`p`) registers, including `this` for instance methods.
    #[must_use]
    pub fn parameter_registers(&self) -> u16 {
        let this = u16::from(!self.is_static());
        self.id.descriptor.parameter_registers().saturating_add(this)
    }

    /// Total frame size as written in `.registers`.
    ///
    /// Saturates at `u16::MAX`; [`crate::patch::validate_method`] rejects frames that large.
    #[must_use]
    pub fn registers(&self) -> u16 {
        self.locals.saturating_add(self.parameter_registers())
    }

    /// The instruction list.
    #[must_use]
    pub fn instructions(&self) -> &[Instruction] {
        &self.instructions
    }

    /// The label map (name to instruction index).
    #[must_use]
    pub fn labels(&self) -> &BTreeMap<String, usize> {
        &self.labels
    }

    /// The instruction index a label is bound to.
    #[must_use]
    pub fn label_index(&self, name: &str) -> Option<usize> {
        self.labels.get(name).copied()
    }

    /// Names of the labels bound to `index`, in name order.
    pub fn labels_at(&self, index: usize) -> impl Iterator<Item = &str> {
        self.labels
            .iter()
            .filter(move |(_, target)| **target == index)
            .map(|(name, _)| name.as_str())
    }

    /// Code-unit offset of every instruction, plus the total length as the last element.
    #[must_use]
    pub fn code_offsets(&self) -> Vec<u32> {
        let mut offsets = Vec::with_capacity(self.instructions.len() + 1);
        let mut offset = 0;
        for insn in &self.instructions {
            offsets.push(offset);
            offset += insn.size();
        }
        offsets.push(offset);
        offsets
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> MethodState {
        self.state
    }

    /// Whether further edits are rejected.
    #[must_use]
    pub fn is_finalized(&self) -> bool {
        self.state == MethodState::Finalized
    }

    /// Validates the method and freezes it.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::CorpusIntegrity`] if validation fails; the method stays mutable.
    pub fn finalize(&mut self) -> Result<()> {
        validate_method(self)?;
        self.state = MethodState::Finalized;
        Ok(())
    }

    /// Opens a transactional editor on this method.
    ///
    /// # Errors
    ///
    /// - [`crate::Error::MethodFinalized`] if the method is frozen
    /// - [`crate::Error::NoMethodBody`] if the method is abstract or native
    pub fn edit(&mut self) -> Result<MethodEditor<'_>> {
        MethodEditor::new(self)
    }

    pub(crate) fn ensure_editable(&self) -> Result<()> {
        if self.is_finalized() {
            return Err(Error::MethodFinalized(self.id.to_string()));
        }
        if !self.has_body() {
            return Err(Error::NoMethodBody(self.id.to_string()));
        }
        Ok(())
    }

    pub(crate) fn set_body(
        &mut self,
        locals: u16,
        instructions: Vec<Instruction>,
        labels: BTreeMap<String, usize>,
    ) {
        self.locals = locals;
        self.instructions = instructions;
        self.labels = labels;
    }
}
