//! Runtime condition gates around injected code.
//!
//! A gate makes an injected block conditional on a boolean setting read at runtime. The
//! generated prelude reads the flag into a scratch register and branches to a label when it is
//! false:
//!
//! ```text
//! <flag read into vN>
//! if-eqz vN, :gate_7      # flag disabled -> run the original code
//! <injected block>
//! :gate_7
//! <original instruction>
//! ```
//!
//! How the flag is read is a capability supplied by the caller through the [`FlagReader`]
//! trait. [`StaticAccessor`] invokes a dedicated `()Z` accessor, [`SettingsLookup`] passes the
//! settings key to a generic `getBoolean(String)` lookup.

use std::sync::atomic::{AtomicUsize, Ordering};

use crate::{
    config::EngineConfig,
    model::{Method, MethodRef, Register, TypeDescriptor, ValueKind},
    patch::{Block, ExternalLabel, InstructionBuilder, MethodEditor},
    Error, Result,
};

static NEXT_LABEL: AtomicUsize = AtomicUsize::new(0);

/// Emits the instructions that load a boolean setting into a register.
pub trait FlagReader: Send + Sync {
    /// Stable settings key of the flag.
    fn key(&self) -> &str;

    /// Appends instructions leaving the flag value (0 or 1) in `dest`.
    ///
    /// # Errors
    ///
    /// Returns an error if the instructions can not be constructed.
    fn emit_read(&self, asm: &mut InstructionBuilder, dest: Register) -> Result<()>;
}

/// Reads a flag through a static `()Z` accessor method.
#[derive(Debug, Clone)]
pub struct StaticAccessor {
    key: String,
    accessor: MethodRef,
}

impl StaticAccessor {
    /// Creates a reader for `key` calling `accessor`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::InvalidDescriptor`] if the accessor is not `()Z`.
    pub fn new(key: impl Into<String>, accessor: MethodRef) -> Result<Self> {
        let descriptor = &accessor.descriptor;
        if !descriptor.parameters.is_empty() || descriptor.return_type.kind() != ValueKind::Boolean {
            return Err(Error::InvalidDescriptor(accessor.to_string()));
        }
        Ok(StaticAccessor {
            key: key.into(),
            accessor,
        })
    }

    /// The accessor method.
    #[must_use]
    pub fn accessor(&self) -> &MethodRef {
        &self.accessor
    }
}

impl FlagReader for StaticAccessor {
    fn key(&self) -> &str {
        &self.key
    }

    fn emit_read(&self, asm: &mut InstructionBuilder, dest: Register) -> Result<()> {
        asm.invoke_static(&[], self.accessor.clone())?.move_result(dest)?;
        Ok(())
    }
}

/// Reads a flag by passing its key to a static `getBoolean(Ljava/lang/String;)Z` lookup.
#[derive(Debug, Clone)]
pub struct SettingsLookup {
    key: String,
    lookup: MethodRef,
}

impl SettingsLookup {
    /// Creates a reader for `key` calling `lookup`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::InvalidDescriptor`] if the lookup is not
    /// `(Ljava/lang/String;)Z`.
    pub fn new(key: impl Into<String>, lookup: MethodRef) -> Result<Self> {
        let descriptor = &lookup.descriptor;
        let string = TypeDescriptor::parse("Ljava/lang/String;")?;
        if descriptor.parameters != [string] || descriptor.return_type.kind() != ValueKind::Boolean {
            return Err(Error::InvalidDescriptor(lookup.to_string()));
        }
        Ok(SettingsLookup {
            key: key.into(),
            lookup,
        })
    }

    /// The lookup method.
    #[must_use]
    pub fn lookup(&self) -> &MethodRef {
        &self.lookup
    }
}

impl FlagReader for SettingsLookup {
    fn key(&self) -> &str {
        &self.key
    }

    fn emit_read(&self, asm: &mut InstructionBuilder, dest: Register) -> Result<()> {
        asm.const_string(dest, &self.key)?
            .invoke_static(&[dest], self.lookup.clone())?
            .move_result(dest)?;
        Ok(())
    }
}

/// Generates gate preludes for one flag.
pub struct ConditionGate {
    reader: Box<dyn FlagReader>,
    register: Register,
    prefix: String,
}

impl ConditionGate {
    /// Creates a gate using `v0` as scratch register and `gate` as label prefix.
    #[must_use]
    pub fn new(reader: Box<dyn FlagReader>) -> Self {
        ConditionGate::with_config(reader, &EngineConfig::default())
    }

    /// Creates a gate with the scratch register and label prefix of `config`.
    #[must_use]
    pub fn with_config(reader: Box<dyn FlagReader>, config: &EngineConfig) -> Self {
        ConditionGate {
            reader,
            register: Register::Local(config.scratch_register),
            prefix: config.gate_label_prefix.clone(),
        }
    }

    /// The settings key controlling this gate.
    #[must_use]
    pub fn key(&self) -> &str {
        self.reader.key()
    }

    /// The scratch register holding the flag.
    #[must_use]
    pub fn register(&self) -> Register {
        self.register
    }

    /// Emits the flag read followed by `if-eqz vN, :label`.
    ///
    /// `label` is not declared by the block; it must be bound when the block is inserted
    /// (usually as an [`ExternalLabel`] on the original instruction).
    ///
    /// # Errors
    ///
    /// Returns an error if the flag reader fails to emit its instructions.
    pub fn create_condition_block(&self, label: &str) -> Result<Block> {
        let mut asm = InstructionBuilder::new();
        self.reader.emit_read(&mut asm, self.register)?;
        asm.if_eqz(self.register, label)?;
        asm.finish()
    }

    /// Allocates a label name not used in `method` and not handed out before in this run.
    #[must_use]
    pub fn fresh_label(&self, method: &Method) -> String {
        loop {
            let n = NEXT_LABEL.fetch_add(1, Ordering::Relaxed);
            let name = format!("{}_{}", self.prefix, n);
            if method.label_index(&name).is_none() {
                return name;
            }
        }
    }

    /// Inserts `body` before `index` behind the gate. When the flag is off, execution jumps
    /// over `body` to the instruction originally at `index`.
    ///
    /// The scratch register is overwritten; at `index > 0` it must not hold a live value.
    /// Returns the allocated label.
    ///
    /// # Errors
    ///
    /// Returns any error of [`MethodEditor::insert_with_labels`].
    pub fn guard(&self, editor: &mut MethodEditor<'_>, index: usize, body: Block) -> Result<String> {
        let label = self.fresh_label(editor.method());
        let mut block = self.create_condition_block(&label)?;
        block.append(body)?;
        editor.insert_with_labels(index, block, &[ExternalLabel::new(label.clone(), index)])?;
        Ok(label)
    }
}
