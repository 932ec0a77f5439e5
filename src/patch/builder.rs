//! Typed construction of instruction blocks.
//!
//! An [`InstructionBuilder`] emits validated [`Instruction`]s through a fluent interface and
//! records block-local labels. The result is a [`Block`], the unit handed to
//! [`crate::patch::MethodEditor`]. Labels inside a block are bound to block-relative indices; a
//! label at `block.len()` binds to whatever instruction follows the block once inserted.
//!
//! Branches may reference labels the block does not declare. They are resolved when the block
//! is inserted, against external labels and the labels already present in the target method.
//!
//! # Examples
//!
//! ```rust
//! use dexpatch::patch::InstructionBuilder;
//! use dexpatch::model::Register;
//!
//! # fn main() -> dexpatch::Result<()> {
//! let mut asm = InstructionBuilder::new();
//! asm.const_int(Register::Local(0), 0)?
//!     .label("skip")?
//!     .ret(Register::Local(0))?;
//! let block = asm.finish()?;
//! assert_eq!(block.len(), 2);
//! assert_eq!(block.labels().get("skip"), Some(&1));
//! # Ok(())
//! # }
//! ```

use std::collections::BTreeMap;

use crate::{
    model::{
        descriptor::{FieldRef, MethodRef, TypeDescriptor},
        instruction::{Instruction, Operand, Register},
        listing,
        opcode::Opcode,
    },
    Error, Result,
};

const BLOCK: &str = "<block>";

/// A sequence of instructions with block-local labels, ready for insertion.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Block {
    instructions: Vec<Instruction>,
    labels: BTreeMap<String, usize>,
}

impl Block {
    /// Creates an empty block.
    #[must_use]
    pub fn new() -> Self {
        Block::default()
    }

    /// Parses a block from listing lines. Lines starting with `:` declare labels, every other
    /// non-empty line is an instruction.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::ListingSyntax`] for invalid instructions (the line number is the
    /// position in `lines`) and [`crate::Error::DuplicateLabel`] for repeated labels.
    pub fn parse<S: AsRef<str>>(lines: &[S]) -> Result<Block> {
        let mut asm = InstructionBuilder::new();
        for (i, line) in lines.iter().enumerate() {
            let line = line.as_ref().trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            if let Some(label) = line.strip_prefix(':') {
                asm.label(label)?;
            } else {
                let insn = listing::parse_instruction(line).map_err(|e| match e {
                    Error::ListingSyntax { message, .. } => Error::ListingSyntax {
                        line: i + 1,
                        message,
                    },
                    other => other,
                })?;
                asm.instruction(insn)?;
            }
        }
        asm.finish()
    }

    /// The instructions in order.
    #[must_use]
    pub fn instructions(&self) -> &[Instruction] {
        &self.instructions
    }

    /// Block-local labels (name to block index, `len()` allowed).
    #[must_use]
    pub fn labels(&self) -> &BTreeMap<String, usize> {
        &self.labels
    }

    /// Number of instructions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.instructions.len()
    }

    /// Whether the block holds no instructions.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.instructions.is_empty()
    }

    /// Appends another block, shifting its labels.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::DuplicateLabel`] if both blocks declare the same label.
    pub fn append(&mut self, other: Block) -> Result<()> {
        let base = self.instructions.len();
        for (name, index) in other.labels {
            if self.labels.contains_key(&name) {
                return Err(Error::DuplicateLabel {
                    method: BLOCK.to_string(),
                    label: name,
                });
            }
            self.labels.insert(name, base + index);
        }
        self.instructions.extend(other.instructions);
        Ok(())
    }

    pub(crate) fn into_parts(self) -> (Vec<Instruction>, BTreeMap<String, usize>) {
        (self.instructions, self.labels)
    }
}

/// Fluent builder for [`Block`]s.
#[derive(Debug, Default)]
pub struct InstructionBuilder {
    block: Block,
}

impl InstructionBuilder {
    /// Creates an empty builder.
    #[must_use]
    pub fn new() -> Self {
        InstructionBuilder::default()
    }

    /// Emits an arbitrary instruction.
    ///
    /// # Errors
    ///
    /// Returns the validation error of [`Instruction::new`].
    pub fn emit(&mut self, opcode: Opcode, operands: Vec<Operand>) -> Result<&mut Self> {
        let insn = Instruction::new(opcode, operands)?;
        self.instruction(insn)
    }

    /// Appends an already constructed instruction.
    ///
    /// # Errors
    ///
    /// Never fails; returns `Result` to chain with the other emitters.
    pub fn instruction(&mut self, insn: Instruction) -> Result<&mut Self> {
        self.block.instructions.push(insn);
        Ok(self)
    }

    /// Declares a label at the current position (bound to the next emitted instruction).
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::DuplicateLabel`] if the label is already declared in this block.
    pub fn label(&mut self, name: &str) -> Result<&mut Self> {
        if self.block.labels.contains_key(name) {
            return Err(Error::DuplicateLabel {
                method: BLOCK.to_string(),
                label: name.to_string(),
            });
        }
        let position = self.block.instructions.len();
        self.block.labels.insert(name.to_string(), position);
        Ok(self)
    }

    /// `nop`
    ///
    /// # Errors
    ///
    /// Never fails.
    pub fn nop(&mut self) -> Result<&mut Self> {
        self.emit(Opcode::Nop, vec![])
    }

    /// Loads a 32-bit constant with the smallest `const*` form that holds it.
    ///
    /// `const/4` only addresses v0-v15, so higher locals get `const/16` even for small values.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::LiteralOutOfRange`] if `value` does not fit 32 bits.
    pub fn const_int(&mut self, dest: Register, value: i64) -> Result<&mut Self> {
        let nibble = !matches!(dest, Register::Local(n) if n > 15);
        let opcode = if nibble && (-8..=7).contains(&value) {
            Opcode::Const4
        } else if i16::try_from(value).is_ok() {
            Opcode::Const16
        } else {
            Opcode::Const
        };
        self.emit(opcode, vec![Operand::Register(dest), Operand::Literal(value)])
    }

    /// Loads a 64-bit constant into a register pair with the smallest `const-wide*` form.
    ///
    /// # Errors
    ///
    /// Never fails for in-frame registers.
    pub fn const_wide(&mut self, dest: Register, value: i64) -> Result<&mut Self> {
        let opcode = if i16::try_from(value).is_ok() {
            Opcode::ConstWide16
        } else if i32::try_from(value).is_ok() {
            Opcode::ConstWide32
        } else {
            Opcode::ConstWide
        };
        self.emit(opcode, vec![Operand::Register(dest), Operand::Literal(value)])
    }

    /// `const-string dest, "value"`
    ///
    /// # Errors
    ///
    /// Never fails.
    pub fn const_string(&mut self, dest: Register, value: &str) -> Result<&mut Self> {
        self.emit(
            Opcode::ConstString,
            vec![Operand::Register(dest), Operand::String(value.to_string())],
        )
    }

    /// `const-class dest, Type`
    ///
    /// # Errors
    ///
    /// Never fails.
    pub fn const_class(&mut self, dest: Register, ty: TypeDescriptor) -> Result<&mut Self> {
        self.emit(Opcode::ConstClass, vec![Operand::Register(dest), Operand::Type(ty)])
    }

    /// `sget-object dest, field`
    ///
    /// # Errors
    ///
    /// Never fails.
    pub fn sget_object(&mut self, dest: Register, field: FieldRef) -> Result<&mut Self> {
        self.emit(Opcode::SgetObject, vec![Operand::Register(dest), Operand::Field(field)])
    }

    /// `invoke-static {args}, method`
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::WrongOperand`] for more than five argument registers.
    pub fn invoke_static(&mut self, args: &[Register], method: MethodRef) -> Result<&mut Self> {
        self.invoke(Opcode::InvokeStatic, args, method)
    }

    /// `invoke-virtual {args}, method`
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::WrongOperand`] for more than five argument registers.
    pub fn invoke_virtual(&mut self, args: &[Register], method: MethodRef) -> Result<&mut Self> {
        self.invoke(Opcode::InvokeVirtual, args, method)
    }

    fn invoke(&mut self, opcode: Opcode, args: &[Register], method: MethodRef) -> Result<&mut Self> {
        self.emit(
            opcode,
            vec![Operand::RegisterList(args.to_vec()), Operand::Method(method)],
        )
    }

    /// `move-result dest`
    ///
    /// # Errors
    ///
    /// Never fails.
    pub fn move_result(&mut self, dest: Register) -> Result<&mut Self> {
        self.emit(Opcode::MoveResult, vec![Operand::Register(dest)])
    }

    /// `move-result-object dest`
    ///
    /// # Errors
    ///
    /// Never fails.
    pub fn move_result_object(&mut self, dest: Register) -> Result<&mut Self> {
        self.emit(Opcode::MoveResultObject, vec![Operand::Register(dest)])
    }

    /// `if-eqz reg, :label`
    ///
    /// # Errors
    ///
    /// Never fails.
    pub fn if_eqz(&mut self, reg: Register, label: &str) -> Result<&mut Self> {
        self.emit(
            Opcode::IfEqz,
            vec![Operand::Register(reg), Operand::Label(label.to_string())],
        )
    }

    /// `if-nez reg, :label`
    ///
    /// # Errors
    ///
    /// Never fails.
    pub fn if_nez(&mut self, reg: Register, label: &str) -> Result<&mut Self> {
        self.emit(
            Opcode::IfNez,
            vec![Operand::Register(reg), Operand::Label(label.to_string())],
        )
    }

    /// `goto :label`. The editor widens the form when the target is out of reach.
    ///
    /// # Errors
    ///
    /// Never fails.
    pub fn goto(&mut self, label: &str) -> Result<&mut Self> {
        self.emit(Opcode::Goto, vec![Operand::Label(label.to_string())])
    }

    /// `return-void`
    ///
    /// # Errors
    ///
    /// Never fails.
    pub fn return_void(&mut self) -> Result<&mut Self> {
        self.emit(Opcode::ReturnVoid, vec![])
    }

    /// `return reg`
    ///
    /// # Errors
    ///
    /// Never fails.
    pub fn ret(&mut self, reg: Register) -> Result<&mut Self> {
        self.emit(Opcode::Return, vec![Operand::Register(reg)])
    }

    /// `return-wide reg`
    ///
    /// # Errors
    ///
    /// Never fails.
    pub fn return_wide(&mut self, reg: Register) -> Result<&mut Self> {
        self.emit(Opcode::ReturnWide, vec![Operand::Register(reg)])
    }

    /// `return-object reg`
    ///
    /// # Errors
    ///
    /// Never fails.
    pub fn return_object(&mut self, reg: Register) -> Result<&mut Self> {
        self.emit(Opcode::ReturnObject, vec![Operand::Register(reg)])
    }

    /// Appends a whole block, shifting its labels to the current position.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::DuplicateLabel`] on label clashes.
    pub fn block(&mut self, block: Block) -> Result<&mut Self> {
        self.block.append(block)?;
        Ok(self)
    }

    /// Number of instructions emitted so far.
    #[must_use]
    pub fn len(&self) -> usize {
        self.block.len()
    }

    /// Whether nothing was emitted yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.block.is_empty()
    }

    /// Finishes the builder.
    ///
    /// # Errors
    ///
    /// Returns a [`crate::Error::Malformed`] error if the block declares labels but no
    /// instructions.
    pub fn finish(self) -> Result<Block> {
        if self.block.is_empty() && !self.block.labels.is_empty() {
            return Err(malformed_error!("Block declares labels but no instructions"));
        }
        Ok(self.block)
    }
}
