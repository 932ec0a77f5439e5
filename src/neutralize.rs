//! Neutralization of methods by forcing an immediate trivial return.
//!
//! [`Neutralizer::block_methods`] rewrites every overload of the named methods of one owner
//! type so that they return a constant ([`ReturnSpec`]) as their first action. With a
//! [`ConditionGate`] attached the early return only happens while the gate's flag is enabled;
//! otherwise execution continues with the original first instruction.
//!
//! The operation is all-or-nothing across the whole name list: every target is located,
//! checked and edited on a private copy first, and the corpus is only written once every
//! target succeeded.

use std::{fmt, str::FromStr};

use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::{
    config::EngineConfig,
    gate::ConditionGate,
    model::{Corpus, Method, MethodHandle, MethodId, Opcode, Operand, Register, TypeDescriptor, ValueKind},
    patch::{Block, InstructionBuilder, MethodEditor},
    Error, Result,
};

/// The constant a neutralized method returns.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum ReturnSpec {
    /// `return-void`, for `V`
    Void,
    /// A boolean, for `Z`
    Boolean(bool),
    /// An integral value, for `I`, `S`, `B` and `C` (range-checked against the type)
    Int(i64),
    /// A 64-bit integer, for `J`
    Long(i64),
    /// A float, for `F`
    Float(f32),
    /// A double, for `D`
    Double(f64),
    /// `null`, for reference and array types
    Null,
}

impl ReturnSpec {
    /// Parses the `(kind, value)` notation, e.g. `('Z', "0")`, `('V', "")`, `('L', "null")`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::InvalidReturnSpec`] for an unknown kind or unparsable value.
    pub fn parse(kind: char, value: &str) -> Result<Self> {
        let value = value.trim();
        let invalid = || Error::InvalidReturnSpec(format!("{kind}:{value}"));
        match kind {
            'V' => Ok(ReturnSpec::Void),
            'Z' => match value {
                "0" | "false" => Ok(ReturnSpec::Boolean(false)),
                "1" | "true" => Ok(ReturnSpec::Boolean(true)),
                _ => Err(invalid()),
            },
            'I' | 'S' | 'B' | 'C' => parse_integer(value)
                .map(ReturnSpec::Int)
                .ok_or_else(invalid),
            'J' => parse_integer(value)
                .map(ReturnSpec::Long)
                .ok_or_else(invalid),
            'F' => value.parse::<f32>().map(ReturnSpec::Float).map_err(|_| invalid()),
            'D' => value.parse::<f64>().map(ReturnSpec::Double).map_err(|_| invalid()),
            'L' | '[' => match value {
                "" | "0" | "null" => Ok(ReturnSpec::Null),
                _ => Err(invalid()),
            },
            _ => Err(invalid()),
        }
    }

    /// Whether this spec can be returned from a method declaring `return_type`.
    #[must_use]
    pub fn fits(&self, return_type: &TypeDescriptor) -> bool {
        match (self, return_type.kind()) {
            (ReturnSpec::Void, ValueKind::Void)
            | (ReturnSpec::Boolean(_), ValueKind::Boolean)
            | (ReturnSpec::Long(_), ValueKind::Long)
            | (ReturnSpec::Float(_), ValueKind::Float)
            | (ReturnSpec::Double(_), ValueKind::Double)
            | (ReturnSpec::Null, ValueKind::Reference) => true,
            (ReturnSpec::Int(v), ValueKind::Int) => i32::try_from(*v).is_ok(),
            (ReturnSpec::Int(v), ValueKind::Short) => i16::try_from(*v).is_ok(),
            (ReturnSpec::Int(v), ValueKind::Byte) => i8::try_from(*v).is_ok(),
            (ReturnSpec::Int(v), ValueKind::Char) => u16::try_from(*v).is_ok(),
            _ => false,
        }
    }

    /// Emits the instructions returning this constant through `dest`.
    ///
    /// # Errors
    ///
    /// Returns an error if an instruction can not be constructed.
    pub fn emit(&self, asm: &mut InstructionBuilder, dest: Register) -> Result<()> {
        match self {
            ReturnSpec::Void => {
                asm.return_void()?;
            }
            ReturnSpec::Boolean(value) => {
                asm.const_int(dest, i64::from(*value))?.ret(dest)?;
            }
            ReturnSpec::Int(value) => {
                asm.const_int(dest, *value)?.ret(dest)?;
            }
            ReturnSpec::Long(value) => {
                asm.emit(Opcode::ConstWide, vec![Operand::Register(dest), Operand::Literal(*value)])?
                    .return_wide(dest)?;
            }
            ReturnSpec::Float(value) => {
                let bits = i64::from(value.to_bits() as i32);
                asm.emit(Opcode::Const, vec![Operand::Register(dest), Operand::Literal(bits)])?
                    .ret(dest)?;
            }
            ReturnSpec::Double(value) => {
                let bits = value.to_bits() as i64;
                asm.emit(Opcode::ConstWide, vec![Operand::Register(dest), Operand::Literal(bits)])?
                    .return_wide(dest)?;
            }
            ReturnSpec::Null => {
                asm.const_int(dest, 0)?.return_object(dest)?;
            }
        }
        Ok(())
    }

    /// The return block for this constant.
    ///
    /// # Errors
    ///
    /// Returns an error if an instruction can not be constructed.
    pub fn to_block(&self, dest: Register) -> Result<Block> {
        let mut asm = InstructionBuilder::new();
        self.emit(&mut asm, dest)?;
        asm.finish()
    }
}

/// Decimal or `0x` hex with at most one leading sign. The magnitude is read unsigned so that
/// `i64::MIN` is reachable in both notations.
fn parse_integer(value: &str) -> Option<i64> {
    let (negative, digits) = match value.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, value.strip_prefix('+').unwrap_or(value)),
    };
    let (radix, digits) = match digits.strip_prefix("0x") {
        Some(hex) => (16, hex),
        None => (10, digits),
    };
    if digits.starts_with(['-', '+']) {
        return None;
    }
    let magnitude = i128::from(u64::from_str_radix(digits, radix).ok()?);
    i64::try_from(if negative { -magnitude } else { magnitude }).ok()
}

impl fmt::Display for ReturnSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReturnSpec::Void => f.write_str("V"),
            ReturnSpec::Boolean(value) => write!(f, "Z:{}", u8::from(*value)),
            ReturnSpec::Int(value) => write!(f, "I:{value}"),
            ReturnSpec::Long(value) => write!(f, "J:{value}"),
            ReturnSpec::Float(value) => write!(f, "F:{value}"),
            ReturnSpec::Double(value) => write!(f, "D:{value}"),
            ReturnSpec::Null => f.write_str("L:null"),
        }
    }
}

impl FromStr for ReturnSpec {
    type Err = Error;

    /// Parses `"V"`, `"Z:0"`, `"I:-1"`, `"L:null"` and so on.
    fn from_str(s: &str) -> Result<Self> {
        let mut chars = s.chars();
        let kind = chars
            .next()
            .ok_or_else(|| Error::InvalidReturnSpec(s.to_string()))?;
        let rest = chars.as_str();
        let value = match rest.strip_prefix(':') {
            Some(value) => value,
            None if rest.is_empty() => "",
            None => return Err(Error::InvalidReturnSpec(s.to_string())),
        };
        ReturnSpec::parse(kind, value)
    }
}

impl TryFrom<String> for ReturnSpec {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<ReturnSpec> for String {
    fn from(value: ReturnSpec) -> Self {
        value.to_string()
    }
}

/// Whether the early return is prepended to or replaces the original body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockStyle {
    /// Insert before the original first instruction; the original code stays in place
    #[default]
    Prepend,
    /// Replace the whole body (only without a condition gate)
    Replace,
}

/// One neutralized method.
#[derive(Debug, Clone, PartialEq)]
pub struct BlockedMethod {
    /// Address of the method
    pub handle: MethodHandle,
    /// Identity of the method
    pub method: MethodId,
    /// The gate label branching to the original code, if gated
    pub gate_label: Option<String>,
}

/// Outcome of [`Neutralizer::block_methods`].
#[derive(Debug, Clone, PartialEq)]
pub struct BlockReport {
    /// The owner type
    pub owner: String,
    /// The return spec applied
    pub spec: ReturnSpec,
    /// Every neutralized method, grouped by requested name and in declaration order
    pub blocked: Vec<BlockedMethod>,
}

/// Applies [`ReturnSpec`]s to methods, optionally behind a [`ConditionGate`].
pub struct Neutralizer<'g> {
    gate: Option<&'g ConditionGate>,
    style: BlockStyle,
    register: Register,
    widen_branches: bool,
}

impl Default for Neutralizer<'_> {
    fn default() -> Self {
        Neutralizer::new()
    }
}

impl<'g> Neutralizer<'g> {
    /// Creates an ungated neutralizer prepending its returns and using `v0`.
    #[must_use]
    pub fn new() -> Self {
        Neutralizer::with_config(&EngineConfig::default())
    }

    /// Creates an ungated neutralizer using the scratch register and branch settings of
    /// `config`.
    #[must_use]
    pub fn with_config(config: &EngineConfig) -> Self {
        Neutralizer {
            gate: None,
            style: BlockStyle::Prepend,
            register: Register::Local(config.scratch_register),
            widen_branches: config.widen_branches,
        }
    }

    /// Places every early return behind `gate`.
    #[must_use]
    pub fn gate(mut self, gate: &'g ConditionGate) -> Self {
        self.gate = Some(gate);
        self
    }

    /// Selects prepend or replace.
    #[must_use]
    pub fn style(mut self, style: BlockStyle) -> Self {
        self.style = style;
        self
    }

    /// Neutralizes every overload of each name in `names` on `owner`.
    ///
    /// # Errors
    ///
    /// Nothing is written if any of these occur:
    /// - [`crate::Error::ClassNotFound`] / [`crate::Error::MethodNotFound`] for a missing owner
    ///   or name
    /// - [`crate::Error::NoMethodBody`] / [`crate::Error::MethodFinalized`] for a target that
    ///   can not be edited
    /// - [`crate::Error::ReturnSpecMismatch`] if `spec` does not fit a target's return type
    /// - a [`crate::Error::Malformed`] error if [`BlockStyle::Replace`] is combined with a gate
    /// - any editor error while preparing a target
    pub fn block_methods<S: AsRef<str>>(
        &self,
        corpus: &mut Corpus,
        owner: &str,
        names: &[S],
        spec: ReturnSpec,
    ) -> Result<BlockReport> {
        if self.style == BlockStyle::Replace && self.gate.is_some() {
            return Err(malformed_error!(
                "Replacing method bodies can not be combined with a condition gate"
            ));
        }

        let mut handles: Vec<MethodHandle> = Vec::new();
        for name in names {
            for handle in corpus.find_methods(owner, name.as_ref())? {
                if !handles.contains(&handle) {
                    handles.push(handle);
                }
            }
        }

        let mut prepared = Vec::with_capacity(handles.len());
        for handle in &handles {
            let original = corpus
                .method(*handle)
                .ok_or_else(|| malformed_error!("Invalid method handle {}", handle))?;
            original.ensure_editable()?;
            if !spec.fits(original.return_type()) {
                return Err(Error::ReturnSpecMismatch {
                    method: original.id().to_string(),
                    return_type: original.return_type().to_string(),
                    spec: spec.to_string(),
                });
            }

            let mut edited = original.clone();
            let gate_label = self.neutralize(&mut edited, spec)?;
            prepared.push((*handle, edited, gate_label));
        }

        let mut blocked = Vec::with_capacity(prepared.len());
        for (handle, edited, gate_label) in prepared {
            let id = edited.id().clone();
            *corpus.get_method_mut(handle)? = edited;
            info!("Blocked {id} with {spec}");
            blocked.push(BlockedMethod {
                handle,
                method: id,
                gate_label,
            });
        }

        Ok(BlockReport {
            owner: owner.to_string(),
            spec,
            blocked,
        })
    }

    fn neutralize(&self, method: &mut Method, spec: ReturnSpec) -> Result<Option<String>> {
        let body = spec.to_block(self.register)?;
        let mut editor = MethodEditor::new(method)?.widen_branches(self.widen_branches);

        match (self.gate, self.style) {
            (Some(gate), _) => {
                let label = gate.guard(&mut editor, 0, body)?;
                debug!("Gated early return in {} behind :{}", editor.method().id(), label);
                Ok(Some(label))
            }
            (None, BlockStyle::Prepend) => {
                editor.insert_at(0, body)?;
                Ok(None)
            }
            (None, BlockStyle::Replace) => {
                editor.replace_from(0, body)?;
                Ok(None)
            }
        }
    }
}
