//! Instruction, operand and register representation.
//!
//! An [`Instruction`] is an immutable value: an [`Opcode`] plus its ordered [`Operand`]s. The
//! constructor validates the operand layout against the opcode's [`Format`], so any instruction
//! that exists has a well-formed shape and literal widths that fit its encoding. Edits never
//! mutate an instruction in place; they replace it wholesale.
//!
//! Branch targets are symbolic: a branch carries [`Operand::Label`] (or [`Operand::Labels`] for a
//! switch jump table) and the owning [`crate::model::Method`] binds label names to instruction
//! indices. This keeps branch targets stable while instructions are inserted in front of them.

use std::fmt;

use crate::{
    model::{
        descriptor::{FieldRef, MethodRef, TypeDescriptor},
        opcode::{Format, Opcode, RefKind},
    },
    Error, Result,
};

/// A Dalvik register.
///
/// Locals (`vN`) are numbered from the start of the frame, parameters (`pN`) from the first
/// incoming argument. The two namespaces are kept apart so that growing the local area of a
/// method never renames its parameter registers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Register {
    /// Local register `vN`
    Local(u16),
    /// Parameter register `pN`
    Param(u16),
}

impl Register {
    /// Parses `v3` / `p0`.
    ///
    /// # Errors
    ///
    /// Returns a [`crate::Error::Malformed`] error if the text is not a register.
    pub fn parse(text: &str) -> Result<Self> {
        let number = |digits: &str| {
            digits
                .parse::<u16>()
                .map_err(|_| malformed_error!("Invalid register - {}", text))
        };
        match text.split_at_checked(1) {
            Some(("v", digits)) => Ok(Register::Local(number(digits)?)),
            Some(("p", digits)) => Ok(Register::Param(number(digits)?)),
            _ => Err(malformed_error!("Invalid register - {}", text)),
        }
    }
}

impl fmt::Display for Register {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Register::Local(n) => write!(f, "v{n}"),
            Register::Param(n) => write!(f, "p{n}"),
        }
    }
}

/// A single instruction operand.
#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    /// A register
    Register(Register),
    /// A register list of an invoke instruction
    RegisterList(Vec<Register>),
    /// An integer literal (float literals are carried as their raw bits)
    Literal(i64),
    /// A string constant
    String(String),
    /// A type reference
    Type(TypeDescriptor),
    /// A field reference
    Field(FieldRef),
    /// A method reference
    Method(MethodRef),
    /// A branch target
    Label(String),
    /// A switch jump table
    Labels(Vec<String>),
}

impl Operand {
    fn ref_kind(&self) -> Option<RefKind> {
        match self {
            Operand::String(_) => Some(RefKind::String),
            Operand::Type(_) => Some(RefKind::Type),
            Operand::Field(_) => Some(RefKind::Field),
            Operand::Method(_) => Some(RefKind::Method),
            _ => None,
        }
    }
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operand::Register(reg) => write!(f, "{reg}"),
            Operand::RegisterList(regs) => {
                let regs: Vec<String> = regs.iter().map(ToString::to_string).collect();
                write!(f, "{{{}}}", regs.join(", "))
            }
            Operand::Literal(value) => {
                if *value < 0 {
                    write!(f, "-0x{:x}", value.unsigned_abs())
                } else {
                    write!(f, "0x{value:x}")
                }
            }
            Operand::String(value) => write!(f, "\"{}\"", escape(value)),
            Operand::Type(ty) => write!(f, "{ty}"),
            Operand::Field(field) => write!(f, "{field}"),
            Operand::Method(method) => write!(f, "{method}"),
            Operand::Label(label) => write!(f, ":{label}"),
            Operand::Labels(labels) => {
                let labels: Vec<String> = labels.iter().map(|l| format!(":{l}")).collect();
                write!(f, "{{{}}}", labels.join(", "))
            }
        }
    }
}

fn escape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            '\r' => out.push_str("\\r"),
            _ => out.push(c),
        }
    }
    out
}

/// A validated instruction.
#[derive(Debug, Clone, PartialEq)]
pub struct Instruction {
    opcode: Opcode,
    operands: Vec<Operand>,
}

impl Instruction {
    /// Creates an instruction after checking the operands against the opcode's format.
    ///
    /// # Errors
    ///
    /// - [`crate::Error::WrongOperand`] if the operand layout does not match the format
    /// - [`crate::Error::LiteralOutOfRange`] if a literal does not fit the immediate width
    pub fn new(opcode: Opcode, operands: Vec<Operand>) -> Result<Self> {
        check_shape(opcode, &operands)?;
        Ok(Instruction { opcode, operands })
    }

    /// The opcode.
    #[must_use]
    pub fn opcode(&self) -> Opcode {
        self.opcode
    }

    /// The operands in order.
    #[must_use]
    pub fn operands(&self) -> &[Operand] {
        &self.operands
    }

    /// Encoded length in 16-bit code units.
    #[must_use]
    pub fn size(&self) -> u32 {
        self.opcode.format().size()
    }

    /// Label names this instruction branches to, in operand order.
    pub fn label_refs(&self) -> impl Iterator<Item = &str> {
        self.operands.iter().flat_map(|op| {
            let labels: Vec<&str> = match op {
                Operand::Label(label) => vec![label.as_str()],
                Operand::Labels(labels) => labels.iter().map(String::as_str).collect(),
                _ => Vec::new(),
            };
            labels
        })
    }

    /// Registers this instruction reads or writes, including the high half of wide pairs.
    #[must_use]
    pub fn registers(&self) -> Vec<Register> {
        let mut regs = Vec::new();
        for (position, op) in self.operands.iter().enumerate() {
            match op {
                Operand::Register(reg) => {
                    regs.push(*reg);
                    let pair = self.opcode.is_wide()
                        && (position == 0 || self.opcode == Opcode::MoveWide);
                    if pair {
                        regs.push(match reg {
                            Register::Local(n) => Register::Local(n.saturating_add(1)),
                            Register::Param(n) => Register::Param(n.saturating_add(1)),
                        });
                    }
                }
                Operand::RegisterList(list) => regs.extend(list.iter().copied()),
                _ => {}
            }
        }
        regs
    }

    /// The first literal operand, if any.
    #[must_use]
    pub fn literal(&self) -> Option<i64> {
        self.operands.iter().find_map(|op| match op {
            Operand::Literal(value) => Some(*value),
            _ => None,
        })
    }

    /// The string constant referenced by `const-string`, if any.
    #[must_use]
    pub fn string(&self) -> Option<&str> {
        self.operands.iter().find_map(|op| match op {
            Operand::String(value) => Some(value.as_str()),
            _ => None,
        })
    }

    /// The method invoked by this instruction, if any.
    #[must_use]
    pub fn method_ref(&self) -> Option<&MethodRef> {
        self.operands.iter().find_map(|op| match op {
            Operand::Method(method) => Some(method),
            _ => None,
        })
    }

    /// Textual form of the type/field/method reference, if any.
    #[must_use]
    pub fn reference(&self) -> Option<String> {
        self.operands.iter().find_map(|op| match op {
            Operand::Type(ty) => Some(ty.to_string()),
            Operand::Field(field) => Some(field.to_string()),
            Operand::Method(method) => Some(method.to_string()),
            _ => None,
        })
    }

    /// Returns this instruction with its opcode swapped for one of the same operand layout
    /// (used when widening `goto` forms).
    ///
    /// # Errors
    ///
    /// Fails if the operands do not fit the new opcode.
    pub fn with_opcode(&self, opcode: Opcode) -> Result<Instruction> {
        Instruction::new(opcode, self.operands.clone())
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.opcode.mnemonic())?;
        for (i, op) in self.operands.iter().enumerate() {
            if i == 0 {
                write!(f, " {op}")?;
            } else {
                write!(f, ", {op}")?;
            }
        }
        Ok(())
    }
}

fn check_shape(opcode: Opcode, operands: &[Operand]) -> Result<()> {
    use Operand::{Label, Labels, Literal, Register as Reg, RegisterList};

    let format = opcode.format();
    let wrong = |expected: &'static str| Error::WrongOperand {
        mnemonic: opcode.mnemonic(),
        expected,
    };
    let literal_fits = |value: i64| -> Result<()> {
        match format.literal_range() {
            Some((min, max)) if value < min || value > max => Err(Error::LiteralOutOfRange {
                mnemonic: opcode.mnemonic(),
                value,
            }),
            _ => Ok(()),
        }
    };

    match format {
        Format::F10x => match operands {
            [] => Ok(()),
            _ => Err(wrong("no operands")),
        },
        Format::F10t | Format::F20t | Format::F30t => match operands {
            [Label(_)] => Ok(()),
            _ => Err(wrong("label")),
        },
        Format::F11x => match operands {
            [Reg(_)] => Ok(()),
            _ => Err(wrong("register")),
        },
        Format::F11n | Format::F21s | Format::F31i | Format::F51l => match operands {
            [Reg(_), Literal(value)] => literal_fits(*value),
            _ => Err(wrong("register, literal")),
        },
        Format::F12x => match operands {
            [Reg(_), Reg(_)] => Ok(()),
            _ => Err(wrong("register, register")),
        },
        Format::F21t => match operands {
            [Reg(_), Label(_)] => Ok(()),
            _ => Err(wrong("register, label")),
        },
        Format::F22t => match operands {
            [Reg(_), Reg(_), Label(_)] => Ok(()),
            _ => Err(wrong("register, register, label")),
        },
        Format::F21c(kind) => match operands {
            [Reg(_), reference] if reference.ref_kind() == Some(kind) => Ok(()),
            _ => Err(wrong("register, reference")),
        },
        Format::F31c => match operands {
            [Reg(_), Operand::String(_)] => Ok(()),
            _ => Err(wrong("register, string")),
        },
        Format::F22c(kind) => match operands {
            [Reg(_), Reg(_), reference] if reference.ref_kind() == Some(kind) => Ok(()),
            _ => Err(wrong("register, register, reference")),
        },
        Format::F22b | Format::F22s => match operands {
            [Reg(_), Reg(_), Literal(value)] => literal_fits(*value),
            _ => Err(wrong("register, register, literal")),
        },
        Format::F23x => match operands {
            [Reg(_), Reg(_), Reg(_)] => Ok(()),
            _ => Err(wrong("register, register, register")),
        },
        Format::F31t => match operands {
            [Reg(_), Literal(first_key), Labels(targets)] if !targets.is_empty() => {
                literal_fits(*first_key)
            }
            _ => Err(wrong("register, first key, jump table")),
        },
        Format::F35c => match operands {
            [RegisterList(regs), Operand::Method(_)] if regs.len() <= 5 => Ok(()),
            _ => Err(wrong("register list (at most 5), method")),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_parse() -> Result<()> {
        assert_eq!(Register::parse("v0")?, Register::Local(0));
        assert_eq!(Register::parse("p12")?, Register::Param(12));
        assert!(Register::parse("x1").is_err());
        assert!(Register::parse("v").is_err());
        Ok(())
    }

    #[test]
    fn test_shape_validation() {
        assert!(Instruction::new(Opcode::ReturnVoid, vec![]).is_ok());
        assert!(matches!(
            Instruction::new(Opcode::Return, vec![]),
            Err(Error::WrongOperand { .. })
        ));
        assert!(matches!(
            Instruction::new(
                Opcode::Const4,
                vec![Operand::Register(Register::Local(0)), Operand::Literal(8)]
            ),
            Err(Error::LiteralOutOfRange { value: 8, .. })
        ));
        assert!(Instruction::new(
            Opcode::ConstString,
            vec![
                Operand::Register(Register::Local(0)),
                Operand::Label("x".into())
            ]
        )
        .is_err());
    }

    #[test]
    fn test_display() -> Result<()> {
        let insn = Instruction::new(
            Opcode::InvokeStatic,
            vec![
                Operand::RegisterList(vec![Register::Local(0), Register::Param(1)]),
                Operand::Method(MethodRef::parse("Lfoo/Bar;->baz(IZ)V")?),
            ],
        )?;
        assert_eq!(insn.to_string(), "invoke-static {v0, p1}, Lfoo/Bar;->baz(IZ)V");

        let insn = Instruction::new(
            Opcode::Const16,
            vec![Operand::Register(Register::Local(2)), Operand::Literal(-16)],
        )?;
        assert_eq!(insn.to_string(), "const/16 v2, -0x10");
        Ok(())
    }

    #[test]
    fn test_wide_registers() -> Result<()> {
        let insn = Instruction::new(
            Opcode::ConstWide16,
            vec![Operand::Register(Register::Local(3)), Operand::Literal(1)],
        )?;
        assert_eq!(insn.registers(), vec![Register::Local(3), Register::Local(4)]);
        Ok(())
    }

    #[test]
    fn test_label_refs() -> Result<()> {
        let insn = Instruction::new(
            Opcode::PackedSwitch,
            vec![
                Operand::Register(Register::Local(0)),
                Operand::Literal(0),
                Operand::Labels(vec!["a".into(), "b".into()]),
            ],
        )?;
        assert_eq!(insn.label_refs().collect::<Vec<_>>(), vec!["a", "b"]);
        Ok(())
    }
}
