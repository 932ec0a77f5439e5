//! Dalvik opcode table, instruction formats and control-flow classification.
//!
//! Opcodes are identified by their smali mnemonic (`const/4`, `invoke-static`, ...). The
//! mnemonic mapping is derived with `strum`, so parsing a listing and rendering it back use the
//! same table. Each opcode maps to a [`Format`] which fixes the operand layout and the encoded
//! size in 16-bit code units, and to a [`FlowType`] used by validation and by the resolver's
//! pattern matchers.
//!
//! Only the subset of the instruction set that the patch engine needs to read, match and emit
//! is modelled. Unknown mnemonics are rejected with [`crate::Error::InvalidMnemonic`].

use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use strum::{Display, EnumIter, EnumString, IntoStaticStr};

use crate::{Error, Result};

/// Kind of constant-pool reference an instruction carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefKind {
    /// A string literal
    String,
    /// A type descriptor
    Type,
    /// A field reference `Lowner;->name:Type`
    Field,
    /// A method reference `Lowner;->name(Params)Ret`
    Method,
}

/// Dalvik instruction formats.
///
/// The format determines both the operand layout accepted by
/// [`crate::model::Instruction::new`] and the instruction length in code units.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    /// `op`
    F10x,
    /// `op +AA` (8-bit branch displacement)
    F10t,
    /// `op vAA`
    F11x,
    /// `op vA, #+B` (signed 4-bit literal)
    F11n,
    /// `op vA, vB`
    F12x,
    /// `op +AAAA` (16-bit branch displacement)
    F20t,
    /// `op vAA, #+BBBB` (signed 16-bit literal)
    F21s,
    /// `op vAA, +BBBB` (16-bit conditional displacement)
    F21t,
    /// `op vAA, ref@BBBB`
    F21c(RefKind),
    /// `op vA, vB, +CCCC` (16-bit conditional displacement)
    F22t,
    /// `op vA, vB, ref@CCCC`
    F22c(RefKind),
    /// `op vAA, vBB, #+CC` (signed 8-bit literal)
    F22b,
    /// `op vA, vB, #+CCCC` (signed 16-bit literal)
    F22s,
    /// `op vAA, vBB, vCC`
    F23x,
    /// `op +AAAAAAAA` (32-bit branch displacement)
    F30t,
    /// `op vAA, #+BBBBBBBB` (32-bit literal)
    F31i,
    /// `op vAA, string@BBBBBBBB`
    F31c,
    /// `op vAA, +BBBBBBBB` switch with an inline jump table
    F31t,
    /// `op {vC, vD, vE, vF, vG}, meth@BBBB`
    F35c,
    /// `op vAA, #+BBBBBBBBBBBBBBBB` (64-bit literal)
    F51l,
}

impl Format {
    /// Encoded length of the instruction in 16-bit code units.
    ///
    /// Switch payloads are laid out by the container writer after the method code and are
    /// not counted here.
    #[must_use]
    pub const fn size(&self) -> u32 {
        match self {
            Format::F10x | Format::F10t | Format::F11x | Format::F11n | Format::F12x => 1,
            Format::F20t
            | Format::F21s
            | Format::F21t
            | Format::F21c(_)
            | Format::F22t
            | Format::F22c(_)
            | Format::F22b
            | Format::F22s
            | Format::F23x => 2,
            Format::F30t | Format::F31i | Format::F31c | Format::F31t | Format::F35c => 3,
            Format::F51l => 5,
        }
    }

    /// Inclusive literal range accepted by literal-carrying formats.
    #[must_use]
    pub const fn literal_range(&self) -> Option<(i64, i64)> {
        match self {
            Format::F11n => Some((-8, 7)),
            Format::F22b => Some((i8::MIN as i64, i8::MAX as i64)),
            Format::F21s | Format::F22s => Some((i16::MIN as i64, i16::MAX as i64)),
            Format::F31i | Format::F31t => Some((i32::MIN as i64, i32::MAX as i64)),
            Format::F51l => Some((i64::MIN, i64::MAX)),
            _ => None,
        }
    }

    /// Inclusive range of the branch displacement (in code units) the format can encode.
    #[must_use]
    pub const fn displacement_range(&self) -> Option<(i64, i64)> {
        match self {
            Format::F10t => Some((i8::MIN as i64, i8::MAX as i64)),
            Format::F20t | Format::F21t | Format::F22t => Some((i16::MIN as i64, i16::MAX as i64)),
            Format::F30t | Format::F31t => Some((i32::MIN as i64, i32::MAX as i64)),
            _ => None,
        }
    }

    /// Width in bits of each encoded register operand, `None` for formats without registers.
    ///
    /// The limit applies to the absolute register number, so parameter registers count from
    /// the end of the local area.
    #[must_use]
    pub const fn register_bits(&self) -> Option<u32> {
        match self {
            Format::F11n
            | Format::F12x
            | Format::F22t
            | Format::F22c(_)
            | Format::F22s
            | Format::F35c => Some(4),
            Format::F11x
            | Format::F21s
            | Format::F21t
            | Format::F21c(_)
            | Format::F22b
            | Format::F23x
            | Format::F31i
            | Format::F31c
            | Format::F31t
            | Format::F51l => Some(8),
            Format::F10x | Format::F10t | Format::F20t | Format::F30t => None,
        }
    }
}

/// Control flow behaviour of an instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowType {
    /// Falls through to the next instruction
    Sequential,
    /// Branches to a label or falls through
    ConditionalBranch,
    /// Always branches to a label
    UnconditionalBranch,
    /// Multi-way branch through a jump table, falls through on a miss
    Switch,
    /// Invokes another method and falls through
    Call,
    /// Leaves the method normally
    Return,
    /// Leaves the method with an exception
    Throw,
}

/// Supported Dalvik opcodes, keyed by their smali mnemonic.
#[allow(missing_docs)]
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, EnumString, IntoStaticStr, Display, EnumIter,
)]
pub enum Opcode {
    #[strum(serialize = "nop")]
    Nop,
    #[strum(serialize = "move")]
    Move,
    #[strum(serialize = "move-wide")]
    MoveWide,
    #[strum(serialize = "move-object")]
    MoveObject,
    #[strum(serialize = "move-result")]
    MoveResult,
    #[strum(serialize = "move-result-wide")]
    MoveResultWide,
    #[strum(serialize = "move-result-object")]
    MoveResultObject,
    #[strum(serialize = "move-exception")]
    MoveException,
    #[strum(serialize = "return-void")]
    ReturnVoid,
    #[strum(serialize = "return")]
    Return,
    #[strum(serialize = "return-wide")]
    ReturnWide,
    #[strum(serialize = "return-object")]
    ReturnObject,
    #[strum(serialize = "const/4")]
    Const4,
    #[strum(serialize = "const/16")]
    Const16,
    #[strum(serialize = "const")]
    Const,
    #[strum(serialize = "const-wide/16")]
    ConstWide16,
    #[strum(serialize = "const-wide/32")]
    ConstWide32,
    #[strum(serialize = "const-wide")]
    ConstWide,
    #[strum(serialize = "const-string")]
    ConstString,
    #[strum(serialize = "const-string/jumbo")]
    ConstStringJumbo,
    #[strum(serialize = "const-class")]
    ConstClass,
    #[strum(serialize = "monitor-enter")]
    MonitorEnter,
    #[strum(serialize = "monitor-exit")]
    MonitorExit,
    #[strum(serialize = "check-cast")]
    CheckCast,
    #[strum(serialize = "instance-of")]
    InstanceOf,
    #[strum(serialize = "array-length")]
    ArrayLength,
    #[strum(serialize = "new-instance")]
    NewInstance,
    #[strum(serialize = "new-array")]
    NewArray,
    #[strum(serialize = "throw")]
    Throw,
    #[strum(serialize = "goto")]
    Goto,
    #[strum(serialize = "goto/16")]
    Goto16,
    #[strum(serialize = "goto/32")]
    Goto32,
    #[strum(serialize = "packed-switch")]
    PackedSwitch,
    #[strum(serialize = "cmp-long")]
    CmpLong,
    #[strum(serialize = "if-eq")]
    IfEq,
    #[strum(serialize = "if-ne")]
    IfNe,
    #[strum(serialize = "if-lt")]
    IfLt,
    #[strum(serialize = "if-ge")]
    IfGe,
    #[strum(serialize = "if-gt")]
    IfGt,
    #[strum(serialize = "if-le")]
    IfLe,
    #[strum(serialize = "if-eqz")]
    IfEqz,
    #[strum(serialize = "if-nez")]
    IfNez,
    #[strum(serialize = "if-ltz")]
    IfLtz,
    #[strum(serialize = "if-gez")]
    IfGez,
    #[strum(serialize = "if-gtz")]
    IfGtz,
    #[strum(serialize = "if-lez")]
    IfLez,
    #[strum(serialize = "aget")]
    Aget,
    #[strum(serialize = "aget-object")]
    AgetObject,
    #[strum(serialize = "aput")]
    Aput,
    #[strum(serialize = "aput-object")]
    AputObject,
    #[strum(serialize = "iget")]
    Iget,
    #[strum(serialize = "iget-wide")]
    IgetWide,
    #[strum(serialize = "iget-object")]
    IgetObject,
    #[strum(serialize = "iget-boolean")]
    IgetBoolean,
    #[strum(serialize = "iput")]
    Iput,
    #[strum(serialize = "iput-wide")]
    IputWide,
    #[strum(serialize = "iput-object")]
    IputObject,
    #[strum(serialize = "iput-boolean")]
    IputBoolean,
    #[strum(serialize = "sget")]
    Sget,
    #[strum(serialize = "sget-wide")]
    SgetWide,
    #[strum(serialize = "sget-object")]
    SgetObject,
    #[strum(serialize = "sget-boolean")]
    SgetBoolean,
    #[strum(serialize = "sput")]
    Sput,
    #[strum(serialize = "sput-wide")]
    SputWide,
    #[strum(serialize = "sput-object")]
    SputObject,
    #[strum(serialize = "sput-boolean")]
    SputBoolean,
    #[strum(serialize = "invoke-virtual")]
    InvokeVirtual,
    #[strum(serialize = "invoke-super")]
    InvokeSuper,
    #[strum(serialize = "invoke-direct")]
    InvokeDirect,
    #[strum(serialize = "invoke-static")]
    InvokeStatic,
    #[strum(serialize = "invoke-interface")]
    InvokeInterface,
    #[strum(serialize = "neg-int")]
    NegInt,
    #[strum(serialize = "not-int")]
    NotInt,
    #[strum(serialize = "add-int")]
    AddInt,
    #[strum(serialize = "sub-int")]
    SubInt,
    #[strum(serialize = "mul-int")]
    MulInt,
    #[strum(serialize = "and-int")]
    AndInt,
    #[strum(serialize = "or-int")]
    OrInt,
    #[strum(serialize = "xor-int")]
    XorInt,
    #[strum(serialize = "add-int/2addr")]
    AddInt2Addr,
    #[strum(serialize = "add-int/lit16")]
    AddIntLit16,
    #[strum(serialize = "add-int/lit8")]
    AddIntLit8,
}

impl Opcode {
    /// Looks up an opcode by its smali mnemonic.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::InvalidMnemonic`] if the mnemonic is unknown.
    pub fn from_mnemonic(mnemonic: &str) -> Result<Self> {
        Opcode::from_str(mnemonic).map_err(|_| Error::InvalidMnemonic(mnemonic.to_string()))
    }

    /// The smali mnemonic of this opcode.
    #[must_use]
    pub fn mnemonic(&self) -> &'static str {
        self.into()
    }

    /// The instruction format of this opcode.
    #[must_use]
    pub const fn format(&self) -> Format {
        use Opcode::*;
        match self {
            Nop | ReturnVoid => Format::F10x,
            MoveResult | MoveResultWide | MoveResultObject | MoveException | Return
            | ReturnWide | ReturnObject | MonitorEnter | MonitorExit | Throw => Format::F11x,
            Move | MoveWide | MoveObject | ArrayLength | NegInt | NotInt | AddInt2Addr => {
                Format::F12x
            }
            Const4 => Format::F11n,
            Const16 | ConstWide16 => Format::F21s,
            Const | ConstWide32 => Format::F31i,
            ConstWide => Format::F51l,
            ConstString => Format::F21c(RefKind::String),
            ConstStringJumbo => Format::F31c,
            ConstClass | CheckCast | NewInstance => Format::F21c(RefKind::Type),
            InstanceOf | NewArray => Format::F22c(RefKind::Type),
            Goto => Format::F10t,
            Goto16 => Format::F20t,
            Goto32 => Format::F30t,
            PackedSwitch => Format::F31t,
            IfEq | IfNe | IfLt | IfGe | IfGt | IfLe => Format::F22t,
            IfEqz | IfNez | IfLtz | IfGez | IfGtz | IfLez => Format::F21t,
            CmpLong | Aget | AgetObject | Aput | AputObject | AddInt | SubInt | MulInt
            | AndInt | OrInt | XorInt => Format::F23x,
            Iget | IgetWide | IgetObject | IgetBoolean | Iput | IputWide | IputObject
            | IputBoolean => Format::F22c(RefKind::Field),
            Sget | SgetWide | SgetObject | SgetBoolean | Sput | SputWide | SputObject
            | SputBoolean => Format::F21c(RefKind::Field),
            InvokeVirtual | InvokeSuper | InvokeDirect | InvokeStatic | InvokeInterface => {
                Format::F35c
            }
            AddIntLit16 => Format::F22s,
            AddIntLit8 => Format::F22b,
        }
    }

    /// Control flow behaviour of this opcode.
    #[must_use]
    pub const fn flow(&self) -> FlowType {
        use Opcode::*;
        match self {
            ReturnVoid | Return | ReturnWide | ReturnObject => FlowType::Return,
            Throw => FlowType::Throw,
            Goto | Goto16 | Goto32 => FlowType::UnconditionalBranch,
            PackedSwitch => FlowType::Switch,
            IfEq | IfNe | IfLt | IfGe | IfGt | IfLe | IfEqz | IfNez | IfLtz | IfGez | IfGtz
            | IfLez => FlowType::ConditionalBranch,
            InvokeVirtual | InvokeSuper | InvokeDirect | InvokeStatic | InvokeInterface => {
                FlowType::Call
            }
            _ => FlowType::Sequential,
        }
    }

    /// Whether the first register operand names a 64-bit register pair.
    #[must_use]
    pub const fn is_wide(&self) -> bool {
        matches!(
            self,
            Opcode::MoveWide
                | Opcode::MoveResultWide
                | Opcode::ReturnWide
                | Opcode::ConstWide16
                | Opcode::ConstWide32
                | Opcode::ConstWide
                | Opcode::IgetWide
                | Opcode::IputWide
                | Opcode::SgetWide
                | Opcode::SputWide
        )
    }

    /// Whether control never falls through to the next instruction.
    #[must_use]
    pub const fn is_terminator(&self) -> bool {
        matches!(
            self.flow(),
            FlowType::Return | FlowType::Throw | FlowType::UnconditionalBranch
        )
    }

    /// Whether this opcode carries label operands.
    #[must_use]
    pub const fn is_branch(&self) -> bool {
        matches!(
            self.flow(),
            FlowType::ConditionalBranch | FlowType::UnconditionalBranch | FlowType::Switch
        )
    }
}

impl Serialize for Opcode {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(self.mnemonic())
    }
}

impl<'de> Deserialize<'de> for Opcode {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let mnemonic = String::deserialize(deserializer)?;
        Opcode::from_mnemonic(&mnemonic).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strum::IntoEnumIterator;

    #[test]
    fn test_mnemonic_roundtrip() -> Result<()> {
        for opcode in Opcode::iter() {
            assert_eq!(Opcode::from_mnemonic(opcode.mnemonic())?, opcode);
        }
        Ok(())
    }

    #[test]
    fn test_invalid_mnemonic() {
        assert!(matches!(
            Opcode::from_mnemonic("invoke-polymorphic"),
            Err(Error::InvalidMnemonic(_))
        ));
    }

    #[test]
    fn test_format_sizes() {
        assert_eq!(Opcode::ReturnVoid.format().size(), 1);
        assert_eq!(Opcode::Const4.format().size(), 1);
        assert_eq!(Opcode::IfEqz.format().size(), 2);
        assert_eq!(Opcode::InvokeStatic.format().size(), 3);
        assert_eq!(Opcode::ConstWide.format().size(), 5);
    }

    #[test]
    fn test_flow_classification() {
        assert!(Opcode::Goto.is_terminator());
        assert!(Opcode::ReturnObject.is_terminator());
        assert!(!Opcode::IfNez.is_terminator());
        assert!(Opcode::IfNez.is_branch());
        assert!(Opcode::PackedSwitch.is_branch());
        assert_eq!(Opcode::InvokeVirtual.flow(), FlowType::Call);
    }

    #[test]
    fn test_displacement_ranges() {
        assert_eq!(Opcode::Goto.format().displacement_range(), Some((-128, 127)));
        assert_eq!(Opcode::IfEq.format().displacement_range(), Some((-32768, 32767)));
        assert_eq!(Opcode::Nop.format().displacement_range(), None);
    }

    #[test]
    fn test_register_widths() {
        assert_eq!(Opcode::Const4.format().register_bits(), Some(4));
        assert_eq!(Opcode::IgetBoolean.format().register_bits(), Some(4));
        assert_eq!(Opcode::InvokeStatic.format().register_bits(), Some(4));
        assert_eq!(Opcode::Const16.format().register_bits(), Some(8));
        assert_eq!(Opcode::MoveResult.format().register_bits(), Some(8));
        assert_eq!(Opcode::Goto.format().register_bits(), None);
    }
}
