//! Shared helpers for the integration tests.

#![allow(dead_code)]

use std::collections::HashMap;

use dexpatch::prelude::*;

/// Accessor of the "block video ads" setting.
pub const SHOULD_BLOCK_VIDEO_ADS: &str =
    "Lapp/revanced/integrations/twitch/patches/VideoAdsPatch;->shouldBlockVideoAds()Z";

/// Loads a listing from `tests/samples`.
pub fn load_sample(name: &str) -> Result<Corpus> {
    Corpus::from_path(format!("tests/samples/{name}"))
}

/// Looks up the single method `owner->name`.
pub fn method<'c>(corpus: &'c Corpus, owner: &str, name: &str) -> Result<&'c Method> {
    let handles = corpus.find_methods(owner, name)?;
    handles
        .first()
        .and_then(|handle| corpus.method(*handle))
        .ok_or_else(|| Error::MethodNotFound {
            class: owner.to_string(),
            method: name.to_string(),
        })
}

/// How a traced execution left the method.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Exit {
    /// `return-void`
    Void,
    /// A value return; `None` when the register content is not a known constant
    Value(Option<i64>),
    /// Execution reached an instruction the tracer does not model
    Unmodelled(usize),
}

/// The instructions visited, in order, and how execution ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Trace {
    pub path: Vec<usize>,
    pub exit: Exit,
}

/// Walks `method` from its first instruction with the setting behind `accessor` set to `flag`.
///
/// Constants, branches on known registers, the accessor call and returns are modelled; other
/// calls and field reads produce unknown values. Anything else stops the trace.
pub fn trace(method: &Method, accessor: &str, flag: bool) -> Trace {
    let insns = method.instructions();
    let mut regs: HashMap<Register, i64> = HashMap::new();
    let mut pending: Option<i64> = None;
    let mut path = Vec::new();
    let mut pc = 0;

    let target = |label: &str| method.label_index(label);
    let dest = |insn: &Instruction| match insn.operands().first() {
        Some(Operand::Register(reg)) => Some(*reg),
        _ => None,
    };
    let label_operand = |insn: &Instruction| {
        insn.operands().iter().find_map(|op| match op {
            Operand::Label(label) => Some(label.clone()),
            _ => None,
        })
    };

    // bounded, so a loop in a fixture can't hang the test
    while path.len() <= insns.len() * 4 {
        let Some(insn) = insns.get(pc) else {
            return halt(path, pc);
        };
        path.push(pc);

        match insn.opcode() {
            Opcode::Nop | Opcode::CheckCast => pc += 1,
            Opcode::Const4
            | Opcode::Const16
            | Opcode::Const
            | Opcode::ConstWide16
            | Opcode::ConstWide32
            | Opcode::ConstWide => {
                match (dest(insn), insn.literal()) {
                    (Some(reg), Some(value)) => regs.insert(reg, value),
                    _ => return halt(path, pc),
                };
                pc += 1;
            }
            Opcode::InvokeStatic | Opcode::InvokeVirtual | Opcode::InvokeDirect => {
                let is_accessor = insn
                    .method_ref()
                    .is_some_and(|m| m.to_string() == accessor);
                pending = is_accessor.then_some(i64::from(flag));
                pc += 1;
            }
            Opcode::MoveResult | Opcode::MoveResultObject | Opcode::MoveResultWide => {
                let Some(reg) = dest(insn) else {
                    return halt(path, pc);
                };
                match pending.take() {
                    Some(value) => regs.insert(reg, value),
                    None => regs.remove(&reg),
                };
                pc += 1;
            }
            Opcode::IgetBoolean | Opcode::IgetObject | Opcode::SgetObject => {
                if let Some(reg) = dest(insn) {
                    regs.remove(&reg);
                }
                pc += 1;
            }
            Opcode::IfEqz | Opcode::IfNez => {
                let value = dest(insn).and_then(|reg| regs.get(&reg).copied());
                let jump = label_operand(insn).and_then(|l| target(&l));
                let (Some(value), Some(jump)) = (value, jump) else {
                    return halt(path, pc);
                };
                let taken = (insn.opcode() == Opcode::IfEqz) == (value == 0);
                pc = if taken { jump } else { pc + 1 };
            }
            Opcode::Goto | Opcode::Goto16 | Opcode::Goto32 => {
                let Some(jump) = label_operand(insn).and_then(|l| target(&l)) else {
                    return halt(path, pc);
                };
                pc = jump;
            }
            Opcode::ReturnVoid => {
                return Trace {
                    path,
                    exit: Exit::Void,
                }
            }
            Opcode::Return | Opcode::ReturnWide | Opcode::ReturnObject => {
                let value = dest(insn).and_then(|reg| regs.get(&reg).copied());
                return Trace {
                    path,
                    exit: Exit::Value(value),
                };
            }
            _ => return halt(path, pc),
        }
    }

    halt(path, pc)
}

fn halt(path: Vec<usize>, pc: usize) -> Trace {
    Trace {
        path,
        exit: Exit::Unmodelled(pc),
    }
}

/// Generates a listing of `classes` classes with `methods` small `()I` methods each.
///
/// Method `m{j}` of class `C{i}` returns `j`; the method `C{needle}.m0` additionally loads the
/// string `"needle"`.
pub fn synthetic_listing(classes: usize, methods: usize, needle: usize) -> String {
    let mut out = String::new();
    for i in 0..classes {
        out.push_str(&format!(
            ".class public Lcom/example/gen/C{i};\n.super Ljava/lang/Object;\n\n"
        ));
        for j in 0..methods {
            out.push_str(&format!(".method public m{j}()I\n    .registers 3\n"));
            if i == needle && j == 0 {
                out.push_str("    const-string v1, \"needle\"\n");
            }
            out.push_str(&format!(
                "    const/16 v0, {j:#x}\n    return v0\n.end method\n\n"
            ));
        }
        out.push_str(".end class\n\n");
    }
    out
}
