//! Structural validation of method bodies.
//!
//! [`validate_method`] is run by the editor before every commit, by the listing reader for
//! every parsed method and by [`crate::Corpus::finalize`]. It checks the invariants that keep a
//! body encodable:
//!
//! - every label is bound to an existing instruction
//! - every label referenced by a branch or switch jump table is declared
//! - the frame fits the 16-bit `.registers` count
//! - every register lies inside the frame (wide values need both halves)
//! - every register operand fits the width of its format's register field
//! - every branch displacement fits the opcode's encoding
//! - abstract and native methods carry no code

use crate::{
    model::{
        instruction::{Instruction, Operand, Register},
        method::Method,
    },
    Error, Result,
};

fn integrity(method: &Method, message: String) -> Error {
    Error::CorpusIntegrity {
        method: method.id().to_string(),
        message,
    }
}

/// Validates the structural invariants of `method`.
///
/// # Errors
///
/// Returns [`crate::Error::CorpusIntegrity`] describing the first violation found.
pub fn validate_method(method: &Method) -> Result<()> {
    let instructions = method.instructions();

    if !method.has_body() {
        if !instructions.is_empty() || !method.labels().is_empty() {
            return Err(integrity(
                method,
                "abstract or native method carries code".to_string(),
            ));
        }
        return Ok(());
    }

    for (name, index) in method.labels() {
        if *index >= instructions.len() {
            return Err(integrity(
                method,
                format!(
                    "label :{name} bound to index {index} outside of {} instructions",
                    instructions.len()
                ),
            ));
        }
    }

    let locals = method.locals();
    let params = method.parameter_registers();
    if locals.checked_add(params).is_none() {
        return Err(integrity(
            method,
            format!("frame of {locals} locals and {params} parameter registers exceeds 65535"),
        ));
    }
    let offsets = method.code_offsets();

    for (index, insn) in instructions.iter().enumerate() {
        check_register_widths(method, index, insn)?;

        for reg in insn.registers() {
            let inside = match reg {
                Register::Local(n) => n < locals,
                Register::Param(n) => n < params,
            };
            if !inside {
                return Err(integrity(
                    method,
                    format!("register {reg} of instruction {index} ({insn}) is outside the frame"),
                ));
            }
        }

        for label in insn.label_refs() {
            let Some(target) = method.label_index(label) else {
                return Err(integrity(
                    method,
                    format!("instruction {index} ({insn}) branches to undeclared label :{label}"),
                ));
            };

            let displacement = i64::from(offsets[target]) - i64::from(offsets[index]);
            if let Some((min, max)) = insn.opcode().format().displacement_range() {
                if displacement < min || displacement > max {
                    return Err(integrity(
                        method,
                        format!(
                            "instruction {index} ({insn}) can not reach :{label} ({displacement} code units)"
                        ),
                    ));
                }
            }
        }
    }

    Ok(())
}

/// Parameters sit after the locals, so `pN` is encoded as register `locals + N`.
fn check_register_widths(method: &Method, index: usize, insn: &Instruction) -> Result<()> {
    let Some(bits) = insn.opcode().format().register_bits() else {
        return Ok(());
    };
    let limit = 1u32 << bits;

    let encoded = insn.operands().iter().flat_map(|op| match op {
        Operand::Register(reg) => vec![*reg],
        Operand::RegisterList(list) => list.clone(),
        _ => Vec::new(),
    });
    for reg in encoded {
        let number = match reg {
            Register::Local(n) => u32::from(n),
            Register::Param(n) => u32::from(method.locals()) + u32::from(n),
        };
        if number >= limit {
            return Err(integrity(
                method,
                format!(
                    "register {reg} of instruction {index} ({insn}) is v{number}, beyond the {bits}-bit field of {}",
                    insn.opcode()
                ),
            ));
        }
    }
    Ok(())
}
