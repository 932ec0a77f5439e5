//! Transactional, label-aware editing of method bodies.
//!
//! Every [`MethodEditor`] operation works on a scratch copy of the body: it splices the
//! instruction list, rebinds labels, grows the local register area for newly used `v`
//! registers, widens `goto` forms whose target moved out of reach and finally runs
//! [`validate_method`]. Only a body that passes validation replaces the original, so a failed
//! edit leaves the method exactly as it was.
//!
//! Label semantics follow instruction identity rather than position:
//!
//! - [`MethodEditor::insert_at`] shifts every label at or after the insertion index, so
//!   existing branches keep targeting the instruction they targeted before
//! - [`MethodEditor::insert_with_labels`] additionally binds caller-chosen names to original
//!   instructions (by pre-insertion index) so the inserted code can branch back into them
//! - [`MethodEditor::replace_from`] drops labels of the removed tail
//!
//! # Examples
//!
//! ```rust,no_run
//! use dexpatch::patch::{Block, ExternalLabel};
//! # fn example(method: &mut dexpatch::model::Method) -> dexpatch::Result<()> {
//! let block = Block::parse(&[
//!     "invoke-static {}, Lapp/Settings;->enabled()Z",
//!     "move-result v0",
//!     "if-eqz v0, :original",
//!     "const/4 v0, 0x0",
//!     "return v0",
//! ])?;
//! method
//!     .edit()?
//!     .insert_with_labels(0, block, &[ExternalLabel::new("original", 0)])?;
//! # Ok(())
//! # }
//! ```

use std::collections::{BTreeMap, BTreeSet};

use log::debug;

use crate::{
    model::{
        instruction::{Instruction, Register},
        method::Method,
        opcode::{FlowType, Opcode},
    },
    patch::{builder::Block, validation::validate_method},
    Error, Result,
};

/// A label bound to an instruction of the target method at insertion time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExternalLabel {
    /// Label name, unique within the method
    pub name: String,
    /// Pre-insertion index of the target instruction
    pub index: usize,
}

impl ExternalLabel {
    /// Creates an external label.
    #[must_use]
    pub fn new(name: impl Into<String>, index: usize) -> Self {
        ExternalLabel {
            name: name.into(),
            index,
        }
    }
}

struct Scratch {
    locals: u16,
    instructions: Vec<Instruction>,
    labels: BTreeMap<String, usize>,
}

/// Editor holding exclusive access to one method.
pub struct MethodEditor<'a> {
    method: &'a mut Method,
    widen_branches: bool,
}

impl<'a> MethodEditor<'a> {
    /// Opens an editor.
    ///
    /// # Errors
    ///
    /// - [`crate::Error::MethodFinalized`] if the method is frozen
    /// - [`crate::Error::NoMethodBody`] if the method is abstract or native
    pub fn new(method: &'a mut Method) -> Result<Self> {
        method.ensure_editable()?;
        Ok(MethodEditor {
            method,
            widen_branches: true,
        })
    }

    /// Enables or disables automatic `goto` widening (enabled by default). Without it, a
    /// `goto` pushed out of reach fails validation.
    #[must_use]
    pub fn widen_branches(mut self, enabled: bool) -> Self {
        self.widen_branches = enabled;
        self
    }

    /// The method under edit.
    #[must_use]
    pub fn method(&self) -> &Method {
        self.method
    }

    /// Number of instructions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.method.instructions().len()
    }

    /// Whether the body is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.method.instructions().is_empty()
    }

    /// Reads the instruction at `index`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::IndexOutOfBounds`] if `index` is past the last instruction.
    pub fn instruction(&self, index: usize) -> Result<&Instruction> {
        self.method
            .instructions()
            .get(index)
            .ok_or_else(|| self.out_of_bounds(index))
    }

    /// Inserts `block` before the instruction at `index` (`index == len` appends).
    ///
    /// Labels at or after `index` shift by the block length.
    ///
    /// # Errors
    ///
    /// - [`crate::Error::IndexOutOfBounds`] if `index > len`
    /// - [`crate::Error::UndefinedLabel`] / [`crate::Error::DuplicateLabel`] for label problems
    /// - [`crate::Error::RegisterOutOfRange`] for parameter registers outside the frame
    /// - [`crate::Error::CorpusIntegrity`] if the result does not validate
    pub fn insert_at(&mut self, index: usize, block: Block) -> Result<&mut Self> {
        self.insert_with_labels(index, block, &[])
    }

    /// Inserts `block` before `index` and binds `external` labels to original instructions so
    /// the block can branch back into the existing code.
    ///
    /// Label references inside the block resolve against the block's own labels, then the
    /// external labels, then the labels already declared in the method.
    ///
    /// # Errors
    ///
    /// - [`crate::Error::IndexOutOfBounds`] if `index > len` or an external label targets a
    ///   non-existent instruction
    /// - [`crate::Error::DuplicateLabel`] if a block or external label clashes with another
    ///   label
    /// - [`crate::Error::UndefinedLabel`] if a block branch cannot be resolved
    /// - [`crate::Error::RegisterOutOfRange`] for parameter registers outside the frame
    /// - [`crate::Error::CorpusIntegrity`] if the result does not validate
    pub fn insert_with_labels(
        &mut self,
        index: usize,
        block: Block,
        external: &[ExternalLabel],
    ) -> Result<&mut Self> {
        let len = self.len();
        if index > len {
            return Err(self.out_of_bounds(index));
        }

        let existing = self.method.labels();
        let mut external_names = BTreeSet::new();
        for label in external {
            if label.index >= len {
                return Err(self.out_of_bounds(label.index));
            }
            if existing.contains_key(&label.name)
                || block.labels().contains_key(&label.name)
                || !external_names.insert(label.name.as_str())
            {
                return Err(self.duplicate(&label.name));
            }
        }
        if let Some(name) = block.labels().keys().find(|name| existing.contains_key(*name)) {
            return Err(self.duplicate(name));
        }
        self.check_references(&block, |name| {
            external_names.contains(name) || existing.contains_key(name)
        })?;
        self.check_parameters(block.instructions())?;

        let shift = block.len();
        let moved = |target: usize| if target >= index { target + shift } else { target };

        let mut labels: BTreeMap<String, usize> = existing
            .iter()
            .map(|(name, target)| (name.clone(), moved(*target)))
            .collect();
        for label in external {
            labels.insert(label.name.clone(), moved(label.index));
        }

        let (block_instructions, block_labels) = block.into_parts();
        for (name, offset) in block_labels {
            labels.insert(name, index + offset);
        }

        let mut instructions = self.method.instructions().to_vec();
        let locals = self.locals_for(&block_instructions);
        instructions.splice(index..index, block_instructions);

        debug!(
            "Inserting {} instruction(s) at {} in {}",
            shift,
            index,
            self.method.id()
        );
        self.commit(Scratch {
            locals,
            instructions,
            labels,
        })?;
        Ok(self)
    }

    /// Truncates the body at `index` and appends `block`.
    ///
    /// Labels bound inside the removed tail are dropped. A surviving branch to a dropped label
    /// fails validation and nothing is committed.
    ///
    /// # Errors
    ///
    /// - [`crate::Error::IndexOutOfBounds`] if `index > len`
    /// - [`crate::Error::DuplicateLabel`] if a block label clashes with a surviving label
    /// - [`crate::Error::UndefinedLabel`] if a block branch cannot be resolved
    /// - [`crate::Error::RegisterOutOfRange`] for parameter registers outside the frame
    /// - [`crate::Error::CorpusIntegrity`] if the result does not validate
    pub fn replace_from(&mut self, index: usize, block: Block) -> Result<&mut Self> {
        if index > self.len() {
            return Err(self.out_of_bounds(index));
        }

        let mut labels: BTreeMap<String, usize> = self
            .method
            .labels()
            .iter()
            .filter(|(_, target)| **target < index)
            .map(|(name, target)| (name.clone(), *target))
            .collect();
        if let Some(name) = block.labels().keys().find(|name| labels.contains_key(*name)) {
            return Err(self.duplicate(name));
        }
        self.check_references(&block, |name| labels.contains_key(name))?;
        self.check_parameters(block.instructions())?;

        let (block_instructions, block_labels) = block.into_parts();
        for (name, offset) in block_labels {
            labels.insert(name, index + offset);
        }

        // the tail's registers no longer count, but the local area never shrinks
        let locals = self.locals_for(&block_instructions);
        let mut instructions = self.method.instructions()[..index].to_vec();
        instructions.extend(block_instructions);

        debug!(
            "Replacing body of {} from index {} ({} instructions)",
            self.method.id(),
            index,
            instructions.len()
        );
        self.commit(Scratch {
            locals,
            instructions,
            labels,
        })?;
        Ok(self)
    }

    /// Replaces the instruction at `index`. Labels are untouched.
    ///
    /// # Errors
    ///
    /// - [`crate::Error::IndexOutOfBounds`] if `index >= len`
    /// - [`crate::Error::RegisterOutOfRange`] for parameter registers outside the frame
    /// - [`crate::Error::CorpusIntegrity`] if the result does not validate (for example a
    ///   branch to an undeclared label)
    pub fn replace_instruction(&mut self, index: usize, insn: Instruction) -> Result<&mut Self> {
        if index >= self.len() {
            return Err(self.out_of_bounds(index));
        }
        let replacement = [insn];
        self.check_parameters(&replacement)?;
        let locals = self.locals_for(&replacement);
        let [insn] = replacement;

        let mut instructions = self.method.instructions().to_vec();
        debug!(
            "Replacing instruction {} ({}) with {} in {}",
            index,
            instructions[index],
            insn,
            self.method.id()
        );
        instructions[index] = insn;

        self.commit(Scratch {
            locals,
            instructions,
            labels: self.method.labels().clone(),
        })?;
        Ok(self)
    }

    /// Removes `count` instructions starting at `index`.
    ///
    /// Labels bound inside the removed range move to the instruction that follows it; labels
    /// after it shift down.
    ///
    /// # Errors
    ///
    /// - [`crate::Error::IndexOutOfBounds`] if the range exceeds the body
    /// - [`crate::Error::CorpusIntegrity`] if a label would be left without an instruction
    pub fn remove_instructions(&mut self, index: usize, count: usize) -> Result<&mut Self> {
        let end = index
            .checked_add(count)
            .filter(|end| *end <= self.len())
            .ok_or_else(|| self.out_of_bounds(index.saturating_add(count)))?;

        let labels = self
            .method
            .labels()
            .iter()
            .map(|(name, target)| {
                let target = match *target {
                    t if t < index => t,
                    t if t < end => index,
                    t => t - count,
                };
                (name.clone(), target)
            })
            .collect();
        let mut instructions = self.method.instructions().to_vec();
        instructions.drain(index..end);

        debug!(
            "Removing {} instruction(s) at {} in {}",
            count,
            index,
            self.method.id()
        );
        self.commit(Scratch {
            locals: self.method.locals(),
            instructions,
            labels,
        })?;
        Ok(self)
    }

    fn commit(&mut self, mut scratch: Scratch) -> Result<()> {
        if self.widen_branches {
            widen_gotos(&mut scratch)?;
        }

        let mut candidate = self.method.clone();
        candidate.set_body(scratch.locals, scratch.instructions, scratch.labels);
        validate_method(&candidate)?;

        *self.method = candidate;
        Ok(())
    }

    fn check_references(&self, block: &Block, known: impl Fn(&str) -> bool) -> Result<()> {
        for insn in block.instructions() {
            for label in insn.label_refs() {
                if !block.labels().contains_key(label) && !known(label) {
                    return Err(Error::UndefinedLabel {
                        method: self.method.id().to_string(),
                        label: label.to_string(),
                    });
                }
            }
        }
        Ok(())
    }

    fn check_parameters(&self, instructions: &[Instruction]) -> Result<()> {
        let params = self.method.parameter_registers();
        for insn in instructions {
            for reg in insn.registers() {
                if let Register::Param(n) = reg {
                    if n >= params {
                        return Err(Error::RegisterOutOfRange {
                            method: self.method.id().to_string(),
                            register: reg.to_string(),
                        });
                    }
                }
            }
        }
        Ok(())
    }

    fn locals_for(&self, inserted: &[Instruction]) -> u16 {
        let needed = inserted
            .iter()
            .flat_map(Instruction::registers)
            .filter_map(|reg| match reg {
                Register::Local(n) => Some(n.saturating_add(1)),
                Register::Param(_) => None,
            })
            .max()
            .unwrap_or(0);
        self.method.locals().max(needed)
    }

    fn out_of_bounds(&self, index: usize) -> Error {
        Error::IndexOutOfBounds {
            method: self.method.id().to_string(),
            index,
            len: self.len(),
        }
    }

    fn duplicate(&self, label: &str) -> Error {
        Error::DuplicateLabel {
            method: self.method.id().to_string(),
            label: label.to_string(),
        }
    }
}

/// Promotes `goto` forms until every unconditional branch reaches its target.
///
/// Widening only ever grows instructions, so the loop terminates after at most two passes per
/// branch.
fn widen_gotos(scratch: &mut Scratch) -> Result<()> {
    loop {
        let mut offsets = Vec::with_capacity(scratch.instructions.len());
        let mut offset = 0i64;
        for insn in &scratch.instructions {
            offsets.push(offset);
            offset += i64::from(insn.size());
        }

        let mut changed = false;
        for index in 0..scratch.instructions.len() {
            let insn = &scratch.instructions[index];
            if insn.opcode().flow() != FlowType::UnconditionalBranch {
                continue;
            }
            let Some(target) = insn
                .label_refs()
                .next()
                .and_then(|label| scratch.labels.get(label))
                .and_then(|target| offsets.get(*target))
            else {
                // dangling, reported by validation
                continue;
            };

            let displacement = target - offsets[index];
            let fits = insn
                .opcode()
                .format()
                .displacement_range()
                .is_some_and(|(min, max)| displacement >= min && displacement <= max);
            if fits {
                continue;
            }

            let wider = match insn.opcode() {
                Opcode::Goto => Opcode::Goto16,
                Opcode::Goto16 => Opcode::Goto32,
                _ => continue,
            };
            let widened = insn.with_opcode(wider)?;
            scratch.instructions[index] = widened;
            changed = true;
        }

        if !changed {
            return Ok(());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        model::listing::parse_instruction,
        patch::builder::InstructionBuilder,
        test::parse_method,
    };

    const CHECK: &str = "
.method public check(I)Z
    .registers 3
    if-eqz p1, :no
    const/4 v0, 0x1
    return v0
    :no
    const/4 v0, 0x0
    return v0
.end method
";

    #[test]
    fn test_insert_shifts_labels_at_and_after_index() -> Result<()> {
        let mut method = parse_method(CHECK)?;
        let block = Block::parse(&["nop", "nop"])?;
        method.edit()?.insert_at(3, block)?;

        assert_eq!(method.instructions().len(), 7);
        assert_eq!(method.label_index("no"), Some(5));
        assert_eq!(method.instructions()[5].to_string(), "const/4 v0, 0x0");
        Ok(())
    }

    #[test]
    fn test_insert_keeps_labels_before_index() -> Result<()> {
        let mut method = parse_method(CHECK)?;
        method.edit()?.insert_at(4, Block::parse(&["nop"])?)?;
        assert_eq!(method.label_index("no"), Some(3));
        Ok(())
    }

    #[test]
    fn test_insert_with_external_label() -> Result<()> {
        let mut method = parse_method(CHECK)?;
        let block = Block::parse(&[
            "if-nez p1, :original",
            "const/4 v0, 0x0",
            "return v0",
        ])?;
        method
            .edit()?
            .insert_with_labels(0, block, &[ExternalLabel::new("original", 0)])?;

        assert_eq!(method.label_index("original"), Some(3));
        assert_eq!(method.instructions()[3].to_string(), "if-eqz p1, :no");
        assert_eq!(method.label_index("no"), Some(6));
        Ok(())
    }

    #[test]
    fn test_block_can_target_existing_label() -> Result<()> {
        let mut method = parse_method(CHECK)?;
        method.edit()?.insert_at(0, Block::parse(&["goto :no"])?)?;
        assert_eq!(method.label_index("no"), Some(4));
        Ok(())
    }

    #[test]
    fn test_undefined_label_rejected() -> Result<()> {
        let mut method = parse_method(CHECK)?;
        let before = method.clone();
        let result = method.edit()?.insert_at(0, Block::parse(&["goto :missing"])?).map(|_| ());
        assert!(matches!(result, Err(Error::UndefinedLabel { ref label, .. }) if label == "missing"));
        assert_eq!(method, before);
        Ok(())
    }

    #[test]
    fn test_duplicate_label_rejected() -> Result<()> {
        let mut method = parse_method(CHECK)?;
        let block = Block::parse(&[":no", "nop"])?;
        assert!(matches!(
            method.edit()?.insert_at(0, block).map(|_| ()),
            Err(Error::DuplicateLabel { .. })
        ));

        let result = method
            .edit()?
            .insert_with_labels(0, Block::parse(&["nop"])?, &[ExternalLabel::new("no", 0)])
            .map(|_| ());
        assert!(matches!(result, Err(Error::DuplicateLabel { .. })));
        Ok(())
    }

    #[test]
    fn test_insert_grows_locals() -> Result<()> {
        let mut method = parse_method(CHECK)?;
        assert_eq!(method.locals(), 1);
        let mut asm = InstructionBuilder::new();
        asm.const_wide(Register::Local(3), 0)?;
        method.edit()?.insert_at(0, asm.finish()?)?;
        assert_eq!(method.locals(), 5);
        assert_eq!(method.parameter_registers(), 2);
        Ok(())
    }

    #[test]
    fn test_parameter_register_out_of_range() -> Result<()> {
        let mut method = parse_method(CHECK)?;
        let result = method
            .edit()?
            .insert_at(0, Block::parse(&["const/4 p2, 0x0"])?)
            .map(|_| ());
        assert!(matches!(result, Err(Error::RegisterOutOfRange { .. })));
        Ok(())
    }

    #[test]
    fn test_replace_from_drops_tail_labels() -> Result<()> {
        let mut method = parse_method(
            ".method static f()Z\n    .registers 1\n    const/4 v0, 0x1\n    :tail\n    return v0\n.end method\n",
        )?;
        method
            .edit()?
            .replace_from(0, Block::parse(&["const/4 v0, 0x0", "return v0"])?)?;
        assert_eq!(method.instructions().len(), 2);
        assert!(method.labels().is_empty());
        Ok(())
    }

    #[test]
    fn test_replace_from_dangling_branch_fails() -> Result<()> {
        let mut method = parse_method(CHECK)?;
        let before = method.clone();
        let result = method
            .edit()?
            .replace_from(3, Block::parse(&["return p1"])?)
            .map(|_| ());
        assert!(matches!(result, Err(Error::CorpusIntegrity { .. })));
        assert_eq!(method, before);
        Ok(())
    }

    #[test]
    fn test_read_instruction() -> Result<()> {
        let mut method = parse_method(CHECK)?;
        let editor = method.edit()?;
        assert_eq!(editor.instruction(2)?.opcode(), Opcode::Return);
        assert!(matches!(
            editor.instruction(10),
            Err(Error::IndexOutOfBounds { index: 10, len: 5, .. })
        ));
        Ok(())
    }

    #[test]
    fn test_replace_instruction() -> Result<()> {
        let mut method = parse_method(CHECK)?;
        method
            .edit()?
            .replace_instruction(1, parse_instruction("const/4 v0, 0x0")?)?;
        assert_eq!(method.instructions()[1].literal(), Some(0));
        Ok(())
    }

    #[test]
    fn test_remove_moves_labels_to_follower() -> Result<()> {
        let mut method = parse_method(CHECK)?;
        method.edit()?.remove_instructions(3, 1)?;
        assert_eq!(method.label_index("no"), Some(3));
        assert_eq!(method.instructions()[3].opcode(), Opcode::Return);
        Ok(())
    }

    #[test]
    fn test_goto_widening() -> Result<()> {
        let mut method = parse_method(
            ".method static f()V\n    .registers 0\n    goto :end\n    :end\n    return-void\n.end method\n",
        )?;
        let mut asm = InstructionBuilder::new();
        for _ in 0..200 {
            asm.nop()?;
        }
        method.edit()?.insert_at(1, asm.finish()?)?;
        assert_eq!(method.instructions()[0].opcode(), Opcode::Goto16);
        assert_eq!(method.label_index("end"), Some(201));

        let mut method = parse_method(
            ".method static f()V\n    .registers 0\n    goto :end\n    :end\n    return-void\n.end method\n",
        )?;
        let mut asm = InstructionBuilder::new();
        for _ in 0..200 {
            asm.nop()?;
        }
        let result = method
            .edit()?
            .widen_branches(false)
            .insert_at(1, asm.finish()?)
            .map(|_| ());
        assert!(matches!(result, Err(Error::CorpusIntegrity { .. })));
        Ok(())
    }

    #[test]
    fn test_conditional_out_of_reach_fails() -> Result<()> {
        let mut method = parse_method(CHECK)?;
        let mut asm = InstructionBuilder::new();
        for _ in 0..40_000 {
            asm.emit(Opcode::Nop, vec![])?;
        }
        let result = method.edit()?.insert_at(1, asm.finish()?).map(|_| ());
        assert!(matches!(result, Err(Error::CorpusIntegrity { .. })));
        Ok(())
    }

    const COUNTER: &str = "
.method public get()I
    .locals 15
    iget v0, p0, Lcom/example/Counter;->count:I
    return v0
.end method
";

    #[test]
    fn test_growing_locals_pushes_param_out_of_nibble() -> Result<()> {
        let mut method = parse_method(COUNTER)?;
        let before = method.clone();

        // v15 grows the frame to 16 locals, p0 becomes v16 inside the 4-bit iget field
        let result = method
            .edit()?
            .insert_at(0, Block::parse(&["const/4 v15, 0x0"])?)
            .map(|_| ());
        assert!(matches!(result, Err(Error::CorpusIntegrity { .. })));
        assert_eq!(method, before);
        Ok(())
    }

    #[test]
    fn test_nibble_register_out_of_range() -> Result<()> {
        let mut method = parse_method(CHECK)?;
        let result = method
            .edit()?
            .insert_at(0, Block::parse(&["const/4 v16, 0x0"])?)
            .map(|_| ());
        assert!(matches!(result, Err(Error::CorpusIntegrity { .. })));
        assert_eq!(method.locals(), 1);
        Ok(())
    }

    #[test]
    fn test_const_int_avoids_nibble_form_for_high_locals() -> Result<()> {
        let mut method = parse_method(
            ".method static f()V\n    .registers 0\n    return-void\n.end method\n",
        )?;
        let mut asm = InstructionBuilder::new();
        asm.const_int(Register::Local(16), 0)?;
        method.edit()?.insert_at(0, asm.finish()?)?;

        assert_eq!(method.instructions()[0].opcode(), Opcode::Const16);
        assert_eq!(method.locals(), 17);
        Ok(())
    }

    #[test]
    fn test_frame_larger_than_u16_rejected() -> Result<()> {
        let mut method = parse_method(CHECK)?;
        let result = method
            .edit()?
            .insert_at(0, Block::parse(&["const/16 v65535, 0x0"])?)
            .map(|_| ());
        match result {
            Err(Error::CorpusIntegrity { message, .. }) => assert!(message.contains("exceeds")),
            other => panic!("expected an integrity error, got {other:?}"),
        }
        assert_eq!(method.registers(), 3);
        Ok(())
    }
}
