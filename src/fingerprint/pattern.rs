//! Instruction patterns.
//!
//! A pattern is an ordered list of [`PatternEntry`]s. Each entry pairs an
//! [`InstructionMatcher`] with a [`Placement`] relative to the previous entry. [`find_pattern`]
//! returns the leftmost match: the earliest start index and, for each following entry, the
//! earliest position from which the rest of the pattern can still complete.

use serde::{Deserialize, Serialize};

use crate::model::{Instruction, Opcode};

/// Where an entry may match relative to the entry before it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Placement {
    /// Immediately after the previous match
    #[default]
    Adjacent,
    /// Anywhere after the previous match
    Anywhere,
}

/// Predicate over a single instruction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "match", rename_all = "snake_case")]
pub enum InstructionMatcher {
    /// Matches every instruction
    Any,
    /// Matches one opcode
    Opcode {
        /// The opcode
        opcode: Opcode,
    },
    /// Matches any of several opcodes
    AnyOf {
        /// The accepted opcodes
        opcodes: Vec<Opcode>,
    },
    /// Matches an instruction carrying a literal, optionally restricted to one opcode
    Literal {
        /// Required opcode, if any
        #[serde(default)]
        opcode: Option<Opcode>,
        /// Literal value
        value: i64,
    },
    /// Matches an instruction whose type/field/method reference renders as `target`
    Reference {
        /// Required opcode, if any
        #[serde(default)]
        opcode: Option<Opcode>,
        /// Reference text, e.g. `Lio/reactivex/Single;->just(Ljava/lang/Object;)Lio/reactivex/Single;`
        target: String,
    },
}

impl InstructionMatcher {
    /// Tests one instruction.
    #[must_use]
    pub fn matches(&self, insn: &Instruction) -> bool {
        let opcode_ok = |expected: &Option<Opcode>| expected.map_or(true, |op| op == insn.opcode());
        match self {
            InstructionMatcher::Any => true,
            InstructionMatcher::Opcode { opcode } => insn.opcode() == *opcode,
            InstructionMatcher::AnyOf { opcodes } => opcodes.contains(&insn.opcode()),
            InstructionMatcher::Literal { opcode, value } => {
                opcode_ok(opcode) && insn.literal() == Some(*value)
            }
            InstructionMatcher::Reference { opcode, target } => {
                opcode_ok(opcode) && insn.reference().as_deref() == Some(target.as_str())
            }
        }
    }
}

impl From<Opcode> for InstructionMatcher {
    fn from(opcode: Opcode) -> Self {
        InstructionMatcher::Opcode { opcode }
    }
}

/// One element of a pattern.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatternEntry {
    /// The instruction predicate
    #[serde(flatten)]
    pub matcher: InstructionMatcher,
    /// Position relative to the previous entry (ignored for the first entry)
    #[serde(default)]
    pub placement: Placement,
}

impl PatternEntry {
    /// An entry that must follow the previous one directly.
    #[must_use]
    pub fn adjacent(matcher: impl Into<InstructionMatcher>) -> Self {
        PatternEntry {
            matcher: matcher.into(),
            placement: Placement::Adjacent,
        }
    }

    /// An entry that may appear anywhere after the previous one.
    #[must_use]
    pub fn anywhere(matcher: impl Into<InstructionMatcher>) -> Self {
        PatternEntry {
            matcher: matcher.into(),
            placement: Placement::Anywhere,
        }
    }
}

/// Location of a pattern match inside a method body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatternMatch {
    /// Index of the instruction matched by the first entry
    pub start: usize,
    /// Index of the instruction matched by the last entry (inclusive)
    pub end: usize,
    /// Index matched by every entry, in pattern order
    pub indices: Vec<usize>,
}

/// Finds the leftmost match of `pattern` in `instructions`.
///
/// Returns `None` for an empty pattern or when no match exists.
#[must_use]
pub fn find_pattern(pattern: &[PatternEntry], instructions: &[Instruction]) -> Option<PatternMatch> {
    if pattern.is_empty() || pattern.len() > instructions.len() {
        return None;
    }

    let mut search = Search {
        pattern,
        instructions,
        dead: vec![false; (pattern.len() + 1) * (instructions.len() + 1)],
        indices: Vec::with_capacity(pattern.len()),
    };

    for start in 0..instructions.len() {
        if pattern[0].matcher.matches(&instructions[start]) {
            search.indices.push(start);
            if search.complete(1, start + 1) {
                let indices = search.indices;
                return Some(PatternMatch {
                    start,
                    end: indices.last().copied().unwrap_or(start),
                    indices,
                });
            }
            search.indices.pop();
        }
    }
    None
}

struct Search<'a> {
    pattern: &'a [PatternEntry],
    instructions: &'a [Instruction],
    /// (entry, position) states known not to complete
    dead: Vec<bool>,
    indices: Vec<usize>,
}

impl Search<'_> {
    fn complete(&mut self, entry: usize, position: usize) -> bool {
        if entry == self.pattern.len() {
            return true;
        }
        let state = entry * (self.instructions.len() + 1) + position;
        if self.dead[state] {
            return false;
        }

        let current = &self.pattern[entry];
        let last = match current.placement {
            Placement::Adjacent => position.saturating_add(1).min(self.instructions.len()),
            Placement::Anywhere => self.instructions.len(),
        };
        for candidate in position..last {
            if current.matcher.matches(&self.instructions[candidate]) {
                self.indices.push(candidate);
                if self.complete(entry + 1, candidate + 1) {
                    return true;
                }
                self.indices.pop();
            }
        }

        self.dead[state] = true;
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{model::listing::parse_instruction, Result};

    fn body(lines: &[&str]) -> Result<Vec<Instruction>> {
        lines.iter().map(|l| parse_instruction(l)).collect()
    }

    #[test]
    fn test_adjacent_pattern() -> Result<()> {
        let insns = body(&[
            "const/4 v0, 0x0",
            "invoke-static {v0}, Lio/reactivex/Single;->just(Ljava/lang/Object;)Lio/reactivex/Single;",
            "move-result-object p0",
            "return-object p0",
        ])?;
        let pattern = [
            PatternEntry::adjacent(Opcode::InvokeStatic),
            PatternEntry::adjacent(Opcode::MoveResultObject),
            PatternEntry::adjacent(Opcode::ReturnObject),
        ];
        let found = find_pattern(&pattern, &insns);
        assert_eq!(
            found,
            Some(PatternMatch {
                start: 1,
                end: 3,
                indices: vec![1, 2, 3]
            })
        );
        Ok(())
    }

    #[test]
    fn test_backtracking_finds_later_start() -> Result<()> {
        // the first const/4 is followed by nop, so the match must start at the second one
        let insns = body(&["const/4 v0, 0x1", "nop", "const/4 v0, 0x1", "return v0"])?;
        let pattern = [
            PatternEntry::adjacent(InstructionMatcher::Literal {
                opcode: Some(Opcode::Const4),
                value: 1,
            }),
            PatternEntry::adjacent(Opcode::Return),
        ];
        assert_eq!(find_pattern(&pattern, &insns).map(|m| m.start), Some(2));
        Ok(())
    }

    #[test]
    fn test_anywhere_backtracks_over_entries() -> Result<()> {
        let insns = body(&[
            "nop",
            "const/4 v0, 0x0",
            "nop",
            "const/4 v0, 0x1",
            "return v0",
        ])?;
        let pattern = [
            PatternEntry::adjacent(Opcode::Nop),
            PatternEntry::anywhere(Opcode::Const4),
            PatternEntry::adjacent(Opcode::Return),
        ];
        let found = find_pattern(&pattern, &insns).map(|m| m.indices);
        assert_eq!(found, Some(vec![0, 3, 4]));
        Ok(())
    }

    #[test]
    fn test_no_match() -> Result<()> {
        let insns = body(&["nop", "return-void"])?;
        assert!(find_pattern(&[PatternEntry::adjacent(Opcode::Throw)], &insns).is_none());
        assert!(find_pattern(&[], &insns).is_none());
        Ok(())
    }

    #[test]
    fn test_reference_matcher() -> Result<()> {
        let insn = parse_instruction(
            "sget-object p2, Lcom/example/Action$Declined;->INSTANCE:Lcom/example/Action$Declined;",
        )?;
        let matcher = InstructionMatcher::Reference {
            opcode: Some(Opcode::SgetObject),
            target: "Lcom/example/Action$Declined;->INSTANCE:Lcom/example/Action$Declined;"
                .to_string(),
        };
        assert!(matcher.matches(&insn));
        Ok(())
    }

    #[test]
    fn test_matcher_json() -> Result<()> {
        let entry: PatternEntry =
            serde_json::from_str(r#"{"match": "opcode", "opcode": "if-eqz", "placement": "anywhere"}"#)?;
        assert_eq!(entry, PatternEntry::anywhere(Opcode::IfEqz));
        Ok(())
    }
}
