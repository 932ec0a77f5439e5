//! Plain-text listing reader and writer.
//!
//! The listing is a smali subset and the serialisation of the in-memory model:
//!
//! ```text
//! .class public final Lcom/example/Foo;
//! .super Ljava/lang/Object;
//!
//! .method public requestAd(I)Z
//!     .registers 3
//!     const/4 v0, 0x1
//!     :done
//!     return v0
//! .end method
//!
//! .end class
//! ```
//!
//! `#` starts a comment outside string literals. Literals may be decimal or `0x` hex with an
//! optional sign. `.registers` gives the whole frame (locals plus parameters), `.locals` only
//! the local area. [`write`] output re-parses to an equal [`Corpus`].

use std::{collections::BTreeMap, fmt::Write as _};

use crate::{
    model::{
        corpus::{Class, Corpus},
        descriptor::{FieldRef, MethodDescriptor, MethodRef, TypeDescriptor},
        instruction::{Instruction, Operand, Register},
        method::{AccessFlags, Method, MethodId},
        opcode::Opcode,
    },
    Error, Result,
};

fn syntax(line: usize, message: impl Into<String>) -> Error {
    Error::ListingSyntax {
        line,
        message: message.into(),
    }
}

/// Parses a single instruction in listing syntax, e.g. `invoke-static {v0}, La;->b(I)V`.
///
/// # Errors
///
/// Returns [`crate::Error::ListingSyntax`] (reported at line 1) if the text is not a valid
/// instruction.
pub fn parse_instruction(text: &str) -> Result<Instruction> {
    parse_instruction_line(strip_comment(text).trim(), 1)
}

struct PendingMethod {
    id: MethodId,
    flags: AccessFlags,
    header_line: usize,
    registers: Option<u16>,
    locals: Option<u16>,
    instructions: Vec<Instruction>,
    labels: BTreeMap<String, usize>,
    pending_labels: Vec<(String, usize)>,
}

impl PendingMethod {
    fn finish(self, end_line: usize) -> Result<Method> {
        if let Some((label, line)) = self.pending_labels.first() {
            return Err(syntax(*line, format!("Label :{label} is not followed by an instruction")));
        }

        let probe = Method::new(self.id.clone(), self.flags);
        if !probe.has_body() {
            if !self.instructions.is_empty() {
                return Err(syntax(
                    self.header_line,
                    format!("Method {} is abstract or native but has code", self.id),
                ));
            }
            return Ok(probe);
        }

        let params = probe.parameter_registers();
        let locals = match (self.registers, self.locals) {
            (Some(_), Some(_)) => {
                return Err(syntax(end_line, "Both .registers and .locals given"));
            }
            (Some(registers), None) => registers.checked_sub(params).ok_or_else(|| {
                syntax(
                    self.header_line,
                    format!("{registers} registers can not hold {params} parameter registers"),
                )
            })?,
            (None, Some(locals)) => locals,
            (None, None) => 0,
        };

        Method::with_body(self.id, self.flags, locals, self.instructions, self.labels)
    }
}

/// Parses listing text into a corpus.
///
/// # Errors
///
/// Returns [`crate::Error::ListingSyntax`] with a one-based line number for syntax errors and
/// [`crate::Error::CorpusIntegrity`] if a parsed method body is inconsistent.
pub fn parse(text: &str) -> Result<Corpus> {
    let mut corpus = Corpus::new();
    let mut class: Option<Class> = None;
    let mut method: Option<PendingMethod> = None;

    for (index, raw) in text.lines().enumerate() {
        let line_no = index + 1;
        let line = strip_comment(raw).trim();
        if line.is_empty() {
            continue;
        }

        if let Some(pending) = method.as_mut() {
            if line == ".end method" {
                let finished = method
                    .take()
                    .ok_or_else(|| syntax(line_no, "Unexpected .end method"))?
                    .finish(line_no)?;
                let owner = class
                    .as_mut()
                    .ok_or_else(|| syntax(line_no, "Method outside of class"))?;
                owner
                    .add_method(finished)
                    .map_err(|e| syntax(line_no, e.to_string()))?;
            } else if let Some(count) = line.strip_prefix(".registers") {
                pending.registers = Some(parse_count(count, line_no)?);
            } else if let Some(count) = line.strip_prefix(".locals") {
                pending.locals = Some(parse_count(count, line_no)?);
            } else if let Some(label) = line.strip_prefix(':') {
                let label = parse_label_name(label, line_no)?;
                let index = pending.instructions.len();
                if pending.labels.insert(label.to_string(), index).is_some() {
                    return Err(syntax(line_no, format!("Duplicate label :{label}")));
                }
                pending.pending_labels.push((label.to_string(), line_no));
            } else if line.starts_with('.') {
                return Err(syntax(line_no, format!("Unexpected directive in method: {line}")));
            } else {
                pending
                    .instructions
                    .push(parse_instruction_line(line, line_no)?);
                pending.pending_labels.clear();
            }
            continue;
        }

        if let Some(rest) = line.strip_prefix(".class") {
            if class.is_some() {
                return Err(syntax(line_no, "Nested .class (missing .end class)"));
            }
            let (flags, name) = parse_header(rest, line_no)?;
            let name = TypeDescriptor::parse(name).map_err(|e| syntax(line_no, e.to_string()))?;
            class = Some(Class::new(name, flags, None));
        } else if let Some(rest) = line.strip_prefix(".super") {
            let current = class
                .take()
                .ok_or_else(|| syntax(line_no, ".super outside of class"))?;
            if current.superclass().is_some() || !current.methods().is_empty() {
                return Err(syntax(line_no, "Misplaced .super"));
            }
            let superclass =
                TypeDescriptor::parse(rest.trim()).map_err(|e| syntax(line_no, e.to_string()))?;
            class = Some(Class::new(
                current.name().clone(),
                current.flags(),
                Some(superclass),
            ));
        } else if let Some(rest) = line.strip_prefix(".method") {
            let owner = class
                .as_ref()
                .ok_or_else(|| syntax(line_no, ".method outside of class"))?;
            let (flags, signature) = parse_header(rest, line_no)?;
            let paren = signature
                .find('(')
                .filter(|p| *p > 0)
                .ok_or_else(|| syntax(line_no, format!("Invalid method signature {signature}")))?;
            let descriptor = MethodDescriptor::parse(&signature[paren..])
                .map_err(|e| syntax(line_no, e.to_string()))?;
            method = Some(PendingMethod {
                id: MethodId::new(owner.name().clone(), &signature[..paren], descriptor),
                flags,
                header_line: line_no,
                registers: None,
                locals: None,
                instructions: Vec::new(),
                labels: BTreeMap::new(),
                pending_labels: Vec::new(),
            });
        } else if line == ".end class" {
            let finished = class
                .take()
                .ok_or_else(|| syntax(line_no, "Unexpected .end class"))?;
            corpus
                .add_class(finished)
                .map_err(|e| syntax(line_no, e.to_string()))?;
        } else {
            return Err(syntax(line_no, format!("Unexpected line: {line}")));
        }
    }

    let last_line = text.lines().count();
    if method.is_some() {
        return Err(syntax(last_line, "Missing .end method"));
    }
    if class.is_some() {
        return Err(syntax(last_line, "Missing .end class"));
    }
    Ok(corpus)
}

/// Renders a corpus as listing text.
#[must_use]
pub fn write(corpus: &Corpus) -> String {
    let mut out = String::new();
    for (i, class) in corpus.classes().iter().enumerate() {
        if i > 0 {
            out.push('\n');
        }
        let _ = writeln!(out, ".class {}", with_flags(class.flags(), class.name().as_str()));
        if let Some(superclass) = class.superclass() {
            let _ = writeln!(out, ".super {superclass}");
        }
        for method in class.methods() {
            out.push('\n');
            write_method(&mut out, method);
        }
        out.push_str("\n.end class\n");
    }
    out
}

fn write_method(out: &mut String, method: &Method) {
    let signature = format!("{}{}", method.name(), method.descriptor());
    let _ = writeln!(out, ".method {}", with_flags(method.flags(), &signature));
    if method.has_body() {
        let _ = writeln!(out, "    .registers {}", method.registers());
    }
    for (index, insn) in method.instructions().iter().enumerate() {
        for label in method.labels_at(index) {
            let _ = writeln!(out, "    :{label}");
        }
        let _ = writeln!(out, "    {insn}");
    }
    out.push_str(".end method\n");
}

fn with_flags(flags: AccessFlags, name: &str) -> String {
    let mut parts = flags.keywords();
    parts.push(name);
    parts.join(" ")
}

fn strip_comment(line: &str) -> &str {
    let mut in_string = false;
    let mut escaped = false;
    for (i, c) in line.char_indices() {
        match c {
            _ if escaped => escaped = false,
            '\\' if in_string => escaped = true,
            '"' => in_string = !in_string,
            '#' if !in_string => return &line[..i],
            _ => {}
        }
    }
    line
}

fn parse_count(text: &str, line: usize) -> Result<u16> {
    text.trim()
        .parse::<u16>()
        .map_err(|_| syntax(line, format!("Invalid register count '{}'", text.trim())))
}

fn parse_label_name(text: &str, line: usize) -> Result<&str> {
    let valid = !text.is_empty()
        && text
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '$' | '-'));
    if valid {
        Ok(text)
    } else {
        Err(syntax(line, format!("Invalid label name ':{text}'")))
    }
}

fn parse_header(rest: &str, line: usize) -> Result<(AccessFlags, &str)> {
    let mut tokens: Vec<&str> = rest.split_whitespace().collect();
    let name = tokens
        .pop()
        .ok_or_else(|| syntax(line, "Missing name in declaration"))?;
    let mut flags = AccessFlags::empty();
    for token in tokens {
        flags |= AccessFlags::from_keyword(token)
            .ok_or_else(|| syntax(line, format!("Unknown access flag '{token}'")))?;
    }
    Ok((flags, name))
}

fn parse_instruction_line(line: &str, line_no: usize) -> Result<Instruction> {
    let (mnemonic, rest) = match line.split_once(char::is_whitespace) {
        Some((mnemonic, rest)) => (mnemonic, rest.trim()),
        None => (line, ""),
    };
    let opcode = Opcode::from_mnemonic(mnemonic).map_err(|e| syntax(line_no, e.to_string()))?;

    let mut operands = Vec::new();
    if !rest.is_empty() {
        for token in split_operands(rest, line_no)? {
            operands.push(parse_operand(token, line_no)?);
        }
    }

    Instruction::new(opcode, operands).map_err(|e| syntax(line_no, e.to_string()))
}

fn split_operands(text: &str, line: usize) -> Result<Vec<&str>> {
    let mut parts = Vec::new();
    let mut start = 0;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (i, c) in text.char_indices() {
        match c {
            _ if escaped => escaped = false,
            '\\' if in_string => escaped = true,
            '"' => in_string = !in_string,
            '{' if !in_string => depth += 1,
            '}' if !in_string => {
                depth = depth
                    .checked_sub(1)
                    .ok_or_else(|| syntax(line, "Unbalanced '}'"))?;
            }
            ',' if !in_string && depth == 0 => {
                parts.push(text[start..i].trim());
                start = i + 1;
            }
            _ => {}
        }
    }
    if in_string {
        return Err(syntax(line, "Unterminated string literal"));
    }
    if depth != 0 {
        return Err(syntax(line, "Unbalanced '{'"));
    }
    parts.push(text[start..].trim());

    if parts.iter().any(|p| p.is_empty()) {
        return Err(syntax(line, "Empty operand"));
    }
    Ok(parts)
}

fn is_register(token: &str) -> bool {
    let mut chars = token.chars();
    matches!(chars.next(), Some('v' | 'p'))
        && token.len() > 1
        && chars.all(|c| c.is_ascii_digit())
}

fn parse_operand(token: &str, line: usize) -> Result<Operand> {
    if let Some(body) = token.strip_prefix('"') {
        let body = body
            .strip_suffix('"')
            .ok_or_else(|| syntax(line, "Unterminated string literal"))?;
        return Ok(Operand::String(unescape(body, line)?));
    }

    if let Some(label) = token.strip_prefix(':') {
        return Ok(Operand::Label(parse_label_name(label, line)?.to_string()));
    }

    if let Some(inner) = token.strip_prefix('{') {
        let inner = inner
            .strip_suffix('}')
            .ok_or_else(|| syntax(line, "Unterminated list"))?
            .trim();
        let items: Vec<&str> = if inner.is_empty() {
            Vec::new()
        } else {
            inner.split(',').map(str::trim).collect()
        };

        if items.first().is_some_and(|item| item.starts_with(':')) {
            let labels = items
                .iter()
                .map(|item| {
                    let name = item
                        .strip_prefix(':')
                        .ok_or_else(|| syntax(line, format!("Expected label, found '{item}'")))?;
                    parse_label_name(name, line).map(str::to_string)
                })
                .collect::<Result<Vec<_>>>()?;
            return Ok(Operand::Labels(labels));
        }

        let registers = items
            .iter()
            .map(|item| Register::parse(item).map_err(|e| syntax(line, e.to_string())))
            .collect::<Result<Vec<_>>>()?;
        return Ok(Operand::RegisterList(registers));
    }

    if is_register(token) {
        return Register::parse(token)
            .map(Operand::Register)
            .map_err(|e| syntax(line, e.to_string()));
    }

    if token.starts_with('-') || token.starts_with(|c: char| c.is_ascii_digit()) {
        return parse_literal(token, line).map(Operand::Literal);
    }

    let reference = if token.contains("->") {
        if token.contains('(') {
            MethodRef::parse(token).map(Operand::Method)
        } else {
            FieldRef::parse(token).map(Operand::Field)
        }
    } else {
        TypeDescriptor::parse(token).map(Operand::Type)
    };
    reference.map_err(|e| syntax(line, e.to_string()))
}

fn parse_literal(token: &str, line: usize) -> Result<i64> {
    let invalid = || syntax(line, format!("Invalid literal '{token}'"));

    let (negative, body) = match token.strip_prefix('-') {
        Some(body) => (true, body),
        None => (false, token),
    };
    let body = body.strip_suffix(|c: char| c == 'L' || c == 'l').unwrap_or(body);
    let magnitude = match body.strip_prefix("0x").or_else(|| body.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16).map_err(|_| invalid())?,
        None => body.parse::<u64>().map_err(|_| invalid())?,
    };

    if negative {
        if magnitude > i64::MIN.unsigned_abs() {
            return Err(invalid());
        }
        Ok(0i64.wrapping_sub_unsigned(magnitude))
    } else {
        // Full 64-bit patterns (e.g. double bits) are accepted as their two's complement value.
        Ok(magnitude as i64)
    }
}

fn unescape(body: &str, line: usize) -> Result<String> {
    let mut out = String::with_capacity(body.len());
    let mut chars = body.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('"') => out.push('"'),
            Some('\\') => out.push('\\'),
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('r') => out.push('\r'),
            other => {
                return Err(syntax(
                    line,
                    format!("Invalid escape sequence '\\{}'", other.unwrap_or(' ')),
                ))
            }
        }
    }
    Ok(out)
}
