//! Type, method and field descriptors in Dalvik/JVM notation.
//!
//! Descriptors are kept in their textual form (`Ljava/lang/String;`, `(IZ)V`) because that is
//! what fingerprints, listings and patch plans exchange. Parsing validates the grammar once so
//! the rest of the crate can rely on well-formed values.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Value category of a type, used to pick return instructions and register widths.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    /// `V`
    Void,
    /// `Z`
    Boolean,
    /// `B`
    Byte,
    /// `S`
    Short,
    /// `C`
    Char,
    /// `I`
    Int,
    /// `J`
    Long,
    /// `F`
    Float,
    /// `D`
    Double,
    /// `L...;` or `[...`
    Reference,
}

/// A single, validated type descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TypeDescriptor(String);

impl TypeDescriptor {
    /// Parses a complete type descriptor.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::InvalidDescriptor`] if `text` is not exactly one type.
    pub fn parse(text: &str) -> Result<Self> {
        let (ty, end) = parse_type_at(text, 0)?;
        if end != text.len() {
            return Err(Error::InvalidDescriptor(text.to_string()));
        }
        Ok(ty)
    }

    /// The descriptor text.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The value category of this type.
    #[must_use]
    pub fn kind(&self) -> ValueKind {
        match self.0.as_bytes().first() {
            Some(b'V') => ValueKind::Void,
            Some(b'Z') => ValueKind::Boolean,
            Some(b'B') => ValueKind::Byte,
            Some(b'S') => ValueKind::Short,
            Some(b'C') => ValueKind::Char,
            Some(b'I') => ValueKind::Int,
            Some(b'J') => ValueKind::Long,
            Some(b'F') => ValueKind::Float,
            Some(b'D') => ValueKind::Double,
            _ => ValueKind::Reference,
        }
    }

    /// Number of registers a value of this type occupies.
    #[must_use]
    pub fn register_width(&self) -> u16 {
        match self.kind() {
            ValueKind::Void => 0,
            ValueKind::Long | ValueKind::Double => 2,
            _ => 1,
        }
    }
}

impl TryFrom<String> for TypeDescriptor {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        TypeDescriptor::parse(&value)
    }
}

impl From<TypeDescriptor> for String {
    fn from(value: TypeDescriptor) -> Self {
        value.0
    }
}

impl fmt::Display for TypeDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn parse_type_at(text: &str, start: usize) -> Result<(TypeDescriptor, usize)> {
    let bytes = text.as_bytes();
    let invalid = || Error::InvalidDescriptor(text.to_string());

    let mut pos = start;
    while bytes.get(pos) == Some(&b'[') {
        pos += 1;
    }

    let end = match bytes.get(pos) {
        Some(b'V') if pos == start => pos + 1,
        Some(b'Z' | b'B' | b'S' | b'C' | b'I' | b'J' | b'F' | b'D') => pos + 1,
        Some(b'L') => {
            let semi = text[pos..].find(';').ok_or_else(invalid)? + pos;
            if semi == pos + 1 {
                return Err(invalid());
            }
            semi + 1
        }
        _ => return Err(invalid()),
    };

    Ok((TypeDescriptor(text[start..end].to_string()), end))
}

/// A method prototype: parameter types and return type.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MethodDescriptor {
    /// Parameter types in declaration order
    pub parameters: Vec<TypeDescriptor>,
    /// Return type
    pub return_type: TypeDescriptor,
}

impl MethodDescriptor {
    /// Parses a prototype like `(Ljava/lang/String;I)Z`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::InvalidDescriptor`] on malformed input.
    pub fn parse(text: &str) -> Result<Self> {
        let invalid = || Error::InvalidDescriptor(text.to_string());
        if !text.starts_with('(') {
            return Err(invalid());
        }

        let close = text.find(')').ok_or_else(invalid)?;
        let mut parameters = Vec::new();
        let mut pos = 1;
        while pos < close {
            let (ty, next) = parse_type_at(&text[..close], pos)?;
            if ty.kind() == ValueKind::Void {
                return Err(invalid());
            }
            parameters.push(ty);
            pos = next;
        }

        let return_type = TypeDescriptor::parse(&text[close + 1..])?;
        Ok(MethodDescriptor {
            parameters,
            return_type,
        })
    }

    /// Number of registers the parameters occupy, excluding `this`.
    #[must_use]
    pub fn parameter_registers(&self) -> u16 {
        self.parameters.iter().map(TypeDescriptor::register_width).sum()
    }
}

impl fmt::Display for MethodDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("(")?;
        for param in &self.parameters {
            f.write_str(param.as_str())?;
        }
        write!(f, "){}", self.return_type)
    }
}

/// A reference to a method: `Lowner;->name(Params)Ret`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct MethodRef {
    /// Declaring type
    pub owner: TypeDescriptor,
    /// Method name
    pub name: String,
    /// Prototype
    pub descriptor: MethodDescriptor,
}

impl MethodRef {
    /// Parses a method reference.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::InvalidDescriptor`] on malformed input.
    pub fn parse(text: &str) -> Result<Self> {
        let invalid = || Error::InvalidDescriptor(text.to_string());
        let (owner, rest) = text.split_once("->").ok_or_else(invalid)?;
        let paren = rest.find('(').ok_or_else(invalid)?;
        if paren == 0 {
            return Err(invalid());
        }
        Ok(MethodRef {
            owner: TypeDescriptor::parse(owner)?,
            name: rest[..paren].to_string(),
            descriptor: MethodDescriptor::parse(&rest[paren..])?,
        })
    }
}

impl TryFrom<String> for MethodRef {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        MethodRef::parse(&value)
    }
}

impl From<MethodRef> for String {
    fn from(value: MethodRef) -> Self {
        value.to_string()
    }
}

impl fmt::Display for MethodRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}->{}{}", self.owner, self.name, self.descriptor)
    }
}

/// A reference to a field: `Lowner;->name:Type`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FieldRef {
    /// Declaring type
    pub owner: TypeDescriptor,
    /// Field name
    pub name: String,
    /// Field type
    pub field_type: TypeDescriptor,
}

impl FieldRef {
    /// Parses a field reference.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::InvalidDescriptor`] on malformed input.
    pub fn parse(text: &str) -> Result<Self> {
        let invalid = || Error::InvalidDescriptor(text.to_string());
        let (owner, rest) = text.split_once("->").ok_or_else(invalid)?;
        let (name, field_type) = rest.split_once(':').ok_or_else(invalid)?;
        if name.is_empty() {
            return Err(invalid());
        }
        Ok(FieldRef {
            owner: TypeDescriptor::parse(owner)?,
            name: name.to_string(),
            field_type: TypeDescriptor::parse(field_type)?,
        })
    }
}

impl fmt::Display for FieldRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}->{}:{}", self.owner, self.name, self.field_type)
    }
}
