use thiserror::Error;

macro_rules! malformed_error {
    // Single string version
    ($msg:expr) => {
        crate::Error::Malformed {
            message: $msg.to_string(),
            file: file!(),
            line: line!(),
        }
    };

    // Format string with arguments version
    ($fmt:expr, $($arg:tt)*) => {
        crate::Error::Malformed {
            message: format!($fmt, $($arg)*),
            file: file!(),
            line: line!(),
        }
    };
}

/// The generic Error type, which provides coverage for all errors this library can potentially
/// return.
///
/// Every variant carries enough context (fingerprint name, owner type, method identity) for an
/// operator to fix the signature or the corpus mismatch that caused it. None of them are
/// recoverable by retrying: the corpus does not change behind the caller's back.
///
/// # Error Categories
///
/// ## Resolution Errors
/// - [`Error::ResolutionFailure`] - A fingerprint matched no method
/// - [`Error::AmbiguousFingerprint`] - A fingerprint matched several methods under a strict policy
/// - [`Error::ClassNotFound`] - A named owner type is not part of the corpus
/// - [`Error::MethodNotFound`] - A named method does not exist on its owner type
///
/// ## Label Errors
/// - [`Error::UndefinedLabel`] - An inserted block branches to an undeclared label
/// - [`Error::DuplicateLabel`] - An inserted block redeclares a label already in use
///
/// ## Patch Errors
/// - [`Error::ReturnSpecMismatch`] - A return literal does not fit the method's return type
/// - [`Error::CorpusIntegrity`] - Post-edit validation found a dangling label or bad offset
/// - [`Error::MethodFinalized`] - Attempted to edit a method after finalization
/// - [`Error::NoMethodBody`] - Attempted to edit an abstract or native method
///
/// ## Model and Parsing Errors
/// - [`Error::InvalidMnemonic`], [`Error::WrongOperand`], [`Error::LiteralOutOfRange`]
/// - [`Error::InvalidDescriptor`], [`Error::ListingSyntax`], [`Error::Malformed`]
///
/// # Examples
///
/// ```rust,no_run
/// use dexpatch::{Corpus, Error};
///
/// match Corpus::from_path("classes.smali") {
///     Ok(corpus) => println!("{} classes", corpus.classes().len()),
///     Err(Error::ListingSyntax { line, message }) => eprintln!("line {line}: {message}"),
///     Err(e) => eprintln!("Other error: {e}"),
/// }
/// ```
#[derive(Error, Debug)]
pub enum Error {
    // Resolution errors
    /// A fingerprint did not resolve to any method of the corpus.
    ///
    /// Raised by callers that require a match (see
    /// [`crate::fingerprint::Resolver::require`]); the resolver itself reports absence as `None`.
    #[error("Failed to resolve fingerprint '{fingerprint}'")]
    ResolutionFailure {
        /// Name of the unresolved fingerprint
        fingerprint: String,
    },

    /// A fingerprint matched more than one method and the resolver was configured to reject
    /// ambiguous matches.
    #[error("Fingerprint '{fingerprint}' is ambiguous - matched {}", candidates.join(", "))]
    AmbiguousFingerprint {
        /// Name of the ambiguous fingerprint
        fingerprint: String,
        /// Every matching method, in corpus order
        candidates: Vec<String>,
    },

    /// The requested owner type does not exist in the corpus.
    #[error("Class {class} not found in corpus")]
    ClassNotFound {
        /// Descriptor of the missing class
        class: String,
    },

    /// The requested method name does not exist on the owner type.
    #[error("Method '{method}' not found on {class}")]
    MethodNotFound {
        /// Descriptor of the owner class
        class: String,
        /// Name of the missing method
        method: String,
    },

    // Label errors
    /// A branch inside an inserted block references a label that is neither declared by the
    /// block, passed as an external label, nor already present in the method.
    #[error("Undefined label ':{label}' in {method}")]
    UndefinedLabel {
        /// The method being edited
        method: String,
        /// The unresolved label name
        label: String,
    },

    /// A label was declared twice in the same method.
    #[error("Duplicate label ':{label}' in {method}")]
    DuplicateLabel {
        /// The method being edited
        method: String,
        /// The duplicated label name
        label: String,
    },

    // Patch errors
    /// The requested trivial return value is incompatible with the method's return type.
    #[error("Return spec {spec} does not fit return type {return_type} of {method}")]
    ReturnSpecMismatch {
        /// The method being neutralized
        method: String,
        /// The declared return type descriptor
        return_type: String,
        /// The rendered return spec
        spec: String,
    },

    /// Validation of a method found dangling labels, out-of-bounds label indices, branch
    /// displacements that cannot be encoded, or registers outside the frame.
    ///
    /// For edits produced by this crate this indicates an engine bug; the edit is not committed.
    #[error("Integrity check failed for {method}: {message}")]
    CorpusIntegrity {
        /// The offending method
        method: String,
        /// What is wrong with it
        message: String,
    },

    /// The method was finalized and can no longer be edited.
    #[error("Method {0} is finalized and can not be modified")]
    MethodFinalized(String),

    /// The method has no instructions to edit (abstract or native).
    #[error("Method {0} has no body")]
    NoMethodBody(String),

    /// An instruction index was outside the method body.
    #[error("Instruction index {index} out of bounds for {method} ({len} instructions)")]
    IndexOutOfBounds {
        /// The method being accessed
        method: String,
        /// The requested index
        index: usize,
        /// The number of instructions in the method
        len: usize,
    },

    /// A parameter register does not exist in the method's frame.
    #[error("Register {register} is out of range for {method}")]
    RegisterOutOfRange {
        /// The method being edited
        method: String,
        /// The rendered register
        register: String,
    },

    // Model and parsing errors
    /// The mnemonic does not name a supported opcode.
    #[error("Invalid mnemonic - {0}")]
    InvalidMnemonic(String),

    /// The operands do not match the shape required by the opcode.
    #[error("Wrong operands for {mnemonic}: expected {expected}")]
    WrongOperand {
        /// The opcode mnemonic
        mnemonic: &'static str,
        /// Description of the expected operand layout
        expected: &'static str,
    },

    /// A literal does not fit the immediate width of the opcode.
    #[error("Literal {value} does not fit {mnemonic}")]
    LiteralOutOfRange {
        /// The opcode mnemonic
        mnemonic: &'static str,
        /// The offending literal
        value: i64,
    },

    /// A type or method descriptor could not be parsed.
    #[error("Invalid descriptor - {0}")]
    InvalidDescriptor(String),

    /// A return spec could not be parsed.
    #[error("Invalid return spec - {0}")]
    InvalidReturnSpec(String),

    /// A listing could not be parsed.
    #[error("Listing syntax error at line {line}: {message}")]
    ListingSyntax {
        /// One-based line number
        line: usize,
        /// Description of the problem
        message: String,
    },

    /// Internal structure could not be processed.
    #[error("Malformed - {file}:{line}: {message}")]
    Malformed {
        /// The message to be printed for the Malformed error
        message: String,
        /// The source file in which this error occured
        file: &'static str,
        /// The source line in which this error occured
        line: u32,
    },

    /// File I/O error.
    #[error("{0}")]
    FileError(#[from] std::io::Error),

    /// A patch plan could not be deserialized.
    #[error("Invalid patch plan - {0}")]
    PlanError(#[from] serde_json::Error),
}
