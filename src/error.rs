//! Error taxonomy.
//!
//! Only [`ClassFormatError`] aborts a decompilation. Everything that goes wrong
//! inside a single method is recorded as a [`Warning`] on the resulting
//! compilation unit and the method degrades locally.

use std::fmt;

use thiserror::Error;

/// Fatal, class-level failure.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum DecompileError {
    #[error(transparent)]
    ClassFormat(#[from] ClassFormatError),
}

/// Malformed header or internally inconsistent constant pool.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum ClassFormatError {
    #[error("not a class file: bad magic number")]
    BadMagic,
    #[error("unsupported class file version {major}.{minor}")]
    UnsupportedVersion { major: u16, minor: u16 },
    #[error("class file truncated")]
    Truncated,
    #[error("malformed class file at offset {offset}: {reason}")]
    Malformed { offset: u64, reason: String },
    #[error("constant #{index} referenced from {from} is {problem}")]
    BadConstantReference {
        from: String,
        index: u16,
        problem: &'static str,
    },
    #[error("{count} unexpected bytes after the end of the class file")]
    TrailingBytes { count: usize },
}

/// Errors raised when appending to or reading from a constant pool.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum ConstantPoolError {
    #[error("constant pool is frozen")]
    Frozen,
    #[error("constant pool is full")]
    Overflow,
    #[error("invalid utf8 constant {0:?}")]
    InvalidUtf8(String),
    #[error("constant #{index} is out of bounds (pool size {len})")]
    OutOfBounds { index: u16, len: usize },
    #[error("constant #{index} is not a {expected}")]
    UnexpectedKind { index: u16, expected: &'static str },
}

/// Method-scoped decoding failure.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum UnsupportedBytecode {
    #[error("unknown opcode 0x{opcode:02x} at offset {offset}")]
    UnknownOpcode { offset: u32, opcode: u8 },
    #[error("instruction at offset {offset} is truncated")]
    Truncated { offset: u32 },
    #[error("instruction at offset {offset} has invalid operands")]
    MalformedInstruction { offset: u32 },
    #[error("branch at offset {offset} targets {target}, which is not an instruction start")]
    BadBranchTarget { offset: u32, target: u32 },
    #[error("exception range [{start_pc}, {end_pc}) -> {handler_pc} is invalid")]
    BadExceptionRange {
        start_pc: u16,
        end_pc: u16,
        handler_pc: u16,
    },
    #[error("malformed {name} attribute")]
    MalformedAttribute { name: String },
    #[error("instruction at offset {offset} references bad constant #{index}")]
    BadConstantIndex { offset: u32, index: u16 },
    #[error("method has no code")]
    NoCode,
}

/// Category of a non-fatal condition.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum WarningKind {
    /// The method body was replaced by a placeholder.
    UnsupportedBytecode,
    /// Control flow fell back to labeled gotos or labeled loops.
    ReductionAmbiguity,
    /// A primitive type was left at its widest safe form.
    TypeInferenceUncertain,
}

/// A method-level condition attached to the compilation unit.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Warning {
    pub kind: WarningKind,
    /// `name` + descriptor of the method, e.g. `run()V`.
    pub method: String,
    pub message: String,
}

impl Warning {
    pub fn new(kind: WarningKind, method: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind,
            method: method.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for Warning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?} in {}: {}", self.kind, self.method, self.message)
    }
}
