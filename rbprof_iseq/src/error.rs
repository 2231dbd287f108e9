//! Normalization error types

use thiserror::Error;

/// Fatal errors raised while normalizing a raw instruction sequence.
///
/// The normalizer has no silent-ignore path: any of these aborts the
/// sequence (and its parents) and is reported as a configuration failure.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum NormalizeError {
    /// Opcode name not known to the normalizer
    #[error("unknown opcode `{opcode}` in {iseq} at line {line}")]
    UnknownOpcode {
        opcode: String,
        iseq: String,
        line: u32,
    },

    /// Operand missing or of the wrong shape
    #[error("malformed operand #{index} of `{opcode}` in {iseq}: {detail}")]
    MalformedOperand {
        opcode: String,
        index: usize,
        iseq: String,
        detail: String,
    },

    /// Jump or handler label that never appears in the body
    #[error("unknown label `{label}` in {iseq}")]
    UnknownLabel { label: String, iseq: String },

    /// Label defined twice in the same body
    #[error("duplicate label `{label}` in {iseq}")]
    DuplicateLabel { label: String, iseq: String },

    /// Exception handler table entry that cannot be expanded
    #[error("malformed exception handler table in {iseq}: {detail}")]
    MalformedCatchTable { iseq: String, detail: String },

    /// Argument layout inconsistent with the local table
    #[error("malformed argument layout in {iseq}: {detail}")]
    MalformedArgs { iseq: String, detail: String },

    /// Keyword initialization code not followed by the expected branch
    #[error("malformed keyword initialization in {iseq} at instruction {index}")]
    MalformedKeywordInit { iseq: String, index: usize },
}

impl NormalizeError {
    /// Name of the instruction sequence the error was found in.
    pub fn iseq(&self) -> &str {
        match self {
            NormalizeError::UnknownOpcode { iseq, .. } => iseq,
            NormalizeError::MalformedOperand { iseq, .. } => iseq,
            NormalizeError::UnknownLabel { iseq, .. } => iseq,
            NormalizeError::DuplicateLabel { iseq, .. } => iseq,
            NormalizeError::MalformedCatchTable { iseq, .. } => iseq,
            NormalizeError::MalformedArgs { iseq, .. } => iseq,
            NormalizeError::MalformedKeywordInit { iseq, .. } => iseq,
        }
    }
}

/// Result alias for normalization.
pub type NormalizeResult<T> = Result<T, NormalizeError>;
