//! Fatal errors of an analysis run.
//!
//! Only the *Configuration* class of problems is an `Err`: malformed input
//! sequences, unreadable declarations or settings. Everything the analyzed
//! program does wrong is reported as a [`crate::Diagnostic`] instead.

use rbprof_iseq::NormalizeError;
use thiserror::Error;

/// Declaration import failures.
#[derive(Debug, Error)]
pub enum DeclError {
    #[error("unknown class `{0}` in declaration")]
    UnknownClass(String),

    #[error("`{name}` is declared as a {declared} but already defined as a {actual}")]
    KindMismatch {
        name: String,
        declared: &'static str,
        actual: &'static str,
    },

    #[error("method `{owner}#{name}` has no overloads")]
    EmptyOverloads { owner: String, name: String },

    #[error("superclass of `{name}` is declared as `{superclass}`, which is a module")]
    ModuleSuperclass { name: String, superclass: String },

    #[error("malformed declaration set: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error(transparent)]
    Normalize(#[from] NormalizeError),

    #[error(transparent)]
    Declaration(#[from] DeclError),

    #[error("invalid settings: {0}")]
    Config(#[from] toml::de::Error),

    #[error("malformed instruction sequence: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Stack-shape inconsistency in one instruction sequence. The sequence stops
/// being interpreted; the run continues.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InterpError {
    #[error("stack underflow in `{op}`")]
    StackUnderflow { op: &'static str },

    #[error("local slot {idx} out of range")]
    LocalOutOfRange { idx: usize },

    #[error("`leave` with {depth} values on the stack")]
    UnbalancedLeave { depth: usize },

    #[error("stack depth mismatch when joining at pc {pc}")]
    JoinMismatch { pc: usize },

    #[error("control fell off the end at pc {pc}")]
    FellOffEnd { pc: usize },
}

pub type AnalysisResult<T> = Result<T, AnalysisError>;
