//! Type-profiling abstract interpreter.
//!
//! Runs a compiled instruction sequence over abstract values instead of
//! concrete ones and reports, for every method the program defines, the
//! argument and return types it was observed with. Declared signatures for
//! library classes are imported up front; everything else is inferred.
//!
//! ```no_run
//! use rbprof::{analyze, AnalysisConfig, RawIseq};
//!
//! # fn main() -> rbprof::AnalysisResult<()> {
//! let raw: RawIseq = serde_json::from_str(&std::fs::read_to_string("app.iseq.json")?)?;
//! let report = analyze(&raw, AnalysisConfig::default())?;
//! print!("{}", report.render());
//! # Ok(())
//! # }
//! ```

// The library reports through `tracing`; it never prints.
#![deny(clippy::print_stderr)]
#![deny(clippy::print_stdout)]

// Core modules
pub mod config;
pub mod diagnostics;
pub mod error;
pub mod intern;

// Type lattice and class model
pub mod classes;
pub mod lattice;

// Declared signatures and the call protocol
pub mod decl;
pub mod dispatch;

// Interpreter and its result
pub mod abstract_interp;
pub mod export;

pub use abstract_interp::Analyzer;
pub use config::AnalysisConfig;
pub use decl::DeclarationSet;
pub use diagnostics::{Diagnostic, DiagnosticKind, Severity};
pub use error::{AnalysisError, AnalysisResult, DeclError};
pub use export::{
    AnalysisReport, BlockRecord, ClassRecord, Failure, KeywordRecord, MethodKind, MethodRecord,
    SignatureRecord, VarRecord,
};
pub use rbprof_iseq::RawIseq;

/// Analyzes one program with the bundled core declarations (unless `config`
/// disables them).
pub fn analyze(program: &RawIseq, config: AnalysisConfig) -> AnalysisResult<AnalysisReport> {
    let mut analyzer = Analyzer::new(config)?;
    analyzer.add_program(program)?;
    Ok(analyzer.run())
}
