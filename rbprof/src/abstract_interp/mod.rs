//! Flow-sensitive abstract interpretation over normalized sequences.
//!
//! - `state`: interned identities (contexts, execution points, sites, blocks)
//! - `env`: per-point machine state and its join
//! - `conditional`: branch routing and narrowing
//! - `continuation`: what a caller does with a callee's result
//! - `worklist`: ordered set of points to (re)interpret
//! - `engine`: the [`Analyzer`] that drives all of the above to a fixpoint

pub mod conditional;
pub mod continuation;
pub mod engine;
pub mod env;
pub mod state;
pub mod worklist;

pub use engine::Analyzer;
