//! Method dispatch protocol.
//!
//! - `signature`: observed and declared parameter/return types
//! - `arguments`: binding actual arguments to formals, overload matching
//! - `method`: the [`MethodDef`] variants and their shared `do_send`
//! - `builtins`: primitives that act on the analysis state

pub mod arguments;
pub mod builtins;
pub mod method;
pub mod signature;

pub use arguments::{bind_arguments, match_overload, ActualArguments, BindError, Binding, Keywords, Mismatch};
pub use builtins::Builtin;
pub use method::{AliasMethod, AttrKind, AttrMethod, CustomMethod, Invocation, IseqMethod, MethodDef, TypedMethod};
pub use signature::{BlockParam, KeywordSig, MethodSignature, Overload};
