//! Call continuations as data.
//!
//! A continuation says what the caller does with a callee's return type.
//! It is registered against the callee's context together with the caller's
//! execution point, and resumed once per return the callee produces.

use super::state::ContextId;
use crate::lattice::{Subst, TypeId};
use rbprof_iseq::BranchOp;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Continuation {
    /// Push the result and continue after the call.
    Push,
    /// Push the result and continue at `pc` in the caller's frame.
    PushAt(usize),
    /// Route the caller by the result's truthiness.
    Branch(BranchOp),
    /// Route by the result's truthiness with `local` narrowed to `member` on
    /// both edges.
    Narrow {
        local: usize,
        member: TypeId,
        branch: BranchOp,
    },
    /// Ignore the result and resume `then` with `value` (`Class#new` returns
    /// the allocated instance, not the result of `initialize`).
    Replace {
        value: TypeId,
        then: Box<Continuation>,
    },
    /// A block invoked for a declaration-typed method returned; its type
    /// refines the method's declared return.
    TypedBlock {
        dummy: ContextId,
        ret: TypeId,
        block_ret: TypeId,
        subst: Subst,
    },
}
