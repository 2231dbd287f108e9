//! Method definitions and the calling convention they share.
//!
//! Every callable the class table can hold is one [`MethodDef`] variant, and
//! [`MethodDef::do_send`] is the single entry point the interpreter uses:
//! it receives the receiver member, the actual arguments, the caller's
//! execution point and env, and the continuation to resume with the result.

use super::arguments::ActualArguments;
use super::builtins::{self, Builtin};
use super::signature::Overload;
use crate::abstract_interp::continuation::Continuation;
use crate::abstract_interp::env::Env;
use crate::abstract_interp::state::{CRefId, ExecutionPoint};
use crate::abstract_interp::Analyzer;
use crate::lattice::{ClassId, TypeId};
use rbprof_iseq::IseqId;
use std::rc::Rc;

/// Body compiled from the analyzed program.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IseqMethod {
    pub iseq: IseqId,
    /// Lexical scope the body runs under.
    pub cref: CRefId,
    pub public: bool,
}

/// Method known only by its declared overloads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypedMethod {
    pub overloads: Rc<Vec<Overload>>,
    pub public: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttrKind {
    Reader,
    Writer,
}

/// `attr_reader`/`attr_writer` accessor over an instance variable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttrMethod {
    /// Backing variable, with its `@`.
    pub ivar: String,
    pub kind: AttrKind,
    pub public: bool,
}

/// `alias new old`: forwards to `def` under the name `orig`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AliasMethod {
    pub orig: String,
    pub def: Box<MethodDef>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CustomMethod {
    pub builtin: Builtin,
    pub public: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MethodDef {
    Iseq(IseqMethod),
    Typed(TypedMethod),
    Attr(AttrMethod),
    Alias(AliasMethod),
    Custom(CustomMethod),
}

impl MethodDef {
    pub fn custom(builtin: Builtin) -> Self {
        MethodDef::Custom(CustomMethod {
            builtin,
            public: true,
        })
    }

    pub fn typed(overloads: Vec<Overload>) -> Self {
        MethodDef::Typed(TypedMethod {
            overloads: Rc::new(overloads),
            public: true,
        })
    }

    pub fn public(&self) -> bool {
        match self {
            MethodDef::Iseq(m) => m.public,
            MethodDef::Typed(m) => m.public,
            MethodDef::Attr(m) => m.public,
            MethodDef::Alias(m) => m.def.public(),
            MethodDef::Custom(m) => m.public,
        }
    }

    pub fn set_public(&mut self, public: bool) {
        match self {
            MethodDef::Iseq(m) => m.public = public,
            MethodDef::Typed(m) => m.public = public,
            MethodDef::Attr(m) => m.public = public,
            MethodDef::Alias(m) => m.def.set_public(public),
            MethodDef::Custom(m) => m.public = public,
        }
    }

    /// Defined by the analyzed program (as opposed to declared or built in).
    pub fn is_user_defined(&self) -> bool {
        matches!(self, MethodDef::Iseq(_) | MethodDef::Attr(_) | MethodDef::Alias(_))
    }

    /// Dispatches one call to this definition. The result reaches the caller
    /// through `inv.ctn`, zero or more times.
    pub(crate) fn do_send(&self, analyzer: &mut Analyzer, inv: Invocation) {
        match self {
            MethodDef::Iseq(m) => analyzer.call_iseq_method(m, inv),
            MethodDef::Typed(m) => analyzer.call_typed_method(m, inv),
            MethodDef::Attr(m) => match m.kind {
                AttrKind::Reader => analyzer.call_attr_reader(&m.ivar, inv),
                AttrKind::Writer => analyzer.call_attr_writer(&m.ivar, inv),
            },
            MethodDef::Alias(m) => {
                let inv = Invocation {
                    mid: m.orig.clone(),
                    ..inv
                };
                m.def.do_send(analyzer, inv)
            }
            MethodDef::Custom(m) => builtins::call(m.builtin, analyzer, inv),
        }
    }
}

/// One dispatch of a call site to one receiver member.
#[derive(Debug, Clone)]
pub struct Invocation {
    /// Receiver member, globalized.
    pub recv: TypeId,
    /// The same member as the caller's frame sees it (container handles
    /// still point at the caller's allocation sites).
    pub recv_local: TypeId,
    pub mid: String,
    pub args: ActualArguments,
    /// Class (and side) the definition was found on.
    pub owner: (ClassId, bool),
    pub fcall: bool,
    pub ep: ExecutionPoint,
    /// Caller env with receiver and arguments popped.
    pub env: Env,
    pub ctn: Continuation,
}
