//! Normalized instruction model.
//!
//! Every opcode the normalizer accepts maps to one [`Op`] variant with typed
//! operands. Labels are already resolved to instruction indices and nested
//! sequences to [`IseqId`]s. The `*_branch` variants at the end of [`Op`] are
//! fused idioms produced by [`crate::fusion`]; the front end never emits them.

use crate::iseq::IseqId;
use std::fmt;

/// Condition tested by a branch instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BranchKind {
    /// Jump when the value is truthy
    If,
    /// Jump when the value is falsy
    Unless,
    /// Jump when the value is nil
    Nil,
}

/// Branch operand: what is tested and where to jump.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BranchOp {
    pub kind: BranchKind,
    pub target: usize,
}

/// A local variable slot, `level` frames out from the current one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LocalRef {
    pub idx: usize,
    pub level: usize,
}

/// Call-site descriptor of `send`-like instructions.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CallInfo {
    pub mid: String,
    /// Positional argument count as written at the call site (keywords excluded).
    pub argc: usize,
    pub flag: u32,
    /// Names of keyword arguments passed as individual stack slots.
    pub kw_arg: Vec<String>,
}

impl CallInfo {
    pub const FLAG_ARGS_SPLAT: u32 = 1 << 0;
    pub const FLAG_ARGS_BLOCKARG: u32 = 1 << 1;
    pub const FLAG_FCALL: u32 = 1 << 2;
    pub const FLAG_VCALL: u32 = 1 << 3;
    pub const FLAG_ARGS_SIMPLE: u32 = 1 << 4;
    pub const FLAG_KWARG: u32 = 1 << 6;
    pub const FLAG_KW_SPLAT: u32 = 1 << 7;

    pub fn has_splat(&self) -> bool {
        self.flag & Self::FLAG_ARGS_SPLAT != 0
    }

    pub fn has_block_arg(&self) -> bool {
        self.flag & Self::FLAG_ARGS_BLOCKARG != 0
    }

    /// Receiver-less call (`foo()` or `foo`): private methods are allowed.
    pub fn is_fcall(&self) -> bool {
        self.flag & (Self::FLAG_FCALL | Self::FLAG_VCALL) != 0
    }

    pub fn has_kw_splat(&self) -> bool {
        self.flag & Self::FLAG_KW_SPLAT != 0
    }

    /// Number of stack slots consumed by arguments, receiver excluded.
    pub fn stack_arity(&self) -> usize {
        self.argc + self.kw_arg.len() + usize::from(self.has_block_arg())
    }
}

/// Literal operand value.
#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Nil,
    True,
    False,
    Int(i64),
    Float(f64),
    Str(String),
    Sym(String),
    Array(Vec<Literal>),
    Hash(Vec<(Literal, Literal)>),
    Range {
        begin: Box<Literal>,
        end: Box<Literal>,
        exclusive: bool,
    },
    Regexp(String),
}

impl Eq for Literal {}

impl std::hash::Hash for Literal {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            Literal::Nil | Literal::True | Literal::False => {}
            Literal::Int(v) => v.hash(state),
            Literal::Float(v) => v.to_bits().hash(state),
            Literal::Str(s) | Literal::Sym(s) | Literal::Regexp(s) => s.hash(state),
            Literal::Array(elems) => elems.hash(state),
            Literal::Hash(pairs) => pairs.hash(state),
            Literal::Range {
                begin,
                end,
                exclusive,
            } => {
                begin.hash(state);
                end.hash(state);
                exclusive.hash(state);
            }
        }
    }
}

/// Operand of `putspecialobject`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SpecialObject {
    VmCore,
    CBase,
    ConstBase,
}

/// Kind of non-local exit performed by `throw`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ThrowKind {
    None,
    Return,
    Break,
    Next,
    Retry,
    Redo,
    Raise,
    Throw,
}

impl ThrowKind {
    pub fn from_state(state: i64) -> Option<Self> {
        Some(match state & 0xff {
            0 => ThrowKind::None,
            1 => ThrowKind::Return,
            2 => ThrowKind::Break,
            3 => ThrowKind::Next,
            4 => ThrowKind::Retry,
            5 => ThrowKind::Redo,
            6 => ThrowKind::Raise,
            7 => ThrowKind::Throw,
            _ => return None,
        })
    }
}

/// One normalized operation.
#[derive(Debug, Clone, PartialEq)]
pub enum Op {
    /// Canonical call-entry point after default-argument initialization
    BodyStart,
    Nop,

    PutNil,
    PutSelf,
    PutObject(Literal),
    PutString(String),
    PutSpecialObject(SpecialObject),
    DupArray(Literal),
    DupHash(Literal),
    NewArray(usize),
    NewArrayKwSplat(usize),
    NewHash(usize),
    NewRange { exclusive: bool },
    ConcatStrings(usize),
    ToString,
    ObjToString(CallInfo),
    AnyToString,
    FreezeString,
    ToRegexp(usize),
    Intern,

    DefineMethod { mid: String, body: IseqId },
    DefineSMethod { mid: String, body: IseqId },
    DefineClass { name: String, body: IseqId, flags: u32 },

    Send { call: CallInfo, block: Option<IseqId> },
    InvokeBlock(CallInfo),
    InvokeSuper { call: CallInfo, block: Option<IseqId> },
    Leave,
    Throw(ThrowKind),
    Once(IseqId),

    Branch(BranchOp),
    Jump(usize),

    GetLocal(LocalRef),
    SetLocal(LocalRef),
    GetInstanceVariable(String),
    SetInstanceVariable(String),
    GetClassVariable(String),
    SetClassVariable(String),
    GetGlobal(String),
    SetGlobal(String),
    GetConstant(String),
    SetConstant(String),
    GetSpecial { key: i64, kind: i64 },
    SetSpecial(i64),

    Dup,
    DupN(usize),
    Pop,
    Swap,
    Reverse(usize),
    TopN(usize),
    SetN(usize),
    AdjustStack(usize),

    Defined,
    CheckMatch(u32),
    CheckKeyword { bits: usize, idx: usize },
    CheckType(u32),
    SplatArray,
    ExpandArray { num: usize, flag: u32 },
    ConcatArray,

    GetLocalBranch { local: LocalRef, branch: BranchOp },
    GetLocalDupBranch { local: LocalRef, branch: BranchOp },
    DupBranch(BranchOp),
    DupSetLocalBranch { local: LocalRef, branch: BranchOp },
    GetLocalCheckMatchBranch { local: LocalRef, branch: BranchOp },
    RecvGetLocalSendBranch {
        local: LocalRef,
        call: CallInfo,
        block: Option<IseqId>,
        branch: BranchOp,
    },
    ArgGetLocalSendBranch {
        local: LocalRef,
        call: CallInfo,
        block: Option<IseqId>,
        branch: BranchOp,
    },
    SendBranch {
        call: CallInfo,
        block: Option<IseqId>,
        branch: BranchOp,
    },
}

impl Op {
    /// Opcode name as it appears in raw input (fused ops use their own names).
    pub fn name(&self) -> &'static str {
        match self {
            Op::BodyStart => "_iseq_body_start",
            Op::Nop => "nop",
            Op::PutNil => "putnil",
            Op::PutSelf => "putself",
            Op::PutObject(_) => "putobject",
            Op::PutString(_) => "putstring",
            Op::PutSpecialObject(_) => "putspecialobject",
            Op::DupArray(_) => "duparray",
            Op::DupHash(_) => "duphash",
            Op::NewArray(_) => "newarray",
            Op::NewArrayKwSplat(_) => "newarraykwsplat",
            Op::NewHash(_) => "newhash",
            Op::NewRange { .. } => "newrange",
            Op::ConcatStrings(_) => "concatstrings",
            Op::ToString => "tostring",
            Op::ObjToString(_) => "objtostring",
            Op::AnyToString => "anytostring",
            Op::FreezeString => "freezestring",
            Op::ToRegexp(_) => "toregexp",
            Op::Intern => "intern",
            Op::DefineMethod { .. } => "definemethod",
            Op::DefineSMethod { .. } => "definesmethod",
            Op::DefineClass { .. } => "defineclass",
            Op::Send { .. } => "send",
            Op::InvokeBlock(_) => "invokeblock",
            Op::InvokeSuper { .. } => "invokesuper",
            Op::Leave => "leave",
            Op::Throw(_) => "throw",
            Op::Once(_) => "once",
            Op::Branch(_) => "branch",
            Op::Jump(_) => "jump",
            Op::GetLocal(_) => "getlocal",
            Op::SetLocal(_) => "setlocal",
            Op::GetInstanceVariable(_) => "getinstancevariable",
            Op::SetInstanceVariable(_) => "setinstancevariable",
            Op::GetClassVariable(_) => "getclassvariable",
            Op::SetClassVariable(_) => "setclassvariable",
            Op::GetGlobal(_) => "getglobal",
            Op::SetGlobal(_) => "setglobal",
            Op::GetConstant(_) => "getconstant",
            Op::SetConstant(_) => "setconstant",
            Op::GetSpecial { .. } => "getspecial",
            Op::SetSpecial(_) => "setspecial",
            Op::Dup => "dup",
            Op::DupN(_) => "dupn",
            Op::Pop => "pop",
            Op::Swap => "swap",
            Op::Reverse(_) => "reverse",
            Op::TopN(_) => "topn",
            Op::SetN(_) => "setn",
            Op::AdjustStack(_) => "adjuststack",
            Op::Defined => "defined",
            Op::CheckMatch(_) => "checkmatch",
            Op::CheckKeyword { .. } => "checkkeyword",
            Op::CheckType(_) => "checktype",
            Op::SplatArray => "splatarray",
            Op::ExpandArray { .. } => "expandarray",
            Op::ConcatArray => "concatarray",
            Op::GetLocalBranch { .. } => "getlocal_branch",
            Op::GetLocalDupBranch { .. } => "getlocal_dup_branch",
            Op::DupBranch(_) => "dup_branch",
            Op::DupSetLocalBranch { .. } => "dup_setlocal_branch",
            Op::GetLocalCheckMatchBranch { .. } => "getlocal_checkmatch_branch",
            Op::RecvGetLocalSendBranch { .. } => "recv_getlocal_send_branch",
            Op::ArgGetLocalSendBranch { .. } => "arg_getlocal_send_branch",
            Op::SendBranch { .. } => "send_branch",
        }
    }

    /// Branch operand of plain and fused branch instructions.
    pub fn branch(&self) -> Option<BranchOp> {
        match self {
            Op::Branch(b) | Op::DupBranch(b) => Some(*b),
            Op::GetLocalBranch { branch, .. }
            | Op::GetLocalDupBranch { branch, .. }
            | Op::DupSetLocalBranch { branch, .. }
            | Op::GetLocalCheckMatchBranch { branch, .. }
            | Op::RecvGetLocalSendBranch { branch, .. }
            | Op::ArgGetLocalSendBranch { branch, .. }
            | Op::SendBranch { branch, .. } => Some(*branch),
            _ => None,
        }
    }

    /// Local read at the current frame (`getlocal x, 0`).
    pub fn frame_local(&self) -> Option<LocalRef> {
        match self {
            Op::GetLocal(l) if l.level == 0 => Some(*l),
            _ => None,
        }
    }
}

/// A normalized instruction with its source line.
#[derive(Debug, Clone, PartialEq)]
pub struct Insn {
    pub op: Op,
    pub line: u32,
}

impl Insn {
    pub fn new(op: Op, line: u32) -> Self {
        Self { op, line }
    }

    pub fn nop(line: u32) -> Self {
        Self { op: Op::Nop, line }
    }
}

impl fmt::Display for Insn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.op.name(), self.line)
    }
}
