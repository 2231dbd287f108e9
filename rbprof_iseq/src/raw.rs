//! Raw instruction sequences as produced by the front-end compiler.
//!
//! A raw sequence is plain data: an ordered body of labels and
//! `[opcode, [operands...], line]` triples, the formal-argument layout,
//! and the exception handler table. Operands stay untyped JSON values until
//! [`crate::normalize`] decodes them against the opcode table.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Syntactic kind of an instruction sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IseqKind {
    Top,
    Main,
    Method,
    Block,
    Class,
    Rescue,
    Ensure,
    Eval,
}

impl IseqKind {
    /// Whether callers bind actual arguments into this sequence's locals.
    pub fn takes_arguments(self) -> bool {
        matches!(self, IseqKind::Method | IseqKind::Block)
    }
}

/// One element of a raw body: a label marker or an instruction triple.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RawEntry {
    Label(String),
    Insn(String, Vec<Value>, u32),
}

/// Keyword parameter as listed in the raw argument layout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawKeyword {
    pub name: String,
    #[serde(default)]
    pub required: bool,
    /// Literal default, when the compiler could fold it.
    #[serde(default)]
    pub default: Option<Value>,
    /// Default evaluated by `checkkeyword` code in the body.
    #[serde(default)]
    pub computed: bool,
}

/// Formal-argument layout descriptor.
///
/// Slot order follows the compiler: required-before, optional, rest,
/// required-after, keywords, keyword-rest, block.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RawArgs {
    pub lead_num: usize,
    /// Entry labels; `opt[k]` is where execution starts when `k` optional
    /// arguments were supplied. Empty when there are no optionals.
    pub opt: Vec<String>,
    pub rest_start: Option<usize>,
    pub post_start: Option<usize>,
    pub post_num: usize,
    pub keyword: Vec<RawKeyword>,
    pub kwrest: Option<usize>,
    pub block_start: Option<usize>,
    pub ambiguous_param0: bool,
}

/// One row of the raw exception handler table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawCatchEntry {
    pub kind: String,
    #[serde(default)]
    pub iseq: Option<Box<RawIseq>>,
    pub start: String,
    pub end: String,
    pub cont: String,
    #[serde(default)]
    pub sp: usize,
}

/// Raw compiled instruction sequence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawIseq {
    pub name: String,
    #[serde(default)]
    pub path: String,
    pub kind: IseqKind,
    #[serde(default)]
    pub start_line: u32,
    #[serde(default)]
    pub locals: Vec<String>,
    #[serde(default)]
    pub args: RawArgs,
    #[serde(default)]
    pub catch_table: Vec<RawCatchEntry>,
    pub body: Vec<RawEntry>,
}

impl RawIseq {
    /// Parses a raw sequence from its JSON form.
    pub fn from_json_str(src: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(src)
    }
}
