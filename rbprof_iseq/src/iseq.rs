//! Normalized instruction sequences and the table that owns them.

use crate::insn::{Insn, Literal};
use crate::raw::IseqKind;

/// Handle of a normalized sequence inside an [`IseqTable`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct IseqId(pub u32);

impl IseqId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// How a keyword parameter gets its value when the caller omits it.
#[derive(Debug, Clone, PartialEq)]
pub enum KeywordDefault {
    Required,
    Literal(Literal),
    /// Evaluated by `checkkeyword`-guarded code in the body
    Computed,
}

#[derive(Debug, Clone, PartialEq)]
pub struct KeywordParam {
    pub name: String,
    /// Local slot holding the parameter
    pub slot: usize,
    pub default: KeywordDefault,
}

/// Formal-argument layout with labels resolved to instruction indices.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ArgLayout {
    pub lead_num: usize,
    /// `opt[k]` is the entry index when `k` optional arguments are supplied.
    pub opt: Vec<usize>,
    pub rest_start: Option<usize>,
    pub post_start: Option<usize>,
    pub post_num: usize,
    pub keywords: Vec<KeywordParam>,
    pub kwrest: Option<usize>,
    pub block_start: Option<usize>,
    pub ambiguous_param0: bool,
}

impl ArgLayout {
    /// Number of optional positional parameters.
    pub fn opt_num(&self) -> usize {
        self.opt.len().saturating_sub(1)
    }

    /// Minimum and maximum positional argument counts (`None` = unbounded).
    pub fn positional_range(&self) -> (usize, Option<usize>) {
        let min = self.lead_num + self.post_num;
        let max = if self.rest_start.is_some() {
            None
        } else {
            Some(min + self.opt_num())
        };
        (min, max)
    }

    pub fn has_keywords(&self) -> bool {
        !self.keywords.is_empty() || self.kwrest.is_some()
    }
}

/// Kind of an exception handler table entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CatchKind {
    Rescue,
    Ensure,
    Retry,
    Break,
    Next,
    Redo,
}

impl CatchKind {
    pub fn parse(name: &str) -> Option<Self> {
        Some(match name {
            "rescue" => CatchKind::Rescue,
            "ensure" => CatchKind::Ensure,
            "retry" => CatchKind::Retry,
            "break" => CatchKind::Break,
            "next" => CatchKind::Next,
            "redo" => CatchKind::Redo,
            _ => return None,
        })
    }

    /// Entries whose handler body is run as a pseudo-call.
    pub fn has_handler(self) -> bool {
        matches!(self, CatchKind::Rescue | CatchKind::Ensure)
    }
}

/// Handler entry covering one instruction index.
#[derive(Debug, Clone, PartialEq)]
pub struct CatchEntry {
    pub kind: CatchKind,
    pub handler: Option<IseqId>,
    pub cont: usize,
    pub stack_depth: usize,
}

/// A normalized method/block/class body.
#[derive(Debug, Clone, PartialEq)]
pub struct Iseq {
    pub id: IseqId,
    pub name: String,
    pub path: String,
    pub kind: IseqKind,
    pub start_line: u32,
    pub locals: Vec<String>,
    pub args: ArgLayout,
    pub insns: Vec<Insn>,
    /// Handler entries per instruction index (`catch_table[pc]`)
    pub catch_table: Vec<Vec<CatchEntry>>,
}

impl Iseq {
    pub fn local_count(&self) -> usize {
        self.locals.len()
    }

    /// Handler entries covering `pc`.
    pub fn handlers_at(&self, pc: usize) -> &[CatchEntry] {
        self.catch_table.get(pc).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Index of the body-start marker, if the sequence has one.
    pub fn body_start(&self) -> Option<usize> {
        self.insns
            .iter()
            .position(|insn| matches!(insn.op, crate::insn::Op::BodyStart))
    }
}

/// Owner of every normalized sequence of a program.
///
/// Sequences refer to nested sequences by [`IseqId`]; ids are dense indices
/// into this table and stay valid for its lifetime.
#[derive(Debug, Default)]
pub struct IseqTable {
    iseqs: Vec<Iseq>,
}

impl IseqTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next_id(&self) -> IseqId {
        IseqId(self.iseqs.len() as u32)
    }

    pub(crate) fn push(&mut self, mut iseq: Iseq) -> IseqId {
        let id = self.next_id();
        iseq.id = id;
        self.iseqs.push(iseq);
        id
    }

    pub fn get(&self, id: IseqId) -> Option<&Iseq> {
        self.iseqs.get(id.index())
    }

    pub fn len(&self) -> usize {
        self.iseqs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.iseqs.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Iseq> {
        self.iseqs.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_positional_range() {
        let layout = ArgLayout {
            lead_num: 2,
            opt: vec![3, 5],
            post_start: Some(4),
            post_num: 1,
            ..ArgLayout::default()
        };
        assert_eq!(layout.opt_num(), 1);
        assert_eq!(layout.positional_range(), (3, Some(4)));

        let with_rest = ArgLayout {
            rest_start: Some(3),
            ..layout
        };
        assert_eq!(with_rest.positional_range(), (3, None));
    }

    #[test]
    fn test_catch_kind_parse() {
        assert_eq!(CatchKind::parse("rescue"), Some(CatchKind::Rescue));
        assert!(CatchKind::Ensure.has_handler());
        assert!(!CatchKind::Retry.has_handler());
        assert_eq!(CatchKind::parse("finally"), None);
    }
}
