//! Identities the interpreter memoizes on.
//!
//! All of them are interned in [`StateTables`]; the interpreter passes the
//! small handles around and resolves them only when it needs the structure.

use crate::intern::{intern_key, InternTable};
use crate::lattice::{BlockId, ClassId, SiteId, TypeId};
use rbprof_iseq::IseqId;

intern_key!(
    /// Handle of an interned [`Context`].
    ContextId
);
intern_key!(
    /// Handle of an interned [`ExecutionPoint`], used for outer-frame links.
    EpId
);
intern_key!(
    /// Handle of an interned [`CRef`].
    CRefId
);

/// Lexical class scope: where constants resolve and methods get defined.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CRef {
    pub outer: Option<CRefId>,
    pub class: ClassId,
    /// Method bodies defined with `def self.m` run with `singleton` set.
    pub singleton: bool,
}

/// Static identity of one activation.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Context {
    /// A sequence run under a lexical scope; `mid` is `None` for blocks and
    /// class bodies.
    Iseq {
        iseq: IseqId,
        cref: CRefId,
        mid: Option<String>,
    },
    /// Stands in for the block call made inside a declaration-typed method.
    Typed { caller: ExecutionPoint, mid: String },
}

impl Context {
    pub fn iseq(&self) -> Option<IseqId> {
        match self {
            Context::Iseq { iseq, .. } => Some(*iseq),
            Context::Typed { .. } => None,
        }
    }

    pub fn cref(&self) -> Option<CRefId> {
        match self {
            Context::Iseq { cref, .. } => Some(*cref),
            Context::Typed { .. } => None,
        }
    }

    pub fn mid(&self) -> Option<&str> {
        match self {
            Context::Iseq { mid, .. } => mid.as_deref(),
            Context::Typed { mid, .. } => Some(mid),
        }
    }
}

/// Program counter of the analysis: a position in a context, linked to the
/// frame that created the block (if this is a block frame).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ExecutionPoint {
    pub ctx: ContextId,
    pub pc: usize,
    pub outer: Option<EpId>,
}

impl ExecutionPoint {
    pub fn new(ctx: ContextId, pc: usize, outer: Option<EpId>) -> Self {
        Self { ctx, pc, outer }
    }

    pub fn next(self) -> Self {
        self.jump(self.pc + 1)
    }

    pub fn jump(self, pc: usize) -> Self {
        Self { pc, ..self }
    }
}

/// One step of the path that disambiguates an allocation site.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SiteStep {
    Arg(usize),
    Index(usize),
    Rest,
    Key(TypeId),
    Tag(&'static str),
}

/// Where a container was first observed.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AllocSite {
    pub ep: ExecutionPoint,
    pub path: Vec<SiteStep>,
}

impl AllocSite {
    pub fn new(ep: ExecutionPoint) -> Self {
        Self { ep, path: Vec::new() }
    }

    pub fn tagged(ep: ExecutionPoint, tag: &'static str) -> Self {
        Self {
            ep,
            path: vec![SiteStep::Tag(tag)],
        }
    }

    pub fn child(&self, step: SiteStep) -> Self {
        let mut path = self.path.clone();
        path.push(step);
        Self { ep: self.ep, path }
    }
}

/// What a `Proc` type denotes.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum BlockBody {
    /// Literal block; `outer` is the send that created it.
    Iseq { iseq: IseqId, outer: ExecutionPoint },
    /// `&:name`
    Symbol(String),
}

/// Interners for every identity above.
#[derive(Debug, Default)]
pub struct StateTables {
    pub crefs: InternTable<CRef, CRefId>,
    pub contexts: InternTable<Context, ContextId>,
    pub eps: InternTable<ExecutionPoint, EpId>,
    pub sites: InternTable<AllocSite, SiteId>,
    pub blocks: InternTable<BlockBody, BlockId>,
}

impl StateTables {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ctx(&self, id: ContextId) -> &Context {
        self.contexts.get(id)
    }

    pub fn cref(&self, id: CRefId) -> &CRef {
        self.crefs.get(id)
    }

    pub fn ep(&self, id: EpId) -> ExecutionPoint {
        *self.eps.get(id)
    }

    pub fn block(&self, id: BlockId) -> &BlockBody {
        self.blocks.get(id)
    }

    pub fn outer(&self, ep: ExecutionPoint) -> Option<ExecutionPoint> {
        ep.outer.map(|id| self.ep(id))
    }

    /// Frame `level` steps out along the block nesting chain.
    pub fn outer_n(&self, ep: ExecutionPoint, level: usize) -> Option<ExecutionPoint> {
        let mut cur = ep;
        for _ in 0..level {
            cur = self.outer(cur)?;
        }
        Some(cur)
    }

    /// The method/top frame that lexically encloses a block frame.
    pub fn outermost(&self, ep: ExecutionPoint) -> Option<ExecutionPoint> {
        let mut cur = self.outer(ep)?;
        while let Some(next) = self.outer(cur) {
            cur = next;
        }
        Some(cur)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outer_chain() {
        let mut tables = StateTables::new();
        let cref = tables.crefs.intern(CRef {
            outer: None,
            class: ClassId::OBJECT,
            singleton: false,
        });
        let ctx = tables.contexts.intern(Context::Iseq {
            iseq: IseqId(0),
            cref,
            mid: None,
        });
        let top = ExecutionPoint::new(ctx, 3, None);
        let top_id = tables.eps.intern(top);
        let block = ExecutionPoint::new(ctx, 0, Some(top_id));
        let block_id = tables.eps.intern(block);
        let inner = ExecutionPoint::new(ctx, 1, Some(block_id));

        assert_eq!(tables.outermost(inner), Some(top));
        assert_eq!(tables.outer_n(inner, 1), Some(block));
        assert_eq!(tables.outer_n(inner, 2), Some(top));
        assert_eq!(tables.outer_n(inner, 3), None);
        assert_eq!(tables.outermost(top), None);
        assert_eq!(top.next().pc, 4);
    }
}
