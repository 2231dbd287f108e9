//! Method signatures, observed and declared.

use crate::lattice::{TypeArena, TypeId};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeywordSig {
    pub name: String,
    pub required: bool,
    pub ty: TypeId,
}

/// Parameter types of one method, in binding order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodSignature {
    pub lead: Vec<TypeId>,
    pub opt: Vec<TypeId>,
    pub rest: Option<TypeId>,
    pub post: Vec<TypeId>,
    pub keywords: Vec<KeywordSig>,
    pub kwrest: Option<TypeId>,
    /// Type of the block parameter slot (`nil` when no block was passed).
    pub block: TypeId,
}

impl Default for MethodSignature {
    fn default() -> Self {
        Self {
            lead: Vec::new(),
            opt: Vec::new(),
            rest: None,
            post: Vec::new(),
            keywords: Vec::new(),
            kwrest: None,
            block: TypeId::NIL,
        }
    }
}

fn union_vec(arena: &mut TypeArena, a: &[TypeId], b: &[TypeId]) -> Vec<TypeId> {
    if a.len() != b.len() {
        return a.to_vec();
    }
    a.iter().zip(b).map(|(&x, &y)| arena.union(x, y)).collect()
}

fn union_opt(arena: &mut TypeArena, a: Option<TypeId>, b: Option<TypeId>) -> Option<TypeId> {
    match (a, b) {
        (Some(x), Some(y)) => Some(arena.union(x, y)),
        (x, y) => x.or(y),
    }
}

impl MethodSignature {
    pub fn positional_count(&self) -> (usize, Option<usize>) {
        let min = self.lead.len() + self.post.len();
        let max = self.rest.is_none().then_some(min + self.opt.len());
        (min, max)
    }

    /// Position-wise union. Signatures observed for one body always share
    /// their shape; on a mismatch `self`'s shape wins.
    pub fn merge(&self, other: &MethodSignature, arena: &mut TypeArena) -> MethodSignature {
        let keywords = if self.keywords.len() == other.keywords.len() {
            self.keywords
                .iter()
                .zip(&other.keywords)
                .map(|(a, b)| KeywordSig {
                    name: a.name.clone(),
                    required: a.required,
                    ty: arena.union(a.ty, b.ty),
                })
                .collect()
        } else {
            self.keywords.clone()
        };
        MethodSignature {
            lead: union_vec(arena, &self.lead, &other.lead),
            opt: union_vec(arena, &self.opt, &other.opt),
            rest: union_opt(arena, self.rest, other.rest),
            post: union_vec(arena, &self.post, &other.post),
            keywords,
            kwrest: union_opt(arena, self.kwrest, other.kwrest),
            block: arena.union(self.block, other.block),
        }
    }
}

/// Declared block parameter of an overload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockParam {
    pub required: bool,
    /// Positional parameters the method yields.
    pub args: Vec<TypeId>,
    /// Declared block return.
    pub ret: TypeId,
}

/// One declared overload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Overload {
    pub sig: MethodSignature,
    pub block: Option<BlockParam>,
    pub ret: TypeId,
}
