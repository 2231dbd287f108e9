//! Branch routing and narrowing.
//!
//! A branch test is evaluated per union member: each member either sends
//! control to the jump target, to the fall-through, or (for `untyped`) to
//! both. Narrowing splits the tested type by the edge its members take.

use crate::lattice::{truthiness, TypeArena, TypeId, Truthiness};
use rbprof_iseq::BranchKind;

/// Which successors of a branch are reachable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Edges {
    pub jump: bool,
    pub fall: bool,
}

impl Edges {
    pub const BOTH: Edges = Edges { jump: true, fall: true };

    fn or(self, other: Edges) -> Edges {
        Edges {
            jump: self.jump || other.jump,
            fall: self.fall || other.fall,
        }
    }
}

/// Edges taken by a single union member.
pub fn member_edges(arena: &TypeArena, kind: BranchKind, member: TypeId) -> Edges {
    let truth = truthiness(arena, member);
    if truth == Truthiness::Unknown {
        return Edges::BOTH;
    }
    let jump = match kind {
        BranchKind::If => truth == Truthiness::Truthy,
        BranchKind::Unless => truth == Truthiness::Falsy,
        BranchKind::Nil => member == TypeId::NIL,
    };
    Edges { jump, fall: !jump }
}

/// Edges taken by any member of `ty`; `bot` takes none.
pub fn branch_edges(arena: &TypeArena, kind: BranchKind, ty: TypeId) -> Edges {
    arena
        .members(ty)
        .into_iter()
        .fold(Edges::default(), |acc, m| acc.or(member_edges(arena, kind, m)))
}

/// Splits `ty` into the part reaching the jump target and the part falling
/// through. `None` marks an unreachable edge.
pub fn narrow(arena: &mut TypeArena, kind: BranchKind, ty: TypeId) -> (Option<TypeId>, Option<TypeId>) {
    let mut jump = Vec::new();
    let mut fall = Vec::new();
    for m in arena.members(ty) {
        let edges = member_edges(arena, kind, m);
        if edges.jump {
            jump.push(m);
        }
        if edges.fall {
            fall.push(m);
        }
    }
    let side = |arena: &mut TypeArena, members: Vec<TypeId>| {
        if members.is_empty() {
            None
        } else {
            Some(arena.union_all(members))
        }
    };
    let jump = side(arena, jump);
    let fall = side(arena, fall);
    (jump, fall)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lattice::ClassId;

    #[test]
    fn test_narrow_optional_on_truthy_edge() {
        let mut arena = TypeArena::default();
        let s = arena.instance(ClassId::STRING);
        let opt = arena.optional(s);
        let (jump, fall) = narrow(&mut arena, BranchKind::If, opt);
        assert_eq!(jump, Some(s));
        assert_eq!(fall, Some(TypeId::NIL));

        let (jump, fall) = narrow(&mut arena, BranchKind::Unless, opt);
        assert_eq!(jump, Some(TypeId::NIL));
        assert_eq!(fall, Some(s));
    }

    #[test]
    fn test_narrow_unchanged_without_falsy_members() {
        let mut arena = TypeArena::default();
        let i = arena.instance(ClassId::INTEGER);
        let s = arena.instance(ClassId::STRING);
        let is = arena.union(i, s);
        let (jump, fall) = narrow(&mut arena, BranchKind::If, is);
        assert_eq!(jump, Some(is));
        assert_eq!(fall, None);
    }

    #[test]
    fn test_branch_nil_keeps_false_on_fallthrough() {
        let mut arena = TypeArena::default();
        let ty = arena.union(TypeId::NIL, TypeId::FALSE);
        let (jump, fall) = narrow(&mut arena, BranchKind::Nil, ty);
        assert_eq!(jump, Some(TypeId::NIL));
        assert_eq!(fall, Some(TypeId::FALSE));
    }

    #[test]
    fn test_untyped_takes_both_edges_and_bottom_none() {
        let arena = TypeArena::default();
        assert_eq!(branch_edges(&arena, BranchKind::If, TypeId::ANY), Edges::BOTH);
        assert_eq!(branch_edges(&arena, BranchKind::If, TypeId::BOTTOM), Edges::default());
        assert_eq!(
            branch_edges(&arena, BranchKind::If, TypeId::BOOL),
            Edges::BOTH
        );
    }
}
