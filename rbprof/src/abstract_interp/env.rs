//! Abstract machine state at one execution point.
//!
//! An [`Env`] holds the static frame facts, the local-variable and operand
//! stack types, and the element types of the containers allocated in the
//! frame. Container types on the stack are [`TypeKind::Local`] references into
//! `containers`; [`Env::globalize`] resolves them into self-contained types
//! whenever a type leaves the frame, and [`Env::localize`] does the reverse
//! when a type enters it.

use super::state::{AllocSite, SiteStep};
use crate::intern::InternTable;
use crate::lattice::{ArrayElems, ContainerKind, HashElems, SiteId, TypeArena, TypeId, TypeKind};
use rbprof_iseq::Literal;
use std::collections::BTreeMap;

/// Facts fixed for the whole activation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StaticEnv {
    pub recv: TypeId,
    pub block: TypeId,
    pub module_function: bool,
    /// Methods defined from here are public
    pub public: bool,
    /// Block frame without a live creating frame: outer locals read as `untyped`.
    pub orphan: bool,
}

impl StaticEnv {
    pub fn new(recv: TypeId, block: TypeId) -> Self {
        Self {
            recv,
            block,
            module_function: false,
            public: true,
            orphan: false,
        }
    }

    pub fn join(&self, other: &StaticEnv, arena: &mut TypeArena) -> StaticEnv {
        StaticEnv {
            recv: arena.union(self.recv, other.recv),
            block: arena.union(self.block, other.block),
            module_function: self.module_function && other.module_function,
            public: self.public && other.public,
            orphan: self.orphan && other.orphan,
        }
    }
}

/// Element types stored at an allocation site.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Elems {
    Array(ArrayElems),
    Hash(HashElems),
}

impl Elems {
    pub fn kind(&self) -> ContainerKind {
        match self {
            Elems::Array(_) => ContainerKind::Array,
            Elems::Hash(_) => ContainerKind::Hash,
        }
    }

    pub fn union(&self, other: &Elems, arena: &mut TypeArena) -> Elems {
        match (self, other) {
            (Elems::Array(a), Elems::Array(b)) => Elems::Array(arena.union_array_elems(a, b)),
            (Elems::Hash(a), Elems::Hash(b)) => Elems::Hash(arena.union_hash_elems(a, b)),
            _ => self.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Env {
    pub static_env: StaticEnv,
    pub locals: Vec<TypeId>,
    pub stack: Vec<TypeId>,
    pub containers: BTreeMap<SiteId, Elems>,
}

impl Env {
    pub fn new(static_env: StaticEnv, locals: Vec<TypeId>) -> Self {
        Self {
            static_env,
            locals,
            stack: Vec::new(),
            containers: BTreeMap::new(),
        }
    }

    pub fn push(&mut self, ty: TypeId) {
        self.stack.push(ty);
    }

    pub fn pop(&mut self) -> Option<TypeId> {
        self.stack.pop()
    }

    /// Pops `n` values, returned bottom-first.
    pub fn pop_n(&mut self, n: usize) -> Option<Vec<TypeId>> {
        let len = self.stack.len();
        if n > len {
            return None;
        }
        Some(self.stack.split_off(len - n))
    }

    /// `n`-th value from the top (0 = top).
    pub fn top(&self, n: usize) -> Option<TypeId> {
        let len = self.stack.len();
        if n >= len {
            return None;
        }
        Some(self.stack[len - 1 - n])
    }

    pub fn set_top(&mut self, n: usize, ty: TypeId) -> bool {
        let len = self.stack.len();
        if n >= len {
            return false;
        }
        self.stack[len - 1 - n] = ty;
        true
    }

    pub fn local(&self, idx: usize) -> Option<TypeId> {
        self.locals.get(idx).copied()
    }

    pub fn set_local(&mut self, idx: usize, ty: TypeId) -> bool {
        match self.locals.get_mut(idx) {
            Some(slot) => {
                *slot = ty;
                true
            }
            None => false,
        }
    }

    /// Least upper bound of two envs, or `None` when their shapes differ
    /// (which means the instruction sequence itself is inconsistent).
    pub fn join(&self, other: &Env, arena: &mut TypeArena) -> Option<Env> {
        if self.locals.len() != other.locals.len() || self.stack.len() != other.stack.len() {
            return None;
        }
        let static_env = self.static_env.join(&other.static_env, arena);
        let locals = self
            .locals
            .iter()
            .zip(&other.locals)
            .map(|(&a, &b)| arena.union(a, b))
            .collect();
        let stack = self
            .stack
            .iter()
            .zip(&other.stack)
            .map(|(&a, &b)| arena.union(a, b))
            .collect();
        let mut containers = self.containers.clone();
        for (site, elems) in &other.containers {
            let merged = match containers.get(site) {
                Some(prev) => prev.union(elems, arena),
                None => elems.clone(),
            };
            containers.insert(*site, merged);
        }
        Some(Env {
            static_env,
            locals,
            stack,
            containers,
        })
    }

    /// Self-contained version of `ty`: container references resolved up to
    /// `depth` levels, scalar literals widened to their class (symbols kept).
    pub fn globalize(&self, arena: &mut TypeArena, ty: TypeId, depth: usize) -> TypeId {
        match arena.kind(ty).clone() {
            TypeKind::Local { container, site } => {
                if depth == 0 {
                    return TypeId::ANY;
                }
                match self.containers.get(&site) {
                    Some(Elems::Array(elems)) => {
                        let lead = elems
                            .lead
                            .iter()
                            .map(|&t| self.globalize(arena, t, depth - 1))
                            .collect();
                        let rest = self.globalize(arena, elems.rest, depth - 1);
                        arena.array(ArrayElems { lead, rest })
                    }
                    Some(Elems::Hash(elems)) => {
                        let mut out = HashElems::default();
                        for (&k, &v) in &elems.entries {
                            let k = self.globalize(arena, k, depth - 1);
                            let v = self.globalize(arena, v, depth - 1);
                            out = arena.union_hash_elems(&out, &HashElems::single(k, v));
                        }
                        arena.hash(out)
                    }
                    None => match container {
                        ContainerKind::Array => arena.array(ArrayElems::homogeneous(TypeId::ANY)),
                        ContainerKind::Hash => arena.hash(HashElems::single(TypeId::ANY, TypeId::ANY)),
                    },
                }
            }
            TypeKind::Union(members) => {
                let members: Vec<_> = members
                    .into_iter()
                    .map(|m| self.globalize(arena, m, depth))
                    .collect();
                arena.union_all(members)
            }
            TypeKind::Literal(Literal::Sym(_)) => ty,
            TypeKind::Literal(lit) => {
                let class = crate::lattice::literal_class(&lit);
                arena.instance(class)
            }
            TypeKind::Array(_) | TypeKind::Hash(_) => crate::lattice::limit_size(arena, ty, depth),
            _ => ty,
        }
    }

    /// Frame-local version of a global `ty`: structural containers are
    /// stored at `site` (and sub-sites for nested containers) and replaced by
    /// references. Storing at an already-used site unions the element types.
    pub fn localize(
        &mut self,
        arena: &mut TypeArena,
        sites: &mut InternTable<AllocSite, SiteId>,
        ty: TypeId,
        site: &AllocSite,
        depth: usize,
    ) -> TypeId {
        match arena.kind(ty).clone() {
            TypeKind::Array(elems) => {
                if depth == 0 {
                    return TypeId::ANY;
                }
                let lead = elems
                    .lead
                    .iter()
                    .enumerate()
                    .map(|(i, &t)| self.localize(arena, sites, t, &site.child(SiteStep::Index(i)), depth - 1))
                    .collect();
                let rest = self.localize(arena, sites, elems.rest, &site.child(SiteStep::Rest), depth - 1);
                let id = sites.intern(site.clone());
                self.store(arena, id, Elems::Array(ArrayElems { lead, rest }));
                arena.local(ContainerKind::Array, id)
            }
            TypeKind::Hash(elems) => {
                if depth == 0 {
                    return TypeId::ANY;
                }
                let mut out = HashElems::default();
                for (&k, &v) in &elems.entries {
                    let v = self.localize(arena, sites, v, &site.child(SiteStep::Key(k)), depth - 1);
                    out = arena.union_hash_elems(&out, &HashElems::single(k, v));
                }
                let id = sites.intern(site.clone());
                self.store(arena, id, Elems::Hash(out));
                arena.local(ContainerKind::Hash, id)
            }
            TypeKind::Union(members) => {
                let members: Vec<_> = members
                    .into_iter()
                    .map(|m| self.localize(arena, sites, m, site, depth))
                    .collect();
                arena.union_all(members)
            }
            _ => ty,
        }
    }

    /// Unions `elems` into the container stored at `site`.
    pub fn store(&mut self, arena: &mut TypeArena, site: SiteId, elems: Elems) {
        let merged = match self.containers.get(&site) {
            Some(prev) => prev.union(&elems, arena),
            None => elems,
        };
        self.containers.insert(site, merged);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::abstract_interp::state::{CRef, Context, ExecutionPoint, StateTables};
    use crate::lattice::ClassId;
    use rbprof_iseq::IseqId;

    fn env(arena: &mut TypeArena, locals: Vec<TypeId>, stack: Vec<TypeId>) -> Env {
        let recv = arena.instance(ClassId::OBJECT);
        let mut env = Env::new(StaticEnv::new(recv, TypeId::NIL), locals);
        env.stack = stack;
        env
    }

    fn site(tables: &mut StateTables) -> AllocSite {
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
        AllocSite::new(ExecutionPoint::new(ctx, 0, None))
    }

    #[test]
    fn test_join_commutative_and_idempotent() {
        let mut arena = TypeArena::default();
        let i = arena.instance(ClassId::INTEGER);
        let s = arena.instance(ClassId::STRING);
        let a = env(&mut arena, vec![i, TypeId::NIL], vec![s]);
        let b = env(&mut arena, vec![s, TypeId::NIL], vec![TypeId::TRUE]);

        let ab = a.join(&b, &mut arena).unwrap();
        let ba = b.join(&a, &mut arena).unwrap();
        assert_eq!(ab, ba);
        assert_eq!(a.join(&a, &mut arena).unwrap(), a);
        assert_eq!(ab.join(&a, &mut arena).unwrap(), ab);
    }

    #[test]
    fn test_join_is_monotonic() {
        let mut arena = TypeArena::default();
        let i = arena.instance(ClassId::INTEGER);
        let s = arena.instance(ClassId::STRING);
        let a = env(&mut arena, vec![i], vec![]);
        let b = env(&mut arena, vec![s], vec![]);
        let joined = a.join(&b, &mut arena).unwrap();
        let members = arena.members(joined.locals[0]);
        assert!(members.contains(&i));
        assert!(members.contains(&s));
    }

    #[test]
    fn test_join_rejects_stack_mismatch() {
        let mut arena = TypeArena::default();
        let a = env(&mut arena, vec![], vec![TypeId::NIL]);
        let b = env(&mut arena, vec![], vec![]);
        assert!(a.join(&b, &mut arena).is_none());
    }

    #[test]
    fn test_join_flags_and() {
        let mut arena = TypeArena::default();
        let a = env(&mut arena, vec![], vec![]);
        let mut b = a.clone();
        b.static_env.public = false;
        assert!(!a.join(&b, &mut arena).unwrap().static_env.public);
    }

    #[test]
    fn test_localize_then_globalize() {
        let mut arena = TypeArena::default();
        let mut tables = StateTables::new();
        let site = site(&mut tables);
        let i = arena.instance(ClassId::INTEGER);
        let one = arena.literal(Literal::Int(1));
        let inner = arena.array(ArrayElems::tuple(vec![one]));
        let outer = arena.array(ArrayElems::tuple(vec![inner, i]));

        let mut e = env(&mut arena, vec![], vec![]);
        let local = e.localize(&mut arena, &mut tables.sites, outer, &site, 5);
        assert!(matches!(arena.kind(local), TypeKind::Local { container: ContainerKind::Array, .. }));
        assert_eq!(e.containers.len(), 2);

        let global = e.globalize(&mut arena, local, 5);
        let inner_global = arena.array(ArrayElems::tuple(vec![i]));
        let expected = arena.array(ArrayElems::tuple(vec![inner_global, i]));
        assert_eq!(global, expected);
    }

    #[test]
    fn test_globalize_depth_limit() {
        let mut arena = TypeArena::default();
        let mut tables = StateTables::new();
        let site = site(&mut tables);
        let i = arena.instance(ClassId::INTEGER);
        let inner = arena.array(ArrayElems::homogeneous(i));
        let outer = arena.array(ArrayElems::homogeneous(inner));
        let mut e = env(&mut arena, vec![], vec![]);
        let local = e.localize(&mut arena, &mut tables.sites, outer, &site, 5);
        let global = e.globalize(&mut arena, local, 1);
        let expected = arena.array(ArrayElems::homogeneous(TypeId::ANY));
        assert_eq!(global, expected);
    }

    #[test]
    fn test_globalize_keeps_symbols() {
        let mut arena = TypeArena::default();
        let e = env(&mut arena, vec![], vec![]);
        let sym = arena.symbol("k");
        let s = arena.literal(Literal::Str("x".into()));
        assert_eq!(e.globalize(&mut arena, sym, 5), sym);
        let string = arena.instance(ClassId::STRING);
        assert_eq!(e.globalize(&mut arena, s, 5), string);
    }
}
