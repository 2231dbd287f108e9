//! Lattice operations that need more than the arena: truthiness, subtyping
//! against the class hierarchy, unification with declared types, and the
//! depth-limited substitution that keeps generic instantiation finite.

use super::types::{ArrayElems, ClassId, HashElems, TypeArena, TypeId, TypeKind, literal_class};
use std::collections::BTreeMap;

/// Class-hierarchy queries the lattice depends on.
pub trait ClassHierarchy {
    /// `class` is `ancestor`, inherits from it, or mixes it in.
    fn is_ancestor(&self, class: ClassId, ancestor: ClassId) -> bool;
    fn is_module(&self, class: ClassId) -> bool;
    /// Declared type parameter names (`Elem` for `Array`).
    fn type_params(&self, class: ClassId) -> Vec<String>;
    /// Fully qualified name (`Foo::Bar`).
    fn class_path(&self, class: ClassId) -> String;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Truthiness {
    Truthy,
    Falsy,
    Unknown,
}

/// Truthiness of a single union member.
pub fn truthiness(arena: &TypeArena, member: TypeId) -> Truthiness {
    if member == TypeId::NIL || member == TypeId::FALSE {
        return Truthiness::Falsy;
    }
    match arena.kind(member) {
        TypeKind::Any | TypeKind::Var(_) | TypeKind::Union(_) | TypeKind::Bottom => Truthiness::Unknown,
        _ => Truthiness::Truthy,
    }
}

/// Class whose methods answer calls on `member`, and whether the lookup
/// happens on the singleton side.
pub fn receiver_class(arena: &TypeArena, member: TypeId) -> Option<(ClassId, bool)> {
    match arena.kind(member) {
        TypeKind::Instance { class, .. } => Some((*class, false)),
        TypeKind::Class(class) => Some((*class, true)),
        TypeKind::Literal(lit) => Some((literal_class(lit), false)),
        TypeKind::Array(_) => Some((ClassId::ARRAY, false)),
        TypeKind::Hash(_) => Some((ClassId::HASH, false)),
        TypeKind::Local { container, .. } => Some((container.class(), false)),
        TypeKind::Proc(_) => Some((ClassId::PROC, false)),
        TypeKind::Any | TypeKind::Bottom | TypeKind::Union(_) | TypeKind::Var(_) => None,
    }
}

/// Type-variable bindings produced by unification.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Subst {
    map: BTreeMap<String, TypeId>,
}

impl Subst {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<TypeId> {
        self.map.get(name).copied()
    }

    pub fn insert(&mut self, name: impl Into<String>, ty: TypeId) {
        self.map.insert(name.into(), ty);
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, TypeId)> {
        self.map.iter().map(|(k, v)| (k.as_str(), *v))
    }

    /// Unions `other`'s bindings into `self`.
    pub fn merge(&mut self, arena: &mut TypeArena, other: &Subst) {
        for (name, ty) in other.iter() {
            let merged = match self.get(name) {
                Some(prev) => arena.union(prev, ty),
                None => ty,
            };
            self.insert(name, merged);
        }
    }
}

fn rewrite(arena: &mut TypeArena, ty: TypeId, depth: usize, subst: Option<&Subst>, erase: bool) -> TypeId {
    match arena.kind(ty).clone() {
        TypeKind::Var(name) => match subst.and_then(|s| s.get(&name)) {
            Some(replacement) => rewrite(arena, replacement, depth, None, erase),
            None if erase => TypeId::ANY,
            None => ty,
        },
        TypeKind::Union(members) => {
            let members: Vec<_> = members
                .into_iter()
                .map(|m| rewrite(arena, m, depth, subst, erase))
                .collect();
            arena.union_all(members)
        }
        TypeKind::Array(elems) => {
            if depth == 0 {
                return TypeId::ANY;
            }
            let lead = elems
                .lead
                .iter()
                .map(|&t| rewrite(arena, t, depth - 1, subst, erase))
                .collect();
            let rest = rewrite(arena, elems.rest, depth - 1, subst, erase);
            arena.array(ArrayElems { lead, rest })
        }
        TypeKind::Hash(elems) => {
            if depth == 0 {
                return TypeId::ANY;
            }
            let mut out = HashElems::default();
            for (key, value) in elems.entries {
                let key = rewrite(arena, key, depth - 1, subst, erase);
                let value = rewrite(arena, value, depth - 1, subst, erase);
                out = arena.union_hash_elems(&out, &HashElems::single(key, value));
            }
            arena.hash(out)
        }
        TypeKind::Instance { class, args } if !args.is_empty() => {
            if depth == 0 {
                return TypeId::ANY;
            }
            let args = args
                .into_iter()
                .map(|t| rewrite(arena, t, depth - 1, subst, erase))
                .collect();
            arena.generic(class, args)
        }
        _ => ty,
    }
}

/// Replaces type variables bound in `subst`, collapsing containers nested
/// deeper than `depth` to `untyped`.
pub fn substitute(arena: &mut TypeArena, ty: TypeId, subst: &Subst, depth: usize) -> TypeId {
    rewrite(arena, ty, depth, Some(subst), false)
}

/// Collapses containers nested deeper than `depth` to `untyped`.
pub fn limit_size(arena: &mut TypeArena, ty: TypeId, depth: usize) -> TypeId {
    rewrite(arena, ty, depth, None, false)
}

/// Replaces every remaining type variable with `untyped`.
pub fn erase_vars(arena: &mut TypeArena, ty: TypeId) -> TypeId {
    let depth = arena.limits().depth;
    rewrite(arena, ty, depth, None, true)
}

/// Bindings for the receiver's type parameters, plus `self`.
pub fn receiver_subst(arena: &mut TypeArena, hier: &dyn ClassHierarchy, recv: TypeId) -> Subst {
    let mut subst = Subst::new();
    subst.insert("self", recv);
    match arena.kind(recv).clone() {
        TypeKind::Array(elems) => {
            let elem = arena.squash(&elems);
            if let Some(name) = hier.type_params(ClassId::ARRAY).into_iter().next() {
                subst.insert(name, elem);
            }
        }
        TypeKind::Hash(elems) => {
            let (key, value) = arena.hash_key_value(&elems);
            let params = hier.type_params(ClassId::HASH);
            if let [k, v] = params.as_slice() {
                subst.insert(k.clone(), key);
                subst.insert(v.clone(), value);
            }
        }
        TypeKind::Instance { class, args } => {
            for (name, arg) in hier.type_params(class).into_iter().zip(args) {
                subst.insert(name, arg);
            }
        }
        _ => {}
    }
    subst
}

/// Whether two non-union, non-variable types are compatible, ignoring
/// element types.
fn consistent(arena: &TypeArena, hier: &dyn ClassHierarchy, actual: TypeId, formal: TypeId) -> bool {
    if actual == formal {
        return true;
    }
    match (arena.kind(actual), arena.kind(formal)) {
        (_, TypeKind::Any) | (TypeKind::Any, _) | (TypeKind::Bottom, _) => true,
        (TypeKind::Literal(a), TypeKind::Literal(b)) => a == b,
        (TypeKind::Class(a), TypeKind::Class(b)) => hier.is_ancestor(*a, *b),
        (TypeKind::Class(c), TypeKind::Instance { class, .. }) => {
            let meta = if hier.is_module(*c) {
                ClassId::MODULE
            } else {
                ClassId::CLASS
            };
            hier.is_ancestor(meta, *class)
        }
        (TypeKind::Array(_), TypeKind::Array(_)) | (TypeKind::Hash(_), TypeKind::Hash(_)) => true,
        (TypeKind::Local { container: a, .. }, TypeKind::Array(_)) => a.class() == ClassId::ARRAY,
        (TypeKind::Local { container: a, .. }, TypeKind::Hash(_)) => a.class() == ClassId::HASH,
        (TypeKind::Proc(_), TypeKind::Proc(_)) => true,
        (_, TypeKind::Instance { class: formal_class, .. }) => match receiver_class(arena, actual) {
            Some((class, false)) => hier.is_ancestor(class, *formal_class),
            _ => false,
        },
        _ => false,
    }
}

/// Unifies `actual` against the declared `formal`.
///
/// Union actuals match when at least one member matches, so a partially
/// applicable overload is still selected; the resulting bindings union the
/// bindings of every matching member.
pub fn match_types(
    arena: &mut TypeArena,
    hier: &dyn ClassHierarchy,
    actual: TypeId,
    formal: TypeId,
) -> Option<Subst> {
    match arena.kind(formal).clone() {
        TypeKind::Var(name) => {
            let mut subst = Subst::new();
            subst.insert(name, actual);
            return Some(subst);
        }
        TypeKind::Any => return Some(Subst::new()),
        TypeKind::Union(members) => {
            return merge_matches(arena, hier, members.into_iter().map(|m| (actual, m)));
        }
        _ => {}
    }
    match arena.kind(actual).clone() {
        TypeKind::Any => {
            let mut subst = Subst::new();
            for name in free_vars(arena, formal) {
                subst.insert(name, TypeId::ANY);
            }
            return Some(subst);
        }
        TypeKind::Bottom => return Some(Subst::new()),
        TypeKind::Union(members) => {
            return merge_matches(arena, hier, members.into_iter().map(|m| (m, formal)));
        }
        _ => {}
    }
    match (arena.kind(actual).clone(), arena.kind(formal).clone()) {
        (TypeKind::Array(a), TypeKind::Array(f)) => {
            let a = arena.squash(&a);
            let f = arena.squash(&f);
            match_types(arena, hier, a, f)
        }
        (TypeKind::Hash(a), TypeKind::Hash(f)) => {
            let (ak, av) = arena.hash_key_value(&a);
            let (fk, fv) = arena.hash_key_value(&f);
            let mut subst = match_types(arena, hier, ak, fk)?;
            let values = match_types(arena, hier, av, fv)?;
            subst.merge(arena, &values);
            Some(subst)
        }
        (TypeKind::Instance { class: ac, args: aa }, TypeKind::Instance { class: fc, args: fa })
            if ac == fc && !fa.is_empty() && aa.len() == fa.len() =>
        {
            let mut subst = Subst::new();
            for (a, f) in aa.into_iter().zip(fa) {
                let m = match_types(arena, hier, a, f)?;
                subst.merge(arena, &m);
            }
            Some(subst)
        }
        _ if consistent(arena, hier, actual, formal) => Some(Subst::new()),
        _ => None,
    }
}

fn merge_matches(
    arena: &mut TypeArena,
    hier: &dyn ClassHierarchy,
    pairs: impl Iterator<Item = (TypeId, TypeId)>,
) -> Option<Subst> {
    let mut acc: Option<Subst> = None;
    for (actual, formal) in pairs {
        if let Some(subst) = match_types(arena, hier, actual, formal) {
            match acc.as_mut() {
                Some(prev) => prev.merge(arena, &subst),
                None => acc = Some(subst),
            }
        }
    }
    acc
}

/// Names of the type variables occurring in `ty`.
pub fn free_vars(arena: &TypeArena, ty: TypeId) -> Vec<String> {
    fn walk(arena: &TypeArena, ty: TypeId, out: &mut Vec<String>) {
        match arena.kind(ty) {
            TypeKind::Var(name) => {
                if !out.contains(name) {
                    out.push(name.clone());
                }
            }
            TypeKind::Union(members) => members.iter().for_each(|&m| walk(arena, m, out)),
            TypeKind::Array(elems) => {
                elems.lead.iter().for_each(|&t| walk(arena, t, out));
                walk(arena, elems.rest, out);
            }
            TypeKind::Hash(elems) => {
                for (&k, &v) in &elems.entries {
                    walk(arena, k, out);
                    walk(arena, v, out);
                }
            }
            TypeKind::Instance { args, .. } => args.iter().for_each(|&t| walk(arena, t, out)),
            _ => {}
        }
    }
    let mut out = Vec::new();
    walk(arena, ty, &mut out);
    out
}
