//! Hash-consed type lattice.
//!
//! Types live in a [`TypeArena`] and are addressed by [`TypeId`]. Interning
//! makes equality a handle comparison, and container types that refer back to
//! themselves go through an allocation site ([`TypeKind::Local`]) instead of
//! direct nesting, so no type value is ever cyclic.

use super::widening::TypeLimits;
use crate::intern::intern_key;
use rbprof_iseq::Literal;
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// Interned type handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TypeId(u32);

impl TypeId {
    // Reserved ids, interned in this order by `TypeArena::new`
    pub const ANY: TypeId = TypeId(0);
    pub const BOTTOM: TypeId = TypeId(1);
    pub const NIL: TypeId = TypeId(2);
    pub const TRUE: TypeId = TypeId(3);
    pub const FALSE: TypeId = TypeId(4);
    pub const BOOL: TypeId = TypeId(5);

    pub fn index(self) -> usize {
        self.0 as usize
    }

    #[inline]
    pub fn is_any(self) -> bool {
        self == Self::ANY
    }

    #[inline]
    pub fn is_bottom(self) -> bool {
        self == Self::BOTTOM
    }

    #[inline]
    pub fn is_nil(self) -> bool {
        self == Self::NIL
    }
}

/// Class or module handle inside a [`crate::classes::ClassTable`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClassId(pub u32);

impl ClassId {
    // Bootstrapped in this order by `ClassTable::new`
    pub const OBJECT: ClassId = ClassId(0);
    pub const MODULE: ClassId = ClassId(1);
    pub const CLASS: ClassId = ClassId(2);
    pub const KERNEL: ClassId = ClassId(3);
    pub const NIL: ClassId = ClassId(4);
    pub const TRUE: ClassId = ClassId(5);
    pub const FALSE: ClassId = ClassId(6);
    pub const NUMERIC: ClassId = ClassId(7);
    pub const INTEGER: ClassId = ClassId(8);
    pub const FLOAT: ClassId = ClassId(9);
    pub const STRING: ClassId = ClassId(10);
    pub const SYMBOL: ClassId = ClassId(11);
    pub const ARRAY: ClassId = ClassId(12);
    pub const HASH: ClassId = ClassId(13);
    pub const PROC: ClassId = ClassId(14);
    pub const RANGE: ClassId = ClassId(15);
    pub const REGEXP: ClassId = ClassId(16);
    pub const EXCEPTION: ClassId = ClassId(17);
    pub const STANDARD_ERROR: ClassId = ClassId(18);
    pub const RUNTIME_ERROR: ClassId = ClassId(19);
    pub const ARGUMENT_ERROR: ClassId = ClassId(20);
    pub const VM_CORE: ClassId = ClassId(21);

    pub fn index(self) -> usize {
        self.0 as usize
    }
}

intern_key!(
    /// Block handle: a literal block with its creating frame, or a `&:sym` block.
    BlockId
);

intern_key!(
    /// Allocation-site handle.
    SiteId
);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ContainerKind {
    Array,
    Hash,
}

impl ContainerKind {
    pub fn class(self) -> ClassId {
        match self {
            ContainerKind::Array => ClassId::ARRAY,
            ContainerKind::Hash => ClassId::HASH,
        }
    }
}

/// Array element types: a fixed-length prefix followed by a repeated tail.
/// A tuple `[A, B]` has `rest == BOTTOM`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ArrayElems {
    pub lead: Vec<TypeId>,
    pub rest: TypeId,
}

impl ArrayElems {
    pub fn tuple(lead: Vec<TypeId>) -> Self {
        Self {
            lead,
            rest: TypeId::BOTTOM,
        }
    }

    pub fn homogeneous(elem: TypeId) -> Self {
        Self {
            lead: Vec::new(),
            rest: elem,
        }
    }
}

/// Hash entry types keyed by key type.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct HashElems {
    pub entries: BTreeMap<TypeId, TypeId>,
}

impl HashElems {
    pub fn single(key: TypeId, value: TypeId) -> Self {
        let mut entries = BTreeMap::new();
        entries.insert(key, value);
        Self { entries }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TypeKind {
    Any,
    Bottom,
    /// Instance of a class, with generic arguments for declared type parameters.
    Instance { class: ClassId, args: Vec<TypeId> },
    /// The class object itself (`singleton(Foo)`).
    Class(ClassId),
    /// A precise literal value.
    Literal(Literal),
    /// Normal form: two or more members, sorted, no nested unions.
    Union(Vec<TypeId>),
    Array(ArrayElems),
    Hash(HashElems),
    Proc(BlockId),
    Var(String),
    /// Container whose element types live in the owning env, at `site`.
    Local { container: ContainerKind, site: SiteId },
}

/// Class of the object a literal denotes.
pub fn literal_class(lit: &Literal) -> ClassId {
    match lit {
        Literal::Nil => ClassId::NIL,
        Literal::True => ClassId::TRUE,
        Literal::False => ClassId::FALSE,
        Literal::Int(_) => ClassId::INTEGER,
        Literal::Float(_) => ClassId::FLOAT,
        Literal::Str(_) => ClassId::STRING,
        Literal::Sym(_) => ClassId::SYMBOL,
        Literal::Array(_) => ClassId::ARRAY,
        Literal::Hash(_) => ClassId::HASH,
        Literal::Range { .. } => ClassId::RANGE,
        Literal::Regexp(_) => ClassId::REGEXP,
    }
}

/// Storage for every type of one analysis run.
#[derive(Debug)]
pub struct TypeArena {
    kinds: Vec<TypeKind>,
    index: HashMap<TypeKind, TypeId>,
    limits: TypeLimits,
}

impl TypeArena {
    pub fn new(limits: TypeLimits) -> Self {
        let mut arena = Self {
            kinds: Vec::new(),
            index: HashMap::new(),
            limits,
        };
        arena.intern(TypeKind::Any);
        arena.intern(TypeKind::Bottom);
        arena.instance(ClassId::NIL);
        arena.instance(ClassId::TRUE);
        arena.instance(ClassId::FALSE);
        arena.intern(TypeKind::Union(vec![TypeId::TRUE, TypeId::FALSE]));
        arena
    }

    pub fn limits(&self) -> TypeLimits {
        self.limits
    }

    pub fn intern(&mut self, kind: TypeKind) -> TypeId {
        if let Some(&id) = self.index.get(&kind) {
            return id;
        }
        let id = TypeId(self.kinds.len() as u32);
        self.kinds.push(kind.clone());
        self.index.insert(kind, id);
        id
    }

    pub fn kind(&self, id: TypeId) -> &TypeKind {
        &self.kinds[id.index()]
    }

    pub fn len(&self) -> usize {
        self.kinds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.kinds.is_empty()
    }

    pub fn instance(&mut self, class: ClassId) -> TypeId {
        self.intern(TypeKind::Instance {
            class,
            args: Vec::new(),
        })
    }

    pub fn generic(&mut self, class: ClassId, args: Vec<TypeId>) -> TypeId {
        self.intern(TypeKind::Instance { class, args })
    }

    pub fn class_object(&mut self, class: ClassId) -> TypeId {
        self.intern(TypeKind::Class(class))
    }

    /// Literal type; `nil`/`true`/`false` map to their instances, array and
    /// hash literals to structural containers, ranges to `Range`.
    pub fn literal(&mut self, lit: Literal) -> TypeId {
        match lit {
            Literal::Nil => TypeId::NIL,
            Literal::True => TypeId::TRUE,
            Literal::False => TypeId::FALSE,
            Literal::Array(items) => {
                let lead = items.into_iter().map(|item| self.literal(item)).collect();
                self.array(ArrayElems::tuple(lead))
            }
            Literal::Hash(pairs) => {
                let mut elems = HashElems::default();
                for (k, v) in pairs {
                    let k = self.literal(k);
                    let v = self.literal(v);
                    elems = self.union_hash_elems(&elems, &HashElems::single(k, v));
                }
                self.hash(elems)
            }
            Literal::Range { .. } => self.instance(ClassId::RANGE),
            lit => self.intern(TypeKind::Literal(lit)),
        }
    }

    pub fn symbol(&mut self, name: &str) -> TypeId {
        self.intern(TypeKind::Literal(Literal::Sym(name.to_string())))
    }

    pub fn array(&mut self, elems: ArrayElems) -> TypeId {
        self.intern(TypeKind::Array(elems))
    }

    pub fn hash(&mut self, elems: HashElems) -> TypeId {
        self.intern(TypeKind::Hash(elems))
    }

    pub fn proc_type(&mut self, block: BlockId) -> TypeId {
        self.intern(TypeKind::Proc(block))
    }

    pub fn var(&mut self, name: &str) -> TypeId {
        self.intern(TypeKind::Var(name.to_string()))
    }

    pub fn local(&mut self, container: ContainerKind, site: SiteId) -> TypeId {
        self.intern(TypeKind::Local { container, site })
    }

    pub fn optional(&mut self, ty: TypeId) -> TypeId {
        self.union(ty, TypeId::NIL)
    }

    pub fn union(&mut self, a: TypeId, b: TypeId) -> TypeId {
        if a == b || b.is_bottom() {
            return a;
        }
        if a.is_bottom() {
            return b;
        }
        self.union_all([a, b])
    }

    /// Union in normal form: flattened, deduplicated, sorted, at most one
    /// array and one hash member, `untyped` absorbing, width-limited.
    pub fn union_all(&mut self, types: impl IntoIterator<Item = TypeId>) -> TypeId {
        let mut pending: Vec<TypeId> = types.into_iter().collect();
        let mut members = BTreeSet::new();
        let mut array: Option<ArrayElems> = None;
        let mut hash: Option<HashElems> = None;

        while let Some(ty) = pending.pop() {
            match self.kind(ty).clone() {
                TypeKind::Any => return TypeId::ANY,
                TypeKind::Bottom => {}
                TypeKind::Union(inner) => pending.extend(inner),
                TypeKind::Array(elems) => {
                    array = Some(match array {
                        Some(prev) => self.union_array_elems(&prev, &elems),
                        None => elems,
                    });
                }
                TypeKind::Hash(elems) => {
                    hash = Some(match hash {
                        Some(prev) => self.union_hash_elems(&prev, &elems),
                        None => elems,
                    });
                }
                _ => {
                    members.insert(ty);
                }
            }
        }
        if let Some(elems) = array {
            members.insert(self.array(elems));
        }
        if let Some(elems) = hash {
            members.insert(self.hash(elems));
        }

        match members.len() {
            0 => TypeId::BOTTOM,
            1 => members.into_iter().next().unwrap_or(TypeId::BOTTOM),
            n if self.limits.exceeds_width(n) => TypeId::ANY,
            _ => self.intern(TypeKind::Union(members.into_iter().collect())),
        }
    }

    /// Members of a type: none for `bot`, the members of a union, or itself.
    pub fn members(&self, ty: TypeId) -> Vec<TypeId> {
        match self.kind(ty) {
            TypeKind::Bottom => Vec::new(),
            TypeKind::Union(members) => members.clone(),
            _ => vec![ty],
        }
    }

    /// Union of every element type of an array.
    pub fn squash(&mut self, elems: &ArrayElems) -> TypeId {
        let mut all = elems.lead.clone();
        all.push(elems.rest);
        self.union_all(all)
    }

    pub fn union_array_elems(&mut self, a: &ArrayElems, b: &ArrayElems) -> ArrayElems {
        if a.lead.len() == b.lead.len() {
            let lead = a
                .lead
                .iter()
                .zip(&b.lead)
                .map(|(&x, &y)| self.union(x, y))
                .collect();
            let rest = self.union(a.rest, b.rest);
            ArrayElems { lead, rest }
        } else {
            let a_all = self.squash(a);
            let b_all = self.squash(b);
            ArrayElems::homogeneous(self.union(a_all, b_all))
        }
    }

    pub fn union_hash_elems(&mut self, a: &HashElems, b: &HashElems) -> HashElems {
        let mut entries = a.entries.clone();
        for (&key, &value) in &b.entries {
            let merged = match entries.get(&key) {
                Some(&prev) => self.union(prev, value),
                None => value,
            };
            entries.insert(key, merged);
        }
        HashElems { entries }
    }

    /// Union of all key types and of all value types of a hash.
    pub fn hash_key_value(&mut self, elems: &HashElems) -> (TypeId, TypeId) {
        let keys: Vec<_> = elems.entries.keys().copied().collect();
        let values: Vec<_> = elems.entries.values().copied().collect();
        (self.union_all(keys), self.union_all(values))
    }
}

impl Default for TypeArena {
    fn default() -> Self {
        Self::new(TypeLimits::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn int(arena: &mut TypeArena, v: i64) -> TypeId {
        arena.literal(Literal::Int(v))
    }

    #[test]
    fn test_reserved_ids() {
        let mut arena = TypeArena::default();
        assert_eq!(arena.instance(ClassId::NIL), TypeId::NIL);
        assert_eq!(arena.literal(Literal::True), TypeId::TRUE);
        assert_eq!(arena.union(TypeId::FALSE, TypeId::TRUE), TypeId::BOOL);
        assert_eq!(arena.kind(TypeId::ANY), &TypeKind::Any);
    }

    #[test]
    fn test_union_normal_form() {
        let mut arena = TypeArena::default();
        let i = arena.instance(ClassId::INTEGER);
        let s = arena.instance(ClassId::STRING);
        let is = arena.union(i, s);
        let si = arena.union(s, i);
        assert_eq!(is, si);

        let nested = arena.union(is, TypeId::NIL);
        let TypeKind::Union(members) = arena.kind(nested).clone() else {
            panic!("expected union");
        };
        assert_eq!(members.len(), 3);
        assert!(members.iter().all(|m| !matches!(arena.kind(*m), TypeKind::Union(_))));

        assert_eq!(arena.union(is, i), is);
        assert_eq!(arena.union(is, TypeId::BOTTOM), is);
        assert_eq!(arena.union(is, TypeId::ANY), TypeId::ANY);
    }

    #[test]
    fn test_union_width_limit_widens() {
        let mut arena = TypeArena::new(TypeLimits { depth: 5, width: 3 });
        let syms: Vec<_> = ["a", "b", "c"].iter().map(|s| arena.symbol(s)).collect();
        let three = arena.union_all(syms.clone());
        assert!(matches!(arena.kind(three), TypeKind::Union(m) if m.len() == 3));
        let d = arena.symbol("d");
        assert_eq!(arena.union(three, d), TypeId::ANY);
    }

    #[test]
    fn test_union_unlimited_width() {
        let mut arena = TypeArena::new(TypeLimits { depth: 5, width: 0 });
        let ints: Vec<_> = (0..40).map(|v| int(&mut arena, v)).collect();
        let u = arena.union_all(ints);
        assert_eq!(arena.members(u).len(), 40);
    }

    #[test]
    fn test_union_merges_arrays() {
        let mut arena = TypeArena::default();
        let i = arena.instance(ClassId::INTEGER);
        let s = arena.instance(ClassId::STRING);
        let a = arena.array(ArrayElems::tuple(vec![i]));
        let b = arena.array(ArrayElems::tuple(vec![s]));
        let u = arena.union(a, b);
        let is = arena.union(i, s);
        assert_eq!(arena.kind(u), &TypeKind::Array(ArrayElems::tuple(vec![is])));

        let c = arena.array(ArrayElems::tuple(vec![i, i]));
        let u2 = arena.union(u, c);
        assert_eq!(arena.kind(u2), &TypeKind::Array(ArrayElems::homogeneous(is)));
    }

    #[test]
    fn test_members() {
        let mut arena = TypeArena::default();
        assert!(arena.members(TypeId::BOTTOM).is_empty());
        assert_eq!(arena.members(TypeId::BOOL), vec![TypeId::TRUE, TypeId::FALSE]);
        let i = arena.instance(ClassId::INTEGER);
        assert_eq!(arena.members(i), vec![i]);
    }
}
