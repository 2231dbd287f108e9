//! Program-wide variable tables.
//!
//! Constants, instance variables, class variables and globals are not
//! flow-sensitive: an entry holds the union of every type ever written, and
//! remembers who read it so that a later widening re-runs the readers.

use crate::abstract_interp::continuation::Continuation;
use crate::abstract_interp::env::Env;
use crate::abstract_interp::state::ExecutionPoint;
use crate::lattice::TypeId;
use std::collections::BTreeMap;

#[derive(Debug, Clone)]
pub struct VarEntry {
    /// Type fixed by a declaration; writes are checked, never widen it.
    pub declared: bool,
    pub ty: TypeId,
    /// Set by the first program write.
    pub written: bool,
    pub readers: BTreeMap<ExecutionPoint, (Continuation, Env)>,
}

impl VarEntry {
    pub fn new() -> Self {
        Self {
            declared: false,
            ty: TypeId::BOTTOM,
            written: false,
            readers: BTreeMap::new(),
        }
    }
}

impl Default for VarEntry {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone)]
pub struct VarTable<K: Ord> {
    entries: BTreeMap<K, VarEntry>,
}

impl<K: Ord> Default for VarTable<K> {
    fn default() -> Self {
        Self {
            entries: BTreeMap::new(),
        }
    }
}

impl<K: Ord + Clone> VarTable<K> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &K) -> Option<&VarEntry> {
        self.entries.get(key)
    }

    pub fn contains(&self, key: &K) -> bool {
        self.entries.contains_key(key)
    }

    /// Entry for `key`, created empty on first use.
    pub fn entry(&mut self, key: K) -> &mut VarEntry {
        self.entries.entry(key).or_default()
    }

    /// Fixes the type of `key`. Readers registered before the declaration
    /// are kept.
    pub fn declare(&mut self, key: K, ty: TypeId) {
        let entry = self.entry(key);
        entry.declared = true;
        entry.ty = ty;
    }

    /// Whether `key` holds a value: declared, or written by the program.
    pub fn defines(&self, key: &K) -> bool {
        self.entries.get(key).is_some_and(|e| e.declared || e.written)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&K, &VarEntry)> {
        self.entries.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::abstract_interp::env::StaticEnv;
    use crate::abstract_interp::state::ContextId;

    #[test]
    fn test_declare_keeps_earlier_readers() {
        let mut table: VarTable<String> = VarTable::new();
        let reader = ExecutionPoint::new(ContextId(0), 3, None);
        let env = Env::new(StaticEnv::new(TypeId::NIL, TypeId::NIL), Vec::new());
        table
            .entry("Foo".to_string())
            .readers
            .insert(reader, (Continuation::Push, env));
        assert!(!table.defines(&"Foo".to_string()));

        table.declare("Foo".to_string(), TypeId::TRUE);
        let entry = table.get(&"Foo".to_string()).unwrap();
        assert!(entry.declared);
        assert_eq!(entry.ty, TypeId::TRUE);
        assert!(entry.readers.contains_key(&reader));
        assert!(table.defines(&"Foo".to_string()));
    }
}
