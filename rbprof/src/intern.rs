//! Hash-consing tables for analysis handles.
//!
//! Every structured key the interpreter memoizes on (contexts, execution
//! points, allocation sites, blocks) is stored once and addressed by a small
//! `Copy` handle, so memo tables compare handles instead of walking structure.

use std::collections::HashMap;
use std::hash::Hash;

/// Handle type produced by an [`InternTable`].
pub trait InternKey: From<usize> + Into<usize> + Copy + Eq + Hash {}

/// Declares a `u32` newtype handle usable as an [`InternKey`].
macro_rules! intern_key {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(pub u32);

        impl From<usize> for $name {
            fn from(idx: usize) -> Self {
                $name(idx as u32)
            }
        }

        impl From<$name> for usize {
            fn from(key: $name) -> usize {
                key.0 as usize
            }
        }

        impl $crate::intern::InternKey for $name {}
    };
}
pub(crate) use intern_key;

#[derive(Debug, Clone)]
pub struct InternTable<T: Clone + Eq + Hash, K: InternKey> {
    items: Vec<T>,
    item_map: HashMap<T, K>,
}

impl<T: Clone + Eq + Hash, K: InternKey> Default for InternTable<T, K> {
    fn default() -> Self {
        Self {
            items: Vec::new(),
            item_map: HashMap::new(),
        }
    }
}

impl<T: Clone + Eq + Hash, K: InternKey> InternTable<T, K> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn intern(&mut self, item: T) -> K {
        if let Some(&key) = self.item_map.get(&item) {
            return key;
        }
        let key = K::from(self.items.len());
        self.items.push(item.clone());
        self.item_map.insert(item, key);
        key
    }

    /// Key of an already interned item.
    pub fn lookup(&self, item: &T) -> Option<K> {
        self.item_map.get(item).copied()
    }

    pub fn resolve(&self, key: K) -> Option<&T> {
        self.items.get(key.into())
    }

    /// Item behind a key issued by this table.
    pub fn get(&self, key: K) -> &T {
        &self.items[key.into()]
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    intern_key!(TestKey);

    #[test]
    fn test_intern_dedups() {
        let mut table: InternTable<String, TestKey> = InternTable::new();
        let a = table.intern("a".to_string());
        let b = table.intern("b".to_string());
        assert_eq!(table.intern("a".to_string()), a);
        assert_ne!(a, b);
        assert_eq!(table.len(), 2);
        assert_eq!(table.get(b), "b");
        assert_eq!(table.resolve(TestKey(9)), None);
    }
}
