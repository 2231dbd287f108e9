//! Class and module table.
//!
//! Holds every class/module the analysis knows about: the bootstrapped core
//! classes, declared ones, and those defined by the analyzed program. Each
//! entry owns its method table, its mixins (per instance/singleton side), and
//! the variable tables for its constants, instance and class variables.

pub mod var_table;

pub use var_table::{VarEntry, VarTable};

use crate::dispatch::MethodDef;
use crate::lattice::{ClassHierarchy, ClassId, TypeArena};
use serde::Serialize;
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ClassKind {
    Class,
    Module,
}

impl ClassKind {
    pub fn name(self) -> &'static str {
        match self {
            ClassKind::Class => "class",
            ClassKind::Module => "module",
        }
    }
}

/// How a module is mixed into a class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MixKind {
    Include,
    Prepend,
}

/// Inclusion rejected because it would make the ancestor graph cyclic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AncestorCycle {
    pub target: ClassId,
    pub module: ClassId,
}

/// Instance-variable key: singleton side plus name.
pub type IvarKey = (bool, String);

#[derive(Debug, Clone)]
pub struct ClassDef {
    pub kind: ClassKind,
    pub name: String,
    pub outer: Option<ClassId>,
    pub superclass: Option<ClassId>,
    pub type_params: Vec<String>,
    /// Indexed by singleton side; most recently mixed-in module first.
    pub prepends: [Vec<ClassId>; 2],
    pub includes: [Vec<ClassId>; 2],
    /// Classes and modules nested in this one, by simple name.
    pub nested: BTreeMap<String, ClassId>,
    pub consts: VarTable<String>,
    pub methods: BTreeMap<(bool, String), Vec<MethodDef>>,
    pub ivars: VarTable<IvarKey>,
    pub cvars: VarTable<String>,
    /// Defined or reopened by the analyzed program.
    pub user_defined: bool,
}

impl ClassDef {
    fn new(kind: ClassKind, name: &str, outer: Option<ClassId>, superclass: Option<ClassId>) -> Self {
        Self {
            kind,
            name: name.to_string(),
            outer,
            superclass,
            type_params: Vec::new(),
            prepends: [Vec::new(), Vec::new()],
            includes: [Vec::new(), Vec::new()],
            nested: BTreeMap::new(),
            consts: VarTable::new(),
            methods: BTreeMap::new(),
            ivars: VarTable::new(),
            cvars: VarTable::new(),
            user_defined: false,
        }
    }

    pub fn is_module(&self) -> bool {
        self.kind == ClassKind::Module
    }
}

#[derive(Debug)]
pub struct ClassTable {
    defs: Vec<ClassDef>,
}

const BUILTINS: &[(ClassId, &str, ClassKind, Option<ClassId>)] = &[
    (ClassId::OBJECT, "Object", ClassKind::Class, None),
    (ClassId::MODULE, "Module", ClassKind::Class, Some(ClassId::OBJECT)),
    (ClassId::CLASS, "Class", ClassKind::Class, Some(ClassId::MODULE)),
    (ClassId::KERNEL, "Kernel", ClassKind::Module, None),
    (ClassId::NIL, "NilClass", ClassKind::Class, Some(ClassId::OBJECT)),
    (ClassId::TRUE, "TrueClass", ClassKind::Class, Some(ClassId::OBJECT)),
    (ClassId::FALSE, "FalseClass", ClassKind::Class, Some(ClassId::OBJECT)),
    (ClassId::NUMERIC, "Numeric", ClassKind::Class, Some(ClassId::OBJECT)),
    (ClassId::INTEGER, "Integer", ClassKind::Class, Some(ClassId::NUMERIC)),
    (ClassId::FLOAT, "Float", ClassKind::Class, Some(ClassId::NUMERIC)),
    (ClassId::STRING, "String", ClassKind::Class, Some(ClassId::OBJECT)),
    (ClassId::SYMBOL, "Symbol", ClassKind::Class, Some(ClassId::OBJECT)),
    (ClassId::ARRAY, "Array", ClassKind::Class, Some(ClassId::OBJECT)),
    (ClassId::HASH, "Hash", ClassKind::Class, Some(ClassId::OBJECT)),
    (ClassId::PROC, "Proc", ClassKind::Class, Some(ClassId::OBJECT)),
    (ClassId::RANGE, "Range", ClassKind::Class, Some(ClassId::OBJECT)),
    (ClassId::REGEXP, "Regexp", ClassKind::Class, Some(ClassId::OBJECT)),
    (ClassId::EXCEPTION, "Exception", ClassKind::Class, Some(ClassId::OBJECT)),
    (ClassId::STANDARD_ERROR, "StandardError", ClassKind::Class, Some(ClassId::EXCEPTION)),
    (ClassId::RUNTIME_ERROR, "RuntimeError", ClassKind::Class, Some(ClassId::STANDARD_ERROR)),
    (ClassId::ARGUMENT_ERROR, "ArgumentError", ClassKind::Class, Some(ClassId::STANDARD_ERROR)),
    (ClassId::VM_CORE, "<VMCore>", ClassKind::Class, Some(ClassId::OBJECT)),
];

impl ClassTable {
    /// Table with the core classes bootstrapped at their reserved ids.
    pub fn new(arena: &mut TypeArena) -> Self {
        let mut table = Self { defs: Vec::new() };
        for &(id, name, kind, superclass) in BUILTINS {
            debug_assert_eq!(id.index(), table.defs.len());
            let outer = (id != ClassId::OBJECT).then_some(ClassId::OBJECT);
            table.defs.push(ClassDef::new(kind, name, outer, superclass));
            if id != ClassId::VM_CORE {
                table.register_const(ClassId::OBJECT, name, id, arena);
            }
        }
        table.defs[ClassId::OBJECT.index()].includes[0].push(ClassId::KERNEL);
        table.defs[ClassId::ARRAY.index()].type_params = vec!["Elem".to_string()];
        table.defs[ClassId::HASH.index()].type_params = vec!["K".to_string(), "V".to_string()];
        table
    }

    fn register_const(&mut self, outer: ClassId, name: &str, id: ClassId, arena: &mut TypeArena) {
        let ty = arena.class_object(id);
        let outer_def = &mut self.defs[outer.index()];
        outer_def.nested.insert(name.to_string(), id);
        outer_def.consts.declare(name.to_string(), ty);
    }

    /// Creates a class or module nested in `outer` and binds its constant.
    pub fn define(
        &mut self,
        outer: ClassId,
        name: &str,
        kind: ClassKind,
        superclass: Option<ClassId>,
        arena: &mut TypeArena,
    ) -> ClassId {
        let id = ClassId(self.defs.len() as u32);
        let superclass = match kind {
            ClassKind::Class => Some(superclass.unwrap_or(ClassId::OBJECT)),
            ClassKind::Module => None,
        };
        self.defs.push(ClassDef::new(kind, name, Some(outer), superclass));
        self.register_const(outer, name, id, arena);
        tracing::debug!(class = %self.path(id), kind = kind.name(), "defined");
        id
    }

    pub fn get(&self, id: ClassId) -> &ClassDef {
        &self.defs[id.index()]
    }

    pub fn get_mut(&mut self, id: ClassId) -> &mut ClassDef {
        &mut self.defs[id.index()]
    }

    pub fn len(&self) -> usize {
        self.defs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.defs.is_empty()
    }

    pub fn ids(&self) -> impl Iterator<Item = ClassId> {
        (0..self.defs.len() as u32).map(ClassId)
    }

    pub fn nested(&self, outer: ClassId, name: &str) -> Option<ClassId> {
        self.get(outer).nested.get(name).copied()
    }

    /// Fully qualified name; classes nested directly in `Object` print bare.
    pub fn path(&self, id: ClassId) -> String {
        let mut parts = vec![self.get(id).name.clone()];
        let mut cur = self.get(id).outer;
        while let Some(outer) = cur {
            if outer == ClassId::OBJECT {
                break;
            }
            parts.push(self.get(outer).name.clone());
            cur = self.get(outer).outer;
        }
        parts.reverse();
        parts.join("::")
    }

    /// Resolves `A::B::C` from the top level.
    pub fn find_path(&self, path: &str) -> Option<ClassId> {
        path.trim_start_matches("::")
            .split("::")
            .try_fold(ClassId::OBJECT, |cur, name| self.nested(cur, name))
    }

    // =========================================================================
    // Ancestors
    // =========================================================================

    /// Method-resolution order of `class` (or of its singleton class).
    ///
    /// Each class contributes its prepended modules, itself, then its included
    /// modules, most recent mixin first; then the superclass chain follows.
    /// The singleton side ends with the instance side of `Class` (or
    /// `Module` for modules).
    pub fn ancestors(&self, class: ClassId, singleton: bool) -> Vec<(ClassId, bool)> {
        let mut out = Vec::new();
        let mut cur = Some(class);
        while let Some(c) = cur {
            self.linearize(c, singleton, &mut out);
            cur = self.get(c).superclass;
        }
        if singleton {
            let meta = if self.get(class).is_module() {
                ClassId::MODULE
            } else {
                ClassId::CLASS
            };
            for entry in self.ancestors(meta, false) {
                if !out.contains(&entry) {
                    out.push(entry);
                }
            }
        }
        out
    }

    fn linearize(&self, class: ClassId, singleton: bool, out: &mut Vec<(ClassId, bool)>) {
        let side = usize::from(singleton);
        let def = self.get(class);
        for &m in &def.prepends[side] {
            self.linearize_module(m, out);
        }
        if !out.contains(&(class, singleton)) {
            out.push((class, singleton));
        }
        for &m in &def.includes[side] {
            self.linearize_module(m, out);
        }
    }

    fn linearize_module(&self, module: ClassId, out: &mut Vec<(ClassId, bool)>) {
        if !out.contains(&(module, false)) {
            self.linearize(module, false, out);
        }
    }

    /// Mixes `module` into `target`. Re-mixing a module already present is a
    /// no-op; a mixin that would make `target` its own ancestor is rejected.
    pub fn mix_module(
        &mut self,
        kind: MixKind,
        target: ClassId,
        singleton: bool,
        module: ClassId,
    ) -> Result<(), AncestorCycle> {
        let cycle = AncestorCycle { target, module };
        if module == target || self.ancestors(module, false).contains(&(target, false)) {
            return Err(cycle);
        }
        let side = usize::from(singleton);
        let def = self.get_mut(target);
        let list = match kind {
            MixKind::Include => &mut def.includes[side],
            MixKind::Prepend => &mut def.prepends[side],
        };
        if !list.contains(&module) {
            list.insert(0, module);
        }
        Ok(())
    }

    // =========================================================================
    // Methods
    // =========================================================================

    /// Adds a definition, keeping earlier ones of the same name (every
    /// definition the program can reach is dispatched).
    pub fn add_method(&mut self, class: ClassId, singleton: bool, mid: &str, def: MethodDef) {
        let defs = self
            .get_mut(class)
            .methods
            .entry((singleton, mid.to_string()))
            .or_default();
        if !defs.contains(&def) {
            defs.push(def);
        }
    }

    /// Replaces every definition of `mid`.
    pub fn set_method(&mut self, class: ClassId, singleton: bool, mid: &str, def: MethodDef) {
        self.get_mut(class)
            .methods
            .insert((singleton, mid.to_string()), vec![def]);
    }

    pub fn own_methods(&self, class: ClassId, singleton: bool, mid: &str) -> Option<&[MethodDef]> {
        self.get(class)
            .methods
            .get(&(singleton, mid.to_string()))
            .map(Vec::as_slice)
            .filter(|defs| !defs.is_empty())
    }

    /// First definitions of `mid` along the ancestor chain, with their owner.
    pub fn search_method(&self, class: ClassId, singleton: bool, mid: &str) -> Option<(ClassId, bool, Vec<MethodDef>)> {
        self.ancestors(class, singleton)
            .into_iter()
            .find_map(|(c, s)| self.own_methods(c, s, mid).map(|defs| (c, s, defs.to_vec())))
    }

    /// Definitions `super` reaches from a method owned by `from`, searching the
    /// receiver's chain strictly after `from`.
    pub fn search_super(
        &self,
        class: ClassId,
        singleton: bool,
        from: (ClassId, bool),
        mid: &str,
    ) -> Option<(ClassId, bool, Vec<MethodDef>)> {
        let chain = self.ancestors(class, singleton);
        let start = chain.iter().position(|&entry| entry == from)? + 1;
        chain[start..]
            .iter()
            .find_map(|&(c, s)| self.own_methods(c, s, mid).map(|defs| (c, s, defs.to_vec())))
    }

    pub fn is_subclass(&self, class: ClassId, ancestor: ClassId) -> bool {
        class == ancestor || self.ancestors(class, false).contains(&(ancestor, false))
    }
}

impl ClassHierarchy for ClassTable {
    fn is_ancestor(&self, class: ClassId, ancestor: ClassId) -> bool {
        self.is_subclass(class, ancestor)
    }

    fn is_module(&self, class: ClassId) -> bool {
        self.get(class).is_module()
    }

    fn type_params(&self, class: ClassId) -> Vec<String> {
        self.get(class).type_params.clone()
    }

    fn class_path(&self, class: ClassId) -> String {
        self.path(class)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::{Builtin, MethodDef};
    use pretty_assertions::assert_eq;

    fn table() -> (ClassTable, TypeArena) {
        let mut arena = TypeArena::default();
        let table = ClassTable::new(&mut arena);
        (table, arena)
    }

    #[test]
    fn test_builtin_paths() {
        let (table, _) = table();
        assert_eq!(table.path(ClassId::INTEGER), "Integer");
        assert_eq!(table.find_path("StandardError"), Some(ClassId::STANDARD_ERROR));
        assert!(table.is_subclass(ClassId::INTEGER, ClassId::NUMERIC));
        assert!(table.is_subclass(ClassId::STRING, ClassId::KERNEL));
        assert!(!table.is_subclass(ClassId::STRING, ClassId::NUMERIC));
    }

    #[test]
    fn test_nested_path() {
        let (mut table, mut arena) = table();
        let a = table.define(ClassId::OBJECT, "A", ClassKind::Module, None, &mut arena);
        let b = table.define(a, "B", ClassKind::Class, None, &mut arena);
        assert_eq!(table.path(b), "A::B");
        assert_eq!(table.find_path("A::B"), Some(b));
        assert_eq!(table.get(b).superclass, Some(ClassId::OBJECT));
        assert_eq!(table.get(a).superclass, None);
    }

    #[test]
    fn test_ancestor_order_most_recent_include_first() {
        let (mut table, mut arena) = table();
        let m1 = table.define(ClassId::OBJECT, "M1", ClassKind::Module, None, &mut arena);
        let m2 = table.define(ClassId::OBJECT, "M2", ClassKind::Module, None, &mut arena);
        let p = table.define(ClassId::OBJECT, "P", ClassKind::Module, None, &mut arena);
        let c = table.define(ClassId::OBJECT, "C", ClassKind::Class, None, &mut arena);
        table.mix_module(MixKind::Include, c, false, m1).unwrap();
        table.mix_module(MixKind::Include, c, false, m2).unwrap();
        table.mix_module(MixKind::Prepend, c, false, p).unwrap();

        let chain: Vec<_> = table.ancestors(c, false).into_iter().map(|(id, _)| id).collect();
        assert_eq!(
            chain,
            vec![p, c, m2, m1, ClassId::OBJECT, ClassId::KERNEL]
        );
    }

    #[test]
    fn test_singleton_chain_reaches_class_methods() {
        let (mut table, mut arena) = table();
        let c = table.define(ClassId::OBJECT, "C", ClassKind::Class, None, &mut arena);
        let chain = table.ancestors(c, true);
        assert_eq!(chain[0], (c, true));
        assert_eq!(chain[1], (ClassId::OBJECT, true));
        assert!(chain.contains(&(ClassId::CLASS, false)));
        assert!(chain.contains(&(ClassId::MODULE, false)));
    }

    #[test]
    fn test_include_cycle_rejected() {
        let (mut table, mut arena) = table();
        let a = table.define(ClassId::OBJECT, "A", ClassKind::Module, None, &mut arena);
        let b = table.define(ClassId::OBJECT, "B", ClassKind::Module, None, &mut arena);
        table.mix_module(MixKind::Include, a, false, b).unwrap();
        let err = table.mix_module(MixKind::Include, b, false, a).unwrap_err();
        assert_eq!(err, AncestorCycle { target: b, module: a });
        assert!(table.mix_module(MixKind::Include, a, false, a).is_err());
    }

    #[test]
    fn test_search_and_super() {
        let (mut table, mut arena) = table();
        let m = table.define(ClassId::OBJECT, "M", ClassKind::Module, None, &mut arena);
        let base = table.define(ClassId::OBJECT, "Base", ClassKind::Class, None, &mut arena);
        let sub = table.define(ClassId::OBJECT, "Sub", ClassKind::Class, Some(base), &mut arena);
        table.mix_module(MixKind::Include, sub, false, m).unwrap();
        let def = MethodDef::custom(Builtin::ProcCall);
        table.add_method(base, false, "go", def.clone());
        table.add_method(m, false, "go", def.clone());

        let (owner, _, _) = table.search_method(sub, false, "go").unwrap();
        assert_eq!(owner, m);
        let (owner, _, _) = table.search_super(sub, false, (m, false), "go").unwrap();
        assert_eq!(owner, base);
        assert!(table.search_super(sub, false, (base, false), "go").is_none());
    }
}
