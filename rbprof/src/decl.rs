//! Declared signatures.
//!
//! A [`DeclarationSet`] is the structured form of external type declarations:
//! classes and modules with their type parameters and mixins, methods with
//! overloads, and the declared types of constants, globals and instance
//! variables. Importing one populates the class table with
//! [`MethodDef::Typed`] entries and fixes the declared variable types.
//!
//! A set for the core classes is bundled and loaded unless disabled.

use crate::classes::{ClassKind, ClassTable, MixKind, VarTable};
use crate::dispatch::{BlockParam, KeywordSig, MethodDef, MethodSignature, Overload};
use crate::error::DeclError;
use crate::lattice::{ArrayElems, ClassId, HashElems, TypeArena, TypeId};
use serde::Deserialize;

/// Declarations for the core classes.
pub const CORE_DECLARATIONS: &str = include_str!("core_decls.json");

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DeclarationSet {
    pub classes: Vec<ClassDecl>,
    pub methods: Vec<MethodDecl>,
    pub constants: Vec<VarDecl>,
    pub globals: Vec<VarDecl>,
    pub ivars: Vec<IvarDecl>,
}

impl DeclarationSet {
    pub fn from_json_str(src: &str) -> Result<Self, DeclError> {
        Ok(serde_json::from_str(src)?)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeclClassKind {
    #[default]
    Class,
    Module,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ClassDecl {
    /// Qualified path, `A::B`.
    pub name: String,
    #[serde(default)]
    pub kind: DeclClassKind,
    #[serde(default)]
    pub superclass: Option<String>,
    #[serde(default)]
    pub type_params: Vec<String>,
    #[serde(default)]
    pub includes: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeclMethodKind {
    #[default]
    Method,
    AttrReader,
    AttrWriter,
    AttrAccessor,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MethodDecl {
    pub owner: String,
    pub name: String,
    #[serde(default)]
    pub singleton: bool,
    #[serde(default)]
    pub kind: DeclMethodKind,
    #[serde(default)]
    pub overloads: Vec<OverloadDecl>,
    /// Attribute type, for the `attr_*` kinds.
    #[serde(default, rename = "type")]
    pub ty: Option<DeclType>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct OverloadDecl {
    pub lead: Vec<DeclType>,
    pub opt: Vec<DeclType>,
    pub rest: Option<DeclType>,
    pub post: Vec<DeclType>,
    pub keywords: Vec<KeywordDecl>,
    pub kwrest: Option<DeclType>,
    pub block: Option<BlockDecl>,
    pub ret: DeclType,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct KeywordDecl {
    pub name: String,
    #[serde(default = "default_true")]
    pub required: bool,
    #[serde(rename = "type")]
    pub ty: DeclType,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BlockDecl {
    pub required: bool,
    pub args: Vec<DeclType>,
    pub ret: DeclType,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct VarDecl {
    pub name: String,
    #[serde(rename = "type")]
    pub ty: DeclType,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct IvarDecl {
    pub owner: String,
    pub name: String,
    #[serde(default)]
    pub singleton: bool,
    #[serde(rename = "type")]
    pub ty: DeclType,
}

/// Declared type expression.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeclType {
    #[default]
    Untyped,
    Bot,
    Nil,
    Bool,
    #[serde(rename = "self")]
    SelfType,
    Instance(String),
    Generic {
        class: String,
        args: Vec<DeclType>,
    },
    Singleton(String),
    Var(String),
    Optional(Box<DeclType>),
    Union(Vec<DeclType>),
    Array(Box<DeclType>),
    Tuple(Vec<DeclType>),
    Hash(Box<DeclType>, Box<DeclType>),
    Symbol(String),
}

fn find_class(classes: &ClassTable, path: &str) -> Result<ClassId, DeclError> {
    classes
        .find_path(path)
        .ok_or_else(|| DeclError::UnknownClass(path.to_string()))
}

/// Owner path and simple name of `A::B::C`.
fn split_path(path: &str) -> (Option<&str>, &str) {
    let path = path.trim_start_matches("::");
    match path.rsplit_once("::") {
        Some((outer, name)) => (Some(outer), name),
        None => (None, path),
    }
}

fn lower(ty: &DeclType, classes: &ClassTable, arena: &mut TypeArena) -> Result<TypeId, DeclError> {
    Ok(match ty {
        DeclType::Untyped => TypeId::ANY,
        DeclType::Bot => TypeId::BOTTOM,
        DeclType::Nil => TypeId::NIL,
        DeclType::Bool => TypeId::BOOL,
        DeclType::SelfType => arena.var("self"),
        DeclType::Instance(path) => match find_class(classes, path)? {
            ClassId::NIL => TypeId::NIL,
            ClassId::ARRAY => arena.array(ArrayElems::homogeneous(TypeId::ANY)),
            ClassId::HASH => arena.hash(HashElems::single(TypeId::ANY, TypeId::ANY)),
            class => arena.instance(class),
        },
        DeclType::Generic { class, args } => {
            let class = find_class(classes, class)?;
            let args = args
                .iter()
                .map(|a| lower(a, classes, arena))
                .collect::<Result<Vec<_>, _>>()?;
            match (class, args.as_slice()) {
                (ClassId::ARRAY, [elem]) => arena.array(ArrayElems::homogeneous(*elem)),
                (ClassId::HASH, [k, v]) => arena.hash(HashElems::single(*k, *v)),
                _ => arena.generic(class, args),
            }
        }
        DeclType::Singleton(path) => {
            let class = find_class(classes, path)?;
            arena.class_object(class)
        }
        DeclType::Var(name) => arena.var(name),
        DeclType::Optional(inner) => {
            let inner = lower(inner, classes, arena)?;
            arena.optional(inner)
        }
        DeclType::Union(members) => {
            let members = members
                .iter()
                .map(|m| lower(m, classes, arena))
                .collect::<Result<Vec<_>, _>>()?;
            arena.union_all(members)
        }
        DeclType::Array(elem) => {
            let elem = lower(elem, classes, arena)?;
            arena.array(ArrayElems::homogeneous(elem))
        }
        DeclType::Tuple(items) => {
            let items = items
                .iter()
                .map(|m| lower(m, classes, arena))
                .collect::<Result<Vec<_>, _>>()?;
            arena.array(ArrayElems::tuple(items))
        }
        DeclType::Hash(k, v) => {
            let k = lower(k, classes, arena)?;
            let v = lower(v, classes, arena)?;
            arena.hash(HashElems::single(k, v))
        }
        DeclType::Symbol(name) => arena.symbol(name),
    })
}

fn lower_all(tys: &[DeclType], classes: &ClassTable, arena: &mut TypeArena) -> Result<Vec<TypeId>, DeclError> {
    tys.iter().map(|t| lower(t, classes, arena)).collect()
}

fn lower_opt(ty: &Option<DeclType>, classes: &ClassTable, arena: &mut TypeArena) -> Result<Option<TypeId>, DeclError> {
    ty.as_ref().map(|t| lower(t, classes, arena)).transpose()
}

fn lower_overload(decl: &OverloadDecl, classes: &ClassTable, arena: &mut TypeArena) -> Result<Overload, DeclError> {
    let keywords = decl
        .keywords
        .iter()
        .map(|kw| {
            Ok(KeywordSig {
                name: kw.name.clone(),
                required: kw.required,
                ty: lower(&kw.ty, classes, arena)?,
            })
        })
        .collect::<Result<Vec<_>, DeclError>>()?;
    let block = match &decl.block {
        Some(block) => Some(BlockParam {
            required: block.required,
            args: lower_all(&block.args, classes, arena)?,
            ret: lower(&block.ret, classes, arena)?,
        }),
        None => None,
    };
    let sig = MethodSignature {
        lead: lower_all(&decl.lead, classes, arena)?,
        opt: lower_all(&decl.opt, classes, arena)?,
        rest: lower_opt(&decl.rest, classes, arena)?,
        post: lower_all(&decl.post, classes, arena)?,
        keywords,
        kwrest: lower_opt(&decl.kwrest, classes, arena)?,
        block: if block.is_some() { TypeId::ANY } else { TypeId::NIL },
    };
    Ok(Overload {
        sig,
        block,
        ret: lower(&decl.ret, classes, arena)?,
    })
}

fn class_kind(kind: DeclClassKind) -> ClassKind {
    match kind {
        DeclClassKind::Class => ClassKind::Class,
        DeclClassKind::Module => ClassKind::Module,
    }
}

fn import_class(decl: &ClassDecl, classes: &mut ClassTable, arena: &mut TypeArena) -> Result<(), DeclError> {
    let (outer, name) = split_path(&decl.name);
    let outer = match outer {
        Some(path) => find_class(classes, path)?,
        None => ClassId::OBJECT,
    };
    let kind = class_kind(decl.kind);
    let superclass = match &decl.superclass {
        Some(path) => {
            let superclass = find_class(classes, path)?;
            if kind == ClassKind::Module || classes.get(superclass).is_module() {
                return Err(DeclError::ModuleSuperclass {
                    name: decl.name.clone(),
                    superclass: path.clone(),
                });
            }
            Some(superclass)
        }
        None => None,
    };
    let id = match classes.nested(outer, name) {
        Some(existing) => {
            let actual = classes.get(existing).kind;
            if actual != kind {
                return Err(DeclError::KindMismatch {
                    name: decl.name.clone(),
                    declared: kind.name(),
                    actual: actual.name(),
                });
            }
            existing
        }
        None => classes.define(outer, name, kind, superclass, arena),
    };
    if !decl.type_params.is_empty() {
        classes.get_mut(id).type_params = decl.type_params.clone();
    }
    Ok(())
}

fn import_method(decl: &MethodDecl, classes: &mut ClassTable, arena: &mut TypeArena) -> Result<(), DeclError> {
    let owner = find_class(classes, &decl.owner)?;
    let attr_ty = match &decl.ty {
        Some(ty) => lower(ty, classes, arena)?,
        None => TypeId::ANY,
    };
    let reader = || Overload {
        sig: MethodSignature::default(),
        block: None,
        ret: attr_ty,
    };
    let writer = || Overload {
        sig: MethodSignature {
            lead: vec![attr_ty],
            ..MethodSignature::default()
        },
        block: None,
        ret: attr_ty,
    };
    let entries = match decl.kind {
        DeclMethodKind::Method => {
            if decl.overloads.is_empty() {
                return Err(DeclError::EmptyOverloads {
                    owner: decl.owner.clone(),
                    name: decl.name.clone(),
                });
            }
            let overloads = decl
                .overloads
                .iter()
                .map(|ov| lower_overload(ov, classes, arena))
                .collect::<Result<Vec<_>, _>>()?;
            vec![(decl.name.clone(), overloads)]
        }
        DeclMethodKind::AttrReader => vec![(decl.name.clone(), vec![reader()])],
        DeclMethodKind::AttrWriter => vec![(format!("{}=", decl.name), vec![writer()])],
        DeclMethodKind::AttrAccessor => vec![
            (decl.name.clone(), vec![reader()]),
            (format!("{}=", decl.name), vec![writer()]),
        ],
    };
    for (mid, overloads) in entries {
        let builtin = classes
            .own_methods(owner, decl.singleton, &mid)
            .is_some_and(|defs| defs.iter().any(|d| matches!(d, MethodDef::Custom(_))));
        if builtin {
            continue;
        }
        classes.set_method(owner, decl.singleton, &mid, MethodDef::typed(overloads));
    }
    Ok(())
}

/// Imports `set` into the class table and the global variable table.
pub fn import(
    set: &DeclarationSet,
    classes: &mut ClassTable,
    arena: &mut TypeArena,
    gvars: &mut VarTable<String>,
) -> Result<(), DeclError> {
    for decl in &set.classes {
        import_class(decl, classes, arena)?;
    }
    for decl in &set.classes {
        let id = find_class(classes, &decl.name)?;
        for module in &decl.includes {
            let module = find_class(classes, module)?;
            if classes.mix_module(MixKind::Include, id, false, module).is_err() {
                tracing::warn!(class = %decl.name, "declared include would be cyclic; ignored");
            }
        }
    }
    for decl in &set.methods {
        import_method(decl, classes, arena)?;
    }
    for decl in &set.constants {
        let (outer, name) = split_path(&decl.name);
        let owner = match outer {
            Some(path) => find_class(classes, path)?,
            None => ClassId::OBJECT,
        };
        let ty = lower(&decl.ty, classes, arena)?;
        classes.get_mut(owner).consts.declare(name.to_string(), ty);
    }
    for decl in &set.globals {
        let ty = lower(&decl.ty, classes, arena)?;
        gvars.declare(decl.name.clone(), ty);
    }
    for decl in &set.ivars {
        let owner = find_class(classes, &decl.owner)?;
        let ty = lower(&decl.ty, classes, arena)?;
        classes
            .get_mut(owner)
            .ivars
            .declare((decl.singleton, decl.name.clone()), ty);
    }
    tracing::debug!(
        classes = set.classes.len(),
        methods = set.methods.len(),
        "imported declarations"
    );
    Ok(())
}
