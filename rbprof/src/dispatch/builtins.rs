//! Built-in primitives.
//!
//! These are the methods whose effect is on the analysis state itself
//! (defining attributes, mixing in modules, changing visibility) or whose
//! result depends on more than declared types can say (`is_a?` narrowing,
//! container element tracking). They are installed into the class table as
//! [`MethodDef::Custom`] entries and dispatched like any other method.

use super::method::{AliasMethod, AttrKind, AttrMethod, Invocation, MethodDef};
use crate::abstract_interp::continuation::Continuation;
use crate::abstract_interp::env::Elems;
use crate::abstract_interp::Analyzer;
use crate::classes::{ClassTable, MixKind};
use crate::diagnostics::{DiagnosticKind, Severity};
use crate::lattice::{
    receiver_class, screen_name, ArrayElems, ClassId, ContainerKind, HashElems, TypeId, TypeKind,
};
use rbprof_iseq::Literal;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Builtin {
    ClassNew,
    ModuleInclude,
    ModulePrepend,
    ObjectExtend,
    AttrReader,
    AttrWriter,
    AttrAccessor,
    Private,
    Public,
    ModuleFunction,
    AliasMethod,
    VmSetMethodAlias,
    IsA,
    KindOf,
    RespondTo,
    BlockGiven,
    Raise,
    Class,
    Proc,
    Lambda,
    Require,
    NilP,
    ArrayPush,
    ArrayAref,
    ArrayAset,
    HashAref,
    HashAset,
    ProcCall,
}

const INSTALL: &[(ClassId, &str, Builtin)] = &[
    (ClassId::CLASS, "new", Builtin::ClassNew),
    (ClassId::MODULE, "include", Builtin::ModuleInclude),
    (ClassId::MODULE, "prepend", Builtin::ModulePrepend),
    (ClassId::MODULE, "attr_reader", Builtin::AttrReader),
    (ClassId::MODULE, "attr_writer", Builtin::AttrWriter),
    (ClassId::MODULE, "attr_accessor", Builtin::AttrAccessor),
    (ClassId::MODULE, "private", Builtin::Private),
    (ClassId::MODULE, "public", Builtin::Public),
    (ClassId::MODULE, "module_function", Builtin::ModuleFunction),
    (ClassId::MODULE, "alias_method", Builtin::AliasMethod),
    (ClassId::VM_CORE, "set_method_alias", Builtin::VmSetMethodAlias),
    (ClassId::KERNEL, "extend", Builtin::ObjectExtend),
    (ClassId::KERNEL, "is_a?", Builtin::IsA),
    (ClassId::KERNEL, "kind_of?", Builtin::KindOf),
    (ClassId::KERNEL, "respond_to?", Builtin::RespondTo),
    (ClassId::KERNEL, "block_given?", Builtin::BlockGiven),
    (ClassId::KERNEL, "raise", Builtin::Raise),
    (ClassId::KERNEL, "class", Builtin::Class),
    (ClassId::KERNEL, "proc", Builtin::Proc),
    (ClassId::KERNEL, "lambda", Builtin::Lambda),
    (ClassId::KERNEL, "require", Builtin::Require),
    (ClassId::KERNEL, "require_relative", Builtin::Require),
    (ClassId::KERNEL, "nil?", Builtin::NilP),
    (ClassId::ARRAY, "<<", Builtin::ArrayPush),
    (ClassId::ARRAY, "push", Builtin::ArrayPush),
    (ClassId::ARRAY, "[]", Builtin::ArrayAref),
    (ClassId::ARRAY, "[]=", Builtin::ArrayAset),
    (ClassId::HASH, "[]", Builtin::HashAref),
    (ClassId::HASH, "[]=", Builtin::HashAset),
    (ClassId::PROC, "call", Builtin::ProcCall),
];

/// Registers every primitive, replacing any declaration of the same name.
pub fn install(classes: &mut ClassTable) {
    for &(class, mid, builtin) in INSTALL {
        let mut def = MethodDef::custom(builtin);
        if matches!(
            builtin,
            Builtin::Private
                | Builtin::Public
                | Builtin::ModuleFunction
                | Builtin::Raise
                | Builtin::Require
                | Builtin::Proc
                | Builtin::Lambda
                | Builtin::BlockGiven
        ) {
            def.set_public(false);
        }
        classes.set_method(class, false, mid, def);
    }
}

/// Runs `builtin` for one receiver member.
pub(crate) fn call(builtin: Builtin, az: &mut Analyzer, inv: Invocation) {
    match builtin {
        Builtin::ClassNew => class_new(az, inv),
        Builtin::ModuleInclude => mix(az, inv, MixKind::Include, false),
        Builtin::ModulePrepend => mix(az, inv, MixKind::Prepend, false),
        Builtin::ObjectExtend => mix(az, inv, MixKind::Include, true),
        Builtin::AttrReader => define_attrs(az, inv, &[AttrKind::Reader]),
        Builtin::AttrWriter => define_attrs(az, inv, &[AttrKind::Writer]),
        Builtin::AttrAccessor => define_attrs(az, inv, &[AttrKind::Reader, AttrKind::Writer]),
        Builtin::Private => visibility(az, inv, false),
        Builtin::Public => visibility(az, inv, true),
        Builtin::ModuleFunction => module_function(az, inv),
        Builtin::AliasMethod => {
            let (new, old) = match inv.args.lead.as_slice() {
                [new, old] => (*new, *old),
                _ => return arity(az, inv, 2),
            };
            if let Some((class, _)) = receiver_class(&az.types, inv.recv) {
                let singleton = az.cref_at(inv.ep).singleton;
                alias(az, class, singleton, new, old);
            }
            let recv = inv.recv;
            az.resume(&inv.ctn, inv.ep, inv.env, recv);
        }
        Builtin::VmSetMethodAlias => {
            if let [cbase, new, old] = inv.args.lead.as_slice() {
                let (cbase, new, old) = (*cbase, *new, *old);
                let cref = az.cref_at(inv.ep);
                let (class, singleton) = match az.types.kind(cbase) {
                    TypeKind::Class(c) => (*c, false),
                    _ => (cref.class, cref.singleton),
                };
                alias(az, class, singleton, new, old);
            }
            az.resume(&inv.ctn, inv.ep, inv.env, TypeId::NIL);
        }
        Builtin::IsA | Builtin::KindOf => is_a(az, inv),
        Builtin::RespondTo => {
            let ty = match (receiver_class(&az.types, inv.recv), inv.args.lead.first()) {
                (Some((class, singleton)), Some(&name)) => match symbol_name(az, name) {
                    Some(mid) => bool_type(az.classes.search_method(class, singleton, &mid).is_some()),
                    None => TypeId::BOOL,
                },
                _ => TypeId::BOOL,
            };
            az.resume(&inv.ctn, inv.ep, inv.env, ty);
        }
        Builtin::BlockGiven => {
            let block = inv.env.static_env.block;
            let members = az.types.members(block);
            let ty = if members.iter().all(|m| m.is_nil()) {
                TypeId::FALSE
            } else if members.iter().any(|m| m.is_nil()) {
                TypeId::BOOL
            } else {
                TypeId::TRUE
            };
            az.resume(&inv.ctn, inv.ep, inv.env, ty);
        }
        Builtin::Raise => {
            let error = match inv.args.lead.first().map(|&t| az.types.kind(t).clone()) {
                Some(TypeKind::Class(class)) => az.types.instance(class),
                Some(TypeKind::Instance { class, .. }) if class != ClassId::STRING => {
                    az.types.instance(class)
                }
                _ => az.types.instance(ClassId::RUNTIME_ERROR),
            };
            az.raise_error(error);
        }
        Builtin::Class => {
            let ty = match receiver_class(&az.types, inv.recv) {
                Some((class, false)) => az.types.class_object(class),
                Some((class, true)) => {
                    let meta = if az.classes.get(class).is_module() {
                        ClassId::MODULE
                    } else {
                        ClassId::CLASS
                    };
                    az.types.class_object(meta)
                }
                None => TypeId::ANY,
            };
            az.resume(&inv.ctn, inv.ep, inv.env, ty);
        }
        Builtin::Proc | Builtin::Lambda => {
            let block = inv.args.block;
            let ty = if block.is_nil() { TypeId::ANY } else { block };
            az.resume(&inv.ctn, inv.ep, inv.env, ty);
        }
        Builtin::Require => az.resume(&inv.ctn, inv.ep, inv.env, TypeId::BOOL),
        Builtin::NilP => {
            let ty = bool_type(inv.recv.is_nil());
            az.resume(&inv.ctn, inv.ep, inv.env, ty);
        }
        Builtin::ArrayPush => array_push(az, inv),
        Builtin::ArrayAref => array_aref(az, inv),
        Builtin::ArrayAset => array_aset(az, inv),
        Builtin::HashAref => hash_aref(az, inv),
        Builtin::HashAset => hash_aset(az, inv),
        Builtin::ProcCall => {
            let Invocation {
                recv,
                args,
                ep,
                env,
                ctn,
                ..
            } = inv;
            az.invoke_block(recv, args, ep, env, ctn);
        }
    }
}

fn bool_type(b: bool) -> TypeId {
    if b {
        TypeId::TRUE
    } else {
        TypeId::FALSE
    }
}

fn symbol_name(az: &Analyzer, ty: TypeId) -> Option<String> {
    match az.types.kind(ty) {
        TypeKind::Literal(Literal::Sym(s)) | TypeKind::Literal(Literal::Str(s)) => Some(s.clone()),
        _ => None,
    }
}

fn arity(az: &mut Analyzer, inv: Invocation, expected: usize) {
    let msg = format!(
        "wrong number of arguments (given {}, expected {expected})",
        inv.args.given()
    );
    az.report(inv.ep, DiagnosticKind::Arity, Severity::Error, msg);
    az.resume(&inv.ctn, inv.ep, inv.env, TypeId::ANY);
}

fn class_new(az: &mut Analyzer, inv: Invocation) {
    let TypeKind::Class(class) = az.types.kind(inv.recv).clone() else {
        return az.resume(&inv.ctn, inv.ep, inv.env, TypeId::ANY);
    };
    let instance = match class {
        ClassId::ARRAY => az.types.array(ArrayElems::homogeneous(TypeId::ANY)),
        ClassId::HASH => az.types.hash(HashElems::single(TypeId::ANY, TypeId::ANY)),
        _ => az.types.instance(class),
    };
    if az.classes.search_method(class, false, "initialize").is_none() {
        return az.resume(&inv.ctn, inv.ep, inv.env, instance);
    }
    let ctn = Continuation::Replace {
        value: instance,
        then: Box::new(inv.ctn),
    };
    az.dispatch(instance, "initialize", inv.args, true, inv.ep, inv.env, ctn);
}

fn mix(az: &mut Analyzer, inv: Invocation, kind: MixKind, singleton: bool) {
    let target = match (az.types.kind(inv.recv), singleton) {
        (TypeKind::Class(c), _) => Some((*c, singleton)),
        (TypeKind::Instance { class, .. }, true) if *class == ClassId::OBJECT => {
            Some((ClassId::OBJECT, false))
        }
        (_, true) => {
            tracing::debug!(
                recv = %screen_name(&az.types, &az.classes, inv.recv),
                "extend on a receiver without a singleton class ignored"
            );
            None
        }
        _ => None,
    };
    if let Some((target, singleton)) = target {
        // `include A, B` puts A in front of B
        for &arg in inv.args.lead.iter().rev() {
            let TypeKind::Class(module) = *az.types.kind(arg) else {
                continue;
            };
            if let Err(cycle) = az.classes.mix_module(kind, target, singleton, module) {
                let msg = format!(
                    "cyclic include detected: {} in {}",
                    az.classes.path(cycle.module),
                    az.classes.path(cycle.target)
                );
                az.report(inv.ep, DiagnosticKind::AncestorCycle, Severity::Error, msg);
            }
        }
    }
    let recv = inv.recv;
    az.resume(&inv.ctn, inv.ep, inv.env, recv);
}

fn define_attrs(az: &mut Analyzer, inv: Invocation, kinds: &[AttrKind]) {
    if let TypeKind::Class(class) = *az.types.kind(inv.recv) {
        let singleton = az.cref_at(inv.ep).singleton;
        let public = inv.env.static_env.public;
        for &arg in &inv.args.lead {
            let Some(name) = symbol_name(az, arg) else {
                continue;
            };
            for &kind in kinds {
                let mid = match kind {
                    AttrKind::Reader => name.clone(),
                    AttrKind::Writer => format!("{name}="),
                };
                let def = MethodDef::Attr(AttrMethod {
                    ivar: format!("@{name}"),
                    kind,
                    public,
                });
                az.classes.add_method(class, singleton, &mid, def);
            }
        }
    }
    az.resume(&inv.ctn, inv.ep, inv.env, TypeId::NIL);
}

fn visibility(az: &mut Analyzer, mut inv: Invocation, public: bool) {
    if inv.args.lead.is_empty() {
        inv.env.static_env.public = public;
        inv.env.static_env.module_function = false;
    } else if let TypeKind::Class(class) = *az.types.kind(inv.recv) {
        let singleton = az.cref_at(inv.ep).singleton;
        for &arg in &inv.args.lead {
            let Some(mid) = symbol_name(az, arg) else {
                continue;
            };
            if let Some(defs) = az.classes.get_mut(class).methods.get_mut(&(singleton, mid)) {
                defs.iter_mut().for_each(|def| def.set_public(public));
            }
        }
    }
    let recv = inv.recv;
    az.resume(&inv.ctn, inv.ep, inv.env, recv);
}

fn module_function(az: &mut Analyzer, mut inv: Invocation) {
    if inv.args.lead.is_empty() {
        inv.env.static_env.module_function = true;
    } else if let TypeKind::Class(module) = *az.types.kind(inv.recv) {
        for &arg in &inv.args.lead {
            let Some(mid) = symbol_name(az, arg) else {
                continue;
            };
            let defs = az.classes.own_methods(module, false, &mid).map(<[MethodDef]>::to_vec);
            for mut def in defs.unwrap_or_default() {
                def.set_public(true);
                az.classes.add_method(module, true, &mid, def);
            }
        }
    }
    let recv = inv.recv;
    az.resume(&inv.ctn, inv.ep, inv.env, recv);
}

fn alias(az: &mut Analyzer, class: ClassId, singleton: bool, new: TypeId, old: TypeId) {
    let (Some(new), Some(old)) = (symbol_name(az, new), symbol_name(az, old)) else {
        return;
    };
    let Some((_, _, defs)) = az.classes.search_method(class, singleton, &old) else {
        return;
    };
    for def in defs {
        let def = MethodDef::Alias(AliasMethod {
            orig: old.clone(),
            def: Box::new(def),
        });
        az.classes.add_method(class, singleton, &new, def);
    }
}

fn is_a(az: &mut Analyzer, inv: Invocation) {
    let ty = match (receiver_class(&az.types, inv.recv), inv.args.lead.first()) {
        (Some((class, singleton)), Some(&arg)) => match *az.types.kind(arg) {
            TypeKind::Class(target) => {
                let class = if singleton {
                    if az.classes.get(class).is_module() {
                        ClassId::MODULE
                    } else {
                        ClassId::CLASS
                    }
                } else {
                    class
                };
                bool_type(az.classes.is_subclass(class, target))
            }
            _ => TypeId::BOOL,
        },
        _ => TypeId::BOOL,
    };
    az.resume(&inv.ctn, inv.ep, inv.env, ty);
}

fn literal_index(az: &Analyzer, ty: TypeId) -> Option<i64> {
    match az.types.kind(ty) {
        TypeKind::Literal(Literal::Int(i)) => Some(*i),
        _ => None,
    }
}

fn array_push(az: &mut Analyzer, mut inv: Invocation) {
    if let TypeKind::Local {
        container: ContainerKind::Array,
        site,
    } = *az.types.kind(inv.recv_local)
    {
        let elem = az.types.union_all(inv.args.lead.iter().copied());
        let elems = Elems::Array(ArrayElems::homogeneous(elem));
        az.update_container(inv.ep, &mut inv.env, site, elems);
    }
    let recv = inv.recv_local;
    az.resume(&inv.ctn, inv.ep, inv.env, recv);
}

fn array_elems(az: &Analyzer, recv: TypeId) -> Option<ArrayElems> {
    match az.types.kind(recv) {
        TypeKind::Array(elems) => Some(elems.clone()),
        _ => None,
    }
}

fn array_aref(az: &mut Analyzer, inv: Invocation) {
    let Some(elems) = array_elems(az, inv.recv) else {
        return az.resume(&inv.ctn, inv.ep, inv.env, TypeId::ANY);
    };
    let ty = match inv.args.lead.as_slice() {
        [index] => match literal_index(az, *index) {
            Some(i) => {
                let len = elems.lead.len() as i64;
                let i = if i < 0 { i + len } else { i };
                match usize::try_from(i).ok().and_then(|i| elems.lead.get(i)) {
                    Some(&ty) => ty,
                    None if elems.rest.is_bottom() => TypeId::NIL,
                    None => elems.rest,
                }
            }
            None => match az.types.kind(*index) {
                TypeKind::Instance {
                    class: ClassId::RANGE,
                    ..
                } => {
                    let elem = az.types.squash(&elems);
                    az.types.array(ArrayElems::homogeneous(elem))
                }
                _ => az.types.squash(&elems),
            },
        },
        _ => {
            let elem = az.types.squash(&elems);
            az.types.array(ArrayElems::homogeneous(elem))
        }
    };
    let ty = if ty.is_bottom() { TypeId::NIL } else { ty };
    az.resume(&inv.ctn, inv.ep, inv.env, ty);
}

fn array_aset(az: &mut Analyzer, mut inv: Invocation) {
    let (index, value) = match inv.args.lead.as_slice() {
        [index, value] => (*index, *value),
        [.., value] => (TypeId::ANY, *value),
        [] => return arity(az, inv, 2),
    };
    if let TypeKind::Local {
        container: ContainerKind::Array,
        site,
    } = *az.types.kind(inv.recv_local)
    {
        let len = match az.container(inv.ep, &inv.env, site) {
            Some(Elems::Array(old)) if old.rest.is_bottom() => Some(old.lead.len()),
            _ => None,
        };
        let slot = literal_index(az, index).and_then(|i| usize::try_from(i).ok());
        let elems = match (len, slot) {
            (Some(len), Some(i)) if i < len => {
                let mut lead = vec![TypeId::BOTTOM; len];
                lead[i] = value;
                ArrayElems::tuple(lead)
            }
            _ => ArrayElems::homogeneous(value),
        };
        az.update_container(inv.ep, &mut inv.env, site, Elems::Array(elems));
    }
    az.resume(&inv.ctn, inv.ep, inv.env, value);
}

fn hash_aref(az: &mut Analyzer, inv: Invocation) {
    let TypeKind::Hash(elems) = az.types.kind(inv.recv).clone() else {
        return az.resume(&inv.ctn, inv.ep, inv.env, TypeId::ANY);
    };
    let key = inv.args.lead.first().copied().unwrap_or(TypeId::ANY);
    let ty = match elems.entries.get(&key) {
        Some(&ty) => ty,
        None => az.types.hash_key_value(&elems).1,
    };
    let ty = if ty.is_bottom() { TypeId::NIL } else { ty };
    az.resume(&inv.ctn, inv.ep, inv.env, ty);
}

fn hash_aset(az: &mut Analyzer, mut inv: Invocation) {
    let (key, value) = match inv.args.lead.as_slice() {
        [key, value] => (*key, *value),
        _ => return arity(az, inv, 2),
    };
    if let TypeKind::Local {
        container: ContainerKind::Hash,
        site,
    } = *az.types.kind(inv.recv_local)
    {
        let elems = Elems::Hash(HashElems::single(key, value));
        az.update_container(inv.ep, &mut inv.env, site, elems);
    }
    az.resume(&inv.ctn, inv.ep, inv.env, value);
}

