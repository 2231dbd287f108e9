//! Single-instruction transfer functions.
//!
//! - Literals and containers: `putobject`, `duparray`, `newarray`, `newhash`, ...
//! - Definitions: `definemethod`, `definesmethod`, `defineclass`
//! - Stack shuffles: `dup`, `swap`, `topn`, `setn`, `adjuststack`, ...
//! - Branches, including the fused narrowing probes
//!
//! Calls, variables and non-local control live in the sibling modules.

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]

use super::{pop, pop_n, top, Analyzer, PendingMethod};
use crate::abstract_interp::conditional::narrow;
use crate::abstract_interp::continuation::Continuation;
use crate::abstract_interp::env::{Elems, Env, StaticEnv};
use crate::abstract_interp::state::{AllocSite, CRef, CRefId, Context, ExecutionPoint, SiteStep};
use crate::classes::ClassKind;
use crate::dispatch::{IseqMethod, MethodDef};
use crate::error::InterpError;
use crate::lattice::{receiver_class, ArrayElems, ClassId, ContainerKind, HashElems, TypeId, TypeKind};
use rbprof_iseq::{BranchKind, BranchOp, IseqId, Literal, Op, SpecialObject};

const DEFINECLASS_TYPE_MASK: u32 = 0x07;
const DEFINECLASS_SINGLETON: u32 = 0x01;
const DEFINECLASS_MODULE: u32 = 0x02;
const DEFINECLASS_HAS_SUPERCLASS: u32 = 0x10;
const EXPANDARRAY_SPLAT: u32 = 0x01;

/// Where a fused probe writes the narrowed value on each edge.
#[derive(Debug, Clone, Copy)]
enum NarrowTarget {
    Local(usize),
    Top,
    LocalAndPush(usize),
}

impl Analyzer {
    pub(super) fn execute(&mut self, ep: ExecutionPoint, mut env: Env, op: &Op) -> Result<(), InterpError> {
        match op {
            Op::BodyStart | Op::Nop | Op::FreezeString => {}

            Op::PutNil => env.push(TypeId::NIL),
            Op::PutSelf => env.push(env.static_env.recv),
            Op::PutObject(lit) | Op::DupArray(lit) | Op::DupHash(lit) => {
                let ty = self.types.literal(lit.clone());
                let ty = self.localize(ep, &mut env, ty, AllocSite::new(ep));
                env.push(ty);
            }
            Op::PutString(s) => {
                let ty = self.types.literal(Literal::Str(s.clone()));
                env.push(ty);
            }
            Op::PutSpecialObject(special) => {
                let ty = match special {
                    SpecialObject::VmCore => self.types.class_object(ClassId::VM_CORE),
                    SpecialObject::CBase | SpecialObject::ConstBase => {
                        let class = self.cref_at(ep).class;
                        self.types.class_object(class)
                    }
                };
                env.push(ty);
            }
            Op::NewArray(n) | Op::NewArrayKwSplat(n) => {
                let items = pop_n(&mut env, *n, "newarray")?;
                let site = self.state.sites.intern(AllocSite::new(ep));
                self.update_container(ep, &mut env, site, Elems::Array(ArrayElems::tuple(items)));
                let ty = self.types.local(ContainerKind::Array, site);
                env.push(ty);
            }
            Op::NewHash(n) => {
                let items = pop_n(&mut env, *n, "newhash")?;
                let mut elems = HashElems::default();
                for pair in items.chunks(2) {
                    if let [k, v] = pair {
                        elems = self.types.union_hash_elems(&elems, &HashElems::single(*k, *v));
                    }
                }
                let site = self.state.sites.intern(AllocSite::new(ep));
                self.update_container(ep, &mut env, site, Elems::Hash(elems));
                let ty = self.types.local(ContainerKind::Hash, site);
                env.push(ty);
            }
            Op::NewRange { .. } => {
                pop_n(&mut env, 2, "newrange")?;
                env.push(self.types.instance(ClassId::RANGE));
            }
            Op::ConcatStrings(n) => {
                pop_n(&mut env, *n, "concatstrings")?;
                env.push(self.types.instance(ClassId::STRING));
            }
            Op::ToString | Op::AnyToString => {
                pop_n(&mut env, 2, op.name())?;
                env.push(self.types.instance(ClassId::STRING));
            }
            Op::ObjToString(_) => {
                pop(&mut env, "objtostring")?;
                env.push(self.types.instance(ClassId::STRING));
            }
            Op::ToRegexp(n) => {
                pop_n(&mut env, *n, "toregexp")?;
                env.push(self.types.instance(ClassId::REGEXP));
            }
            Op::Intern => {
                pop(&mut env, "intern")?;
                env.push(self.types.instance(ClassId::SYMBOL));
            }

            Op::DefineMethod { mid, body } => self.define_method(ep, &env, mid, *body),
            Op::DefineSMethod { mid, body } => {
                let recv = pop(&mut env, "definesmethod")?;
                self.define_singleton_method(ep, recv, mid, *body);
            }
            Op::DefineClass { name, body, flags } => {
                let operands = pop_n(&mut env, 2, "defineclass")?;
                return self.define_class(ep, env, name, *body, *flags, operands[0], operands[1]);
            }

            Op::Send { call, block } => return self.execute_send(ep, env, call, *block, Continuation::Push),
            Op::SendBranch { call, block, branch } => {
                return self.execute_send(ep, env, call, *block, Continuation::Branch(*branch))
            }
            Op::InvokeBlock(call) => return self.execute_invoke_block(ep, env, call),
            Op::InvokeSuper { call, block } => return self.execute_invoke_super(ep, env, call, *block),
            Op::RecvGetLocalSendBranch {
                local,
                call,
                block,
                branch,
            } => return self.execute_recv_local_send_branch(ep, env, local.idx, call, *block, *branch),
            Op::ArgGetLocalSendBranch {
                local,
                call,
                block,
                branch,
            } => return self.execute_arg_local_send_branch(ep, env, local.idx, call, *block, *branch),
            Op::Leave => return self.execute_leave(ep, env),
            Op::Throw(kind) => return self.execute_throw(ep, env, *kind),
            Op::Once(body) => return self.execute_once(ep, env, *body),

            Op::Branch(branch) => {
                let cond = pop(&mut env, "branch")?;
                self.route(ep, env, *branch, cond, None);
                return Ok(());
            }
            Op::Jump(target) => {
                self.merge_env(ep.jump(*target), env);
                return Ok(());
            }

            Op::GetLocal(local) => {
                let ty = self.read_local(ep, &env, *local)?;
                env.push(ty);
            }
            Op::SetLocal(local) => {
                let ty = pop(&mut env, "setlocal")?;
                self.write_local(ep, &mut env, *local, ty)?;
            }
            Op::GetInstanceVariable(name) => return self.execute_get_ivar(ep, env, name),
            Op::SetInstanceVariable(name) => {
                let ty = pop(&mut env, "setinstancevariable")?;
                self.execute_set_ivar(ep, &env, name, ty);
            }
            Op::GetClassVariable(name) => return self.execute_get_cvar(ep, env, name),
            Op::SetClassVariable(name) => {
                let ty = pop(&mut env, "setclassvariable")?;
                self.execute_set_cvar(ep, &env, name, ty);
            }
            Op::GetGlobal(name) => return self.execute_get_gvar(ep, env, name),
            Op::SetGlobal(name) => {
                let ty = pop(&mut env, "setglobal")?;
                self.execute_set_gvar(ep, &env, name, ty);
            }
            Op::GetConstant(name) => {
                let operands = pop_n(&mut env, 2, "getconstant")?;
                return self.execute_get_constant(ep, env, name, operands[0]);
            }
            Op::SetConstant(name) => {
                let operands = pop_n(&mut env, 2, "setconstant")?;
                self.execute_set_constant(ep, &env, name, operands[0], operands[1]);
            }
            Op::GetSpecial { .. } => env.push(TypeId::ANY),
            Op::SetSpecial(_) => {
                pop(&mut env, "setspecial")?;
            }

            Op::Dup => {
                let ty = top(&env, 0, "dup")?;
                env.push(ty);
            }
            Op::DupN(n) => {
                let items = pop_n(&mut env, *n, "dupn")?;
                env.stack.extend(items.iter().copied());
                env.stack.extend(items);
            }
            Op::Pop => {
                pop(&mut env, "pop")?;
            }
            Op::Swap => {
                let a = pop(&mut env, "swap")?;
                let b = pop(&mut env, "swap")?;
                env.push(a);
                env.push(b);
            }
            Op::Reverse(n) => {
                let items = pop_n(&mut env, *n, "reverse")?;
                env.stack.extend(items.into_iter().rev());
            }
            Op::TopN(n) => {
                let ty = top(&env, *n, "topn")?;
                env.push(ty);
            }
            Op::SetN(n) => {
                let ty = top(&env, 0, "setn")?;
                if !env.set_top(*n, ty) {
                    return Err(InterpError::StackUnderflow { op: "setn" });
                }
            }
            Op::AdjustStack(n) => {
                pop_n(&mut env, *n, "adjuststack")?;
            }

            Op::Defined => {
                pop(&mut env, "defined")?;
                let string = self.types.instance(ClassId::STRING);
                env.push(self.types.optional(string));
            }
            Op::CheckMatch(_) => {
                pop_n(&mut env, 2, "checkmatch")?;
                env.push(TypeId::BOOL);
            }
            Op::CheckKeyword { .. } => env.push(TypeId::BOOL),
            Op::CheckType(_) => {
                pop(&mut env, "checktype")?;
                env.push(TypeId::BOOL);
            }
            Op::SplatArray => {
                let ty = pop(&mut env, "splatarray")?;
                let ty = self.splat_array(ep, &mut env, ty);
                env.push(ty);
            }
            Op::ExpandArray { num, flag } => {
                let ty = pop(&mut env, "expandarray")?;
                self.expand_array(ep, &mut env, ty, *num, flag & EXPANDARRAY_SPLAT != 0);
            }
            Op::ConcatArray => {
                let operands = pop_n(&mut env, 2, "concatarray")?;
                let mut elems = Vec::new();
                for ty in operands {
                    let ty = self.globalize(ep, &env, ty);
                    elems.push(self.element_type(ty));
                }
                let elem = self.types.union_all(elems);
                let ty = self.types.array(ArrayElems::homogeneous(elem));
                let ty = self.localize(ep, &mut env, ty, AllocSite::new(ep));
                env.push(ty);
            }

            Op::GetLocalBranch { local, branch } => {
                let ty = self.local_at(&env, local.idx)?;
                self.narrow_branch(ep, env, *branch, ty, NarrowTarget::Local(local.idx));
                return Ok(());
            }
            Op::GetLocalDupBranch { local, branch } => {
                let ty = self.local_at(&env, local.idx)?;
                self.narrow_branch(ep, env, *branch, ty, NarrowTarget::LocalAndPush(local.idx));
                return Ok(());
            }
            Op::DupSetLocalBranch { local, branch } => {
                let ty = pop(&mut env, "dup_setlocal_branch")?;
                self.local_at(&env, local.idx)?;
                self.narrow_branch(ep, env, *branch, ty, NarrowTarget::Local(local.idx));
                return Ok(());
            }
            Op::DupBranch(branch) => {
                let ty = top(&env, 0, "dup_branch")?;
                self.narrow_branch(ep, env, *branch, ty, NarrowTarget::Top);
                return Ok(());
            }
            Op::GetLocalCheckMatchBranch { local, branch } => {
                let pattern = pop(&mut env, "getlocal_checkmatch_branch")?;
                let ty = self.local_at(&env, local.idx)?;
                self.case_branch(ep, env, *branch, local.idx, ty, pattern);
                return Ok(());
            }
        }
        self.merge_env(ep.next(), env);
        Ok(())
    }

    fn local_at(&self, env: &Env, idx: usize) -> Result<TypeId, InterpError> {
        env.local(idx).ok_or(InterpError::LocalOutOfRange { idx })
    }

    // =========================================================================
    // Definitions
    // =========================================================================

    fn define_method(&mut self, ep: ExecutionPoint, env: &Env, mid: &str, body: IseqId) {
        let cref_id = self.frame_cref(ep);
        let cref = self.state.cref(cref_id).clone();
        let static_env = &env.static_env;
        let def = MethodDef::Iseq(IseqMethod {
            iseq: body,
            cref: cref_id,
            public: static_env.public && !static_env.module_function,
        });
        self.classes.add_method(cref.class, cref.singleton, mid, def);
        if static_env.module_function {
            let def = MethodDef::Iseq(IseqMethod {
                iseq: body,
                cref: cref_id,
                public: true,
            });
            self.classes.add_method(cref.class, true, mid, def);
        }
        tracing::debug!(class = %self.classes.path(cref.class), mid, "method defined");
        self.remember_pending(body, cref_id, mid, cref.class, cref.singleton);
    }

    fn define_singleton_method(&mut self, ep: ExecutionPoint, recv: TypeId, mid: &str, body: IseqId) {
        let outer = self.frame_cref(ep);
        for member in self.types.members(recv) {
            let TypeKind::Class(class) = *self.types.kind(member) else {
                tracing::debug!(mid, "singleton method on a non-class receiver ignored");
                continue;
            };
            let cref = self.state.crefs.intern(CRef {
                outer: Some(outer),
                class,
                singleton: true,
            });
            let def = MethodDef::Iseq(IseqMethod {
                iseq: body,
                cref,
                public: true,
            });
            self.classes.add_method(class, true, mid, def);
            self.remember_pending(body, cref, mid, class, true);
        }
    }

    fn remember_pending(
        &mut self,
        body: IseqId,
        cref: CRefId,
        mid: &str,
        class: ClassId,
        singleton: bool,
    ) {
        if self.entered.contains(&(body, cref)) {
            return;
        }
        self.pending_methods.entry((body, cref)).or_insert_with(|| PendingMethod {
            mid: mid.to_string(),
            class,
            singleton,
        });
    }

    #[allow(clippy::too_many_arguments)]
    fn define_class(
        &mut self,
        ep: ExecutionPoint,
        env: Env,
        name: &str,
        body: IseqId,
        flags: u32,
        cbase: TypeId,
        superclass: TypeId,
    ) -> Result<(), InterpError> {
        let outer_cref = self.frame_cref(ep);
        let lexical = self.state.cref(outer_cref).class;
        let outer = match *self.types.kind(cbase) {
            TypeKind::Class(c) => c,
            _ => lexical,
        };
        let existed = self.classes.nested(outer, name).is_some();

        let (class, singleton) = match flags & DEFINECLASS_TYPE_MASK {
            DEFINECLASS_SINGLETON => match receiver_class(&self.types, cbase) {
                Some((class, _)) => (class, true),
                None => (lexical, true),
            },
            DEFINECLASS_MODULE => {
                let id = match self.classes.nested(outer, name) {
                    Some(id) => id,
                    None => self.classes.define(outer, name, ClassKind::Module, None, &mut self.types),
                };
                (id, false)
            }
            _ => {
                let superclass = if flags & DEFINECLASS_HAS_SUPERCLASS != 0 {
                    match *self.types.kind(superclass) {
                        TypeKind::Class(s) if !self.classes.get(s).is_module() => Some(s),
                        _ => {
                            tracing::debug!(class = name, "superclass is not a class; using Object");
                            None
                        }
                    }
                } else {
                    None
                };
                let id = match self.classes.nested(outer, name) {
                    Some(id) => id,
                    None => self.classes.define(outer, name, ClassKind::Class, superclass, &mut self.types),
                };
                (id, false)
            }
        };
        if !singleton {
            self.classes.get_mut(class).user_defined = true;
            if !existed {
                self.constant_bound(outer, name);
            }
        }

        let cref = self.state.crefs.intern(CRef {
            outer: Some(outer_cref),
            class,
            singleton,
        });
        let ctx = self.state.contexts.intern(Context::Iseq {
            iseq: body,
            cref,
            mid: None,
        });
        let locals = self.program.get(body).map_or(0, |iseq| iseq.local_count());
        let recv = self.types.class_object(class);
        let body_env = Env::new(StaticEnv::new(recv, TypeId::NIL), vec![TypeId::NIL; locals]);
        self.merge_env(ExecutionPoint::new(ctx, 0, None), body_env);
        self.add_callsite(ctx, ep, env, Continuation::Push);
        Ok(())
    }

    // =========================================================================
    // Arrays
    // =========================================================================

    /// Element type of a splatted value: array elements, or the value itself.
    fn element_type(&mut self, ty: TypeId) -> TypeId {
        let mut out = Vec::new();
        for member in self.types.members(ty) {
            match self.types.kind(member).clone() {
                TypeKind::Array(elems) => out.push(self.types.squash(&elems)),
                _ if member.is_nil() => {}
                _ => out.push(member),
            }
        }
        self.types.union_all(out)
    }

    fn splat_array(&mut self, ep: ExecutionPoint, env: &mut Env, ty: TypeId) -> TypeId {
        if matches!(
            self.types.kind(ty),
            TypeKind::Local {
                container: ContainerKind::Array,
                ..
            }
        ) {
            return ty;
        }
        let ty = self.globalize(ep, env, ty);
        let mut arrays = Vec::new();
        for member in self.types.members(ty) {
            let array = match self.types.kind(member) {
                TypeKind::Array(_) => member,
                TypeKind::Any => self.types.array(ArrayElems::homogeneous(TypeId::ANY)),
                _ if member.is_nil() => self.types.array(ArrayElems::tuple(Vec::new())),
                _ => self.types.array(ArrayElems::tuple(vec![member])),
            };
            arrays.push(array);
        }
        let array = self.types.union_all(arrays);
        self.localize(ep, env, array, AllocSite::tagged(ep, "splat"))
    }

    /// Pushes `num` elements of `ty` with element 0 on top, preceded by the
    /// remainder array when `splat` is set.
    fn expand_array(&mut self, ep: ExecutionPoint, env: &mut Env, ty: TypeId, num: usize, splat: bool) {
        let ty = self.globalize(ep, env, ty);
        let mut slots: Vec<Vec<TypeId>> = vec![Vec::new(); num];
        let mut rests = Vec::new();
        for member in self.types.members(ty) {
            match self.types.kind(member).clone() {
                TypeKind::Array(elems) => {
                    for (i, slot) in slots.iter_mut().enumerate() {
                        let elem = match elems.lead.get(i) {
                            Some(&t) => t,
                            None if elems.rest.is_bottom() => TypeId::NIL,
                            None => self.types.optional(elems.rest),
                        };
                        slot.push(elem);
                    }
                    let rest_lead = elems.lead.get(num..).map(<[TypeId]>::to_vec).unwrap_or_default();
                    rests.push(self.types.array(ArrayElems {
                        lead: rest_lead,
                        rest: elems.rest,
                    }));
                }
                TypeKind::Any => {
                    for slot in slots.iter_mut() {
                        slot.push(TypeId::ANY);
                    }
                    rests.push(self.types.array(ArrayElems::homogeneous(TypeId::ANY)));
                }
                _ => {
                    for (i, slot) in slots.iter_mut().enumerate() {
                        slot.push(if i == 0 { member } else { TypeId::NIL });
                    }
                    rests.push(self.types.array(ArrayElems::tuple(Vec::new())));
                }
            }
        }
        if splat {
            let rest = self.types.union_all(rests);
            let rest = self.localize(ep, env, rest, AllocSite::tagged(ep, "rest"));
            env.push(rest);
        }
        for (i, members) in slots.into_iter().enumerate().rev() {
            let elem = self.types.union_all(members);
            let site = AllocSite::new(ep).child(SiteStep::Index(i));
            let elem = self.localize(ep, env, elem, site);
            env.push(elem);
        }
    }

    // =========================================================================
    // Narrowing
    // =========================================================================

    fn narrow_branch(&mut self, ep: ExecutionPoint, env: Env, branch: BranchOp, ty: TypeId, target: NarrowTarget) {
        let (jump, fall) = narrow(&mut self.types, branch.kind, ty);
        if let Some(ty) = jump {
            let env = apply_narrowed(env.clone(), target, ty);
            self.merge_env(ep.jump(branch.target), env);
        }
        if let Some(ty) = fall {
            let env = apply_narrowed(env, target, ty);
            self.merge_env(ep.next(), env);
        }
    }

    /// `case x when C`: splits the local by whether each member is a `C`.
    fn case_branch(&mut self, ep: ExecutionPoint, env: Env, branch: BranchOp, local: usize, ty: TypeId, pattern: TypeId) {
        let patterns: Vec<ClassId> = self
            .types
            .members(pattern)
            .into_iter()
            .filter_map(|m| match *self.types.kind(m) {
                TypeKind::Class(c) => Some(c),
                _ => None,
            })
            .collect();
        let mut matched = Vec::new();
        let mut unmatched = Vec::new();
        for member in self.types.members(ty) {
            let (hit, miss) = if patterns.is_empty() {
                (true, true)
            } else {
                self.class_match(member, &patterns)
            };
            if hit {
                matched.push(member);
            }
            if miss {
                unmatched.push(member);
            }
        }
        let (jump, fall) = match branch.kind {
            BranchKind::If => (matched, unmatched),
            BranchKind::Unless => (unmatched, matched),
            BranchKind::Nil => (Vec::new(), self.types.members(ty)),
        };
        if !jump.is_empty() {
            let narrowed = self.types.union_all(jump);
            let env = apply_narrowed(env.clone(), NarrowTarget::Local(local), narrowed);
            self.merge_env(ep.jump(branch.target), env);
        }
        if !fall.is_empty() {
            let narrowed = self.types.union_all(fall);
            let env = apply_narrowed(env, NarrowTarget::Local(local), narrowed);
            self.merge_env(ep.next(), env);
        }
    }

    /// Whether `member` can match and can fail to match `patterns` (`===`).
    fn class_match(&self, member: TypeId, patterns: &[ClassId]) -> (bool, bool) {
        let Some((class, singleton)) = receiver_class(&self.types, member) else {
            return (true, true);
        };
        if singleton {
            return (true, true);
        }
        let mut hit = false;
        let mut miss = true;
        for &pattern in patterns {
            if self.classes.is_subclass(class, pattern) {
                hit = true;
                miss = false;
            } else if self.classes.is_subclass(pattern, class) || self.classes.get(pattern).is_module() {
                hit = true;
            }
        }
        (hit, miss)
    }
}

fn apply_narrowed(mut env: Env, target: NarrowTarget, ty: TypeId) -> Env {
    match target {
        NarrowTarget::Local(idx) => {
            env.set_local(idx, ty);
        }
        NarrowTarget::Top => {
            env.set_top(0, ty);
        }
        NarrowTarget::LocalAndPush(idx) => {
            env.set_local(idx, ty);
            env.push(ty);
        }
    }
    env
}
