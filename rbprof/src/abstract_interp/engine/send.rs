//! Method calls, block calls and `super`.
//!
//! A call is dispatched once per member of the receiver's type. Each
//! definition found gets an [`Invocation`] and decides itself how its result
//! reaches the caller: bodies from the program register the caller's
//! continuation against their context, declared methods resume it directly.

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]

use super::{pop, pop_n, Analyzer};
use crate::abstract_interp::continuation::Continuation;
use crate::abstract_interp::env::{Env, StaticEnv};
use crate::abstract_interp::state::{AllocSite, BlockBody, Context, ContextId, EpId, ExecutionPoint, SiteStep};
use crate::diagnostics::{DiagnosticKind, Severity};
use crate::dispatch::{
    bind_arguments, match_overload, ActualArguments, BindError, Invocation, IseqMethod, Keywords, Mismatch,
    TypedMethod,
};
use crate::error::InterpError;
use crate::lattice::{
    erase_vars, receiver_class, receiver_subst, screen_name, substitute, ClassId, TypeId, TypeKind,
};
use rbprof_iseq::{BranchOp, CallInfo, IseqId, Literal};
use std::collections::BTreeMap;

impl Analyzer {
    // =========================================================================
    // Call sites
    // =========================================================================

    pub(super) fn execute_send(
        &mut self,
        ep: ExecutionPoint,
        mut env: Env,
        call: &CallInfo,
        block: Option<IseqId>,
        ctn: Continuation,
    ) -> Result<(), InterpError> {
        let (recv, args) = self.pop_call(ep, &mut env, call)?;
        let args = self.attach_block(ep, &env, block, args, &ctn);
        self.send_to_members(recv, &call.mid, args, call.is_fcall(), ep, env, ctn);
        Ok(())
    }

    /// `if x.m(...)`: the call is dispatched per member of local `x`, and each
    /// member's result routes a copy of the env with `x` narrowed to it.
    pub(super) fn execute_recv_local_send_branch(
        &mut self,
        ep: ExecutionPoint,
        mut env: Env,
        local: usize,
        call: &CallInfo,
        block: Option<IseqId>,
        branch: BranchOp,
    ) -> Result<(), InterpError> {
        let (_, args) = self.pop_call(ep, &mut env, call)?;
        let recv = env.local(local).ok_or(InterpError::LocalOutOfRange { idx: local })?;
        let ctn = Continuation::Branch(branch);
        let args = self.attach_block(ep, &env, block, args, &ctn);
        for member in self.types.members(recv) {
            let ctn = Continuation::Narrow { local, member, branch };
            let global = self.globalize(ep, &env, member);
            self.send_member(global, member, &call.mid, args.clone(), call.is_fcall(), ep, env.clone(), ctn);
        }
        Ok(())
    }

    /// `if r.m(x)`: as above, narrowing the single argument `x`.
    pub(super) fn execute_arg_local_send_branch(
        &mut self,
        ep: ExecutionPoint,
        mut env: Env,
        local: usize,
        call: &CallInfo,
        block: Option<IseqId>,
        branch: BranchOp,
    ) -> Result<(), InterpError> {
        let (recv, args) = self.pop_call(ep, &mut env, call)?;
        let arg = env.local(local).ok_or(InterpError::LocalOutOfRange { idx: local })?;
        let ctn = Continuation::Branch(branch);
        let args = self.attach_block(ep, &env, block, args, &ctn);
        for member in self.types.members(arg) {
            let mut args = args.clone();
            let global = self.globalize(ep, &env, member);
            args.lead = vec![global];
            let ctn = Continuation::Narrow { local, member, branch };
            self.send_to_members(recv, &call.mid, args, call.is_fcall(), ep, env.clone(), ctn);
        }
        Ok(())
    }

    /// `yield`
    pub(super) fn execute_invoke_block(
        &mut self,
        ep: ExecutionPoint,
        mut env: Env,
        call: &CallInfo,
    ) -> Result<(), InterpError> {
        let args = self.pop_args(ep, &mut env, call)?;
        let given: Vec<TypeId> = self
            .types
            .members(env.static_env.block)
            .into_iter()
            .filter(|m| !m.is_nil())
            .collect();
        if given.is_empty() {
            self.report(ep, DiagnosticKind::BlockContract, Severity::Warning, "no block given (yield)".to_string());
            self.resume(&Continuation::Push, ep, env, TypeId::ANY);
            return Ok(());
        }

        let root = self.frame_root(ep).ctx;
        let summary = self.yields.entry(root).or_default();
        for (i, &ty) in args.lead.iter().enumerate() {
            match summary.args.get_mut(i) {
                Some(slot) => *slot = self.types.union(*slot, ty),
                None => summary.args.push(ty),
            }
        }
        let block = self.types.union_all(given);
        let ctxs = self.invoke_block(block, args, ep, env, Continuation::Push);
        self.yields.entry(root).or_default().blocks.extend(ctxs);
        Ok(())
    }

    pub(super) fn execute_invoke_super(
        &mut self,
        ep: ExecutionPoint,
        mut env: Env,
        call: &CallInfo,
        block: Option<IseqId>,
    ) -> Result<(), InterpError> {
        let (_, args) = self.pop_call(ep, &mut env, call)?;
        let ctn = Continuation::Push;
        let mut args = self.attach_block(ep, &env, block, args, &ctn);
        if block.is_none() && !call.has_block_arg() {
            args.block = env.static_env.block;
        }

        let root = self.frame_root(ep);
        let (mid, cref) = match self.state.ctx(root.ctx) {
            Context::Iseq {
                mid: Some(mid), cref, ..
            } => (mid.clone(), *cref),
            _ => {
                self.resume(&ctn, ep, env, TypeId::ANY);
                return Ok(());
            }
        };
        let cref = self.state.cref(cref).clone();
        let recv = env.static_env.recv;
        for member in self.types.members(recv) {
            let found = receiver_class(&self.types, member)
                .and_then(|(class, singleton)| {
                    self.classes
                        .search_super(class, singleton, (cref.class, cref.singleton), &mid)
                });
            let Some((owner, owner_singleton, defs)) = found else {
                tracing::debug!(mid = %mid, "super without a superclass method");
                self.resume(&ctn, ep, env.clone(), TypeId::ANY);
                continue;
            };
            for def in defs {
                let inv = Invocation {
                    recv: member,
                    recv_local: member,
                    mid: mid.clone(),
                    args: args.clone(),
                    owner: (owner, owner_singleton),
                    fcall: true,
                    ep,
                    env: env.clone(),
                    ctn: ctn.clone(),
                };
                def.do_send(self, inv);
            }
        }
        Ok(())
    }

    // =========================================================================
    // Operands
    // =========================================================================

    fn pop_call(
        &mut self,
        ep: ExecutionPoint,
        env: &mut Env,
        call: &CallInfo,
    ) -> Result<(TypeId, ActualArguments), InterpError> {
        let args = self.pop_args(ep, env, call)?;
        let recv = pop(env, "send")?;
        Ok((recv, args))
    }

    /// Pops block argument, keyword values and positionals (in that order)
    /// and returns them globalized.
    fn pop_args(&mut self, ep: ExecutionPoint, env: &mut Env, call: &CallInfo) -> Result<ActualArguments, InterpError> {
        let block = if call.has_block_arg() {
            let ty = pop(env, "send")?;
            self.block_argument(ty)
        } else {
            TypeId::NIL
        };

        let kw_values = pop_n(env, call.kw_arg.len(), "send")?;
        let mut keywords = if call.kw_arg.is_empty() {
            Keywords::None
        } else {
            let mut named = BTreeMap::new();
            for (name, ty) in call.kw_arg.iter().zip(kw_values) {
                named.insert(name.clone(), self.globalize(ep, env, ty));
            }
            Keywords::Named(named)
        };

        let mut positional = pop_n(env, call.argc, "send")?;
        if call.has_kw_splat() {
            if let Some(hash) = positional.pop() {
                keywords = Keywords::Splat(self.globalize(ep, env, hash));
            }
        }
        let mut rest = None;
        let mut trailing = Vec::new();
        if call.has_splat() {
            if let Some(splat) = positional.pop() {
                let splat = self.globalize(ep, env, splat);
                match self.types.kind(splat).clone() {
                    TypeKind::Array(elems) if elems.rest.is_bottom() => trailing = elems.lead,
                    TypeKind::Array(elems) => rest = Some(self.types.squash(&elems)),
                    _ => rest = Some(TypeId::ANY),
                }
            }
        }
        let mut lead = Vec::with_capacity(positional.len() + trailing.len());
        for ty in positional {
            lead.push(self.globalize(ep, env, ty));
        }
        lead.extend(trailing);

        Ok(ActualArguments {
            lead,
            rest,
            keywords,
            block,
        })
    }

    /// `&blk` operand: procs and `nil` pass through, `&:sym` becomes a
    /// symbol block, anything else is opaque.
    fn block_argument(&mut self, ty: TypeId) -> TypeId {
        let mut out = Vec::new();
        for member in self.types.members(ty) {
            let block = match self.types.kind(member).clone() {
                TypeKind::Proc(_) | TypeKind::Any => member,
                TypeKind::Literal(Literal::Sym(name)) => {
                    let id = self.state.blocks.intern(BlockBody::Symbol(name));
                    self.types.proc_type(id)
                }
                _ if member.is_nil() => member,
                _ => TypeId::ANY,
            };
            out.push(block);
        }
        self.types.union_all(out)
    }

    /// Attaches a literal block created at `ep`, and saves the env its body
    /// reads outer locals from.
    fn attach_block(
        &mut self,
        ep: ExecutionPoint,
        env: &Env,
        block: Option<IseqId>,
        args: ActualArguments,
        ctn: &Continuation,
    ) -> ActualArguments {
        let Some(iseq) = block else {
            return args;
        };
        let id = self.state.blocks.intern(BlockBody::Iseq { iseq, outer: ep });
        if !self.invoked.contains(&id) {
            self.pending_blocks.insert(id);
        }
        let callers = self.callers.entry(ep).or_default();
        if !callers.contains(ctn) {
            callers.push(ctn.clone());
        }
        self.merge_return_env(ep, env.clone());
        let block = self.types.proc_type(id);
        args.with_block(block)
    }

    // =========================================================================
    // Dispatch
    // =========================================================================

    /// Dispatches `mid` on every member of `recv`.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn dispatch(
        &mut self,
        recv: TypeId,
        mid: &str,
        args: ActualArguments,
        fcall: bool,
        ep: ExecutionPoint,
        env: Env,
        ctn: Continuation,
    ) {
        self.send_to_members(recv, mid, args, fcall, ep, env, ctn);
    }

    #[allow(clippy::too_many_arguments)]
    fn send_to_members(
        &mut self,
        recv: TypeId,
        mid: &str,
        args: ActualArguments,
        fcall: bool,
        ep: ExecutionPoint,
        env: Env,
        ctn: Continuation,
    ) {
        for member in self.types.members(recv) {
            let global = self.globalize(ep, &env, member);
            self.send_member(global, member, mid, args.clone(), fcall, ep, env.clone(), ctn.clone());
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn send_member(
        &mut self,
        recv: TypeId,
        recv_local: TypeId,
        mid: &str,
        args: ActualArguments,
        fcall: bool,
        ep: ExecutionPoint,
        env: Env,
        ctn: Continuation,
    ) {
        let Some((class, singleton)) = receiver_class(&self.types, recv) else {
            if !recv.is_bottom() {
                self.resume(&ctn, ep, env, TypeId::ANY);
            }
            return;
        };

        match self.classes.search_method(class, singleton, mid) {
            Some((owner, owner_singleton, defs)) => {
                if !fcall && defs.iter().all(|def| !def.public()) {
                    let msg = format!(
                        "private method `{mid}' called for {}",
                        screen_name(&self.types, &self.classes, recv)
                    );
                    self.report(ep, DiagnosticKind::UndefinedReference, Severity::Warning, msg);
                }
                for def in defs {
                    let inv = Invocation {
                        recv,
                        recv_local,
                        mid: mid.to_string(),
                        args: args.clone(),
                        owner: (owner, owner_singleton),
                        fcall,
                        ep,
                        env: env.clone(),
                        ctn: ctn.clone(),
                    };
                    def.do_send(self, inv);
                }
            }
            None if class == ClassId::VM_CORE => self.resume(&ctn, ep, env, TypeId::ANY),
            None => {
                let missing = (mid != "method_missing")
                    .then(|| self.classes.search_method(class, singleton, "method_missing"))
                    .flatten()
                    .filter(|(_, _, defs)| defs.iter().any(|def| def.is_user_defined()));
                if missing.is_some() {
                    let mut args = args;
                    let sym = self.types.symbol(mid);
                    args.lead.insert(0, sym);
                    return self.send_member(recv, recv_local, "method_missing", args, true, ep, env, ctn);
                }
                let msg = format!(
                    "undefined method `{mid}' for {}",
                    screen_name(&self.types, &self.classes, recv)
                );
                self.report(ep, DiagnosticKind::UndefinedReference, Severity::Error, msg);
                self.resume(&ctn, ep, env, TypeId::ANY);
            }
        }
    }

    // =========================================================================
    // Callees
    // =========================================================================

    pub(crate) fn call_iseq_method(&mut self, method: &IseqMethod, inv: Invocation) {
        let ctx = self.state.contexts.intern(Context::Iseq {
            iseq: method.iseq,
            cref: method.cref,
            mid: Some(inv.mid.clone()),
        });
        let static_env = StaticEnv::new(inv.recv, inv.args.block);
        match self.enter_frame(ctx, None, static_env, &inv.args, false) {
            Ok(()) => {
                self.entered.insert((method.iseq, method.cref));
                self.pending_methods.remove(&(method.iseq, method.cref));
                self.add_callsite(ctx, inv.ep, inv.env, inv.ctn);
            }
            Err(err) => {
                self.report(inv.ep, DiagnosticKind::Arity, Severity::Error, err.to_string());
                self.resume(&inv.ctn, inv.ep, inv.env, TypeId::ANY);
            }
        }
    }

    pub(crate) fn call_typed_method(&mut self, method: &TypedMethod, inv: Invocation) {
        let overloads = std::rc::Rc::clone(&method.overloads);
        let depth = self.config.type_depth_limit;
        let mut closest: Option<Mismatch> = None;
        let mut matched = false;

        for overload in overloads.iter() {
            let bound = match match_overload(&mut self.types, &self.classes, overload, &inv.args) {
                Ok(bound) => bound,
                Err(mismatch) => {
                    closest = Some(closest.map_or(mismatch, |c| c.min(mismatch)));
                    continue;
                }
            };
            matched = true;
            let mut subst = receiver_subst(&mut self.types, &self.classes, inv.recv);
            subst.merge(&mut self.types, &bound);

            let block_given = self.types.members(inv.args.block).iter().any(|m| !m.is_nil());
            match &overload.block {
                Some(param) if block_given => {
                    let dummy = self.state.contexts.intern(Context::Typed {
                        caller: inv.ep,
                        mid: inv.mid.clone(),
                    });
                    self.add_callsite(dummy, inv.ep, inv.env.clone(), inv.ctn.clone());
                    let mut block_args = Vec::with_capacity(param.args.len());
                    for &arg in &param.args {
                        let arg = substitute(&mut self.types, arg, &subst, depth);
                        block_args.push(erase_vars(&mut self.types, arg));
                    }
                    let ctn = Continuation::TypedBlock {
                        dummy,
                        ret: overload.ret,
                        block_ret: param.ret,
                        subst,
                    };
                    let block = inv.args.block;
                    self.invoke_block(block, ActualArguments::new(block_args), inv.ep, inv.env.clone(), ctn);
                }
                _ => {
                    let ret = substitute(&mut self.types, overload.ret, &subst, depth);
                    let ret = erase_vars(&mut self.types, ret);
                    self.resume(&inv.ctn, inv.ep, inv.env.clone(), ret);
                }
            }
        }

        if !matched {
            let kind = match closest {
                Some(Mismatch::Type) => DiagnosticKind::ArgumentType,
                Some(Mismatch::Block) => DiagnosticKind::BlockContract,
                _ => DiagnosticKind::Arity,
            };
            let owner = self.classes.path(inv.owner.0);
            let sep = if inv.owner.1 { "." } else { "#" };
            let msg = format!("failed to resolve overload: {owner}{sep}{}", inv.mid);
            self.report(inv.ep, kind, Severity::Error, msg);
            self.resume(&inv.ctn, inv.ep, inv.env, TypeId::ANY);
        }
    }

    /// Calls every block in `block`, returning the contexts of the literal
    /// blocks entered.
    pub(crate) fn invoke_block(
        &mut self,
        block: TypeId,
        args: ActualArguments,
        ep: ExecutionPoint,
        env: Env,
        ctn: Continuation,
    ) -> Vec<ContextId> {
        let mut entered = Vec::new();
        for member in self.types.members(block) {
            let id = match *self.types.kind(member) {
                TypeKind::Proc(id) => id,
                _ if member.is_nil() => continue,
                _ => {
                    self.resume(&ctn, ep, env.clone(), TypeId::ANY);
                    continue;
                }
            };
            match self.state.block(id).clone() {
                BlockBody::Iseq { iseq, outer } => {
                    self.invoked.insert(id);
                    self.pending_blocks.remove(&id);
                    let cref = self.frame_cref(outer);
                    let ctx = self.state.contexts.intern(Context::Iseq { iseq, cref, mid: None });
                    let outer_id = self.state.eps.intern(outer);
                    let static_env = self.block_static_env(outer);
                    if self.enter_frame(ctx, Some(outer_id), static_env, &args, true).is_ok() {
                        self.add_callsite(ctx, ep, env.clone(), ctn.clone());
                        entered.push(ctx);
                    }
                }
                BlockBody::Symbol(mid) => {
                    let (recv, rest) = match args.lead.split_first() {
                        Some((&recv, rest)) => (recv, rest.to_vec()),
                        None => (TypeId::ANY, Vec::new()),
                    };
                    self.dispatch(recv, &mid, ActualArguments::new(rest), false, ep, env.clone(), ctn.clone());
                }
            }
        }
        entered
    }

    /// Static env of a block frame: the creating frame's, or an orphan one
    /// when the creating frame was never reached.
    pub(super) fn block_static_env(&self, outer: ExecutionPoint) -> StaticEnv {
        match self.return_envs.get(&outer) {
            Some(env) => env.static_env.clone(),
            None => {
                let mut static_env = StaticEnv::new(TypeId::ANY, TypeId::ANY);
                static_env.orphan = true;
                static_env
            }
        }
    }

    /// Binds `args` into a fresh frame of `ctx` and schedules its entry
    /// points.
    pub(super) fn enter_frame(
        &mut self,
        ctx: ContextId,
        outer: Option<EpId>,
        static_env: StaticEnv,
        args: &ActualArguments,
        lenient: bool,
    ) -> Result<(), BindError> {
        let Some(iseq) = self.state.ctx(ctx).iseq().and_then(|id| self.program.get(id)) else {
            return Ok(());
        };
        let layout = iseq.args.clone();
        let locals = iseq.local_count();

        let binding = bind_arguments(&mut self.types, &layout, args, lenient)?;
        let entry = ExecutionPoint::new(ctx, 0, outer);
        let mut env = Env::new(static_env, vec![TypeId::NIL; locals]);
        for (slot, ty) in binding.slots {
            let site = AllocSite::new(entry).child(SiteStep::Arg(slot));
            let ty = self.localize(entry, &mut env, ty, site);
            env.set_local(slot, ty);
        }
        for pc in binding.start_pcs {
            self.merge_env(entry.jump(pc), env.clone());
        }
        Ok(())
    }
}
