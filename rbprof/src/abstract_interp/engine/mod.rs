//! Worklist interpreter.
//!
//! [`Analyzer`] owns every piece of analysis state: the normalized program,
//! the type arena, the class table, and the memo tables keyed by execution
//! point. [`Analyzer::run`] pops execution points in ascending order and
//! interprets one instruction at each. Anything that widens a memo entry
//! schedules the affected points again, until nothing changes.
//!
//! Calls never run the callee inline. The caller registers a continuation
//! against the callee's context; each time the callee's return type widens,
//! every registered continuation is resumed with the caller's saved env.

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]

mod control;
mod send;
mod step;
mod variables;

use super::conditional::branch_edges;
use super::continuation::Continuation;
use super::env::{Elems, Env, StaticEnv};
use super::state::{AllocSite, BlockBody, CRef, CRefId, Context, ContextId, ExecutionPoint, StateTables};
use super::worklist::Worklist;
use crate::classes::{ClassTable, VarTable};
use variables::PendingConst;
use crate::config::AnalysisConfig;
use crate::decl::{self, DeclarationSet, CORE_DECLARATIONS};
use crate::diagnostics::{Diagnostic, DiagnosticKind, DiagnosticsCollector, Severity};
use crate::dispatch::{builtins, ActualArguments};
use crate::error::{AnalysisResult, InterpError};
use crate::export::{self, AnalysisReport, Failure};
use crate::lattice::{
    erase_vars, literal_class, match_types, substitute, ArrayElems, BlockId, ClassId, HashElems,
    SiteId, TypeArena, TypeId, TypeKind, TypeLimits,
};
use rbprof_iseq::{normalize, BranchOp, IseqId, IseqKind, IseqTable, Literal, RawIseq};
use std::collections::{BTreeMap, BTreeSet};
use std::time::Instant;

/// Wall-clock budget is checked once per this many steps.
const TIME_CHECK_INTERVAL: u64 = 256;

/// Method defined by the program but not called yet.
#[derive(Debug, Clone)]
struct PendingMethod {
    mid: String,
    class: ClassId,
    singleton: bool,
}

/// What `yield` passed from one method context, and which block contexts
/// received it.
#[derive(Debug, Clone, Default)]
pub(crate) struct YieldSummary {
    pub args: Vec<TypeId>,
    pub blocks: BTreeSet<ContextId>,
}

#[derive(Debug)]
pub struct Analyzer {
    config: AnalysisConfig,
    pub(crate) program: IseqTable,
    pub(crate) types: TypeArena,
    pub(crate) state: StateTables,
    pub(crate) classes: ClassTable,
    pub(crate) diagnostics: DiagnosticsCollector,
    worklist: Worklist,
    /// Entry env of every reached execution point.
    pub(crate) ep2env: BTreeMap<ExecutionPoint, Env>,
    callsites: BTreeMap<ContextId, Vec<(ExecutionPoint, Continuation)>>,
    /// Caller env at each call site, with receiver and arguments popped.
    /// Block and handler frames read outer locals and store containers here.
    pub(crate) return_envs: BTreeMap<ExecutionPoint, Env>,
    /// Results already resumed at each call site; replayed when its return
    /// env widens.
    delivered: BTreeMap<ExecutionPoint, Vec<(Continuation, TypeId)>>,
    /// Continuations of sends that created a literal block (`break` target).
    callers: BTreeMap<ExecutionPoint, Vec<Continuation>>,
    /// Points that read an outer frame's locals, by the outer frame's point.
    outer_readers: BTreeMap<ExecutionPoint, BTreeSet<ExecutionPoint>>,
    pub(crate) return_values: BTreeMap<ContextId, TypeId>,
    pub(crate) yields: BTreeMap<ContextId, YieldSummary>,
    pending_methods: BTreeMap<(IseqId, CRefId), PendingMethod>,
    entered: BTreeSet<(IseqId, CRefId)>,
    pending_blocks: BTreeSet<BlockId>,
    invoked: BTreeSet<BlockId>,
    pub(crate) gvars: VarTable<String>,
    /// First read of every global, for the undefined-global check.
    pub(crate) gvar_reads: BTreeMap<String, ExecutionPoint>,
    /// Constant reads waiting for a first assignment.
    pending_consts: BTreeMap<ExecutionPoint, PendingConst>,
    /// Constant reads given up on; they report on every later visit.
    settled_consts: BTreeSet<ExecutionPoint>,
    /// Union of every exception type the program may raise.
    errinfo: TypeId,
    errinfo_readers: BTreeSet<ExecutionPoint>,
    pub(crate) failures: Vec<Failure>,
    failed: BTreeSet<IseqId>,
    pub(crate) steps: u64,
    pub(crate) incomplete: bool,
}

impl Analyzer {
    pub fn new(config: AnalysisConfig) -> AnalysisResult<Self> {
        let mut types = TypeArena::new(TypeLimits {
            depth: config.type_depth_limit,
            width: config.union_width_limit,
        });
        let mut classes = ClassTable::new(&mut types);
        builtins::install(&mut classes);
        let errinfo = types.instance(ClassId::STANDARD_ERROR);
        let core = config.core_declarations;

        let mut analyzer = Self {
            config,
            program: IseqTable::new(),
            types,
            state: StateTables::new(),
            classes,
            diagnostics: DiagnosticsCollector::new(),
            worklist: Worklist::new(),
            ep2env: BTreeMap::new(),
            callsites: BTreeMap::new(),
            return_envs: BTreeMap::new(),
            delivered: BTreeMap::new(),
            callers: BTreeMap::new(),
            outer_readers: BTreeMap::new(),
            return_values: BTreeMap::new(),
            yields: BTreeMap::new(),
            pending_methods: BTreeMap::new(),
            entered: BTreeSet::new(),
            pending_blocks: BTreeSet::new(),
            invoked: BTreeSet::new(),
            gvars: VarTable::new(),
            gvar_reads: BTreeMap::new(),
            pending_consts: BTreeMap::new(),
            settled_consts: BTreeSet::new(),
            errinfo,
            errinfo_readers: BTreeSet::new(),
            failures: Vec::new(),
            failed: BTreeSet::new(),
            steps: 0,
            incomplete: false,
        };
        if core {
            let set = DeclarationSet::from_json_str(CORE_DECLARATIONS)?;
            analyzer.load_declarations(&set)?;
        }
        Ok(analyzer)
    }

    pub fn config(&self) -> &AnalysisConfig {
        &self.config
    }

    /// Imports declared classes, method signatures and variable types.
    pub fn load_declarations(&mut self, set: &DeclarationSet) -> AnalysisResult<()> {
        decl::import(set, &mut self.classes, &mut self.types, &mut self.gvars)?;
        Ok(())
    }

    /// Normalizes a top-level sequence and schedules it with `self` being the
    /// main object.
    pub fn add_program(&mut self, raw: &RawIseq) -> AnalysisResult<IseqId> {
        let id = normalize(raw, &mut self.program)?;
        let locals = self.program.get(id).map_or(0, |iseq| iseq.local_count());
        let cref = self.top_cref();
        let ctx = self.state.contexts.intern(Context::Iseq {
            iseq: id,
            cref,
            mid: None,
        });
        let recv = self.types.instance(ClassId::OBJECT);
        let env = Env::new(StaticEnv::new(recv, TypeId::NIL), vec![TypeId::NIL; locals]);
        tracing::debug!(iseq = %raw.name, "program added");
        self.merge_env(ExecutionPoint::new(ctx, 0, None), env);
        Ok(id)
    }

    /// Interprets until the fixpoint (or a resource limit), then stub-runs
    /// whatever was never reached. Constant reads that no assignment ever
    /// reached are reported last, and interpretation continues past them.
    #[tracing::instrument(skip(self))]
    pub fn run(&mut self) -> AnalysisReport {
        let started = Instant::now();
        tracing::info!(sequences = self.program.len(), "analysis started");
        loop {
            self.drain(started);
            if self.incomplete {
                break;
            }
            if self.config.stub_execution && self.stub_next() {
                continue;
            }
            if !self.settle_constants() {
                break;
            }
        }
        tracing::info!(steps = self.steps, incomplete = self.incomplete, "analysis finished");
        export::build_report(self)
    }

    fn drain(&mut self, started: Instant) {
        let time_limit = self.config.time_limit();
        while let Some(ep) = self.worklist.pop() {
            if self.config.max_iter.is_some_and(|max| self.steps >= max) {
                tracing::warn!(steps = self.steps, "iteration budget exhausted; result is partial");
                self.incomplete = true;
                return;
            }
            if self.steps % TIME_CHECK_INTERVAL == 0
                && time_limit.is_some_and(|limit| started.elapsed() >= limit)
            {
                tracing::warn!(steps = self.steps, "time budget exhausted; result is partial");
                self.incomplete = true;
                return;
            }
            self.step(ep);
        }
    }

    fn step(&mut self, ep: ExecutionPoint) {
        let Some(env) = self.ep2env.get(&ep).cloned() else {
            return;
        };
        let Some(iseq_id) = self.state.ctx(ep.ctx).iseq() else {
            return;
        };
        if self.failed.contains(&iseq_id) {
            return;
        }
        let Some(iseq) = self.program.get(iseq_id) else {
            return;
        };
        let Some(insn) = iseq.insns.get(ep.pc).cloned() else {
            return self.fail(ep, InterpError::FellOffEnd { pc: ep.pc });
        };
        let handlers: Vec<_> = iseq
            .handlers_at(ep.pc)
            .iter()
            .filter(|entry| entry.kind.has_handler())
            .cloned()
            .collect();

        self.steps += 1;
        tracing::trace!(pc = ep.pc, op = insn.op.name(), "step");
        for entry in &handlers {
            self.enter_handler(ep, &env, entry);
        }
        if let Err(err) = self.execute(ep, env, &insn.op) {
            self.fail(ep, err);
        }
    }

    /// Starts one method or block the program defined but never reached,
    /// with `untyped` arguments. Returns whether anything was scheduled.
    fn stub_next(&mut self) -> bool {
        while let Some(((iseq, cref), pending)) = self.pending_methods.pop_first() {
            if self.entered.contains(&(iseq, cref)) {
                continue;
            }
            let Some(layout) = self.program.get(iseq).map(|iseq| iseq.args.clone()) else {
                continue;
            };
            tracing::debug!(mid = %pending.mid, "stub-executing uncalled method");
            let recv = if pending.singleton {
                self.types.class_object(pending.class)
            } else {
                match pending.class {
                    ClassId::ARRAY => self.types.array(ArrayElems::homogeneous(TypeId::ANY)),
                    ClassId::HASH => self.types.hash(HashElems::single(TypeId::ANY, TypeId::ANY)),
                    class => self.types.instance(class),
                }
            };
            let ctx = self.state.contexts.intern(Context::Iseq {
                iseq,
                cref,
                mid: Some(pending.mid),
            });
            let args = ActualArguments::untyped(&layout);
            let static_env = StaticEnv::new(recv, args.block);
            self.entered.insert((iseq, cref));
            if self.enter_frame(ctx, None, static_env, &args, true).is_ok() {
                return true;
            }
        }
        while let Some(block) = self.pending_blocks.pop_first() {
            if !self.invoked.insert(block) {
                continue;
            }
            let BlockBody::Iseq { iseq, outer } = self.state.block(block).clone() else {
                continue;
            };
            let Some(layout) = self.program.get(iseq).map(|iseq| iseq.args.clone()) else {
                continue;
            };
            tracing::debug!(iseq = iseq.0, "stub-executing uncalled block");
            let cref = self.frame_cref(outer);
            let ctx = self.state.contexts.intern(Context::Iseq {
                iseq,
                cref,
                mid: None,
            });
            let outer_id = self.state.eps.intern(outer);
            let static_env = self.block_static_env(outer);
            let args = ActualArguments::untyped(&layout);
            if self.enter_frame(ctx, Some(outer_id), static_env, &args, true).is_ok() {
                return true;
            }
        }
        false
    }

    // =========================================================================
    // Memo tables
    // =========================================================================

    /// Joins `env` into the entry env of `ep`, scheduling it on change.
    pub(crate) fn merge_env(&mut self, ep: ExecutionPoint, env: Env) {
        let merged = match self.ep2env.get(&ep) {
            None => Some(env),
            Some(old) => match old.join(&env, &mut self.types) {
                Some(joined) if joined == *old => return,
                joined => joined,
            },
        };
        match merged {
            Some(env) => {
                self.ep2env.insert(ep, env);
                self.worklist.push(ep);
            }
            None => self.fail(ep, InterpError::JoinMismatch { pc: ep.pc }),
        }
    }

    /// Joins `env` into the saved env of call site `ep`. On change, replays
    /// the results already delivered there and re-runs outer-local readers.
    pub(crate) fn merge_return_env(&mut self, ep: ExecutionPoint, env: Env) {
        let merged = match self.return_envs.get(&ep) {
            None => Some(env),
            Some(old) => match old.join(&env, &mut self.types) {
                Some(joined) if joined == *old => return,
                joined => joined,
            },
        };
        let Some(merged) = merged else {
            return self.fail(ep, InterpError::JoinMismatch { pc: ep.pc });
        };
        self.return_envs.insert(ep, merged);
        self.return_env_changed(ep);
    }

    fn return_env_changed(&mut self, ep: ExecutionPoint) {
        if let Some(readers) = self.outer_readers.get(&ep) {
            for &reader in readers {
                self.worklist.push(reader);
            }
        }
        let Some(results) = self.delivered.get(&ep).cloned() else {
            return;
        };
        let Some(env) = self.return_envs.get(&ep).cloned() else {
            return;
        };
        for (ctn, ty) in results {
            self.resume(&ctn, ep, env.clone(), ty);
        }
    }

    /// Registers `ctn` at `caller` for every return of `callee`.
    pub(crate) fn add_callsite(
        &mut self,
        callee: ContextId,
        caller: ExecutionPoint,
        env: Env,
        ctn: Continuation,
    ) {
        self.merge_return_env(caller, env);
        let sites = self.callsites.entry(callee).or_default();
        if !sites.iter().any(|(ep, c)| *ep == caller && *c == ctn) {
            tracing::debug!(callee = callee.0, caller_pc = caller.pc, "call site registered");
            sites.push((caller, ctn.clone()));
        }
        if let Some(&ret) = self.return_values.get(&callee) {
            self.deliver(caller, ctn, ret);
        }
    }

    /// Unions `ty` into the return type of `ctx` and resumes its callers.
    pub(crate) fn add_return_value(&mut self, ctx: ContextId, ty: TypeId) {
        let old = self.return_values.get(&ctx).copied();
        let new = match old {
            Some(old) => self.types.union(old, ty),
            None => ty,
        };
        if old == Some(new) {
            return;
        }
        self.return_values.insert(ctx, new);
        let sites = self.callsites.get(&ctx).cloned().unwrap_or_default();
        for (caller, ctn) in sites {
            self.deliver(caller, ctn, new);
        }
    }

    /// Resumes `ctn` at `caller` with `ty` unless that result was delivered
    /// already.
    pub(crate) fn deliver(&mut self, caller: ExecutionPoint, ctn: Continuation, ty: TypeId) {
        let results = self.delivered.entry(caller).or_default();
        let ty = match results.iter_mut().find(|(c, _)| *c == ctn) {
            Some((_, prev)) => {
                let joined = self.types.union(*prev, ty);
                if joined == *prev {
                    return;
                }
                *prev = joined;
                joined
            }
            None => {
                results.push((ctn.clone(), ty));
                ty
            }
        };
        let Some(env) = self.return_envs.get(&caller).cloned() else {
            return;
        };
        self.resume(&ctn, caller, env, ty);
    }

    /// Applies `ctn` to the result `ty` of a call made at `ep`.
    pub(crate) fn resume(&mut self, ctn: &Continuation, ep: ExecutionPoint, mut env: Env, ty: TypeId) {
        match ctn {
            Continuation::Push => {
                let ty = self.localize(ep, &mut env, ty, AllocSite::tagged(ep, "ret"));
                env.push(ty);
                self.merge_env(ep.next(), env);
            }
            Continuation::PushAt(pc) => {
                let ty = self.localize(ep, &mut env, ty, AllocSite::tagged(ep, "ret"));
                env.push(ty);
                self.merge_env(ep.jump(*pc), env);
            }
            Continuation::Branch(branch) => self.route(ep, env, *branch, ty, None),
            Continuation::Narrow {
                local,
                member,
                branch,
            } => self.route(ep, env, *branch, ty, Some((*local, *member))),
            Continuation::Replace { value, then } => self.resume(then, ep, env, *value),
            Continuation::TypedBlock {
                dummy,
                ret,
                block_ret,
                subst,
            } => {
                let mut subst = subst.clone();
                if let Some(bound) = match_types(&mut self.types, &self.classes, ty, *block_ret) {
                    subst.merge(&mut self.types, &bound);
                }
                let depth = self.config.type_depth_limit;
                let ret = substitute(&mut self.types, *ret, &subst, depth);
                let ret = erase_vars(&mut self.types, ret);
                self.add_return_value(*dummy, ret);
            }
        }
    }

    /// Continues at the successors of `branch` that `cond` can reach, with
    /// `narrowed` applied to both.
    fn route(
        &mut self,
        ep: ExecutionPoint,
        mut env: Env,
        branch: BranchOp,
        cond: TypeId,
        narrowed: Option<(usize, TypeId)>,
    ) {
        let edges = branch_edges(&self.types, branch.kind, cond);
        if let Some((local, member)) = narrowed {
            env.set_local(local, member);
        }
        if edges.jump {
            self.merge_env(ep.jump(branch.target), env.clone());
        }
        if edges.fall {
            self.merge_env(ep.next(), env);
        }
    }

    // =========================================================================
    // Containers
    // =========================================================================

    /// Call site whose saved env holds the containers of `ep`'s frame: the
    /// outermost frame's, for block and handler frames that still have one.
    fn container_owner(&self, ep: ExecutionPoint, env: &Env) -> Option<ExecutionPoint> {
        if env.static_env.orphan {
            return None;
        }
        self.state
            .outermost(ep)
            .filter(|owner| self.return_envs.contains_key(owner))
    }

    pub(crate) fn globalize(&mut self, ep: ExecutionPoint, env: &Env, ty: TypeId) -> TypeId {
        let depth = self.config.type_depth_limit;
        let holder = match self.container_owner(ep, env) {
            Some(owner) => self.return_envs.get(&owner).unwrap_or(env),
            None => env,
        };
        holder.globalize(&mut self.types, ty, depth)
    }

    pub(crate) fn localize(
        &mut self,
        ep: ExecutionPoint,
        env: &mut Env,
        ty: TypeId,
        site: AllocSite,
    ) -> TypeId {
        if !self.has_containers(ty) {
            return ty;
        }
        let depth = self.config.type_depth_limit;
        let owner = self.container_owner(ep, env);
        let Some((owner, mut holder)) =
            owner.and_then(|owner| self.return_envs.remove(&owner).map(|holder| (owner, holder)))
        else {
            return env.localize(&mut self.types, &mut self.state.sites, ty, &site, depth);
        };
        let before = holder.containers.clone();
        let ty = holder.localize(&mut self.types, &mut self.state.sites, ty, &site, depth);
        let changed = holder.containers != before;
        self.return_envs.insert(owner, holder);
        if changed {
            self.return_env_changed(owner);
        }
        ty
    }

    fn has_containers(&self, ty: TypeId) -> bool {
        let structural = |t: TypeId| matches!(self.types.kind(t), TypeKind::Array(_) | TypeKind::Hash(_));
        match self.types.kind(ty) {
            TypeKind::Union(members) => members.iter().any(|&m| structural(m)),
            _ => structural(ty),
        }
    }

    /// Unions `elems` into the container at `site` as seen from `ep`.
    pub(crate) fn update_container(&mut self, ep: ExecutionPoint, env: &mut Env, site: SiteId, elems: Elems) {
        let elems = self.widen_elems(elems);
        let Some(owner) = self.container_owner(ep, env) else {
            return env.store(&mut self.types, site, elems);
        };
        let changed = match self.return_envs.get_mut(&owner) {
            Some(holder) => {
                let before = holder.containers.get(&site).cloned();
                holder.store(&mut self.types, site, elems);
                holder.containers.get(&site) != before.as_ref()
            }
            None => false,
        };
        if changed {
            self.return_env_changed(owner);
        }
    }

    pub(crate) fn container(&self, ep: ExecutionPoint, env: &Env, site: SiteId) -> Option<Elems> {
        let holder = match self.container_owner(ep, env) {
            Some(owner) => self.return_envs.get(&owner).unwrap_or(env),
            None => env,
        };
        holder.containers.get(&site).cloned()
    }

    /// Scalar literals stored into a container lose their value.
    fn widen_elems(&mut self, elems: Elems) -> Elems {
        match elems {
            Elems::Array(mut a) => {
                a.lead = a.lead.into_iter().map(|t| self.widen_scalar(t)).collect();
                a.rest = self.widen_scalar(a.rest);
                Elems::Array(a)
            }
            Elems::Hash(h) => {
                let mut out = HashElems::default();
                for (k, v) in h.entries {
                    let k = self.widen_scalar(k);
                    let v = self.widen_scalar(v);
                    out = self
                        .types
                        .union_hash_elems(&out, &HashElems::single(k, v));
                }
                Elems::Hash(out)
            }
        }
    }

    pub(crate) fn widen_scalar(&mut self, ty: TypeId) -> TypeId {
        match self.types.kind(ty).clone() {
            TypeKind::Literal(Literal::Sym(_)) => ty,
            TypeKind::Literal(lit) => {
                let class = literal_class(&lit);
                self.types.instance(class)
            }
            TypeKind::Union(members) => {
                let members: Vec<_> = members.into_iter().map(|m| self.widen_scalar(m)).collect();
                self.types.union_all(members)
            }
            _ => ty,
        }
    }

    // =========================================================================
    // Frames
    // =========================================================================

    fn top_cref(&mut self) -> CRefId {
        self.state.crefs.intern(CRef {
            outer: None,
            class: ClassId::OBJECT,
            singleton: false,
        })
    }

    /// Resolves a typed-block stand-in context to the real call site.
    fn source_ep(&self, mut ep: ExecutionPoint) -> ExecutionPoint {
        while let Context::Typed { caller, .. } = self.state.ctx(ep.ctx) {
            ep = *caller;
        }
        ep
    }

    /// The method (or top) frame enclosing `ep`.
    pub(crate) fn frame_root(&self, ep: ExecutionPoint) -> ExecutionPoint {
        self.state.outermost(ep).unwrap_or(ep)
    }

    fn frame_kind(&self, ep: ExecutionPoint) -> Option<IseqKind> {
        let iseq = self.state.ctx(ep.ctx).iseq()?;
        self.program.get(iseq).map(|iseq| iseq.kind)
    }

    fn frame_cref(&mut self, ep: ExecutionPoint) -> CRefId {
        let ep = self.source_ep(ep);
        match self.state.ctx(ep.ctx).cref() {
            Some(cref) => cref,
            None => self.top_cref(),
        }
    }

    /// Lexical scope in effect at `ep`.
    pub(crate) fn cref_at(&self, ep: ExecutionPoint) -> CRef {
        let ep = self.source_ep(ep);
        match self.state.ctx(ep.ctx).cref() {
            Some(cref) => self.state.cref(cref).clone(),
            None => CRef {
                outer: None,
                class: ClassId::OBJECT,
                singleton: false,
            },
        }
    }

    /// Call-path name of `ep`'s frame: `Foo#bar`, `Foo.bar`, `block in Foo#bar`.
    pub(crate) fn frame_name(&self, ep: ExecutionPoint) -> String {
        let ep = self.source_ep(ep);
        let root = self.frame_root(ep);
        let base = match self.state.ctx(root.ctx) {
            Context::Iseq {
                mid: Some(mid),
                cref,
                ..
            } => {
                let cref = self.state.cref(*cref);
                let sep = if cref.singleton { "." } else { "#" };
                format!("{}{sep}{mid}", self.classes.path(cref.class))
            }
            ctx => ctx
                .iseq()
                .and_then(|id| self.program.get(id))
                .map_or_else(|| "<main>".to_string(), |iseq| iseq.name.clone()),
        };
        if root == ep {
            return base;
        }
        match self.frame_kind(ep) {
            Some(IseqKind::Rescue) => format!("rescue in {base}"),
            Some(IseqKind::Ensure) => format!("ensure in {base}"),
            _ => format!("block in {base}"),
        }
    }

    fn location(&self, ep: ExecutionPoint) -> (String, String, u32) {
        let ep = self.source_ep(ep);
        let iseq = self.state.ctx(ep.ctx).iseq().and_then(|id| self.program.get(id));
        match iseq {
            Some(iseq) => {
                let line = iseq
                    .insns
                    .get(ep.pc)
                    .map_or(iseq.start_line, |insn| insn.line);
                (iseq.name.clone(), iseq.path.clone(), line)
            }
            None => ("<unknown>".to_string(), String::new(), 0),
        }
    }

    // =========================================================================
    // Diagnostics
    // =========================================================================

    pub(crate) fn report(
        &mut self,
        ep: ExecutionPoint,
        kind: DiagnosticKind,
        severity: Severity,
        message: String,
    ) {
        let (_, path, line) = self.location(ep);
        let context = self.frame_name(ep);
        let diag = Diagnostic::new(kind, severity, message)
            .with_location(path, line)
            .with_context(context);
        self.diagnostics.emit(diag);
    }

    /// Stops interpreting the sequence of `ep` and records why.
    pub(crate) fn fail(&mut self, ep: ExecutionPoint, err: InterpError) {
        let Some(iseq) = self.state.ctx(ep.ctx).iseq() else {
            return;
        };
        if !self.failed.insert(iseq) {
            return;
        }
        let (name, path, line) = self.location(ep);
        tracing::warn!(iseq = %name, line, "{err}");
        self.failures.push(Failure {
            iseq: name,
            path,
            line,
            message: err.to_string(),
        });
    }

    /// Widens the raised-error slot; handlers re-run on change.
    pub(crate) fn raise_error(&mut self, ty: TypeId) {
        let joined = self.types.union(self.errinfo, ty);
        if joined == self.errinfo {
            return;
        }
        self.errinfo = joined;
        for &ep in &self.errinfo_readers {
            self.worklist.push(ep);
        }
    }
}

fn pop(env: &mut Env, op: &'static str) -> Result<TypeId, InterpError> {
    env.pop().ok_or(InterpError::StackUnderflow { op })
}

fn pop_n(env: &mut Env, n: usize, op: &'static str) -> Result<Vec<TypeId>, InterpError> {
    env.pop_n(n).ok_or(InterpError::StackUnderflow { op })
}

fn top(env: &Env, n: usize, op: &'static str) -> Result<TypeId, InterpError> {
    env.top(n).ok_or(InterpError::StackUnderflow { op })
}
