//! Variables shared across frames.
//!
//! Instance, class and global variables and constants are flow-insensitive:
//! one type per location, widened by every write. A read registers the
//! reading point, and each widening re-resumes all registered readers.
//! Locals of enclosing frames live in the creating call site's saved env.

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]

use super::Analyzer;
use crate::abstract_interp::continuation::Continuation;
use crate::abstract_interp::env::Env;
use crate::abstract_interp::state::ExecutionPoint;
use crate::classes::{IvarKey, VarEntry};
use crate::diagnostics::{DiagnosticKind, Severity};
use crate::dispatch::Invocation;
use crate::error::InterpError;
use crate::lattice::{match_types, receiver_class, screen_name, ClassId, TypeId, TypeKind};
use rbprof_iseq::LocalRef;

/// Storage location of a non-local variable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum VarLoc {
    Ivar(ClassId, IvarKey),
    Cvar(ClassId, String),
    Const(ClassId, String),
    Gvar(String),
}

/// A constant read that found no definition yet. The reading point is
/// registered on every lexical location an assignment could land in.
#[derive(Debug, Clone)]
pub(crate) struct PendingConst {
    name: String,
    cbase: TypeId,
    env: Env,
}

impl Analyzer {
    fn var_entry(&mut self, loc: &VarLoc) -> &mut VarEntry {
        match loc {
            VarLoc::Ivar(class, key) => self.classes.get_mut(*class).ivars.entry(key.clone()),
            VarLoc::Cvar(class, name) => self.classes.get_mut(*class).cvars.entry(name.clone()),
            VarLoc::Const(class, name) => self.classes.get_mut(*class).consts.entry(name.clone()),
            VarLoc::Gvar(name) => self.gvars.entry(name.clone()),
        }
    }

    fn var_name(&self, loc: &VarLoc) -> String {
        match loc {
            VarLoc::Ivar(class, (singleton, name)) => {
                let sep = if *singleton { "." } else { "#" };
                format!("{}{sep}{name}", self.classes.path(*class))
            }
            VarLoc::Cvar(class, name) => format!("{}::{name}", self.classes.path(*class)),
            VarLoc::Const(class, name) if *class == ClassId::OBJECT => name.clone(),
            VarLoc::Const(class, name) => format!("{}::{name}", self.classes.path(*class)),
            VarLoc::Gvar(name) => name.clone(),
        }
    }

    /// Resumes `ctn` with the type of `loc`, now and after every widening.
    /// A location nothing has written yet resumes nothing.
    pub(crate) fn read_var(&mut self, loc: &VarLoc, ep: ExecutionPoint, env: Env, ctn: Continuation) {
        let entry = self.var_entry(loc);
        entry.readers.insert(ep, (ctn.clone(), env.clone()));
        let ty = entry.ty;
        if !ty.is_bottom() {
            self.resume(&ctn, ep, env, ty);
        }
    }

    /// Widens `loc` by the global type `ty`. Declared locations only check.
    pub(crate) fn write_var(&mut self, loc: &VarLoc, ty: TypeId, ep: ExecutionPoint) {
        let entry = self.var_entry(loc);
        entry.written = true;
        let (declared, old) = (entry.declared, entry.ty);
        if declared {
            if match_types(&mut self.types, &self.classes, ty, old).is_none() {
                let msg = format!(
                    "incompatible assignment to {}: expected {}, got {}",
                    self.var_name(loc),
                    screen_name(&self.types, &self.classes, old),
                    screen_name(&self.types, &self.classes, ty)
                );
                self.report(ep, DiagnosticKind::TypeInconsistency, Severity::Warning, msg);
            }
            return;
        }
        let new = self.types.union(old, ty);
        if new == old {
            return;
        }
        self.var_entry(loc).ty = new;
        tracing::trace!(var = %self.var_name(loc), "widened");
        self.wake_readers(loc);
    }

    /// Resumes every registered reader of `loc` with its current type.
    fn wake_readers(&mut self, loc: &VarLoc) {
        let entry = self.var_entry(loc);
        let ty = entry.ty;
        let readers: Vec<_> = entry
            .readers
            .iter()
            .map(|(&reader, (ctn, env))| (reader, ctn.clone(), env.clone()))
            .collect();
        for (reader, ctn, env) in readers {
            self.resume(&ctn, reader, env, ty);
        }
    }

    // =========================================================================
    // Locals
    // =========================================================================

    pub(super) fn read_local(&mut self, ep: ExecutionPoint, env: &Env, local: LocalRef) -> Result<TypeId, InterpError> {
        let idx = local.idx;
        if local.level == 0 {
            return env.local(idx).ok_or(InterpError::LocalOutOfRange { idx });
        }
        if env.static_env.orphan {
            return Ok(TypeId::ANY);
        }
        let Some(outer) = self.state.outer_n(ep, local.level) else {
            return Ok(TypeId::ANY);
        };
        self.outer_readers.entry(outer).or_default().insert(ep);
        match self.return_envs.get(&outer) {
            Some(outer_env) => outer_env.local(idx).ok_or(InterpError::LocalOutOfRange { idx }),
            None => Ok(TypeId::ANY),
        }
    }

    pub(super) fn write_local(
        &mut self,
        ep: ExecutionPoint,
        env: &mut Env,
        local: LocalRef,
        ty: TypeId,
    ) -> Result<(), InterpError> {
        let idx = local.idx;
        if local.level == 0 {
            return if env.set_local(idx, ty) {
                Ok(())
            } else {
                Err(InterpError::LocalOutOfRange { idx })
            };
        }
        if env.static_env.orphan {
            return Ok(());
        }
        let Some(outer) = self.state.outer_n(ep, local.level) else {
            return Ok(());
        };
        let Some(mut outer_env) = self.return_envs.get(&outer).cloned() else {
            return Ok(());
        };
        if !outer_env.set_local(idx, ty) {
            return Err(InterpError::LocalOutOfRange { idx });
        }
        self.merge_return_env(outer, outer_env);
        Ok(())
    }

    // =========================================================================
    // Instance and class variables
    // =========================================================================

    /// Owner of `@name` for a receiver member: the nearest ancestor (same
    /// side) that already has it, else the receiver's own class.
    fn ivar_location(&self, recv: TypeId, name: &str) -> Option<VarLoc> {
        let (class, singleton) = receiver_class(&self.types, recv)?;
        let key: IvarKey = (singleton, name.to_string());
        let owner = self
            .classes
            .ancestors(class, singleton)
            .into_iter()
            .filter(|&(_, side)| side == singleton)
            .map(|(c, _)| c)
            .find(|&c| self.classes.get(c).ivars.contains(&key))
            .unwrap_or(class);
        Some(VarLoc::Ivar(owner, key))
    }

    pub(super) fn execute_get_ivar(&mut self, ep: ExecutionPoint, env: Env, name: &str) -> Result<(), InterpError> {
        for member in self.types.members(env.static_env.recv) {
            match self.ivar_location(member, name) {
                Some(loc) => self.read_var(&loc, ep, env.clone(), Continuation::Push),
                None => self.resume(&Continuation::Push, ep, env.clone(), TypeId::ANY),
            }
        }
        Ok(())
    }

    pub(super) fn execute_set_ivar(&mut self, ep: ExecutionPoint, env: &Env, name: &str, ty: TypeId) {
        let ty = self.globalize(ep, env, ty);
        for member in self.types.members(env.static_env.recv) {
            if let Some(loc) = self.ivar_location(member, name) {
                self.write_var(&loc, ty, ep);
            }
        }
    }

    pub(crate) fn call_attr_reader(&mut self, ivar: &str, inv: Invocation) {
        match self.ivar_location(inv.recv, ivar) {
            Some(loc) => self.read_var(&loc, inv.ep, inv.env, inv.ctn),
            None => self.resume(&inv.ctn, inv.ep, inv.env, TypeId::ANY),
        }
    }

    pub(crate) fn call_attr_writer(&mut self, ivar: &str, inv: Invocation) {
        let value = inv.args.lead.first().copied().unwrap_or(TypeId::ANY);
        if let Some(loc) = self.ivar_location(inv.recv, ivar) {
            self.write_var(&loc, value, inv.ep);
        }
        self.resume(&inv.ctn, inv.ep, inv.env, value);
    }

    fn cvar_location(&self, ep: ExecutionPoint, name: &str) -> VarLoc {
        let class = self.cref_at(ep).class;
        let owner = self
            .classes
            .ancestors(class, false)
            .into_iter()
            .map(|(c, _)| c)
            .find(|&c| self.classes.get(c).cvars.contains(&name.to_string()))
            .unwrap_or(class);
        VarLoc::Cvar(owner, name.to_string())
    }

    pub(super) fn execute_get_cvar(&mut self, ep: ExecutionPoint, env: Env, name: &str) -> Result<(), InterpError> {
        let loc = self.cvar_location(ep, name);
        self.read_var(&loc, ep, env, Continuation::Push);
        Ok(())
    }

    pub(super) fn execute_set_cvar(&mut self, ep: ExecutionPoint, env: &Env, name: &str, ty: TypeId) {
        let ty = self.globalize(ep, env, ty);
        let loc = self.cvar_location(ep, name);
        self.write_var(&loc, ty, ep);
    }

    // =========================================================================
    // Globals
    // =========================================================================

    pub(super) fn execute_get_gvar(&mut self, ep: ExecutionPoint, env: Env, name: &str) -> Result<(), InterpError> {
        self.gvar_reads.entry(name.to_string()).or_insert(ep);
        self.read_var(&VarLoc::Gvar(name.to_string()), ep, env, Continuation::Push);
        Ok(())
    }

    pub(super) fn execute_set_gvar(&mut self, ep: ExecutionPoint, env: &Env, name: &str, ty: TypeId) {
        let ty = self.globalize(ep, env, ty);
        self.write_var(&VarLoc::Gvar(name.to_string()), ty, ep);
    }

    /// Globals read somewhere but neither written nor declared.
    pub(crate) fn report_undefined_globals(&mut self) {
        let reads: Vec<_> = self.gvar_reads.iter().map(|(name, &ep)| (name.clone(), ep)).collect();
        for (name, ep) in reads {
            let defined = self
                .gvars
                .get(&name)
                .is_some_and(|entry| entry.written || entry.declared);
            if !defined {
                let msg = format!("undefined global variable {name}");
                self.report(ep, DiagnosticKind::UndefinedReference, Severity::Warning, msg);
            }
        }
    }

    // =========================================================================
    // Constants
    // =========================================================================

    /// Lexical scopes outward, then the ancestors of the innermost one, then
    /// `Object`.
    fn lexical_constant(&self, ep: ExecutionPoint, name: &str) -> Option<ClassId> {
        let key = name.to_string();
        let cref = self.cref_at(ep);
        let found = self
            .lexical_scopes(ep)
            .into_iter()
            .find(|&class| self.classes.get(class).consts.defines(&key));
        found
            .or_else(|| self.scoped_constant(cref.class, name))
            .or_else(|| self.classes.get(ClassId::OBJECT).consts.defines(&key).then_some(ClassId::OBJECT))
    }

    /// Classes of the lexical scopes at `ep`, innermost first.
    fn lexical_scopes(&self, ep: ExecutionPoint) -> Vec<ClassId> {
        let mut out = Vec::new();
        let mut scope = Some(self.cref_at(ep));
        while let Some(current) = scope {
            out.push(current.class);
            scope = current.outer.map(|id| self.state.cref(id).clone());
        }
        out
    }

    fn scoped_constant(&self, class: ClassId, name: &str) -> Option<ClassId> {
        let key = name.to_string();
        self.classes
            .ancestors(class, false)
            .into_iter()
            .map(|(c, _)| c)
            .find(|&c| self.classes.get(c).consts.defines(&key))
    }

    /// Where `name` resolves from `ep` with the given `cbase` operand.
    fn constant_owner(&self, ep: ExecutionPoint, name: &str, cbase: TypeId) -> Option<ClassId> {
        match *self.types.kind(cbase) {
            _ if cbase.is_nil() => self.lexical_constant(ep, name),
            TypeKind::Class(class) => self.scoped_constant(class, name),
            _ => None,
        }
    }

    pub(super) fn execute_get_constant(
        &mut self,
        ep: ExecutionPoint,
        env: Env,
        name: &str,
        cbase: TypeId,
    ) -> Result<(), InterpError> {
        let candidates = match *self.types.kind(cbase) {
            _ if cbase.is_nil() => {
                let mut scopes = self.lexical_scopes(ep);
                if !scopes.contains(&ClassId::OBJECT) {
                    scopes.push(ClassId::OBJECT);
                }
                scopes
            }
            TypeKind::Class(class) => vec![class],
            _ => {
                self.resume(&Continuation::Push, ep, env, TypeId::ANY);
                return Ok(());
            }
        };
        match self.constant_owner(ep, name, cbase) {
            Some(owner) => {
                let loc = VarLoc::Const(owner, name.to_string());
                self.read_var(&loc, ep, env, Continuation::Push);
            }
            None if self.settled_consts.contains(&ep) => {
                self.report_uninitialized(ep, name);
                self.resume(&Continuation::Push, ep, env, TypeId::ANY);
            }
            None => {
                // wait for an assignment anywhere in the program
                for class in candidates {
                    let loc = VarLoc::Const(class, name.to_string());
                    self.read_var(&loc, ep, env.clone(), Continuation::Push);
                }
                self.pending_consts.insert(
                    ep,
                    PendingConst {
                        name: name.to_string(),
                        cbase,
                        env,
                    },
                );
            }
        }
        Ok(())
    }

    fn report_uninitialized(&mut self, ep: ExecutionPoint, name: &str) {
        let msg = format!("uninitialized constant {name}");
        self.report(ep, DiagnosticKind::UndefinedReference, Severity::Warning, msg);
    }

    /// Constant reads still unresolved once nothing else is left to run:
    /// reported, and continued with `untyped`. A read that now resolves
    /// (say through an ancestor) is stepped again instead. Returns whether
    /// anything was scheduled.
    pub(super) fn settle_constants(&mut self) -> bool {
        let pending = std::mem::take(&mut self.pending_consts);
        let mut scheduled = false;
        for (ep, read) in pending {
            if self.constant_owner(ep, &read.name, read.cbase).is_some() {
                self.worklist.push(ep);
                scheduled = true;
                continue;
            }
            tracing::debug!(constant = %read.name, pc = ep.pc, "constant never assigned");
            self.settled_consts.insert(ep);
            self.report_uninitialized(ep, &read.name);
            self.resume(&Continuation::Push, ep, read.env, TypeId::ANY);
            scheduled = true;
        }
        scheduled
    }

    /// A class or module definition bound `name` in `outer`.
    pub(super) fn constant_bound(&mut self, outer: ClassId, name: &str) {
        self.wake_readers(&VarLoc::Const(outer, name.to_string()));
    }

    pub(super) fn execute_set_constant(&mut self, ep: ExecutionPoint, env: &Env, name: &str, value: TypeId, cbase: TypeId) {
        let owner = match *self.types.kind(cbase) {
            TypeKind::Class(class) => class,
            _ => self.cref_at(ep).class,
        };
        let ty = self.globalize(ep, env, value);
        self.write_var(&VarLoc::Const(owner, name.to_string()), ty, ep);
    }
}
