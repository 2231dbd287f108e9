//! Frame exits and exception handlers.
//!
//! - `leave`: the frame's result becomes its context's return type
//! - `throw`: `return` from a block, `break`, `next`, `retry`, `redo`, `raise`
//! - `once`: a block body run in place
//! - handler entry: every point a rescue/ensure entry covers also starts the
//!   handler body, with the exception slot bound to the raised-error union

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]

use super::{pop, Analyzer};
use crate::abstract_interp::continuation::Continuation;
use crate::abstract_interp::env::Env;
use crate::abstract_interp::state::{Context, ExecutionPoint};
use crate::error::InterpError;
use crate::lattice::TypeId;
use rbprof_iseq::{CatchEntry, CatchKind, IseqId, IseqKind, ThrowKind};

impl Analyzer {
    pub(super) fn execute_leave(&mut self, ep: ExecutionPoint, mut env: Env) -> Result<(), InterpError> {
        let ty = pop(&mut env, "leave")?;
        if !env.stack.is_empty() {
            return Err(InterpError::UnbalancedLeave {
                depth: env.stack.len(),
            });
        }
        let ty = self.globalize(ep, &env, ty);
        self.add_return_value(ep.ctx, ty);
        Ok(())
    }

    pub(super) fn execute_throw(&mut self, ep: ExecutionPoint, mut env: Env, kind: ThrowKind) -> Result<(), InterpError> {
        let ty = pop(&mut env, "throw")?;
        let ty = self.globalize(ep, &env, ty);
        match kind {
            ThrowKind::Return => {
                let root = self.frame_root(ep);
                self.add_return_value(root.ctx, ty);
            }
            ThrowKind::Break => {
                let frame = self.escape_handlers(ep);
                if self.frame_kind(frame) == Some(IseqKind::Block) {
                    let Some(send) = self.state.outer(frame) else {
                        return Ok(());
                    };
                    let ctns = self.callers.get(&send).cloned().unwrap_or_default();
                    for ctn in ctns {
                        self.deliver(send, ctn, ty);
                    }
                } else {
                    self.jump_to_catch(frame, CatchKind::Break, Some(ty));
                }
            }
            ThrowKind::Next => {
                let frame = self.escape_handlers(ep);
                if self.frame_kind(frame) == Some(IseqKind::Block) {
                    self.add_return_value(frame.ctx, ty);
                } else {
                    self.jump_to_catch(frame, CatchKind::Next, Some(ty));
                }
            }
            ThrowKind::Redo => {
                let frame = self.escape_handlers(ep);
                self.jump_to_catch(frame, CatchKind::Redo, None);
            }
            ThrowKind::Retry => self.retry(ep),
            ThrowKind::Raise => self.raise_error(ty),
            ThrowKind::None | ThrowKind::Throw => {}
        }
        Ok(())
    }

    /// From inside rescue/ensure bodies, the point in the enclosing frame
    /// that the handler continues at.
    fn escape_handlers(&self, ep: ExecutionPoint) -> ExecutionPoint {
        let mut cur = ep;
        while matches!(self.frame_kind(cur), Some(IseqKind::Rescue | IseqKind::Ensure)) {
            match self.state.outer(cur) {
                Some(outer) => cur = outer,
                None => break,
            }
        }
        cur
    }

    /// Continues `frame` at the `kind` catch entry covering it.
    fn jump_to_catch(&mut self, frame: ExecutionPoint, kind: CatchKind, value: Option<TypeId>) {
        let Some(iseq) = self.state.ctx(frame.ctx).iseq().and_then(|id| self.program.get(id)) else {
            return;
        };
        let Some(entry) = iseq.handlers_at(frame.pc).iter().find(|e| e.kind == kind).cloned() else {
            tracing::debug!(pc = frame.pc, ?kind, "no catch entry for throw");
            return;
        };
        let Some(mut env) = self
            .return_envs
            .get(&frame)
            .or_else(|| self.ep2env.get(&frame))
            .cloned()
        else {
            return;
        };
        env.stack.truncate(entry.stack_depth);
        if let Some(ty) = value {
            env.push(ty);
        }
        self.merge_env(frame.jump(entry.cont), env);
    }

    /// `retry` in a rescue body restarts the region the handler protects.
    fn retry(&mut self, ep: ExecutionPoint) {
        let Some(handler) = self.state.ctx(ep.ctx).iseq() else {
            return;
        };
        let Some(cont) = self.state.outer(ep) else {
            return;
        };
        let Some(iseq) = self.state.ctx(cont.ctx).iseq().and_then(|id| self.program.get(id)) else {
            return;
        };
        let start = iseq.catch_table.iter().enumerate().find_map(|(pc, entries)| {
            entries
                .iter()
                .find(|e| e.kind == CatchKind::Rescue && e.handler == Some(handler))
                .map(|e| (pc, e.stack_depth))
        });
        let Some((start, depth)) = start else {
            return;
        };
        let Some(mut env) = self.return_envs.get(&cont).cloned() else {
            return;
        };
        env.stack.truncate(depth);
        self.merge_env(cont.jump(start), env);
    }

    /// `once`: runs `body` as a block of the current frame and pushes its
    /// result.
    pub(super) fn execute_once(&mut self, ep: ExecutionPoint, env: Env, body: IseqId) -> Result<(), InterpError> {
        let cref = self.frame_cref(ep);
        let ctx = self.state.contexts.intern(Context::Iseq {
            iseq: body,
            cref,
            mid: None,
        });
        let locals = self.program.get(body).map_or(0, |iseq| iseq.local_count());
        let outer = self.state.eps.intern(ep);
        let body_env = Env::new(env.static_env.clone(), vec![TypeId::NIL; locals]);
        self.add_callsite(ctx, ep, env, Continuation::Push);
        self.merge_env(ExecutionPoint::new(ctx, 0, Some(outer)), body_env);
        Ok(())
    }

    /// Starts the handler of `entry` from the protected point `ep`. The
    /// handler's result continues the frame at `entry.cont`.
    pub(super) fn enter_handler(&mut self, ep: ExecutionPoint, env: &Env, entry: &CatchEntry) {
        let Some(handler) = entry.handler else {
            return;
        };
        let cont_ep = ep.jump(entry.cont);
        let mut cont_env = env.clone();
        cont_env.stack.truncate(entry.stack_depth);

        let cref = self.frame_cref(ep);
        let ctx = self.state.contexts.intern(Context::Iseq {
            iseq: handler,
            cref,
            mid: None,
        });
        self.add_callsite(ctx, cont_ep, cont_env, Continuation::PushAt(entry.cont));

        let locals = self.program.get(handler).map_or(0, |iseq| iseq.local_count());
        let mut handler_env = Env::new(env.static_env.clone(), vec![TypeId::NIL; locals]);
        handler_env.set_local(0, self.errinfo);
        self.errinfo_readers.insert(ep);
        let outer = self.state.eps.intern(cont_ep);
        self.merge_env(ExecutionPoint::new(ctx, 0, Some(outer)), handler_env);
    }
}
