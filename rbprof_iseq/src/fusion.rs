//! Fusion of compiler branch idioms into narrowing probes.
//!
//! `if x` compiles to `getlocal x; branch`. Interpreting the two separately,
//! the branch only sees a value on the stack and cannot tell which local it
//! came from, so the environment cannot be split per member of `x`'s type.
//! The passes here rewrite such idioms into single instructions that carry
//! the local (or receiver/argument) operand, replacing consumed instructions
//! with `nop` so indices stay stable.
//!
//! A fusion is skipped when one of the instructions it would consume is a
//! jump target: control could enter the middle of the idiom, and the plain
//! instructions remain, analyzed without narrowing.

use crate::insn::{CallInfo, Insn, Literal, LocalRef, Op};
use crate::iseq::CatchEntry;
use std::collections::HashSet;

/// Applies every fusion pass in order.
pub(crate) fn unify(insns: &mut [Insn], catch_table: &[Vec<CatchEntry>]) {
    let targets = branch_targets(insns, catch_table);

    fuse_case_when(insns, &targets);
    fuse_recv_getlocal_send_branch(insns, &targets);
    fuse_arg_getlocal_send_branch(insns, &targets);
    fuse_send_branch(insns, &targets);
    fuse_getlocal_dup_branch(insns, &targets);
    fuse_dup_setlocal_branch(insns, &targets);
    fuse_dup_branch(insns, &targets);
    fuse_getlocal_branch(insns, &targets);
}

/// Indices that control can reach other than by falling through.
pub fn branch_targets(insns: &[Insn], catch_table: &[Vec<CatchEntry>]) -> HashSet<usize> {
    let mut targets = HashSet::new();
    for insn in insns {
        match &insn.op {
            Op::Jump(target) => {
                targets.insert(*target);
            }
            op => {
                if let Some(branch) = op.branch() {
                    targets.insert(branch.target);
                }
            }
        }
    }
    for entries in catch_table {
        for entry in entries {
            targets.insert(entry.cont);
        }
    }
    targets
}

fn any_target(targets: &HashSet<usize>, range: std::ops::RangeInclusive<usize>) -> bool {
    range.into_iter().any(|i| targets.contains(&i))
}

fn nop_at(insns: &mut [Insn], i: usize) {
    let line = insns[i].line;
    insns[i] = Insn::nop(line);
}

fn replace(insns: &mut [Insn], i: usize, op: Op) {
    insns[i].op = op;
}

/// `case x when A ... when B ... end`:
/// `getlocal x, (dup, putnil, putobject true, getconstant C, checkmatch 2, branch)*, pop`
fn fuse_case_when(insns: &mut [Insn], targets: &HashSet<usize>) {
    for i in 0..insns.len().saturating_sub(1) {
        let Some(local) = insns[i].op.frame_local() else {
            continue;
        };
        let mut nops = vec![i];
        let mut probes = Vec::new();
        let mut j = i + 1;
        let end = loop {
            match insns.get(j).map(|insn| &insn.op) {
                Some(Op::Dup) => {
                    let clause = insns.get(j + 1..j + 6).map(|w| {
                        (
                            &w[0].op, &w[1].op, &w[2].op, &w[3].op, &w[4].op,
                        )
                    });
                    let branch = match clause {
                        Some((
                            Op::PutNil,
                            Op::PutObject(Literal::True),
                            Op::GetConstant(_),
                            Op::CheckMatch(2),
                            Op::Branch(branch),
                        )) => *branch,
                        _ => break None,
                    };
                    if !matches!(insns.get(branch.target).map(|t| &t.op), Some(Op::Pop)) {
                        break None;
                    }
                    nops.extend([j, j + 4, branch.target]);
                    probes.push((j + 5, Op::GetLocalCheckMatchBranch { local, branch }));
                    j += 6;
                }
                Some(Op::Pop) => {
                    nops.push(j);
                    break Some(j);
                }
                _ => break None,
            }
        };
        let Some(end) = end else {
            continue;
        };
        if probes.is_empty() || any_target(targets, i + 1..=end) {
            continue;
        }
        for k in nops {
            nop_at(insns, k);
        }
        for (k, op) in probes {
            replace(insns, k, op);
        }
    }
}

enum SendScan {
    Match,
    Depth(i64),
}

/// Simulates the stack from a pushed local to find the send that consumes
/// it as receiver, immediately followed by a branch.
fn check_send_branch(insns: &[Insn], sp: i64, j: usize) -> Option<SendScan> {
    let mut sp = sp;
    // pops `n`; the value below must still be live
    macro_rules! consume {
        ($n:expr) => {{
            sp -= $n as i64;
            if sp <= 0 {
                return None;
            }
        }};
    }
    match &insns[j].op {
        Op::PutSpecialObject(_)
        | Op::PutNil
        | Op::PutObject(_)
        | Op::DupArray(_)
        | Op::PutString(_)
        | Op::PutSelf => sp += 1,
        Op::NewArray(n) | Op::NewArrayKwSplat(n) | Op::NewHash(n) | Op::ConcatStrings(n) => {
            consume!(*n);
            sp += 1;
        }
        Op::NewRange { .. } | Op::ToString | Op::AnyToString => {
            consume!(2);
            sp += 1;
        }
        Op::ObjToString(_) | Op::Intern => {
            consume!(1);
            sp += 1;
        }
        Op::FreezeString | Op::Nop | Op::BodyStart => {}
        Op::ToRegexp(n) => {
            consume!(*n);
            sp += 1;
        }
        Op::DefineMethod { .. } | Op::DefineSMethod { .. } => {}
        Op::DefineClass { .. } => sp -= 1,
        Op::Send { call, .. } | Op::InvokeSuper { call, .. } => {
            sp -= (call.stack_arity() + 1) as i64;
            if matches!(insns[j].op, Op::Send { .. })
                && sp == 0
                && matches!(insns.get(j + 1).map(|i| &i.op), Some(Op::Branch(_)))
            {
                return Some(SendScan::Match);
            }
            sp += 1;
        }
        Op::InvokeBlock(call) => {
            consume!(call.stack_arity());
            sp += 1;
        }
        Op::SetInstanceVariable(_) | Op::SetClassVariable(_) | Op::SetGlobal(_) => sp -= 1,
        Op::GetInstanceVariable(_)
        | Op::GetClassVariable(_)
        | Op::GetGlobal(_)
        | Op::GetLocal(_)
        | Op::GetSpecial { .. }
        | Op::Dup
        | Op::DupHash(_)
        | Op::CheckKeyword { .. }
        | Op::TopN(_) => sp += 1,
        Op::GetConstant(_) => {
            consume!(2);
            sp += 1;
        }
        Op::SetConstant(_) => sp -= 2,
        Op::DupN(n) => sp += *n as i64,
        Op::Pop => sp -= 1,
        Op::Swap => {
            consume!(2);
            sp += 2;
        }
        Op::Reverse(n) => {
            consume!(*n);
            sp += *n as i64;
        }
        Op::Defined | Op::SplatArray | Op::CheckType(_) => {
            consume!(1);
            sp += 1;
        }
        Op::CheckMatch(_) | Op::ConcatArray => {
            consume!(2);
            sp += 1;
        }
        Op::AdjustStack(n) => sp -= *n as i64,
        Op::ExpandArray { num, flag } => {
            consume!(1);
            sp += (*num + usize::from(flag & 1 == 1)) as i64;
        }
        Op::Leave
        | Op::Throw(_)
        | Op::Once(_)
        | Op::Branch(_)
        | Op::Jump(_)
        | Op::SetLocal(_)
        | Op::SetSpecial(_)
        | Op::SetN(_)
        | Op::GetLocalBranch { .. }
        | Op::GetLocalDupBranch { .. }
        | Op::DupBranch(_)
        | Op::DupSetLocalBranch { .. }
        | Op::GetLocalCheckMatchBranch { .. }
        | Op::RecvGetLocalSendBranch { .. }
        | Op::ArgGetLocalSendBranch { .. }
        | Op::SendBranch { .. } => return None,
    }
    if sp <= 0 {
        None
    } else {
        Some(SendScan::Depth(sp))
    }
}

fn send_operands(op: &Op) -> Option<(CallInfo, Option<crate::iseq::IseqId>)> {
    match op {
        Op::Send { call, block } => Some((call.clone(), *block)),
        _ => None,
    }
}

/// `getlocal recv, ..., send m, branch` where the send's receiver is the local
fn fuse_recv_getlocal_send_branch(insns: &mut [Insn], targets: &HashSet<usize>) {
    let mut found: Vec<(usize, usize, LocalRef)> = Vec::new();
    for i in 0..insns.len().saturating_sub(1) {
        let Some(local) = insns[i].op.frame_local() else {
            continue;
        };
        let mut sp = 1;
        let mut j = i + 1;
        while j < insns.len() {
            match check_send_branch(insns, sp, j) {
                Some(SendScan::Match) => {
                    found.push((i, j, local));
                    break;
                }
                Some(SendScan::Depth(depth)) => sp = depth,
                None => break,
            }
            j += 1;
        }
    }

    for (i, j, local) in found {
        if any_target(targets, i + 1..=j + 1) {
            continue;
        }
        let Some((call, block)) = send_operands(&insns[j].op) else {
            continue;
        };
        let Op::Branch(branch) = insns[j + 1].op else {
            continue;
        };
        nop_at(insns, j);
        replace(
            insns,
            j + 1,
            Op::RecvGetLocalSendBranch {
                local,
                call,
                block,
                branch,
            },
        );
    }
}

/// `getlocal x, send m(x), branch` with a single simple argument
fn fuse_arg_getlocal_send_branch(insns: &mut [Insn], targets: &HashSet<usize>) {
    for i in 0..insns.len().saturating_sub(2) {
        let Some(local) = insns[i].op.frame_local() else {
            continue;
        };
        let (call, block) = match &insns[i + 1].op {
            Op::Send { call, block }
                if call.flag == CallInfo::FLAG_ARGS_SIMPLE && call.argc == 1 =>
            {
                (call.clone(), *block)
            }
            _ => continue,
        };
        let Op::Branch(branch) = insns[i + 2].op else {
            continue;
        };
        if any_target(targets, i + 1..=i + 2) {
            continue;
        }
        nop_at(insns, i + 1);
        replace(
            insns,
            i + 2,
            Op::ArgGetLocalSendBranch {
                local,
                call,
                block,
                branch,
            },
        );
    }
}

/// `send m, branch`
fn fuse_send_branch(insns: &mut [Insn], targets: &HashSet<usize>) {
    for i in 0..insns.len().saturating_sub(1) {
        let Some((call, block)) = send_operands(&insns[i].op) else {
            continue;
        };
        let Op::Branch(branch) = insns[i + 1].op else {
            continue;
        };
        if targets.contains(&(i + 1)) {
            continue;
        }
        nop_at(insns, i);
        replace(insns, i + 1, Op::SendBranch { call, block, branch });
    }
}

/// `getlocal x, dup, branch` (`x || y`, `x && y`)
fn fuse_getlocal_dup_branch(insns: &mut [Insn], targets: &HashSet<usize>) {
    for i in 0..insns.len().saturating_sub(2) {
        if any_target(targets, i + 1..=i + 2) {
            continue;
        }
        let Some(local) = insns[i].op.frame_local() else {
            continue;
        };
        let (Op::Dup, Op::Branch(branch)) = (&insns[i + 1].op, &insns[i + 2].op) else {
            continue;
        };
        let branch = *branch;
        nop_at(insns, i);
        nop_at(insns, i + 1);
        replace(insns, i + 2, Op::GetLocalDupBranch { local, branch });
    }
}

/// `dup, setlocal x, branch` (`if x = expr`)
fn fuse_dup_setlocal_branch(insns: &mut [Insn], targets: &HashSet<usize>) {
    for i in 0..insns.len().saturating_sub(2) {
        if any_target(targets, i + 1..=i + 2) {
            continue;
        }
        let (Op::Dup, Op::SetLocal(local), Op::Branch(branch)) =
            (&insns[i].op, &insns[i + 1].op, &insns[i + 2].op)
        else {
            continue;
        };
        if local.level != 0 {
            continue;
        }
        let (local, branch) = (*local, *branch);
        nop_at(insns, i);
        nop_at(insns, i + 1);
        replace(insns, i + 2, Op::DupSetLocalBranch { local, branch });
    }
}

/// `dup, branch`
fn fuse_dup_branch(insns: &mut [Insn], targets: &HashSet<usize>) {
    for i in 0..insns.len().saturating_sub(1) {
        if targets.contains(&(i + 1)) {
            continue;
        }
        let (Op::Dup, Op::Branch(branch)) = (&insns[i].op, &insns[i + 1].op) else {
            continue;
        };
        let branch = *branch;
        nop_at(insns, i);
        replace(insns, i + 1, Op::DupBranch(branch));
    }
}

/// `getlocal x, branch`
fn fuse_getlocal_branch(insns: &mut [Insn], targets: &HashSet<usize>) {
    for i in 0..insns.len().saturating_sub(1) {
        if targets.contains(&(i + 1)) {
            continue;
        }
        let Some(local) = insns[i].op.frame_local() else {
            continue;
        };
        let Op::Branch(branch) = insns[i + 1].op else {
            continue;
        };
        nop_at(insns, i);
        replace(insns, i + 1, Op::GetLocalBranch { local, branch });
    }
}
