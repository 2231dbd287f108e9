//! Raw-to-normalized instruction sequence conversion.
//!
//! The pipeline for one sequence is:
//!
//! 1. rename handler continuation labels and insert a `nop` in front of each
//!    (rescue/ensure bodies are virtually called and need a dedicated return
//!    address),
//! 2. insert the body-start marker after default-argument initialization,
//! 3. lay out instructions and resolve labels to indices,
//! 4. decode operands against the opcode table (nested sequences first),
//! 5. expand the handler table per instruction index,
//! 6. fuse branch idioms (see [`crate::fusion`]).

use crate::error::{NormalizeError, NormalizeResult};
use crate::fusion;
use crate::insn::{
    BranchKind, BranchOp, CallInfo, Insn, Literal, LocalRef, Op, SpecialObject, ThrowKind,
};
use crate::iseq::{
    ArgLayout, CatchEntry, CatchKind, Iseq, IseqId, IseqTable, KeywordDefault, KeywordParam,
};
use crate::raw::{RawCatchEntry, RawEntry, RawIseq};
use serde_json::Value;
use std::collections::HashMap;

const EXCEPTION_CONT_SUFFIX: &str = "_exception_cont";

#[derive(Debug, Clone)]
enum Item<'r> {
    Label(String),
    Insn {
        opcode: &'r str,
        operands: &'r [Value],
        line: u32,
    },
    Marker(Op, u32),
}

impl Item<'_> {
    fn opcode(&self) -> Option<&str> {
        match self {
            Item::Insn { opcode, .. } => Some(opcode),
            Item::Marker(op, _) => Some(op.name()),
            Item::Label(_) => None,
        }
    }
}

/// Normalizes `raw` (and every sequence nested in it) into `table`.
///
/// Returns the id of the outermost sequence. Nested sequences receive
/// smaller ids than their parents.
pub fn normalize(raw: &RawIseq, table: &mut IseqTable) -> NormalizeResult<IseqId> {
    let mut items: Vec<Item<'_>> = raw
        .body
        .iter()
        .map(|entry| match entry {
            RawEntry::Label(name) => Item::Label(name.clone()),
            RawEntry::Insn(opcode, operands, line) => Item::Insn {
                opcode: opcode.as_str(),
                operands: operands.as_slice(),
                line: *line,
            },
        })
        .collect();

    let catch_rows = add_exception_cont_marker(&mut items, &raw.catch_table);
    add_body_start_marker(raw, &mut items)?;

    let labels = create_label_table(&raw.name, &items)?;
    let mut decoder = Decoder {
        iseq: &raw.name,
        labels: &labels,
        table,
    };

    let mut insns = Vec::with_capacity(labels.len() + items.len());
    for item in &items {
        match item {
            Item::Label(_) => {}
            Item::Marker(op, line) => insns.push(Insn::new(op.clone(), *line)),
            Item::Insn {
                opcode,
                operands,
                line,
            } => {
                let op = decoder.decode(opcode, operands, *line)?;
                insns.push(Insn::new(op, *line));
            }
        }
    }

    let args = decoder.arg_layout(raw)?;
    let catch_table = decoder.catch_table(&catch_rows, insns.len())?;

    fusion::unify(&mut insns, &catch_table);

    let iseq = Iseq {
        id: table.next_id(),
        name: raw.name.clone(),
        path: raw.path.clone(),
        kind: raw.kind,
        start_line: raw.start_line,
        locals: raw.locals.clone(),
        args,
        insns,
        catch_table,
    };
    Ok(table.push(iseq))
}

/// Gives each rescue/ensure continuation its own `nop`, returning the handler
/// rows with continuation labels redirected to the new markers.
fn add_exception_cont_marker<'r>(
    items: &mut Vec<Item<'r>>,
    rows: &'r [RawCatchEntry],
) -> Vec<(&'r RawCatchEntry, String)> {
    let mut cont_labels: Vec<&str> = Vec::new();
    let renamed = rows
        .iter()
        .map(|row| {
            if matches!(row.kind.as_str(), "rescue" | "ensure") {
                if !cont_labels.contains(&row.cont.as_str()) {
                    cont_labels.push(row.cont.as_str());
                }
                (row, format!("{}{}", row.cont, EXCEPTION_CONT_SUFFIX))
            } else {
                (row, row.cont.clone())
            }
        })
        .collect();

    let mut i = 0;
    while i < items.len() {
        if let Item::Label(name) = &items[i] {
            if cont_labels.contains(&name.as_str()) {
                let line = next_line(items, i);
                let marker = format!("{}{}", name, EXCEPTION_CONT_SUFFIX);
                items.insert(i, Item::Marker(Op::Nop, line));
                items.insert(i, Item::Label(marker));
                i += 2;
            }
        }
        i += 1;
    }
    renamed
}

fn next_line(items: &[Item<'_>], from: usize) -> u32 {
    items[from..]
        .iter()
        .find_map(|item| match item {
            Item::Insn { line, .. } | Item::Marker(_, line) => Some(*line),
            Item::Label(_) => None,
        })
        .unwrap_or(0)
}

fn label_position(items: &[Item<'_>], label: &str) -> Option<usize> {
    items
        .iter()
        .position(|item| matches!(item, Item::Label(name) if name == label))
}

fn add_body_start_marker(raw: &RawIseq, items: &mut Vec<Item<'_>>) -> NormalizeResult<()> {
    if !raw.kind.takes_arguments() {
        return Ok(());
    }

    // skip default-value initialization of optional arguments
    let mut i = match raw.args.opt.last() {
        Some(label) => {
            label_position(items, label).ok_or_else(|| NormalizeError::UnknownLabel {
                label: label.clone(),
                iseq: raw.name.clone(),
            })? + 1
        }
        None => items
            .iter()
            .position(|item| !matches!(item, Item::Label(_)))
            .unwrap_or(items.len()),
    };

    // skip keyword initialization guarded by checkkeyword
    while items.get(i).and_then(Item::opcode) == Some("checkkeyword") {
        let target = match items.get(i + 1) {
            Some(Item::Insn {
                opcode: "branchif",
                operands,
                ..
            }) => operands.first().and_then(Value::as_str),
            _ => None,
        };
        let label = target.ok_or_else(|| NormalizeError::MalformedKeywordInit {
            iseq: raw.name.clone(),
            index: i,
        })?;
        i = label_position(items, label).ok_or_else(|| NormalizeError::UnknownLabel {
            label: label.to_string(),
            iseq: raw.name.clone(),
        })? + 1;
    }

    items.insert(i, Item::Marker(Op::BodyStart, raw.start_line));
    Ok(())
}

fn create_label_table(iseq: &str, items: &[Item<'_>]) -> NormalizeResult<HashMap<String, usize>> {
    let mut labels = HashMap::new();
    let mut pc = 0;
    for item in items {
        match item {
            Item::Label(name) => {
                if labels.insert(name.clone(), pc).is_some() {
                    return Err(NormalizeError::DuplicateLabel {
                        label: name.clone(),
                        iseq: iseq.to_string(),
                    });
                }
            }
            _ => pc += 1,
        }
    }
    Ok(labels)
}

/// Decodes a JSON literal operand.
pub fn decode_literal(value: &Value) -> Result<Literal, String> {
    match value {
        Value::Null => Ok(Literal::Nil),
        Value::Bool(true) => Ok(Literal::True),
        Value::Bool(false) => Ok(Literal::False),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Ok(Literal::Int(i))
            } else {
                n.as_f64()
                    .map(Literal::Float)
                    .ok_or_else(|| format!("unrepresentable number {}", n))
            }
        }
        Value::String(s) => Ok(Literal::Str(s.clone())),
        Value::Array(elems) => elems
            .iter()
            .map(decode_literal)
            .collect::<Result<_, _>>()
            .map(Literal::Array),
        Value::Object(map) => {
            let (key, inner) = match map.iter().next() {
                Some(entry) if map.len() == 1 => entry,
                _ => return Err("literal object must have exactly one key".to_string()),
            };
            match key.as_str() {
                "sym" => inner
                    .as_str()
                    .map(|s| Literal::Sym(s.to_string()))
                    .ok_or_else(|| "symbol literal must be a string".to_string()),
                "str" => inner
                    .as_str()
                    .map(|s| Literal::Str(s.to_string()))
                    .ok_or_else(|| "string literal must be a string".to_string()),
                "regexp" => inner
                    .as_str()
                    .map(|s| Literal::Regexp(s.to_string()))
                    .ok_or_else(|| "regexp literal must be a string".to_string()),
                "array" => match inner {
                    Value::Array(elems) => elems
                        .iter()
                        .map(decode_literal)
                        .collect::<Result<_, _>>()
                        .map(Literal::Array),
                    _ => Err("array literal must be a list".to_string()),
                },
                "hash" => match inner {
                    Value::Array(pairs) => pairs
                        .iter()
                        .map(|pair| match pair {
                            Value::Array(kv) if kv.len() == 2 => {
                                Ok((decode_literal(&kv[0])?, decode_literal(&kv[1])?))
                            }
                            _ => Err("hash literal entries must be [key, value]".to_string()),
                        })
                        .collect::<Result<_, _>>()
                        .map(Literal::Hash),
                    _ => Err("hash literal must be a list of pairs".to_string()),
                },
                "range" => match inner {
                    Value::Array(parts) if parts.len() == 3 => Ok(Literal::Range {
                        begin: Box::new(decode_literal(&parts[0])?),
                        end: Box::new(decode_literal(&parts[1])?),
                        exclusive: parts[2].as_bool().unwrap_or(false),
                    }),
                    _ => Err("range literal must be [begin, end, exclusive]".to_string()),
                },
                other => Err(format!("unknown literal tag `{}`", other)),
            }
        }
    }
}

struct Decoder<'a> {
    iseq: &'a str,
    labels: &'a HashMap<String, usize>,
    table: &'a mut IseqTable,
}

impl Decoder<'_> {
    fn malformed(&self, opcode: &str, index: usize, detail: impl Into<String>) -> NormalizeError {
        NormalizeError::MalformedOperand {
            opcode: opcode.to_string(),
            index,
            iseq: self.iseq.to_string(),
            detail: detail.into(),
        }
    }

    fn operand<'v>(&self, opcode: &str, ops: &'v [Value], i: usize) -> NormalizeResult<&'v Value> {
        ops.get(i)
            .ok_or_else(|| self.malformed(opcode, i, "missing operand"))
    }

    fn int(&self, opcode: &str, ops: &[Value], i: usize) -> NormalizeResult<i64> {
        self.operand(opcode, ops, i)?
            .as_i64()
            .ok_or_else(|| self.malformed(opcode, i, "expected an integer"))
    }

    fn uint(&self, opcode: &str, ops: &[Value], i: usize) -> NormalizeResult<usize> {
        let v = self.int(opcode, ops, i)?;
        usize::try_from(v).map_err(|_| self.malformed(opcode, i, "expected a non-negative integer"))
    }

    fn flag(&self, opcode: &str, ops: &[Value], i: usize) -> NormalizeResult<u32> {
        let v = self.int(opcode, ops, i)?;
        u32::try_from(v).map_err(|_| self.malformed(opcode, i, "flag out of range"))
    }

    /// Identifier operand: a plain string or a `{"sym": ..}` literal.
    fn id(&self, opcode: &str, ops: &[Value], i: usize) -> NormalizeResult<String> {
        match self.operand(opcode, ops, i)? {
            Value::String(s) => Ok(s.clone()),
            other => match decode_literal(other) {
                Ok(Literal::Sym(s)) => Ok(s),
                _ => Err(self.malformed(opcode, i, "expected an identifier")),
            },
        }
    }

    fn label(&self, opcode: &str, ops: &[Value], i: usize) -> NormalizeResult<usize> {
        let name = self
            .operand(opcode, ops, i)?
            .as_str()
            .ok_or_else(|| self.malformed(opcode, i, "expected a label"))?;
        self.resolve(name)
    }

    fn resolve(&self, label: &str) -> NormalizeResult<usize> {
        self.labels
            .get(label)
            .copied()
            .ok_or_else(|| NormalizeError::UnknownLabel {
                label: label.to_string(),
                iseq: self.iseq.to_string(),
            })
    }

    fn literal(&self, opcode: &str, ops: &[Value], i: usize) -> NormalizeResult<Literal> {
        decode_literal(self.operand(opcode, ops, i)?).map_err(|e| self.malformed(opcode, i, e))
    }

    fn local(&self, opcode: &str, ops: &[Value]) -> NormalizeResult<LocalRef> {
        Ok(LocalRef {
            idx: self.uint(opcode, ops, 0)?,
            level: self.uint(opcode, ops, 1)?,
        })
    }

    fn nested(&mut self, opcode: &str, value: &Value, i: usize) -> NormalizeResult<IseqId> {
        let raw: RawIseq = serde_json::from_value(value.clone())
            .map_err(|e| self.malformed(opcode, i, e.to_string()))?;
        normalize(&raw, self.table)
    }

    fn iseq(&mut self, opcode: &str, ops: &[Value], i: usize) -> NormalizeResult<IseqId> {
        let value = self.operand(opcode, ops, i)?;
        self.nested(opcode, value, i)
    }

    fn opt_iseq(&mut self, opcode: &str, ops: &[Value], i: usize) -> NormalizeResult<Option<IseqId>> {
        match ops.get(i) {
            None | Some(Value::Null) => Ok(None),
            Some(value) => self.nested(opcode, value, i).map(Some),
        }
    }

    fn call_info(&self, opcode: &str, ops: &[Value], i: usize) -> NormalizeResult<CallInfo> {
        let obj = self
            .operand(opcode, ops, i)?
            .as_object()
            .ok_or_else(|| self.malformed(opcode, i, "expected call info"))?;
        let mid = obj
            .get("mid")
            .and_then(Value::as_str)
            .ok_or_else(|| self.malformed(opcode, i, "call info without `mid`"))?
            .to_string();
        let argc = match obj.get("argc").or_else(|| obj.get("orig_argc")) {
            None | Some(Value::Null) => 0,
            Some(v) => v
                .as_u64()
                .and_then(|n| usize::try_from(n).ok())
                .ok_or_else(|| self.malformed(opcode, i, "`argc` must be a non-negative integer"))?,
        };
        let flag = match obj.get("flag") {
            None | Some(Value::Null) => 0,
            Some(v) => v
                .as_u64()
                .and_then(|n| u32::try_from(n).ok())
                .ok_or_else(|| self.malformed(opcode, i, "call flag out of range"))?,
        };
        let kw_arg = match obj.get("kw_arg") {
            None | Some(Value::Null) => Vec::new(),
            Some(Value::Array(names)) => names
                .iter()
                .map(|n| {
                    n.as_str()
                        .map(str::to_string)
                        .ok_or_else(|| self.malformed(opcode, i, "keyword names must be strings"))
                })
                .collect::<NormalizeResult<_>>()?,
            Some(_) => return Err(self.malformed(opcode, i, "`kw_arg` must be a list")),
        };
        Ok(CallInfo {
            mid,
            argc,
            flag,
            kw_arg,
        })
    }

    fn branch(&self, opcode: &str, kind: BranchKind, ops: &[Value]) -> NormalizeResult<Op> {
        Ok(Op::Branch(BranchOp {
            kind,
            target: self.label(opcode, ops, 0)?,
        }))
    }

    fn decode(&mut self, opcode: &str, ops: &[Value], line: u32) -> NormalizeResult<Op> {
        let op = match opcode {
            "nop" => Op::Nop,
            "putnil" => Op::PutNil,
            "putself" => Op::PutSelf,
            "putobject" => Op::PutObject(self.literal(opcode, ops, 0)?),
            "putobject_INT2FIX_0_" => Op::PutObject(Literal::Int(0)),
            "putobject_INT2FIX_1_" => Op::PutObject(Literal::Int(1)),
            "putstring" => match self.literal(opcode, ops, 0)? {
                Literal::Str(s) => Op::PutString(s),
                _ => return Err(self.malformed(opcode, 0, "expected a string")),
            },
            "putspecialobject" => match self.int(opcode, ops, 0)? {
                1 => Op::PutSpecialObject(SpecialObject::VmCore),
                2 => Op::PutSpecialObject(SpecialObject::CBase),
                3 => Op::PutSpecialObject(SpecialObject::ConstBase),
                _ => return Err(self.malformed(opcode, 0, "unknown special object")),
            },
            "duparray" => Op::DupArray(self.literal(opcode, ops, 0)?),
            "duphash" => Op::DupHash(self.literal(opcode, ops, 0)?),
            "newarray" => Op::NewArray(self.uint(opcode, ops, 0)?),
            "newarraykwsplat" => Op::NewArrayKwSplat(self.uint(opcode, ops, 0)?),
            "newhash" => Op::NewHash(self.uint(opcode, ops, 0)?),
            "newrange" => Op::NewRange {
                exclusive: self.int(opcode, ops, 0)? != 0,
            },
            "concatstrings" => Op::ConcatStrings(self.uint(opcode, ops, 0)?),
            "tostring" => Op::ToString,
            "objtostring" => Op::ObjToString(self.call_info(opcode, ops, 0)?),
            "anytostring" => Op::AnyToString,
            "freezestring" => Op::FreezeString,
            "toregexp" => Op::ToRegexp(self.uint(opcode, ops, 1)?),
            "intern" => Op::Intern,

            "definemethod" => Op::DefineMethod {
                mid: self.id(opcode, ops, 0)?,
                body: self.iseq(opcode, ops, 1)?,
            },
            "definesmethod" => Op::DefineSMethod {
                mid: self.id(opcode, ops, 0)?,
                body: self.iseq(opcode, ops, 1)?,
            },
            "defineclass" => Op::DefineClass {
                name: self.id(opcode, ops, 0)?,
                body: self.iseq(opcode, ops, 1)?,
                flags: self.flag(opcode, ops, 2)?,
            },

            "send" => Op::Send {
                call: self.call_info(opcode, ops, 0)?,
                block: self.opt_iseq(opcode, ops, 1)?,
            },
            "opt_send_without_block" => Op::Send {
                call: self.call_info(opcode, ops, 0)?,
                block: None,
            },
            "invokeblock" => Op::InvokeBlock(self.call_info(opcode, ops, 0)?),
            "invokesuper" => Op::InvokeSuper {
                call: self.call_info(opcode, ops, 0)?,
                block: self.opt_iseq(opcode, ops, 1)?,
            },
            "leave" => Op::Leave,
            "throw" => {
                let state = self.int(opcode, ops, 0)?;
                Op::Throw(
                    ThrowKind::from_state(state)
                        .ok_or_else(|| self.malformed(opcode, 0, "unknown throw state"))?,
                )
            }
            "once" => Op::Once(self.iseq(opcode, ops, 0)?),

            "branchif" => self.branch(opcode, BranchKind::If, ops)?,
            "branchunless" => self.branch(opcode, BranchKind::Unless, ops)?,
            "branchnil" => self.branch(opcode, BranchKind::Nil, ops)?,
            "jump" => Op::Jump(self.label(opcode, ops, 0)?),

            "getlocal" | "getblockparam" | "getblockparamproxy" => {
                Op::GetLocal(self.local(opcode, ops)?)
            }
            "getlocal_WC_0" => Op::GetLocal(LocalRef {
                idx: self.uint(opcode, ops, 0)?,
                level: 0,
            }),
            "getlocal_WC_1" => Op::GetLocal(LocalRef {
                idx: self.uint(opcode, ops, 0)?,
                level: 1,
            }),
            "setlocal" | "setblockparam" => Op::SetLocal(self.local(opcode, ops)?),
            "setlocal_WC_0" => Op::SetLocal(LocalRef {
                idx: self.uint(opcode, ops, 0)?,
                level: 0,
            }),
            "setlocal_WC_1" => Op::SetLocal(LocalRef {
                idx: self.uint(opcode, ops, 0)?,
                level: 1,
            }),
            "getinstancevariable" => Op::GetInstanceVariable(self.id(opcode, ops, 0)?),
            "setinstancevariable" => Op::SetInstanceVariable(self.id(opcode, ops, 0)?),
            "getclassvariable" => Op::GetClassVariable(self.id(opcode, ops, 0)?),
            "setclassvariable" => Op::SetClassVariable(self.id(opcode, ops, 0)?),
            "getglobal" => Op::GetGlobal(self.id(opcode, ops, 0)?),
            "setglobal" => Op::SetGlobal(self.id(opcode, ops, 0)?),
            "getconstant" => Op::GetConstant(self.id(opcode, ops, 0)?),
            "setconstant" => Op::SetConstant(self.id(opcode, ops, 0)?),
            "getspecial" => Op::GetSpecial {
                key: self.int(opcode, ops, 0)?,
                kind: self.int(opcode, ops, 1)?,
            },
            "setspecial" => Op::SetSpecial(self.int(opcode, ops, 0)?),

            "dup" => Op::Dup,
            "dupn" => Op::DupN(self.uint(opcode, ops, 0)?),
            "pop" => Op::Pop,
            "swap" => Op::Swap,
            "reverse" => Op::Reverse(self.uint(opcode, ops, 0)?),
            "topn" => Op::TopN(self.uint(opcode, ops, 0)?),
            "setn" => Op::SetN(self.uint(opcode, ops, 0)?),
            "adjuststack" => Op::AdjustStack(self.uint(opcode, ops, 0)?),

            "defined" => Op::Defined,
            "checkmatch" => Op::CheckMatch(self.flag(opcode, ops, 0)?),
            "checkkeyword" => Op::CheckKeyword {
                bits: self.uint(opcode, ops, 0)?,
                idx: self.uint(opcode, ops, 1)?,
            },
            "checktype" => Op::CheckType(self.flag(opcode, ops, 0)?),
            "splatarray" => Op::SplatArray,
            "expandarray" => Op::ExpandArray {
                num: self.uint(opcode, ops, 0)?,
                flag: self.flag(opcode, ops, 1)?,
            },
            "concatarray" => Op::ConcatArray,

            _ => {
                return Err(NormalizeError::UnknownOpcode {
                    opcode: opcode.to_string(),
                    iseq: self.iseq.to_string(),
                    line,
                })
            }
        };
        Ok(op)
    }

    fn arg_layout(&self, raw: &RawIseq) -> NormalizeResult<ArgLayout> {
        let args = &raw.args;
        let bad = |detail: String| NormalizeError::MalformedArgs {
            iseq: raw.name.clone(),
            detail,
        };

        let opt = args
            .opt
            .iter()
            .map(|label| self.resolve(label))
            .collect::<NormalizeResult<Vec<_>>>()?;
        let opt_num = opt.len().saturating_sub(1);

        let kw_start =
            args.lead_num + opt_num + usize::from(args.rest_start.is_some()) + args.post_num;
        let keywords = args
            .keyword
            .iter()
            .enumerate()
            .map(|(i, kw)| -> NormalizeResult<KeywordParam> {
                let default = if kw.required {
                    KeywordDefault::Required
                } else if kw.computed {
                    KeywordDefault::Computed
                } else {
                    match &kw.default {
                        Some(v) => KeywordDefault::Literal(
                            decode_literal(v).map_err(|e| bad(format!("keyword `{}`: {}", kw.name, e)))?,
                        ),
                        None => KeywordDefault::Literal(Literal::Nil),
                    }
                };
                Ok(KeywordParam {
                    name: kw.name.clone(),
                    slot: kw_start + i,
                    default,
                })
            })
            .collect::<NormalizeResult<Vec<_>>>()?;

        let local_count = raw.locals.len();
        let in_range = |slot: Option<usize>, what: &str| match slot {
            Some(s) if s >= local_count => Err(bad(format!(
                "{} slot {} exceeds {} locals",
                what, s, local_count
            ))),
            _ => Ok(()),
        };
        in_range(args.rest_start, "rest")?;
        in_range(args.kwrest, "keyword rest")?;
        in_range(args.block_start, "block")?;
        if args.post_num > 0 {
            let start = args
                .post_start
                .ok_or_else(|| bad("post arguments without post_start".to_string()))?;
            in_range(Some(start + args.post_num - 1), "post")?;
        }
        if let Some(last) = keywords.last() {
            in_range(Some(last.slot), "keyword")?;
        }
        if args.lead_num + opt_num > local_count {
            return Err(bad(format!(
                "{} positional parameters exceed {} locals",
                args.lead_num + opt_num,
                local_count
            )));
        }

        Ok(ArgLayout {
            lead_num: args.lead_num,
            opt,
            rest_start: args.rest_start,
            post_start: args.post_start,
            post_num: args.post_num,
            keywords,
            kwrest: args.kwrest,
            block_start: args.block_start,
            ambiguous_param0: args.ambiguous_param0,
        })
    }

    fn catch_table(
        &mut self,
        rows: &[(&RawCatchEntry, String)],
        insn_count: usize,
    ) -> NormalizeResult<Vec<Vec<CatchEntry>>> {
        let mut table = vec![Vec::new(); insn_count];
        for (row, cont) in rows {
            let bad = |detail: String| NormalizeError::MalformedCatchTable {
                iseq: self.iseq.to_string(),
                detail,
            };
            let kind = CatchKind::parse(&row.kind)
                .ok_or_else(|| bad(format!("unknown entry kind `{}`", row.kind)))?;
            let start = self.resolve(&row.start)?;
            let end = self.resolve(&row.end)?;
            let cont = self.resolve(cont)?;
            if start > end {
                return Err(bad(format!("range {}..{} is reversed", row.start, row.end)));
            }
            let handler = match (&row.iseq, kind.has_handler()) {
                (Some(raw), _) => Some(normalize(raw, self.table)?),
                (None, true) => {
                    return Err(bad(format!("{} entry without a handler body", row.kind)))
                }
                (None, false) => None,
            };
            for slot in table.iter_mut().take(end).skip(start) {
                slot.push(CatchEntry {
                    kind,
                    handler,
                    cont,
                    stack_depth: row.sp,
                });
            }
        }
        Ok(table)
    }
}
