//! Shared helpers for normalizer integration tests
#![allow(dead_code)]

use rbprof_iseq::{normalize, IseqId, IseqTable, NormalizeError, Op, RawIseq};
use serde_json::{json, Value};

/// Parses a raw sequence from a `json!` value.
pub fn raw(value: Value) -> RawIseq {
    serde_json::from_value(value).unwrap_or_else(|e| panic!("bad raw iseq: {}", e))
}

/// Top-level sequence over the given local names and body.
pub fn top(locals: &[&str], body: Value) -> RawIseq {
    raw(json!({
        "name": "<main>",
        "path": "test.rb",
        "kind": "top",
        "start_line": 1,
        "locals": locals,
        "body": body,
    }))
}

/// Normalizes `raw`, panicking on failure.
pub fn normalized(raw: &RawIseq) -> (IseqTable, IseqId) {
    let mut table = IseqTable::new();
    let id = normalize(raw, &mut table).unwrap_or_else(|e| panic!("normalize failed: {}", e));
    (table, id)
}

/// Normalizes `raw`, expecting failure.
pub fn normalize_err(raw: &RawIseq) -> NormalizeError {
    let mut table = IseqTable::new();
    match normalize(raw, &mut table) {
        Ok(_) => panic!("expected a normalization error"),
        Err(e) => e,
    }
}

/// Operations of a normalized sequence.
pub fn ops(table: &IseqTable, id: IseqId) -> Vec<Op> {
    table
        .get(id)
        .expect("iseq id")
        .insns
        .iter()
        .map(|insn| insn.op.clone())
        .collect()
}

/// Call info operand for `send`.
pub fn call(mid: &str, argc: usize, flag: u32) -> Value {
    json!({ "mid": mid, "argc": argc, "flag": flag })
}
