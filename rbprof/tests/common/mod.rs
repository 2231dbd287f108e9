//! Shared helpers for analyzer integration tests
#![allow(dead_code)]

use rbprof::{analyze, AnalysisConfig, AnalysisReport, Analyzer, DeclarationSet, DiagnosticKind, RawIseq};
use serde_json::{json, Value};

/// `fcall` + `args_simple`: `foo(x)`
pub const FCALL: u32 = 0x14;
/// `vcall`: bare `foo`
pub const VCALL: u32 = 0x1c;
/// `args_simple`: `recv.foo(x)`
pub const SIMPLE: u32 = 0x10;

/// Parses a raw sequence from a `json!` value.
pub fn raw(value: Value) -> RawIseq {
    serde_json::from_value(value).unwrap_or_else(|e| panic!("bad raw iseq: {}", e))
}

/// Top-level sequence over the given local names and body.
pub fn program(locals: &[&str], body: Value) -> RawIseq {
    raw(json!({
        "name": "<main>",
        "path": "test.rb",
        "kind": "top",
        "start_line": 1,
        "locals": locals,
        "body": body,
    }))
}

/// Method body taking `lead_num` required arguments (the first locals).
pub fn method(name: &str, locals: &[&str], lead_num: usize, body: Value) -> Value {
    json!({
        "name": name,
        "path": "test.rb",
        "kind": "method",
        "start_line": 1,
        "locals": locals,
        "args": { "lead_num": lead_num },
        "body": body,
    })
}

/// Block body taking `lead_num` arguments.
pub fn block(locals: &[&str], lead_num: usize, body: Value) -> Value {
    json!({
        "name": "block",
        "path": "test.rb",
        "kind": "block",
        "start_line": 1,
        "locals": locals,
        "args": { "lead_num": lead_num },
        "body": body,
    })
}

/// Class body.
pub fn class_body(name: &str, body: Value) -> Value {
    json!({
        "name": format!("<class:{}>", name),
        "path": "test.rb",
        "kind": "class",
        "start_line": 1,
        "body": body,
    })
}

/// Module body.
pub fn module_body(name: &str, body: Value) -> Value {
    json!({
        "name": format!("<module:{}>", name),
        "path": "test.rb",
        "kind": "class",
        "start_line": 1,
        "body": body,
    })
}

/// Rescue clause body; local 0 holds the exception.
pub fn rescue_body(body: Value) -> Value {
    json!({
        "name": "rescue",
        "path": "test.rb",
        "kind": "rescue",
        "start_line": 1,
        "locals": ["$!"],
        "body": body,
    })
}

/// Catch table row; `handler` is `Value::Null` for kinds without a body.
pub fn catch_row(kind: &str, handler: Value, start: &str, end: &str, cont: &str) -> Value {
    json!({ "kind": kind, "iseq": handler, "start": start, "end": end, "cont": cont, "sp": 0 })
}

/// Call info operand for `send`.
pub fn call(mid: &str, argc: usize, flag: u32) -> Value {
    json!({ "mid": mid, "argc": argc, "flag": flag })
}

/// `{"sym": name}`
pub fn sym(name: &str) -> Value {
    json!({ "sym": name })
}

/// Analyzes `raw` with default settings.
pub fn run(raw: &RawIseq) -> AnalysisReport {
    run_with(raw, AnalysisConfig::default())
}

pub fn run_with(raw: &RawIseq, config: AnalysisConfig) -> AnalysisReport {
    analyze(raw, config).unwrap_or_else(|e| panic!("analysis failed: {}", e))
}

/// Analyzes `raw` after importing `decls` on top of the core declarations.
pub fn run_with_decls(raw: &RawIseq, decls: Value) -> AnalysisReport {
    let set = DeclarationSet::from_json_str(&decls.to_string()).unwrap_or_else(|e| panic!("bad declarations: {}", e));
    let mut analyzer = Analyzer::new(AnalysisConfig::default()).expect("core declarations");
    analyzer.load_declarations(&set).expect("declarations import");
    analyzer.add_program(raw).expect("program normalizes");
    analyzer.run()
}

/// Rendered signatures of `class#name` (`self.name` for singleton methods).
pub fn signature(report: &AnalysisReport, class: &str, name: &str) -> String {
    let method = report
        .method(class, name)
        .unwrap_or_else(|| panic!("no method {}#{} in report:\n{}", class, name, report.render()));
    method
        .signatures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(" | ")
}

/// Messages of the diagnostics of `kind`.
pub fn messages(report: &AnalysisReport, kind: DiagnosticKind) -> Vec<String> {
    report
        .diagnostics
        .iter()
        .filter(|d| d.kind == kind)
        .map(|d| d.message.clone())
        .collect()
}
