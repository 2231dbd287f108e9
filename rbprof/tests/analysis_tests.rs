//! End-to-end analysis of small hand-compiled programs.

mod common;

use common::*;
use pretty_assertions::assert_eq;
use rbprof::{AnalysisConfig, DiagnosticKind, MethodKind, Severity, VarRecord};
use serde_json::{json, Value};
use std::io::Write;

/// `def id(x) = x`
fn identity_method() -> Value {
    method("id", &["x"], 1, json!([["getlocal", [0, 0], 1], ["leave", [], 1]]))
}

// def fib(n)
//   if n <= 1 then n else fib(n - 1) + fib(n - 2) end
// end
// fib(10)
#[test]
fn test_recursive_method_converges() {
    let fib = method(
        "fib",
        &["n"],
        1,
        json!([
            ["getlocal", [0, 0], 2],
            ["putobject", [1], 2],
            ["opt_send_without_block", [call("<=", 1, SIMPLE)], 2],
            ["branchunless", ["L1"], 2],
            ["getlocal", [0, 0], 2],
            ["leave", [], 2],
            "L1",
            ["putself", [], 3],
            ["getlocal", [0, 0], 3],
            ["putobject", [1], 3],
            ["opt_send_without_block", [call("-", 1, SIMPLE)], 3],
            ["opt_send_without_block", [call("fib", 1, FCALL)], 3],
            ["putself", [], 3],
            ["getlocal", [0, 0], 3],
            ["putobject", [2], 3],
            ["opt_send_without_block", [call("-", 1, SIMPLE)], 3],
            ["opt_send_without_block", [call("fib", 1, FCALL)], 3],
            ["opt_send_without_block", [call("+", 1, SIMPLE)], 3],
            ["leave", [], 3],
        ]),
    );
    let raw = program(
        &[],
        json!([
            ["definemethod", ["fib", fib], 1],
            ["putself", [], 5],
            ["putobject", [10], 5],
            ["opt_send_without_block", [call("fib", 1, FCALL)], 5],
            ["leave", [], 5],
        ]),
    );

    let report = run(&raw);
    assert_eq!(signature(&report, "Object", "fib"), "(Integer) -> Integer");
    assert!(report.diagnostics.is_empty(), "{:?}", report.diagnostics);
    assert!(report.failures.is_empty());
    assert!(!report.incomplete);
}

#[test]
fn test_overloads_resolve_per_argument_type() {
    let decls = json!({
        "methods": [{
            "owner": "Object",
            "name": "conv",
            "overloads": [
                { "lead": [{ "instance": "Integer" }], "ret": { "instance": "Integer" } },
                { "lead": [{ "instance": "String" }], "ret": { "instance": "String" } }
            ]
        }]
    });
    let run_method = method(
        "run",
        &["x"],
        1,
        json!([
            ["putself", [], 2],
            ["getlocal", [0, 0], 2],
            ["opt_send_without_block", [call("conv", 1, FCALL)], 2],
            ["leave", [], 2],
        ]),
    );
    let raw = program(
        &[],
        json!([
            ["definemethod", ["run", run_method], 1],
            ["putself", [], 4],
            ["putobject", [1], 4],
            ["opt_send_without_block", [call("run", 1, FCALL)], 4],
            ["pop", [], 4],
            ["putself", [], 5],
            ["putstring", ["s"], 5],
            ["opt_send_without_block", [call("run", 1, FCALL)], 5],
            ["leave", [], 5],
        ]),
    );

    let report = run_with_decls(&raw, decls);
    assert_eq!(
        signature(&report, "Object", "run"),
        "(Integer | String) -> Integer | String"
    );
    assert!(report.diagnostics.is_empty(), "{:?}", report.diagnostics);
}

#[test]
fn test_declared_overload_rejects_argument() {
    let decls = json!({
        "methods": [{
            "owner": "Object",
            "name": "conv",
            "overloads": [{ "lead": [{ "instance": "Integer" }], "ret": { "instance": "Integer" } }]
        }]
    });
    let raw = program(
        &[],
        json!([
            ["putself", [], 3],
            ["putstring", ["s"], 3],
            ["opt_send_without_block", [call("conv", 1, FCALL)], 3],
            ["leave", [], 3],
        ]),
    );

    let report = run_with_decls(&raw, decls);
    assert_eq!(
        messages(&report, DiagnosticKind::ArgumentType),
        vec!["failed to resolve overload: Object#conv".to_string()]
    );
    assert_eq!(report.diagnostics[0].line, 3);
    assert_eq!(report.diagnostics[0].severity, Severity::Error);
}

#[test]
fn test_undefined_method_reported_once() {
    let f = method(
        "f",
        &[],
        0,
        json!([
            ["putself", [], 2],
            ["opt_send_without_block", [call("unknown_method", 0, VCALL)], 2],
            ["leave", [], 2],
        ]),
    );
    let raw = program(
        &[],
        json!([
            ["definemethod", ["f", f], 1],
            ["putself", [], 4],
            ["opt_send_without_block", [call("f", 0, VCALL)], 4],
            ["leave", [], 4],
        ]),
    );

    let report = run(&raw);
    assert_eq!(
        messages(&report, DiagnosticKind::UndefinedReference),
        vec!["undefined method `unknown_method' for Object".to_string()]
    );
    let diag = &report.diagnostics[0];
    assert_eq!(diag.severity, Severity::Error);
    assert_eq!(diag.line, 2);
    assert_eq!(signature(&report, "Object", "f"), "-> untyped");
}

// def g(a) = a ? a : 0
// g(nil); g(1)
#[test]
fn test_truthiness_narrows_optional_argument() {
    let g = method(
        "g",
        &["a"],
        1,
        json!([
            ["getlocal", [0, 0], 2],
            ["branchunless", ["L1"], 2],
            ["getlocal", [0, 0], 2],
            ["leave", [], 2],
            "L1",
            ["putobject", [0], 2],
            ["leave", [], 2],
        ]),
    );
    let raw = program(
        &[],
        json!([
            ["definemethod", ["g", g], 1],
            ["putself", [], 4],
            ["putnil", [], 4],
            ["opt_send_without_block", [call("g", 1, FCALL)], 4],
            ["pop", [], 4],
            ["putself", [], 5],
            ["putobject", [1], 5],
            ["opt_send_without_block", [call("g", 1, FCALL)], 5],
            ["leave", [], 5],
        ]),
    );

    let report = run(&raw);
    assert_eq!(signature(&report, "Object", "g"), "(Integer?) -> Integer");
}

/// `id(1); id("s"); id(1.0)`
fn three_kinds_of_argument() -> rbprof::RawIseq {
    let mut body = vec![json!(["definemethod", ["id", identity_method()], 1])];
    for arg in [json!(["putobject", [1], 2]), json!(["putstring", ["s"], 3]), json!(["putobject", [1.5], 4])] {
        body.push(json!(["putself", [], 2]));
        body.push(arg);
        body.push(json!(["opt_send_without_block", [call("id", 1, FCALL)], 2]));
        body.push(json!(["pop", [], 2]));
    }
    body.push(json!(["putnil", [], 5]));
    body.push(json!(["leave", [], 5]));
    program(&[], Value::Array(body))
}

#[test]
fn test_union_width_limit_widens_to_untyped() {
    let raw = three_kinds_of_argument();

    let report = run(&raw);
    assert_eq!(
        signature(&report, "Object", "id"),
        "(Float | Integer | String) -> Float | Integer | String"
    );

    let config = AnalysisConfig {
        union_width_limit: 2,
        ..AnalysisConfig::default()
    };
    let report = run_with(&raw, config);
    assert_eq!(signature(&report, "Object", "id"), "(untyped) -> untyped");
}

#[test]
fn test_type_depth_limit_truncates_nested_arrays() {
    let raw = program(
        &[],
        json!([
            ["definemethod", ["id", identity_method()], 1],
            ["putself", [], 2],
            ["duparray", [[[1]]], 2],
            ["opt_send_without_block", [call("id", 1, FCALL)], 2],
            ["leave", [], 2],
        ]),
    );

    let report = run(&raw);
    assert_eq!(signature(&report, "Object", "id"), "([[Integer]]) -> [[Integer]]");

    let config = AnalysisConfig {
        type_depth_limit: 1,
        ..AnalysisConfig::default()
    };
    let report = run_with(&raw, config);
    assert_eq!(signature(&report, "Object", "id"), "([untyped]) -> [untyped]");
}

// class Foo
//   attr_reader :name
//   def initialize(name) = @name = name
// end
// Foo.new("x")
#[test]
fn test_class_with_reader_and_instance_variable() {
    let initialize = method(
        "initialize",
        &["name"],
        1,
        json!([
            ["getlocal", [0, 0], 3],
            ["dup", [], 3],
            ["setinstancevariable", ["@name"], 3],
            ["leave", [], 3],
        ]),
    );
    let body = class_body(
        "Foo",
        json!([
            ["putself", [], 2],
            ["putobject", [sym("name")], 2],
            ["opt_send_without_block", [call("attr_reader", 1, FCALL)], 2],
            ["pop", [], 2],
            ["definemethod", ["initialize", initialize], 3],
            ["putobject", [sym("initialize")], 3],
            ["leave", [], 4],
        ]),
    );
    let raw = program(
        &[],
        json!([
            ["putspecialobject", [3], 1],
            ["putnil", [], 1],
            ["defineclass", ["Foo", body, 0], 1],
            ["pop", [], 1],
            ["putnil", [], 5],
            ["putobject", [true], 5],
            ["getconstant", ["Foo"], 5],
            ["putstring", ["x"], 5],
            ["opt_send_without_block", [call("new", 1, SIMPLE)], 5],
            ["leave", [], 5],
        ]),
    );

    let report = run(&raw);
    assert!(report.diagnostics.is_empty(), "{:?}", report.diagnostics);

    let foo = report.class("Foo").expect("Foo is reported");
    assert_eq!(foo.kind, "class");
    assert_eq!(foo.superclass, None);
    assert_eq!(
        foo.ivars,
        vec![VarRecord {
            name: "@name".to_string(),
            ty: "String".to_string(),
        }]
    );

    let reader = report.method("Foo", "name").expect("reader is reported");
    assert_eq!(reader.kind, MethodKind::AttrReader);
    assert_eq!(signature(&report, "Foo", "name"), "-> String");
    assert_eq!(signature(&report, "Foo", "initialize"), "(String) -> String");
    assert!(report.render().contains("  attr_reader name: String\n"));
}

// def each_twice = yield 1
fn yielding_method() -> Value {
    method(
        "each_twice",
        &[],
        0,
        json!([
            ["putobject", [1], 2],
            ["invokeblock", [call("", 1, SIMPLE)], 2],
            ["leave", [], 2],
        ]),
    )
}

#[test]
fn test_yield_records_block_signature() {
    let blk = block(
        &["x"],
        1,
        json!([
            ["getlocal", [0, 0], 4],
            ["opt_send_without_block", [call("to_s", 0, SIMPLE)], 4],
            ["leave", [], 4],
        ]),
    );
    let raw = program(
        &[],
        json!([
            ["definemethod", ["each_twice", yielding_method()], 1],
            ["putself", [], 4],
            ["send", [call("each_twice", 0, 0x04), blk], 4],
            ["leave", [], 4],
        ]),
    );

    let report = run(&raw);
    assert!(report.diagnostics.is_empty(), "{:?}", report.diagnostics);
    assert_eq!(
        signature(&report, "Object", "each_twice"),
        "{ (Integer) -> String } -> String"
    );
}

#[test]
fn test_yield_without_block_warns() {
    let raw = program(
        &[],
        json!([
            ["definemethod", ["each_twice", yielding_method()], 1],
            ["putself", [], 4],
            ["opt_send_without_block", [call("each_twice", 0, VCALL)], 4],
            ["leave", [], 4],
        ]),
    );

    let report = run(&raw);
    assert_eq!(
        messages(&report, DiagnosticKind::BlockContract),
        vec!["no block given (yield)".to_string()]
    );
    assert_eq!(report.diagnostics[0].severity, Severity::Warning);
    assert_eq!(report.diagnostics[0].line, 2);
}

#[test]
fn test_undefined_global_read() {
    let raw = program(&[], json!([["getglobal", ["$nope"], 3], ["leave", [], 3]]));

    let report = run(&raw);
    assert_eq!(
        messages(&report, DiagnosticKind::UndefinedReference),
        vec!["undefined global variable $nope".to_string()]
    );
    assert_eq!(report.diagnostics[0].line, 3);
    assert!(report.globals.is_empty());
}

#[test]
fn test_written_global_is_reported() {
    let raw = program(
        &[],
        json!([
            ["putobject", [1], 1],
            ["setglobal", ["$count"], 1],
            ["getglobal", ["$count"], 2],
            ["leave", [], 2],
        ]),
    );

    let report = run(&raw);
    assert!(report.diagnostics.is_empty(), "{:?}", report.diagnostics);
    assert_eq!(
        report.globals,
        vec![VarRecord {
            name: "$count".to_string(),
            ty: "Integer".to_string(),
        }]
    );
    assert!(report.render().starts_with("# Global variables\n$count: Integer\n"));
}

#[test]
fn test_declared_global_rejects_incompatible_write() {
    let decls = json!({ "globals": [{ "name": "$count", "type": { "instance": "Integer" } }] });
    let raw = program(
        &[],
        json!([
            ["putobject", [1], 1],
            ["setglobal", ["$count"], 1],
            ["putstring", ["x"], 2],
            ["setglobal", ["$count"], 2],
            ["putnil", [], 2],
            ["leave", [], 2],
        ]),
    );

    let report = run_with_decls(&raw, decls);
    let found = messages(&report, DiagnosticKind::TypeInconsistency);
    assert_eq!(found.len(), 1, "{:?}", report.diagnostics);
    assert!(found[0].contains("$count"), "{}", found[0]);
    assert_eq!(report.diagnostics[0].line, 2);
}

#[test]
fn test_uncalled_method_is_stub_executed() {
    let raw = program(
        &[],
        json!([
            ["definemethod", ["id", identity_method()], 1],
            ["putnil", [], 2],
            ["leave", [], 2],
        ]),
    );

    let report = run(&raw);
    assert_eq!(signature(&report, "Object", "id"), "(untyped) -> untyped");

    let config = AnalysisConfig {
        stub_execution: false,
        ..AnalysisConfig::default()
    };
    let report = run_with(&raw, config);
    let id = report.method("Object", "id").expect("definition is still reported");
    assert!(id.signatures.is_empty());
    assert!(report.render().contains("def id: -> untyped"));
}

#[test]
fn test_unbalanced_leave_is_a_failure_not_an_error() {
    let raw = program(
        &[],
        json!([
            ["putobject", [1], 7],
            ["putobject", [2], 7],
            ["leave", [], 7],
        ]),
    );

    let report = run(&raw);
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].line, 7);
    assert!(report.failures[0].message.contains("leave"), "{}", report.failures[0].message);
}

#[test]
fn test_iteration_budget_marks_report_incomplete() {
    let raw = three_kinds_of_argument();
    let config = AnalysisConfig {
        max_iter: Some(1),
        ..AnalysisConfig::default()
    };

    let report = run_with(&raw, config);
    assert!(report.incomplete);
    assert_eq!(report.steps, 1);
}

#[test]
fn test_config_file_drives_analysis() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "union_width_limit = 2").unwrap();
    writeln!(file, "stub_execution = false").unwrap();

    let config = AnalysisConfig::load(file.path()).unwrap();
    assert_eq!(config.union_width_limit, 2);
    assert!(!config.stub_execution);

    let report = run_with(&three_kinds_of_argument(), config);
    assert_eq!(signature(&report, "Object", "id"), "(untyped) -> untyped");
}

#[test]
fn test_report_serializes_to_json() {
    let raw = program(&[], json!([["getglobal", ["$nope"], 3], ["leave", [], 3]]));

    let report = run(&raw);
    let value: Value = serde_json::from_str(&report.to_json().unwrap()).unwrap();
    assert_eq!(value["incomplete"], json!(false));
    assert_eq!(value["diagnostics"][0]["kind"], json!("undefined_reference"));
    assert_eq!(value["diagnostics"][0]["severity"], json!("warning"));
}

// ==================== Exception handlers and non-local exits ====================

/// `putself, putstring "boom", raise`
fn raise_boom(line: u32) -> [Value; 3] {
    [
        json!(["putself", [], line]),
        json!(["putstring", ["boom"], line]),
        json!(["opt_send_without_block", [call("raise", 1, FCALL)], line]),
    ]
}

/// Defines `name` at the top level and calls it once with `args`.
fn define_and_call(name: &str, body: Value, args: &[Value]) -> rbprof::RawIseq {
    let mut top = vec![json!(["definemethod", [name, body], 1]), json!(["putself", [], 20])];
    for arg in args {
        top.push(arg.clone());
    }
    let flag = if args.is_empty() { VCALL } else { FCALL };
    top.push(json!(["opt_send_without_block", [call(name, args.len(), flag)], 20]));
    top.push(json!(["leave", [], 20]));
    program(&[], Value::Array(top))
}

// def m
//   raise "boom"
// rescue
//   $!
// end
#[test]
fn test_rescue_sees_raised_error() {
    let [recv, msg, raise] = raise_boom(2);
    let mut m = method(
        "m",
        &[],
        0,
        json!(["L_start", recv, msg, raise, "L_end", "L_cont", ["leave", [], 5]]),
    );
    let handler = rescue_body(json!([["getlocal", [0, 0], 4], ["leave", [], 4]]));
    m["catch_table"] = json!([catch_row("rescue", handler, "L_start", "L_end", "L_cont")]);

    let report = run(&define_and_call("m", m, &[]));
    assert!(report.failures.is_empty(), "{:?}", report.failures);
    assert!(report.diagnostics.is_empty(), "{:?}", report.diagnostics);
    assert_eq!(signature(&report, "Object", "m"), "-> RuntimeError | StandardError");
}

/// `def m(flag)`: `v = 1`, then a protected region that raises when `flag`
/// is set and otherwise returns `v`. The rescue clause assigns `v = "s"` and
/// exits with throw state `state`.
fn rescue_then_throw(state: u32, extra_rows: Vec<Value>) -> rbprof::RawIseq {
    let [recv, msg, raise] = raise_boom(4);
    let mut m = method(
        "m",
        &["flag", "v"],
        1,
        json!([
            ["putobject", [1], 2],
            ["setlocal", [1, 0], 2],
            "L_start",
            ["getlocal", [0, 0], 4],
            ["branchunless", ["L_ok"], 4],
            recv,
            msg,
            raise,
            ["pop", [], 4],
            "L_ok",
            ["getlocal", [1, 0], 5],
            "L_end",
            "L_cont",
            ["leave", [], 9]
        ]),
    );
    let handler = rescue_body(json!([
        ["putstring", ["s"], 7],
        ["setlocal", [1, 1], 7],
        ["putnil", [], 8],
        ["throw", [state], 8],
    ]));
    let mut rows = vec![catch_row("rescue", handler, "L_start", "L_end", "L_cont")];
    rows.extend(extra_rows);
    m["catch_table"] = Value::Array(rows);
    define_and_call("m", m, &[json!(["putnil", [], 20])])
}

// begin ... rescue; v = "s"; retry; end
#[test]
fn test_retry_restarts_protected_region_with_handler_writes() {
    let report = run(&rescue_then_throw(4, Vec::new()));
    assert!(report.failures.is_empty(), "{:?}", report.failures);
    assert_eq!(signature(&report, "Object", "m"), "(nil) -> Integer | String");
}

// while ...; begin ... rescue; v = "s"; redo; end; end
#[test]
fn test_redo_from_rescue_jumps_to_enclosing_redo_entry() {
    let redo = catch_row("redo", Value::Null, "L_start", "L_cont", "L_start");
    let report = run(&rescue_then_throw(5, vec![redo]));
    assert!(report.failures.is_empty(), "{:?}", report.failures);
    assert_eq!(signature(&report, "Object", "m"), "(nil) -> Integer | String");
}

// def m
//   loop_body: begin raise "boom" rescue break "done" end
// end
#[test]
fn test_break_from_rescue_continues_at_break_entry() {
    let [recv, msg, raise] = raise_boom(2);
    let mut m = method(
        "m",
        &[],
        0,
        json!([
            "L_start",
            recv,
            msg,
            raise,
            "L_end",
            "L_cont",
            ["leave", [], 5],
            "L_brk",
            ["leave", [], 6]
        ]),
    );
    let handler = rescue_body(json!([["putstring", ["done"], 4], ["throw", [2], 4]]));
    m["catch_table"] = json!([
        catch_row("rescue", handler, "L_start", "L_end", "L_cont"),
        catch_row("break", Value::Null, "L_start", "L_brk", "L_brk"),
    ]);

    let report = run(&define_and_call("m", m, &[]));
    assert!(report.failures.is_empty(), "{:?}", report.failures);
    assert_eq!(signature(&report, "Object", "m"), "-> String");
}

// def run = each_twice { break "done" }
#[test]
fn test_break_from_block_returns_from_the_call_with_the_block() {
    let blk = block(&[], 0, json!([["putstring", ["done"], 3], ["throw", [2], 3]]));
    let run_method = method(
        "run",
        &[],
        0,
        json!([
            ["putself", [], 3],
            ["send", [call("each_twice", 0, 0x04), blk], 3],
            ["leave", [], 3],
        ]),
    );
    let raw = program(
        &[],
        json!([
            ["definemethod", ["each_twice", yielding_method()], 1],
            ["definemethod", ["run", run_method], 3],
            ["putself", [], 5],
            ["opt_send_without_block", [call("run", 0, VCALL)], 5],
            ["leave", [], 5],
        ]),
    );

    let report = run(&raw);
    assert!(report.failures.is_empty(), "{:?}", report.failures);
    assert_eq!(signature(&report, "Object", "run"), "-> String");
}

// each_twice { next "s" }
#[test]
fn test_next_from_block_is_the_block_result() {
    let blk = block(&["x"], 1, json!([["putstring", ["s"], 4], ["throw", [3], 4]]));
    let raw = program(
        &[],
        json!([
            ["definemethod", ["each_twice", yielding_method()], 1],
            ["putself", [], 4],
            ["send", [call("each_twice", 0, 0x04), blk], 4],
            ["leave", [], 4],
        ]),
    );

    let report = run(&raw);
    assert!(report.failures.is_empty(), "{:?}", report.failures);
    assert_eq!(
        signature(&report, "Object", "each_twice"),
        "{ (Integer) -> String } -> String"
    );
}

// ==================== Dispatch ====================

/// `putspecialobject 3, putnil, defineclass name, pop`
fn define_class(name: &str, body: Value, flags: u32, line: u32) -> [Value; 4] {
    [
        json!(["putspecialobject", [3], line]),
        json!(["putnil", [], line]),
        json!(["defineclass", [name, body, flags], line]),
        json!(["pop", [], line]),
    ]
}

/// `Name.new.mid(args...)` as the program's result.
fn call_on_new(class: &str, mid: &str, args: &[Value], line: u32) -> Vec<Value> {
    let mut out = vec![
        json!(["putnil", [], line]),
        json!(["putobject", [true], line]),
        json!(["getconstant", [class], line]),
        json!(["opt_send_without_block", [call("new", 0, SIMPLE)], line]),
    ];
    out.extend(args.iter().cloned());
    out.push(json!(["opt_send_without_block", [call(mid, args.len(), SIMPLE)], line]));
    out.push(json!(["leave", [], line]));
    out
}

/// `def name = value`
fn constant_method(name: &str, value: Value) -> Value {
    method(name, &[], 0, json!([["putobject", [value], 2], ["leave", [], 2]]))
}

// class A; def m = 1; end
// class B < A; def m = super; end
// B.new.m
#[test]
fn test_super_reaches_superclass_method() {
    let a = class_body(
        "A",
        json!([
            ["definemethod", ["m", constant_method("m", json!(1))], 2],
            ["putobject", [sym("m")], 2],
            ["leave", [], 2],
        ]),
    );
    let b_m = method(
        "m",
        &[],
        0,
        json!([
            ["putself", [], 5],
            ["invokesuper", [call("m", 0, FCALL), null], 5],
            ["leave", [], 5],
        ]),
    );
    let b = class_body(
        "B",
        json!([["definemethod", ["m", b_m], 5], ["putobject", [sym("m")], 5], ["leave", [], 5]]),
    );
    let mut top: Vec<Value> = define_class("A", a, 0, 1).into();
    top.extend([
        json!(["putspecialobject", [3], 4]),
        json!(["putnil", [], 4]),
        json!(["putobject", [true], 4]),
        json!(["getconstant", ["A"], 4]),
        json!(["defineclass", ["B", b, 0x10], 4]),
        json!(["pop", [], 4]),
    ]);
    top.extend(call_on_new("B", "m", &[], 7));

    let report = run(&program(&[], Value::Array(top)));
    assert!(report.diagnostics.is_empty(), "{:?}", report.diagnostics);
    assert_eq!(report.class("B").and_then(|b| b.superclass.clone()), Some("A".to_string()));
    assert_eq!(signature(&report, "B", "m"), "-> Integer");
    assert_eq!(signature(&report, "A", "m"), "-> Integer");
}

// class Foo
//   def orig(x) = x
//   alias_method :al, :orig
// end
// Foo.new.al(1)
#[test]
fn test_alias_forwards_to_original_context() {
    let orig = method("orig", &["x"], 1, json!([["getlocal", [0, 0], 2], ["leave", [], 2]]));
    let foo = class_body(
        "Foo",
        json!([
            ["definemethod", ["orig", orig], 2],
            ["putself", [], 3],
            ["putobject", [sym("al")], 3],
            ["putobject", [sym("orig")], 3],
            ["opt_send_without_block", [call("alias_method", 2, FCALL)], 3],
            ["leave", [], 3],
        ]),
    );
    let mut top: Vec<Value> = define_class("Foo", foo, 0, 1).into();
    top.extend(call_on_new("Foo", "al", &[json!(["putobject", [1], 5])], 5));

    let report = run(&program(&[], Value::Array(top)));
    assert!(report.diagnostics.is_empty(), "{:?}", report.diagnostics);
    assert_eq!(signature(&report, "Foo", "orig"), "(Integer) -> Integer");

    let al = report.method("Foo", "al").expect("alias is reported");
    assert_eq!(al.kind, MethodKind::Alias);
    assert_eq!(al.alias_of.as_deref(), Some("orig"));
    assert!(report.render().contains("  alias al orig\n"));
}

/// `include name` inside a class or module body.
fn include(names: &[&str], line: u32) -> Vec<Value> {
    let mut out = vec![json!(["putself", [], line])];
    for name in names {
        out.push(json!(["putnil", [], line]));
        out.push(json!(["putobject", [true], line]));
        out.push(json!(["getconstant", [name], line]));
    }
    out.push(json!(["opt_send_without_block", [call("include", names.len(), FCALL)], line]));
    out
}

/// `module M1; def run = 1; end` and `module M2; def run = :s; end`
fn two_modules() -> Vec<Value> {
    let m1 = module_body(
        "M1",
        json!([
            ["definemethod", ["run", constant_method("run", json!(1))], 1],
            ["putobject", [sym("run")], 1],
            ["leave", [], 1],
        ]),
    );
    let m2 = module_body(
        "M2",
        json!([
            ["definemethod", ["run", constant_method("run", sym("s"))], 2],
            ["putobject", [sym("run")], 2],
            ["leave", [], 2],
        ]),
    );
    let mut top: Vec<Value> = define_class("M1", m1, 2, 1).into();
    top.extend(define_class("M2", m2, 2, 2));
    top
}

fn class_including(name: &str, includes: Vec<Vec<Value>>) -> [Value; 4] {
    let mut body: Vec<Value> = includes.into_iter().flatten().collect();
    body.push(json!(["leave", [], 5]));
    define_class(name, class_body(name, Value::Array(body)), 0, 4)
}

// class C; include M1; include M2; end
// class D; include M1, M2; end
// def go_c = C.new.run
// def go_d = D.new.run
#[test]
fn test_most_recent_include_takes_precedence() {
    let mut top = two_modules();
    top.extend(class_including("C", vec![include(&["M1"], 4), vec![json!(["pop", [], 4])], include(&["M2"], 4)]));
    top.extend(class_including("D", vec![include(&["M1", "M2"], 4)]));
    for (name, class) in [("go_c", "C"), ("go_d", "D")] {
        let body = method(name, &[], 0, Value::Array(call_on_new(class, "run", &[], 7)));
        top.push(json!(["definemethod", [name, body], 7]));
        top.push(json!(["putself", [], 8]));
        top.push(json!(["opt_send_without_block", [call(name, 0, VCALL)], 8]));
        top.push(json!(["pop", [], 8]));
    }
    top.push(json!(["putnil", [], 9]));
    top.push(json!(["leave", [], 9]));

    let report = run(&program(&[], Value::Array(top)));
    assert!(report.diagnostics.is_empty(), "{:?}", report.diagnostics);
    assert_eq!(signature(&report, "Object", "go_c"), "-> :s");
    assert_eq!(signature(&report, "Object", "go_d"), "-> Integer");

    let c = report.class("C").expect("C is reported");
    assert_eq!(c.includes, vec!["M2".to_string(), "M1".to_string()]);
    let d = report.class("D").expect("D is reported");
    assert_eq!(d.includes, vec!["M1".to_string(), "M2".to_string()]);
}

// class Ghost; def method_missing(name) = name; end
// Ghost.new.anything
#[test]
fn test_user_method_missing_receives_the_name() {
    let missing = method("method_missing", &["name"], 1, json!([["getlocal", [0, 0], 2], ["leave", [], 2]]));
    let ghost = class_body(
        "Ghost",
        json!([
            ["definemethod", ["method_missing", missing], 2],
            ["putobject", [sym("method_missing")], 2],
            ["leave", [], 2],
        ]),
    );
    let mut top: Vec<Value> = define_class("Ghost", ghost, 0, 1).into();
    top.extend(call_on_new("Ghost", "anything", &[], 4));

    let report = run(&program(&[], Value::Array(top)));
    assert!(report.diagnostics.is_empty(), "{:?}", report.diagnostics);
    assert_eq!(signature(&report, "Ghost", "method_missing"), "(:anything) -> :anything");
}

// class Foo
//   private
//   def secret = 1
// end
// Foo.new.secret
#[test]
fn test_private_method_called_with_receiver_warns() {
    let foo = class_body(
        "Foo",
        json!([
            ["putself", [], 2],
            ["opt_send_without_block", [call("private", 0, VCALL)], 2],
            ["pop", [], 2],
            ["definemethod", ["secret", constant_method("secret", json!(1))], 3],
            ["putobject", [sym("secret")], 3],
            ["leave", [], 3],
        ]),
    );
    let mut top: Vec<Value> = define_class("Foo", foo, 0, 1).into();
    top.extend(call_on_new("Foo", "secret", &[], 5));

    let report = run(&program(&[], Value::Array(top)));
    assert_eq!(
        messages(&report, DiagnosticKind::UndefinedReference),
        vec!["private method `secret' called for Foo".to_string()]
    );
    assert_eq!(report.diagnostics[0].severity, Severity::Warning);
    assert_eq!(report.diagnostics[0].line, 5);

    let secret = report.method("Foo", "secret").expect("secret is reported");
    assert!(!secret.public);
    assert_eq!(signature(&report, "Foo", "secret"), "-> Integer");
}

// module A; end
// module B; include A; end
// module A; include B; end
#[test]
fn test_cyclic_include_is_rejected() {
    let a = module_body("A", json!([["putnil", [], 1], ["leave", [], 1]]));
    let mut b_body = include(&["A"], 2);
    b_body.push(json!(["leave", [], 2]));
    let b = module_body("B", Value::Array(b_body));
    let mut reopened_body = include(&["B"], 3);
    reopened_body.push(json!(["leave", [], 3]));
    let reopened = module_body("A", Value::Array(reopened_body));

    let mut top: Vec<Value> = define_class("A", a, 2, 1).into();
    top.extend(define_class("B", b, 2, 2));
    top.extend(define_class("A", reopened, 2, 3));
    top.push(json!(["putnil", [], 4]));
    top.push(json!(["leave", [], 4]));

    let report = run(&program(&[], Value::Array(top)));
    assert_eq!(
        messages(&report, DiagnosticKind::AncestorCycle),
        vec!["cyclic include detected: B in A".to_string()]
    );
    assert_eq!(report.diagnostics[0].severity, Severity::Error);
    assert_eq!(report.diagnostics[0].line, 3);
    assert!(report.class("A").expect("A is reported").includes.is_empty());
}

// module M; end
// "s".extend(M)
#[test]
fn test_extend_on_plain_instance_is_ignored() {
    let m = module_body("M", json!([["putnil", [], 1], ["leave", [], 1]]));
    let mut top: Vec<Value> = define_class("M", m, 2, 1).into();
    top.extend([
        json!(["putstring", ["s"], 2]),
        json!(["putnil", [], 2]),
        json!(["putobject", [true], 2]),
        json!(["getconstant", ["M"], 2]),
        json!(["opt_send_without_block", [call("extend", 1, SIMPLE)], 2]),
        json!(["leave", [], 2]),
    ]);

    let report = run(&program(&[], Value::Array(top)));
    assert!(report.diagnostics.is_empty(), "{:?}", report.diagnostics);
    assert!(report.failures.is_empty(), "{:?}", report.failures);
    assert!(report.class("String").is_none());
}

// class Box
//   attr_accessor :value
//   attr_writer :label
// end
// b = Box.new; b.value = 1; b.label = "x"; b.value
#[test]
fn test_attr_writer_and_accessor() {
    let body = class_body(
        "Box",
        json!([
            ["putself", [], 2],
            ["putobject", [sym("value")], 2],
            ["opt_send_without_block", [call("attr_accessor", 1, FCALL)], 2],
            ["pop", [], 2],
            ["putself", [], 3],
            ["putobject", [sym("label")], 3],
            ["opt_send_without_block", [call("attr_writer", 1, FCALL)], 3],
            ["leave", [], 3],
        ]),
    );
    let mut top: Vec<Value> = define_class("Box", body, 0, 1).into();
    top.extend([
        json!(["putnil", [], 5]),
        json!(["putobject", [true], 5]),
        json!(["getconstant", ["Box"], 5]),
        json!(["opt_send_without_block", [call("new", 0, SIMPLE)], 5]),
        json!(["setlocal", [0, 0], 5]),
        json!(["getlocal", [0, 0], 6]),
        json!(["putobject", [1], 6]),
        json!(["opt_send_without_block", [call("value=", 1, SIMPLE)], 6]),
        json!(["pop", [], 6]),
        json!(["getlocal", [0, 0], 7]),
        json!(["putstring", ["x"], 7]),
        json!(["opt_send_without_block", [call("label=", 1, SIMPLE)], 7]),
        json!(["pop", [], 7]),
        json!(["getlocal", [0, 0], 8]),
        json!(["opt_send_without_block", [call("value", 0, SIMPLE)], 8]),
        json!(["leave", [], 8]),
    ]);

    let report = run(&program(&["b"], Value::Array(top)));
    assert!(report.diagnostics.is_empty(), "{:?}", report.diagnostics);

    let class = report.class("Box").expect("Box is reported");
    assert_eq!(
        class.ivars,
        vec![
            VarRecord {
                name: "@label".to_string(),
                ty: "String".to_string(),
            },
            VarRecord {
                name: "@value".to_string(),
                ty: "Integer".to_string(),
            },
        ]
    );

    let label = report.method("Box", "label").expect("writer is reported");
    assert_eq!(label.kind, MethodKind::AttrWriter);
    assert_eq!(signature(&report, "Box", "label"), "(String) -> String");
    let value = report.method("Box", "value").expect("accessor is reported");
    assert_eq!(value.kind, MethodKind::AttrAccessor);
    assert_eq!(signature(&report, "Box", "value"), "-> Integer");

    let rendered = report.render();
    assert!(rendered.contains("  attr_writer label: String\n"), "{}", rendered);
    assert!(rendered.contains("  attr_accessor value: Integer\n"), "{}", rendered);
}

// ==================== Narrowing ====================

/// Defines `f(x)` and calls it with `1` and `"a"`.
fn called_with_integer_and_string(f: Value) -> rbprof::RawIseq {
    program(
        &[],
        json!([
            ["definemethod", ["f", f], 1],
            ["putself", [], 3],
            ["putobject", [1], 3],
            ["opt_send_without_block", [call("f", 1, FCALL)], 3],
            ["pop", [], 3],
            ["putself", [], 4],
            ["putstring", ["a"], 4],
            ["opt_send_without_block", [call("f", 1, FCALL)], 4],
            ["leave", [], 4],
        ]),
    )
}

// def f(x) = x.is_a?(Integer) ? x : :s
#[test]
fn test_is_a_narrows_receiver_per_branch() {
    let f = method(
        "f",
        &["x"],
        1,
        json!([
            ["getlocal", [0, 0], 2],
            ["putnil", [], 2],
            ["putobject", [true], 2],
            ["getconstant", ["Integer"], 2],
            ["opt_send_without_block", [call("is_a?", 1, SIMPLE)], 2],
            ["branchunless", ["L1"], 2],
            ["getlocal", [0, 0], 2],
            ["leave", [], 2],
            "L1",
            ["putobject", [sym("s")], 2],
            ["leave", [], 2],
        ]),
    );

    let report = run(&called_with_integer_and_string(f));
    assert!(report.diagnostics.is_empty(), "{:?}", report.diagnostics);
    assert_eq!(signature(&report, "Object", "f"), "(Integer | String) -> :s | Integer");
}

// def f(x) = x.respond_to?(:upcase) ? x : :none
#[test]
fn test_respond_to_narrows_receiver_per_branch() {
    let f = method(
        "f",
        &["x"],
        1,
        json!([
            ["getlocal", [0, 0], 2],
            ["putobject", [sym("upcase")], 2],
            ["opt_send_without_block", [call("respond_to?", 1, SIMPLE)], 2],
            ["branchunless", ["L1"], 2],
            ["getlocal", [0, 0], 2],
            ["leave", [], 2],
            "L1",
            ["putobject", [sym("none")], 2],
            ["leave", [], 2],
        ]),
    );

    let report = run(&called_with_integer_and_string(f));
    assert!(report.diagnostics.is_empty(), "{:?}", report.diagnostics);
    assert_eq!(signature(&report, "Object", "f"), "(Integer | String) -> :none | String");
}

// def f(x)
//   case x
//   when Integer then x
//   else :s
//   end
// end
#[test]
fn test_case_when_narrows_subject_per_clause() {
    let f = method(
        "f",
        &["x"],
        1,
        json!([
            ["getlocal", [0, 0], 2],
            ["dup", [], 3],
            ["putnil", [], 3],
            ["putobject", [true], 3],
            ["getconstant", ["Integer"], 3],
            ["checkmatch", [2], 3],
            ["branchif", ["L_int"], 3],
            ["pop", [], 4],
            ["putobject", [sym("s")], 4],
            ["leave", [], 4],
            "L_int",
            ["pop", [], 3],
            ["getlocal", [0, 0], 3],
            ["leave", [], 3],
        ]),
    );

    let report = run(&called_with_integer_and_string(f));
    assert!(report.failures.is_empty(), "{:?}", report.failures);
    assert_eq!(signature(&report, "Object", "f"), "(Integer | String) -> :s | Integer");
}

// def h(x) = x.then { |y| y.to_s }
#[test]
fn test_declared_block_result_binds_method_type_variable() {
    let blk = block(
        &["y"],
        1,
        json!([
            ["getlocal", [0, 0], 2],
            ["opt_send_without_block", [call("to_s", 0, SIMPLE)], 2],
            ["leave", [], 2],
        ]),
    );
    let h = method(
        "h",
        &["x"],
        1,
        json!([
            ["getlocal", [0, 0], 2],
            ["send", [call("then", 0, 0), blk], 2],
            ["leave", [], 2],
        ]),
    );
    let raw = define_and_call("h", h, &[json!(["putobject", [1], 3])]);

    let report = run(&raw);
    assert!(report.diagnostics.is_empty(), "{:?}", report.diagnostics);
    assert_eq!(signature(&report, "Object", "h"), "(Integer) -> String");
}

// ==================== Constants ====================

// if 1 < 2
//   y = X
// else
//   X = 1
// end
// id(y)
#[test]
fn test_constant_read_before_assignment_waits_for_it() {
    let raw = program(
        &["y"],
        json!([
            ["definemethod", ["id", identity_method()], 1],
            ["putobject", [1], 2],
            ["putobject", [2], 2],
            ["opt_send_without_block", [call("<", 1, SIMPLE)], 2],
            ["branchunless", ["L_else"], 2],
            ["putnil", [], 3],
            ["putobject", [true], 3],
            ["getconstant", ["X"], 3],
            ["setlocal", [0, 0], 3],
            ["jump", ["L_end"], 3],
            "L_else",
            ["putobject", [1], 5],
            ["putspecialobject", [3], 5],
            ["setconstant", ["X"], 5],
            "L_end",
            ["putself", [], 7],
            ["getlocal", [0, 0], 7],
            ["opt_send_without_block", [call("id", 1, FCALL)], 7],
            ["leave", [], 7],
        ]),
    );

    let report = run(&raw);
    assert!(report.diagnostics.is_empty(), "{:?}", report.diagnostics);
    assert_eq!(signature(&report, "Object", "id"), "(Integer?) -> Integer?");
    let object = report.class("Object").expect("Object is reported");
    assert_eq!(
        object.constants,
        vec![VarRecord {
            name: "X".to_string(),
            ty: "Integer".to_string(),
        }]
    );
}

#[test]
fn test_never_assigned_constant_is_reported_after_the_fixpoint() {
    let raw = program(
        &[],
        json!([
            ["putnil", [], 3],
            ["putobject", [true], 3],
            ["getconstant", ["Nope"], 3],
            ["leave", [], 3],
        ]),
    );

    let report = run(&raw);
    assert_eq!(
        messages(&report, DiagnosticKind::UndefinedReference),
        vec!["uninitialized constant Nope".to_string()]
    );
    assert_eq!(report.diagnostics[0].severity, Severity::Warning);
    assert_eq!(report.diagnostics[0].line, 3);
    assert!(report.failures.is_empty(), "{:?}", report.failures);
}
