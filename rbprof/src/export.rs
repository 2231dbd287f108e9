//! Structured result of an analysis run.
//!
//! [`build_report`] turns the analyzer's memo tables into plain records:
//! one [`ClassRecord`] per class the program touched, one [`MethodRecord`]
//! per method it defined, with types rendered in the declaration language.
//! Everything here derives `Serialize`; [`AnalysisReport::render`] prints the
//! declaration-file form.

use crate::abstract_interp::engine::YieldSummary;
use crate::abstract_interp::env::Env;
use crate::abstract_interp::state::{Context, ExecutionPoint};
use crate::abstract_interp::Analyzer;
use crate::classes::{ClassDef, VarTable};
use crate::diagnostics::Diagnostic;
use crate::dispatch::{AttrKind, IseqMethod, MethodDef};
use crate::error::AnalysisResult;
use crate::lattice::{screen_name, ClassId, TypeId, TypeKind};
use rbprof_iseq::KeywordDefault;
use serde::Serialize;
use std::fmt::{self, Write as _};

/// An instruction sequence the interpreter had to give up on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Failure {
    pub iseq: String,
    pub path: String,
    pub line: u32,
    pub message: String,
}

/// Constant, instance/class variable or global with its inferred type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VarRecord {
    pub name: String,
    #[serde(rename = "type")]
    pub ty: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MethodKind {
    Method,
    AttrReader,
    AttrWriter,
    AttrAccessor,
    Alias,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct KeywordRecord {
    pub name: String,
    pub required: bool,
    #[serde(rename = "type")]
    pub ty: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BlockRecord {
    pub args: Vec<String>,
    pub ret: String,
}

/// One inferred signature, every position already rendered.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SignatureRecord {
    pub lead: Vec<String>,
    pub opt: Vec<String>,
    pub rest: Option<String>,
    pub post: Vec<String>,
    pub keywords: Vec<KeywordRecord>,
    pub kwrest: Option<String>,
    pub block: Option<BlockRecord>,
    pub ret: String,
}

impl fmt::Display for SignatureRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut params: Vec<String> = Vec::new();
        params.extend(self.lead.iter().cloned());
        params.extend(self.opt.iter().map(|t| format!("?{t}")));
        if let Some(rest) = &self.rest {
            params.push(format!("*{rest}"));
        }
        params.extend(self.post.iter().cloned());
        for kw in &self.keywords {
            let opt = if kw.required { "" } else { "?" };
            params.push(format!("{opt}{}: {}", kw.name, kw.ty));
        }
        if let Some(kwrest) = &self.kwrest {
            params.push(format!("**{kwrest}"));
        }
        if !params.is_empty() {
            write!(f, "({}) ", params.join(", "))?;
        }
        if let Some(block) = &self.block {
            if block.args.is_empty() {
                write!(f, "{{ -> {} }} ", block.ret)?;
            } else {
                write!(f, "{{ ({}) -> {} }} ", block.args.join(", "), block.ret)?;
            }
        }
        write!(f, "-> {}", self.ret)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MethodRecord {
    /// Path of the defining class or module.
    pub owner: String,
    pub name: String,
    pub singleton: bool,
    pub kind: MethodKind,
    pub public: bool,
    pub signatures: Vec<SignatureRecord>,
    /// Original name, for `alias`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alias_of: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClassRecord {
    pub name: String,
    pub kind: String,
    /// `None` for modules and direct subclasses of `Object`.
    pub superclass: Option<String>,
    pub includes: Vec<String>,
    pub constants: Vec<VarRecord>,
    pub ivars: Vec<VarRecord>,
    pub cvars: Vec<VarRecord>,
    pub methods: Vec<MethodRecord>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AnalysisReport {
    /// A resource limit stopped the run before the fixpoint.
    pub incomplete: bool,
    pub steps: u64,
    pub classes: Vec<ClassRecord>,
    pub globals: Vec<VarRecord>,
    pub diagnostics: Vec<Diagnostic>,
    pub failures: Vec<Failure>,
}

impl AnalysisReport {
    pub fn class(&self, name: &str) -> Option<&ClassRecord> {
        self.classes.iter().find(|c| c.name == name)
    }

    /// Instance method `name` of `class`, or a singleton method when `name`
    /// starts with `self.`.
    pub fn method(&self, class: &str, name: &str) -> Option<&MethodRecord> {
        let (singleton, name) = match name.strip_prefix("self.") {
            Some(rest) => (true, rest),
            None => (false, name),
        };
        self.class(class)?
            .methods
            .iter()
            .find(|m| m.name == name && m.singleton == singleton)
    }

    pub fn to_json(&self) -> AnalysisResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Declaration-file text for everything the program defined.
    pub fn render(&self) -> String {
        let mut out = String::new();
        if !self.globals.is_empty() {
            out.push_str("# Global variables\n");
            for g in &self.globals {
                let _ = writeln!(out, "{}: {}", g.name, g.ty);
            }
            out.push('\n');
        }
        for class in &self.classes {
            render_class(&mut out, class);
        }
        out
    }
}

fn render_class(out: &mut String, class: &ClassRecord) {
    match &class.superclass {
        Some(sup) => {
            let _ = writeln!(out, "{} {} < {}", class.kind, class.name, sup);
        }
        None => {
            let _ = writeln!(out, "{} {}", class.kind, class.name);
        }
    }
    for module in &class.includes {
        let _ = writeln!(out, "  include {module}");
    }
    for var in class.constants.iter().chain(&class.ivars).chain(&class.cvars) {
        let _ = writeln!(out, "  {}: {}", var.name, var.ty);
    }
    for method in &class.methods {
        let visibility = if method.public { "" } else { "private " };
        let prefix = if method.singleton { "self." } else { "" };
        match method.kind {
            MethodKind::Alias => {
                let orig = method.alias_of.as_deref().unwrap_or("?");
                let _ = writeln!(out, "  alias {prefix}{} {prefix}{orig}", method.name);
            }
            MethodKind::Method => {
                let sigs: Vec<String> = method.signatures.iter().map(ToString::to_string).collect();
                let sigs = if sigs.is_empty() {
                    "-> untyped".to_string()
                } else {
                    sigs.join(" | ")
                };
                let _ = writeln!(out, "  {visibility}def {prefix}{}: {sigs}", method.name);
            }
            kind => {
                let keyword = match kind {
                    MethodKind::AttrReader => "attr_reader",
                    MethodKind::AttrWriter => "attr_writer",
                    _ => "attr_accessor",
                };
                let ty = method.signatures.first().map_or("untyped", |s| s.ret.as_str());
                let _ = writeln!(out, "  {visibility}{keyword} {prefix}{}: {ty}", method.name);
            }
        }
    }
    out.push_str("end\n");
}

/// Collects the report from a finished run.
pub(crate) fn build_report(analyzer: &mut Analyzer) -> AnalysisReport {
    analyzer.report_undefined_globals();

    let ids: Vec<ClassId> = analyzer.classes.ids().collect();
    let mut classes = Vec::new();
    for id in ids {
        let def = analyzer.classes.get(id);
        let has_methods = def.methods.values().flatten().any(MethodDef::is_user_defined);
        if !def.user_defined && !has_methods && !has_written(&def.ivars) && !has_written(&def.cvars) {
            continue;
        }
        classes.push(class_record(analyzer, id));
    }

    let globals = written_vars(analyzer, &analyzer.gvars, |name| name.clone());

    AnalysisReport {
        incomplete: analyzer.incomplete,
        steps: analyzer.steps,
        classes,
        globals,
        diagnostics: analyzer.diagnostics.diagnostics().to_vec(),
        failures: analyzer.failures.clone(),
    }
}

fn has_written<K: Ord + Clone>(table: &VarTable<K>) -> bool {
    table.iter().any(|(_, e)| e.written)
}

fn written_vars<K: Ord + Clone>(analyzer: &Analyzer, table: &VarTable<K>, name: impl Fn(&K) -> String) -> Vec<VarRecord> {
    table
        .iter()
        .filter(|(_, e)| e.written)
        .map(|(k, e)| VarRecord {
            name: name(k),
            ty: screen_name(&analyzer.types, &analyzer.classes, e.ty),
        })
        .collect()
}

fn class_record(analyzer: &mut Analyzer, id: ClassId) -> ClassRecord {
    let def: &ClassDef = analyzer.classes.get(id);
    let superclass = def
        .superclass
        .filter(|&s| s != ClassId::OBJECT)
        .map(|s| analyzer.classes.path(s));
    let includes = def.includes[0].iter().map(|&m| analyzer.classes.path(m)).collect();
    let constants = written_vars(analyzer, &def.consts, |name| name.clone());
    let ivars = written_vars(analyzer, &def.ivars, |(singleton, name)| {
        if *singleton {
            format!("self.{name}")
        } else {
            name.clone()
        }
    });
    let cvars = written_vars(analyzer, &def.cvars, |name| name.clone());
    let record = ClassRecord {
        name: analyzer.classes.path(id),
        kind: def.kind.name().to_string(),
        superclass,
        includes,
        constants,
        ivars,
        cvars,
        methods: Vec::new(),
    };

    let methods: Vec<((bool, String), MethodDef)> = def
        .methods
        .iter()
        .filter_map(|(key, defs)| {
            defs.iter()
                .rev()
                .find(|d| d.is_user_defined())
                .map(|d| (key.clone(), d.clone()))
        })
        .collect();

    let mut records: Vec<MethodRecord> = Vec::new();
    for ((singleton, name), method) in methods {
        let owner = record.name.clone();
        match &method {
            MethodDef::Iseq(m) => {
                let signatures = iseq_signature(analyzer, m, &name).into_iter().collect();
                records.push(MethodRecord {
                    owner,
                    name,
                    singleton,
                    kind: MethodKind::Method,
                    public: m.public,
                    signatures,
                    alias_of: None,
                });
            }
            MethodDef::Attr(m) => {
                let ty = analyzer
                    .classes
                    .get(id)
                    .ivars
                    .get(&(singleton, m.ivar.clone()))
                    .map_or(TypeId::BOTTOM, |e| e.ty);
                let ty = screen_name(&analyzer.types, &analyzer.classes, ty);
                let attr = m.ivar.trim_start_matches('@').to_string();
                let (kind, signature) = match m.kind {
                    AttrKind::Reader => (MethodKind::AttrReader, SignatureRecord {
                        ret: ty,
                        ..SignatureRecord::default()
                    }),
                    AttrKind::Writer => (MethodKind::AttrWriter, SignatureRecord {
                        lead: vec![ty.clone()],
                        ret: ty,
                        ..SignatureRecord::default()
                    }),
                };
                let existing = records
                    .iter_mut()
                    .find(|r| r.name == attr && r.singleton == singleton && is_attr(r.kind));
                match existing {
                    Some(r) if r.kind != kind => r.kind = MethodKind::AttrAccessor,
                    Some(_) => {}
                    None => records.push(MethodRecord {
                        owner,
                        name: attr,
                        singleton,
                        kind,
                        public: m.public,
                        signatures: vec![signature],
                        alias_of: None,
                    }),
                }
            }
            MethodDef::Alias(m) => records.push(MethodRecord {
                owner,
                name,
                singleton,
                kind: MethodKind::Alias,
                public: method.public(),
                signatures: Vec::new(),
                alias_of: Some(m.orig.clone()),
            }),
            MethodDef::Typed(_) | MethodDef::Custom(_) => {}
        }
    }

    ClassRecord {
        methods: records,
        ..record
    }
}

fn is_attr(kind: MethodKind) -> bool {
    matches!(kind, MethodKind::AttrReader | MethodKind::AttrWriter | MethodKind::AttrAccessor)
}

/// Parameter and return types of the context `method` ran in under `name`.
/// `None` when the body was never entered.
fn iseq_signature(analyzer: &mut Analyzer, method: &IseqMethod, name: &str) -> Option<SignatureRecord> {
    let ctx = analyzer.state.contexts.lookup(&Context::Iseq {
        iseq: method.iseq,
        cref: method.cref,
        mid: Some(name.to_string()),
    })?;
    let iseq = analyzer.program.get(method.iseq)?;
    let layout = iseq.args.clone();
    let start = iseq.body_start().unwrap_or(0);

    let ep = ExecutionPoint::new(ctx, start, None);
    let env = analyzer
        .ep2env
        .get(&ep)
        .or_else(|| analyzer.ep2env.get(&ExecutionPoint::new(ctx, 0, None)))
        .cloned()?;

    let mut param = |slot: usize| -> String {
        let ty = env.local(slot).unwrap_or(TypeId::ANY);
        let ty = analyzer.globalize(ep, &env, ty);
        screen_name(&analyzer.types, &analyzer.classes, ty)
    };

    let lead = (0..layout.lead_num).map(&mut param).collect();
    let opt = (layout.lead_num..layout.lead_num + layout.opt_num()).map(&mut param).collect();
    let post = layout
        .post_start
        .map(|s| (s..s + layout.post_num).map(&mut param).collect())
        .unwrap_or_default();
    let keywords = layout
        .keywords
        .iter()
        .map(|kw| KeywordRecord {
            name: kw.name.clone(),
            required: kw.default == KeywordDefault::Required,
            ty: param(kw.slot),
        })
        .collect();
    let rest = layout.rest_start.map(|slot| collection_elem(analyzer, ep, &env, slot, false));
    let kwrest = layout.kwrest.map(|slot| collection_elem(analyzer, ep, &env, slot, true));

    let block = analyzer.yields.get(&ctx).cloned().map(|summary| block_record(analyzer, &summary));
    let ret = analyzer.return_values.get(&ctx).copied().unwrap_or(TypeId::BOTTOM);
    let ret = screen_name(&analyzer.types, &analyzer.classes, ret);

    Some(SignatureRecord {
        lead,
        opt,
        rest,
        post,
        keywords,
        kwrest,
        block,
        ret,
    })
}

/// Element type of a `*rest` array, or value type of a `**kwrest` hash.
fn collection_elem(analyzer: &mut Analyzer, ep: ExecutionPoint, env: &Env, slot: usize, hash: bool) -> String {
    let ty = env.local(slot).unwrap_or(TypeId::ANY);
    let ty = analyzer.globalize(ep, env, ty);
    let elem = match analyzer.types.kind(ty).clone() {
        TypeKind::Array(elems) if !hash => analyzer.types.squash(&elems),
        TypeKind::Hash(elems) if hash => analyzer.types.hash_key_value(&elems).1,
        _ => TypeId::ANY,
    };
    screen_name(&analyzer.types, &analyzer.classes, elem)
}

fn block_record(analyzer: &mut Analyzer, summary: &YieldSummary) -> BlockRecord {
    let args = summary
        .args
        .iter()
        .map(|&t| screen_name(&analyzer.types, &analyzer.classes, t))
        .collect();
    let rets: Vec<TypeId> = summary
        .blocks
        .iter()
        .map(|ctx| analyzer.return_values.get(ctx).copied().unwrap_or(TypeId::BOTTOM))
        .collect();
    let ret = if rets.is_empty() {
        TypeId::ANY
    } else {
        analyzer.types.union_all(rets)
    };
    BlockRecord {
        args,
        ret: screen_name(&analyzer.types, &analyzer.classes, ret),
    }
}
