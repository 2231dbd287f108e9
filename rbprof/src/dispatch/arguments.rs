//! Actual arguments and their binding to formal parameters.
//!
//! Binding follows the usual precedence: required leading parameters first,
//! then required trailing ones, then optionals left to right, and whatever is
//! left goes to the rest parameter. Methods reject counts outside their range;
//! blocks pad with `nil`, drop extras, and auto-splat a single array argument.

use super::signature::Overload;
use crate::lattice::{
    match_types, ArrayElems, ClassHierarchy, HashElems, Subst, TypeArena, TypeId, TypeKind,
};
use rbprof_iseq::{ArgLayout, KeywordDefault};
use std::collections::BTreeMap;
use std::fmt;

/// Keyword part of a call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Keywords {
    None,
    Named(BTreeMap<String, TypeId>),
    /// `**hash`, or keywords whose names are unknown
    Splat(TypeId),
}

/// Argument types of one call, already globalized.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActualArguments {
    pub lead: Vec<TypeId>,
    /// Element type of a splatted array (`f(*xs)`).
    pub rest: Option<TypeId>,
    pub keywords: Keywords,
    pub block: TypeId,
}

impl ActualArguments {
    pub fn new(lead: Vec<TypeId>) -> Self {
        Self {
            lead,
            rest: None,
            keywords: Keywords::None,
            block: TypeId::NIL,
        }
    }

    pub fn with_block(mut self, block: TypeId) -> Self {
        self.block = block;
        self
    }

    /// `untyped` for every parameter of `layout`.
    pub fn untyped(layout: &ArgLayout) -> Self {
        let lead = vec![TypeId::ANY; layout.lead_num + layout.opt_num() + layout.post_num];
        let keywords = if layout.has_keywords() {
            Keywords::Named(
                layout
                    .keywords
                    .iter()
                    .map(|kw| (kw.name.clone(), TypeId::ANY))
                    .collect(),
            )
        } else {
            Keywords::None
        };
        Self {
            lead,
            rest: layout.rest_start.map(|_| TypeId::ANY),
            keywords,
            block: TypeId::ANY,
        }
    }

    pub fn given(&self) -> usize {
        self.lead.len()
    }
}

/// Keywords passed to a method without keyword parameters arrive as a
/// trailing positional hash.
fn keywords_hash(arena: &mut TypeArena, keywords: &Keywords) -> Option<TypeId> {
    match keywords {
        Keywords::None => None,
        Keywords::Splat(ty) => Some(*ty),
        Keywords::Named(map) => {
            let mut elems = HashElems::default();
            for (name, &ty) in map {
                let key = arena.symbol(name);
                elems = arena.union_hash_elems(&elems, &HashElems::single(key, ty));
            }
            Some(arena.hash(elems))
        }
    }
}

fn hash_value_for(arena: &mut TypeArena, hash: TypeId, name: &str) -> TypeId {
    match arena.kind(hash).clone() {
        TypeKind::Hash(elems) => {
            let key = arena.symbol(name);
            match elems.entries.get(&key) {
                Some(&ty) => ty,
                None => arena.hash_key_value(&elems).1,
            }
        }
        _ => TypeId::ANY,
    }
}

/// Result of binding: local slots to fill, and the entry points matching
/// the number of optionals supplied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Binding {
    pub slots: Vec<(usize, TypeId)>,
    pub block: TypeId,
    pub start_pcs: Vec<usize>,
}

impl Binding {
    pub fn slot(&self, idx: usize) -> Option<TypeId> {
        self.slots.iter().find(|(i, _)| *i == idx).map(|(_, ty)| *ty)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BindError {
    Arity {
        given: usize,
        min: usize,
        max: Option<usize>,
    },
    MissingKeyword(String),
    UnknownKeyword(String),
}

pub fn expected_arity(min: usize, max: Option<usize>) -> String {
    match max {
        Some(max) if max == min => min.to_string(),
        Some(max) => format!("{min}..{max}"),
        None => format!("{min}+"),
    }
}

impl fmt::Display for BindError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BindError::Arity { given, min, max } => write!(
                f,
                "wrong number of arguments (given {given}, expected {})",
                expected_arity(*min, *max)
            ),
            BindError::MissingKeyword(name) => write!(f, "missing keyword: :{name}"),
            BindError::UnknownKeyword(name) => write!(f, "unknown keyword: :{name}"),
        }
    }
}

/// Block-call rule: one array argument fills several parameters.
fn auto_splat(arena: &mut TypeArena, layout: &ArgLayout, lead: Vec<TypeId>) -> Vec<TypeId> {
    let positional = layout.lead_num + layout.opt_num() + layout.post_num;
    let wants_many = positional > 1 || (layout.rest_start.is_some() && layout.lead_num + layout.post_num > 0);
    if lead.len() != 1 || layout.ambiguous_param0 || !wants_many {
        return lead;
    }
    match arena.kind(lead[0]).clone() {
        TypeKind::Array(elems) => {
            let mut out = elems.lead.clone();
            if !elems.rest.is_bottom() {
                while out.len() < positional {
                    out.push(elems.rest);
                }
            }
            out
        }
        TypeKind::Any => vec![TypeId::ANY; positional],
        _ => lead,
    }
}

/// Binds `args` to `layout`; `lenient` selects the block rules.
pub fn bind_arguments(
    arena: &mut TypeArena,
    layout: &ArgLayout,
    args: &ActualArguments,
    lenient: bool,
) -> Result<Binding, BindError> {
    let mut lead = args.lead.clone();
    let mut keywords = args.keywords.clone();
    if !layout.has_keywords() {
        if let Some(hash) = keywords_hash(arena, &keywords) {
            lead.push(hash);
        }
        keywords = Keywords::None;
    }
    if lenient && args.rest.is_none() {
        lead = auto_splat(arena, layout, lead);
    }

    let opt_num = layout.opt_num();
    let (min, max) = layout.positional_range();
    let given = lead.len();
    if !lenient && max.is_some_and(|m| given > m) {
        return Err(BindError::Arity { given, min, max });
    }
    if let Some(m) = max {
        lead.truncate(m);
    }

    let mut slots = Vec::new();
    let start_pcs = match args.rest {
        None => {
            if given < min {
                if !lenient {
                    return Err(BindError::Arity { given, min, max });
                }
                lead.resize(min, TypeId::NIL);
            }
            let n = lead.len();
            for (i, &ty) in lead[..layout.lead_num].iter().enumerate() {
                slots.push((i, ty));
            }
            let post_begin = n - layout.post_num;
            if let Some(post_start) = layout.post_start {
                for (j, &ty) in lead[post_begin..].iter().enumerate() {
                    slots.push((post_start + j, ty));
                }
            }
            let middle = &lead[layout.lead_num..post_begin];
            let opt_count = middle.len().min(opt_num);
            for (i, &ty) in middle[..opt_count].iter().enumerate() {
                slots.push((layout.lead_num + i, ty));
            }
            if let Some(rest_start) = layout.rest_start {
                let rest = arena.array(ArrayElems::tuple(middle[opt_count..].to_vec()));
                slots.push((rest_start, rest));
            }
            vec![layout.opt.get(opt_count).copied().unwrap_or(0)]
        }
        Some(splat) => {
            for i in 0..layout.lead_num {
                slots.push((i, lead.get(i).copied().unwrap_or(splat)));
            }
            let extra = lead.get(layout.lead_num..).unwrap_or(&[]);
            for i in 0..opt_num {
                slots.push((layout.lead_num + i, extra.get(i).copied().unwrap_or(splat)));
            }
            if let Some(post_start) = layout.post_start {
                for j in 0..layout.post_num {
                    slots.push((post_start + j, splat));
                }
            }
            if let Some(rest_start) = layout.rest_start {
                let mut elems: Vec<TypeId> = extra.get(opt_num..).unwrap_or(&[]).to_vec();
                elems.push(splat);
                let elem = arena.union_all(elems);
                slots.push((rest_start, arena.array(ArrayElems::homogeneous(elem))));
            }
            let supplied = extra.len().min(opt_num);
            if layout.opt.is_empty() {
                vec![0]
            } else {
                (supplied..=opt_num).filter_map(|k| layout.opt.get(k).copied()).collect()
            }
        }
    };

    bind_keywords(arena, layout, keywords, lenient, &mut slots)?;

    if let Some(block_start) = layout.block_start {
        slots.push((block_start, args.block));
    }
    Ok(Binding {
        slots,
        block: args.block,
        start_pcs,
    })
}

fn bind_keywords(
    arena: &mut TypeArena,
    layout: &ArgLayout,
    keywords: Keywords,
    lenient: bool,
    slots: &mut Vec<(usize, TypeId)>,
) -> Result<(), BindError> {
    let mut omitted = |arena: &mut TypeArena, default: &KeywordDefault, name: &str, slot: usize| match default {
        KeywordDefault::Required if lenient => {
            slots.push((slot, TypeId::NIL));
            Ok(())
        }
        KeywordDefault::Required => Err(BindError::MissingKeyword(name.to_string())),
        KeywordDefault::Literal(lit) => {
            slots.push((slot, arena.literal(lit.clone())));
            Ok(())
        }
        KeywordDefault::Computed => Ok(()),
    };
    let mut remaining = BTreeMap::new();
    let mut splat = None;
    match keywords {
        Keywords::Named(mut map) => {
            let mut given = Vec::new();
            for kw in &layout.keywords {
                match map.remove(&kw.name) {
                    Some(ty) => given.push((kw.slot, ty)),
                    None => omitted(arena, &kw.default, &kw.name, kw.slot)?,
                }
            }
            slots.extend(given);
            remaining = map;
        }
        Keywords::Splat(hash) => {
            let mut given = Vec::new();
            for kw in &layout.keywords {
                given.push((kw.slot, hash_value_for(arena, hash, &kw.name)));
            }
            slots.extend(given);
            splat = Some(hash);
        }
        Keywords::None => {
            for kw in &layout.keywords {
                omitted(arena, &kw.default, &kw.name, kw.slot)?;
            }
        }
    }
    match layout.kwrest {
        Some(kwrest) => {
            let hash = match splat {
                Some(hash) => hash,
                None => keywords_hash(arena, &Keywords::Named(remaining))
                    .unwrap_or(TypeId::ANY),
            };
            slots.push((kwrest, hash));
        }
        None => {
            if let Some(name) = remaining.keys().next() {
                if !lenient {
                    return Err(BindError::UnknownKeyword(name.clone()));
                }
            }
        }
    }
    Ok(())
}

/// Why a declared overload rejected a call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Mismatch {
    Type,
    Block,
    Keyword,
    Arity,
}

/// Checks `args` against one declared overload; on success returns the
/// bindings of the overload's type variables.
pub fn match_overload(
    arena: &mut TypeArena,
    hier: &dyn ClassHierarchy,
    overload: &Overload,
    args: &ActualArguments,
) -> Result<Subst, Mismatch> {
    let sig = &overload.sig;
    let mut lead = args.lead.clone();
    let mut keywords = args.keywords.clone();
    if sig.keywords.is_empty() && sig.kwrest.is_none() {
        if let Some(hash) = keywords_hash(arena, &keywords) {
            lead.push(hash);
        }
        keywords = Keywords::None;
    }

    let (lead_num, post_num, opt_num) = (sig.lead.len(), sig.post.len(), sig.opt.len());
    let n = lead.len();
    let mut pairs: Vec<(TypeId, TypeId)> = Vec::new();
    match args.rest {
        None => {
            let (min, max) = sig.positional_count();
            if n < min || max.is_some_and(|m| n > m) {
                return Err(Mismatch::Arity);
            }
            pairs.extend(lead.iter().copied().zip(sig.lead.iter().copied()));
            let post_begin = n - post_num;
            pairs.extend(lead[post_begin..].iter().copied().zip(sig.post.iter().copied()));
            let middle = &lead[lead_num..post_begin];
            let opt_count = middle.len().min(opt_num);
            pairs.extend(middle[..opt_count].iter().copied().zip(sig.opt.iter().copied()));
            if let Some(rest) = sig.rest {
                pairs.extend(middle[opt_count..].iter().map(|&t| (t, rest)));
            }
        }
        Some(splat) => {
            if sig.rest.is_none() && n > lead_num + opt_num + post_num {
                return Err(Mismatch::Arity);
            }
            for (i, &formal) in sig.lead.iter().enumerate() {
                pairs.push((lead.get(i).copied().unwrap_or(splat), formal));
            }
            let extra = lead.get(lead_num..).unwrap_or(&[]);
            for (i, &formal) in sig.opt.iter().enumerate() {
                pairs.push((extra.get(i).copied().unwrap_or(splat), formal));
            }
            pairs.extend(sig.post.iter().map(|&formal| (splat, formal)));
            if let Some(rest) = sig.rest {
                pairs.extend(extra.get(opt_num..).unwrap_or(&[]).iter().map(|&t| (t, rest)));
                pairs.push((splat, rest));
            }
        }
    }

    match &keywords {
        Keywords::Named(map) => {
            for kw in &sig.keywords {
                match map.get(&kw.name) {
                    Some(&ty) => pairs.push((ty, kw.ty)),
                    None if kw.required => return Err(Mismatch::Keyword),
                    None => {}
                }
            }
            for (name, &ty) in map {
                if sig.keywords.iter().any(|kw| &kw.name == name) {
                    continue;
                }
                match sig.kwrest {
                    Some(kwrest) => pairs.push((ty, kwrest)),
                    None => return Err(Mismatch::Keyword),
                }
            }
        }
        Keywords::Splat(_) => {}
        Keywords::None => {
            if sig.keywords.iter().any(|kw| kw.required) {
                return Err(Mismatch::Keyword);
            }
        }
    }

    if let Some(block) = &overload.block {
        if block.required && args.block.is_nil() {
            return Err(Mismatch::Block);
        }
    }

    let mut subst = Subst::new();
    for (actual, formal) in pairs {
        let m = match_types(arena, hier, actual, formal).ok_or(Mismatch::Type)?;
        subst.merge(arena, &m);
    }
    Ok(subst)
}

/// Literal default of a keyword, for rendering.
pub fn keyword_default_type(arena: &mut TypeArena, default: &KeywordDefault) -> Option<TypeId> {
    match default {
        KeywordDefault::Literal(lit) => Some(arena.literal(lit.clone())),
        KeywordDefault::Required | KeywordDefault::Computed => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::signature::{KeywordSig, MethodSignature};
    use crate::lattice::ops::tests::FlatHierarchy;
    use crate::lattice::ClassId;
    use rbprof_iseq::{KeywordParam, Literal};

    /// `def m(a, b, c = 1, *r, d)`
    fn layout() -> ArgLayout {
        ArgLayout {
            lead_num: 2,
            opt: vec![10, 12],
            rest_start: Some(3),
            post_start: Some(4),
            post_num: 1,
            ..ArgLayout::default()
        }
    }

    fn classes(arena: &mut TypeArena) -> Vec<TypeId> {
        [
            ClassId::INTEGER,
            ClassId::STRING,
            ClassId::FLOAT,
            ClassId::SYMBOL,
            ClassId::REGEXP,
        ]
        .into_iter()
        .map(|c| arena.instance(c))
        .collect()
    }

    #[test]
    fn test_bind_five_positional() {
        let mut arena = TypeArena::default();
        let t = classes(&mut arena);
        let args = ActualArguments::new(t.clone());
        let binding = bind_arguments(&mut arena, &layout(), &args, false).unwrap();
        assert_eq!(binding.slot(0), Some(t[0]));
        assert_eq!(binding.slot(1), Some(t[1]));
        assert_eq!(binding.slot(2), Some(t[2]));
        let rest = arena.array(ArrayElems::tuple(vec![t[3]]));
        assert_eq!(binding.slot(3), Some(rest));
        assert_eq!(binding.slot(4), Some(t[4]));
        assert_eq!(binding.start_pcs, vec![12]);
    }

    #[test]
    fn test_bind_three_positional_skips_optional() {
        let mut arena = TypeArena::default();
        let t = classes(&mut arena);
        let args = ActualArguments::new(t[..3].to_vec());
        let binding = bind_arguments(&mut arena, &layout(), &args, false).unwrap();
        assert_eq!(binding.slot(0), Some(t[0]));
        assert_eq!(binding.slot(1), Some(t[1]));
        assert_eq!(binding.slot(2), None);
        let empty = arena.array(ArrayElems::tuple(Vec::new()));
        assert_eq!(binding.slot(3), Some(empty));
        assert_eq!(binding.slot(4), Some(t[2]));
        assert_eq!(binding.start_pcs, vec![10]);
    }

    #[test]
    fn test_method_arity_error_message() {
        let mut arena = TypeArena::default();
        let layout = ArgLayout {
            lead_num: 1,
            ..ArgLayout::default()
        };
        let err = bind_arguments(&mut arena, &layout, &ActualArguments::new(Vec::new()), false).unwrap_err();
        assert_eq!(err.to_string(), "wrong number of arguments (given 0, expected 1)");

        let err = bind_arguments(&mut arena, &self::layout(), &ActualArguments::new(vec![TypeId::NIL]), false)
            .unwrap_err();
        assert_eq!(err.to_string(), "wrong number of arguments (given 1, expected 3+)");
    }

    #[test]
    fn test_block_binding_is_lenient_and_auto_splats() {
        let mut arena = TypeArena::default();
        let i = arena.instance(ClassId::INTEGER);
        let s = arena.instance(ClassId::STRING);
        let layout = ArgLayout {
            lead_num: 2,
            ..ArgLayout::default()
        };
        let pair = arena.array(ArrayElems::tuple(vec![i, s]));
        let binding = bind_arguments(&mut arena, &layout, &ActualArguments::new(vec![pair]), true).unwrap();
        assert_eq!(binding.slot(0), Some(i));
        assert_eq!(binding.slot(1), Some(s));

        let binding = bind_arguments(&mut arena, &layout, &ActualArguments::new(vec![i, s, i]), true).unwrap();
        assert_eq!(binding.slot(1), Some(s));
        assert_eq!(binding.slots.len(), 2);

        let binding = bind_arguments(&mut arena, &layout, &ActualArguments::new(Vec::new()), true).unwrap();
        assert_eq!(binding.slot(0), Some(TypeId::NIL));
    }

    #[test]
    fn test_keyword_binding() {
        let mut arena = TypeArena::default();
        let i = arena.instance(ClassId::INTEGER);
        let layout = ArgLayout {
            keywords: vec![
                KeywordParam {
                    name: "a".into(),
                    slot: 0,
                    default: KeywordDefault::Required,
                },
                KeywordParam {
                    name: "b".into(),
                    slot: 1,
                    default: KeywordDefault::Literal(Literal::Int(1)),
                },
            ],
            ..ArgLayout::default()
        };
        let mut args = ActualArguments::new(Vec::new());
        args.keywords = Keywords::Named([("a".to_string(), i)].into_iter().collect());
        let binding = bind_arguments(&mut arena, &layout, &args, false).unwrap();
        assert_eq!(binding.slot(0), Some(i));
        let one = arena.literal(Literal::Int(1));
        assert_eq!(binding.slot(1), Some(one));

        let err = bind_arguments(&mut arena, &layout, &ActualArguments::new(Vec::new()), false).unwrap_err();
        assert_eq!(err, BindError::MissingKeyword("a".into()));

        args.keywords = Keywords::Named(
            [("a".to_string(), i), ("z".to_string(), i)].into_iter().collect(),
        );
        let err = bind_arguments(&mut arena, &layout, &args, false).unwrap_err();
        assert_eq!(err, BindError::UnknownKeyword("z".into()));
    }

    #[test]
    fn test_splat_fills_every_optional_entry() {
        let mut arena = TypeArena::default();
        let i = arena.instance(ClassId::INTEGER);
        let layout = ArgLayout {
            lead_num: 1,
            opt: vec![3, 5, 7],
            ..ArgLayout::default()
        };
        let mut args = ActualArguments::new(Vec::new());
        args.rest = Some(i);
        let binding = bind_arguments(&mut arena, &layout, &args, false).unwrap();
        assert_eq!(binding.slot(0), Some(i));
        assert_eq!(binding.start_pcs, vec![3, 5, 7]);
    }

    #[test]
    fn test_match_overload_by_type_and_arity() {
        let mut arena = TypeArena::default();
        let i = arena.instance(ClassId::INTEGER);
        let s = arena.instance(ClassId::STRING);
        let ov = Overload {
            sig: MethodSignature {
                lead: vec![i],
                ..MethodSignature::default()
            },
            block: None,
            ret: i,
        };
        assert!(match_overload(&mut arena, &FlatHierarchy, &ov, &ActualArguments::new(vec![i])).is_ok());
        assert_eq!(
            match_overload(&mut arena, &FlatHierarchy, &ov, &ActualArguments::new(vec![s])),
            Err(Mismatch::Type)
        );
        assert_eq!(
            match_overload(&mut arena, &FlatHierarchy, &ov, &ActualArguments::new(vec![])),
            Err(Mismatch::Arity)
        );
    }

    #[test]
    fn test_match_overload_required_keyword_and_block() {
        let mut arena = TypeArena::default();
        let i = arena.instance(ClassId::INTEGER);
        let ov = Overload {
            sig: MethodSignature {
                keywords: vec![KeywordSig {
                    name: "k".into(),
                    required: true,
                    ty: i,
                }],
                ..MethodSignature::default()
            },
            block: Some(crate::dispatch::signature::BlockParam {
                required: true,
                args: Vec::new(),
                ret: TypeId::ANY,
            }),
            ret: i,
        };
        let mut args = ActualArguments::new(Vec::new());
        assert_eq!(match_overload(&mut arena, &FlatHierarchy, &ov, &args), Err(Mismatch::Keyword));
        args.keywords = Keywords::Named([("k".to_string(), i)].into_iter().collect());
        assert_eq!(match_overload(&mut arena, &FlatHierarchy, &ov, &args), Err(Mismatch::Block));
        args.block = TypeId::ANY;
        assert!(match_overload(&mut arena, &FlatHierarchy, &ov, &args).is_ok());
    }
}
