//! Declaration-language rendering of types.

use super::ops::ClassHierarchy;
use super::types::{ClassId, TypeArena, TypeId, TypeKind, literal_class};
use rbprof_iseq::Literal;

/// Renders `ty` the way inferred signatures print it (`Integer?`,
/// `Array[String]`, `singleton(Foo)`, `:sym`, `bool`, `untyped`).
pub fn screen_name(arena: &TypeArena, hier: &dyn ClassHierarchy, ty: TypeId) -> String {
    match arena.kind(ty) {
        TypeKind::Any => "untyped".to_string(),
        TypeKind::Bottom => "bot".to_string(),
        TypeKind::Union(members) => union_name(arena, hier, members),
        TypeKind::Instance { class, args } => instance_name(arena, hier, *class, args),
        TypeKind::Class(class) => format!("singleton({})", hier.class_path(*class)),
        TypeKind::Literal(Literal::Sym(name)) => format!(":{name}"),
        TypeKind::Literal(lit) => hier.class_path(literal_class(lit)),
        TypeKind::Array(elems) => {
            if elems.lead.is_empty() {
                if elems.rest.is_bottom() {
                    "Array[untyped]".to_string()
                } else {
                    format!("Array[{}]", screen_name(arena, hier, elems.rest))
                }
            } else if elems.rest.is_bottom() {
                let parts: Vec<_> = elems.lead.iter().map(|&t| screen_name(arena, hier, t)).collect();
                format!("[{}]", parts.join(", "))
            } else {
                let mut all = elems.lead.clone();
                all.push(elems.rest);
                let parts = union_name(arena, hier, &all);
                format!("Array[{parts}]")
            }
        }
        TypeKind::Hash(elems) => {
            if elems.entries.is_empty() {
                return "Hash[untyped, untyped]".to_string();
            }
            let symbol_keys: Option<Vec<(&str, TypeId)>> = elems
                .entries
                .iter()
                .map(|(&k, &v)| match arena.kind(k) {
                    TypeKind::Literal(Literal::Sym(name)) => Some((name.as_str(), v)),
                    _ => None,
                })
                .collect();
            match symbol_keys {
                Some(fields) => {
                    let parts: Vec<_> = fields
                        .iter()
                        .map(|(name, v)| format!("{name}: {}", screen_name(arena, hier, *v)))
                        .collect();
                    format!("{{ {} }}", parts.join(", "))
                }
                None => {
                    let keys: Vec<_> = elems.entries.keys().copied().collect();
                    let values: Vec<_> = elems.entries.values().copied().collect();
                    format!(
                        "Hash[{}, {}]",
                        union_name(arena, hier, &keys),
                        union_name(arena, hier, &values)
                    )
                }
            }
        }
        TypeKind::Proc(_) => "Proc".to_string(),
        TypeKind::Var(name) => name.clone(),
        TypeKind::Local { container, .. } => match container.class() {
            ClassId::HASH => "Hash[untyped, untyped]".to_string(),
            _ => "Array[untyped]".to_string(),
        },
    }
}

fn instance_name(arena: &TypeArena, hier: &dyn ClassHierarchy, class: ClassId, args: &[TypeId]) -> String {
    match class {
        ClassId::NIL => "nil".to_string(),
        ClassId::TRUE => "true".to_string(),
        ClassId::FALSE => "false".to_string(),
        _ if args.is_empty() => hier.class_path(class),
        _ => {
            let parts: Vec<_> = args.iter().map(|&t| screen_name(arena, hier, t)).collect();
            format!("{}[{}]", hier.class_path(class), parts.join(", "))
        }
    }
}

/// Joins member names: `true | false` folds to `bool`, `nil` becomes a `?`
/// suffix, duplicates (a literal next to its class) collapse.
fn union_name(arena: &TypeArena, hier: &dyn ClassHierarchy, members: &[TypeId]) -> String {
    let mut flat = Vec::new();
    for &m in members {
        match arena.kind(m) {
            TypeKind::Union(inner) => flat.extend(inner.iter().copied()),
            TypeKind::Bottom => {}
            TypeKind::Any => return "untyped".to_string(),
            _ => flat.push(m),
        }
    }
    let has_nil = flat.contains(&TypeId::NIL);
    let has_bool = flat.contains(&TypeId::TRUE) && flat.contains(&TypeId::FALSE);

    let mut names: Vec<String> = Vec::new();
    if has_bool {
        names.push("bool".to_string());
    }
    for &m in &flat {
        if m == TypeId::NIL || (has_bool && (m == TypeId::TRUE || m == TypeId::FALSE)) {
            continue;
        }
        let name = screen_name(arena, hier, m);
        if !names.contains(&name) {
            names.push(name);
        }
    }
    names.sort();

    match (names.len(), has_nil) {
        (0, true) => "nil".to_string(),
        (0, false) => "bot".to_string(),
        (1, false) => names.remove(0),
        (1, true) => format!("{}?", names[0]),
        (_, false) => names.join(" | "),
        (_, true) => format!("({})?", names.join(" | ")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lattice::ops::tests::FlatHierarchy;
    use crate::lattice::types::{ArrayElems, HashElems};

    #[test]
    fn test_basic_names() {
        let mut arena = TypeArena::default();
        let i = arena.instance(ClassId::INTEGER);
        let opt = arena.optional(i);
        let sym = arena.symbol("ok");
        let cls = arena.class_object(ClassId::STRING);
        let h = &FlatHierarchy;
        assert_eq!(screen_name(&arena, h, TypeId::ANY), "untyped");
        assert_eq!(screen_name(&arena, h, TypeId::BOOL), "bool");
        assert_eq!(screen_name(&arena, h, TypeId::NIL), "nil");
        assert_eq!(screen_name(&arena, h, opt), "C8?");
        assert_eq!(screen_name(&arena, h, sym), ":ok");
        assert_eq!(screen_name(&arena, h, cls), "singleton(C10)");
    }

    #[test]
    fn test_union_names_sorted_and_optional() {
        let mut arena = TypeArena::default();
        let i = arena.instance(ClassId::INTEGER);
        let s = arena.instance(ClassId::STRING);
        let one = arena.literal(Literal::Int(1));
        let u = arena.union_all([s, i, one, TypeId::NIL]);
        assert_eq!(screen_name(&arena, &FlatHierarchy, u), "(C10 | C8)?");
    }

    #[test]
    fn test_container_names() {
        let mut arena = TypeArena::default();
        let i = arena.instance(ClassId::INTEGER);
        let s = arena.instance(ClassId::STRING);
        let tuple = arena.array(ArrayElems::tuple(vec![i, s]));
        let list = arena.array(ArrayElems::homogeneous(i));
        let empty = arena.array(ArrayElems::tuple(vec![]));
        let key = arena.symbol("a");
        let record = arena.hash(HashElems::single(key, i));
        let h = &FlatHierarchy;
        assert_eq!(screen_name(&arena, h, tuple), "[C8, C10]");
        assert_eq!(screen_name(&arena, h, list), "Array[C8]");
        assert_eq!(screen_name(&arena, h, empty), "Array[untyped]");
        assert_eq!(screen_name(&arena, h, record), "{ a: C8 }");
    }
}
