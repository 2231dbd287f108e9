//! Type lattice for abstract interpretation.
//!
//! - `types`: hash-consed [`TypeArena`] and the [`TypeKind`] variants
//! - `ops`: truthiness, unification with declared types, substitution
//! - `display`: declaration-language rendering
//! - `widening`: depth and width limits

pub mod display;
pub mod ops;
pub mod types;
pub mod widening;

pub use display::screen_name;
pub use ops::{
    erase_vars, free_vars, limit_size, match_types, receiver_class, receiver_subst, substitute,
    truthiness, ClassHierarchy, Subst, Truthiness,
};
pub use types::{
    literal_class, ArrayElems, BlockId, ClassId, ContainerKind, HashElems, SiteId, TypeArena,
    TypeId, TypeKind,
};
pub use widening::TypeLimits;
