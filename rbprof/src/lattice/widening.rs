//! Limits that keep the lattice finite.

/// Container nesting kept before collapsing to `untyped`.
pub const DEFAULT_TYPE_DEPTH_LIMIT: usize = 5;

/// Union members kept before widening to `untyped`.
pub const DEFAULT_UNION_WIDTH_LIMIT: usize = 10;

/// Limits applied by the type arena and by globalization.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TypeLimits {
    pub depth: usize,
    /// 0 disables the width check
    pub width: usize,
}

impl Default for TypeLimits {
    fn default() -> Self {
        Self {
            depth: DEFAULT_TYPE_DEPTH_LIMIT,
            width: DEFAULT_UNION_WIDTH_LIMIT,
        }
    }
}

impl TypeLimits {
    pub fn exceeds_width(&self, members: usize) -> bool {
        self.width > 0 && members > self.width
    }
}
