//! Analysis options.
//!
//! The options change analysis semantics, so they are an explicit value
//! owned by the [`crate::Analyzer`] rather than process-wide state.
//!
//! ```
//! use rbprof::AnalysisConfig;
//!
//! let config = AnalysisConfig::from_toml_str("union_width_limit = 4\nmax_iter = 1000").unwrap();
//! assert_eq!(config.union_width_limit, 4);
//! assert_eq!(config.max_iter, Some(1000));
//! assert_eq!(config.type_depth_limit, 5);
//! ```

use crate::error::AnalysisResult;
use crate::lattice::widening::{DEFAULT_TYPE_DEPTH_LIMIT, DEFAULT_UNION_WIDTH_LIMIT};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AnalysisConfig {
    /// Container nesting depth kept by globalization and substitution.
    pub type_depth_limit: usize,
    /// Distinct union members kept before widening to `untyped` (0 = unlimited).
    pub union_width_limit: usize,
    /// Wall-clock budget in seconds.
    pub max_sec: Option<f64>,
    /// Budget of interpreted instructions.
    pub max_iter: Option<u64>,
    /// Interpret never-called methods and blocks with `untyped` arguments.
    pub stub_execution: bool,
    /// Load the bundled declarations for core classes.
    pub core_declarations: bool,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            type_depth_limit: DEFAULT_TYPE_DEPTH_LIMIT,
            union_width_limit: DEFAULT_UNION_WIDTH_LIMIT,
            max_sec: None,
            max_iter: None,
            stub_execution: true,
            core_declarations: true,
        }
    }
}

impl AnalysisConfig {
    pub fn from_toml_str(src: &str) -> AnalysisResult<Self> {
        Ok(toml::from_str(src)?)
    }

    pub fn load(path: impl AsRef<Path>) -> AnalysisResult<Self> {
        let src = std::fs::read_to_string(path)?;
        Self::from_toml_str(&src)
    }

    pub fn time_limit(&self) -> Option<Duration> {
        self.max_sec
            .filter(|sec| sec.is_finite() && *sec >= 0.0)
            .map(Duration::from_secs_f64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AnalysisError;

    #[test]
    fn test_defaults() {
        let config = AnalysisConfig::default();
        assert_eq!(config.type_depth_limit, 5);
        assert_eq!(config.union_width_limit, 10);
        assert!(config.stub_execution);
        assert!(config.core_declarations);
        assert_eq!(config.time_limit(), None);
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = AnalysisConfig::from_toml_str("max_sec = 1.5\nstub_execution = false\n").unwrap();
        assert_eq!(config.time_limit(), Some(Duration::from_millis(1500)));
        assert!(!config.stub_execution);
        assert_eq!(config.type_depth_limit, 5);
    }

    #[test]
    fn test_unknown_key_rejected() {
        let err = AnalysisConfig::from_toml_str("depth = 3").unwrap_err();
        assert!(matches!(err, AnalysisError::Config(_)));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rbprof.toml");
        std::fs::write(&path, "type_depth_limit = 2\n").unwrap();
        let config = AnalysisConfig::load(&path).unwrap();
        assert_eq!(config.type_depth_limit, 2);
    }
}
