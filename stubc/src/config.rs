//! Configuration for loading and evaluating stubs
//!
//! Read from a TOML file:
//!
//! ```toml
//! [eval]
//! max_quantifier_span = 4096
//!
//! [loader]
//! resource_kinds = ["FileDescriptor", "Memory"]
//! extension = "stub"
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Result, StubError};

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StubcConfig {
    pub eval: EvalConfig,
    pub loader: LoaderConfig,
}

impl StubcConfig {
    pub fn from_toml_str(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| StubError::io_error(format!("invalid configuration: {e}")))
    }

    /// Read a configuration file
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            StubError::io_error(format!("failed to read {}: {e}", path.display()))
        })?;
        Self::from_toml_str(&text)
    }

    pub fn eval(mut self, eval: EvalConfig) -> Self {
        self.eval = eval;
        self
    }

    pub fn loader(mut self, loader: LoaderConfig) -> Self {
        self.loader = loader;
        self
    }
}

/// Limits of the evaluator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EvalConfig {
    /// Widest concrete quantifier range that is enumerated; wider ranges are unknown
    pub max_quantifier_span: u64,
}

impl Default for EvalConfig {
    fn default() -> Self {
        Self {
            max_quantifier_span: 4096,
        }
    }
}

impl EvalConfig {
    pub fn max_quantifier_span(mut self, span: u64) -> Self {
        self.max_quantifier_span = span;
        self
    }
}

/// Settings of the stub loader
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoaderConfig {
    /// Resource kinds available to every file without a `resource` declaration
    pub resource_kinds: Vec<String>,
    /// Extension of stub files when loading a directory
    pub extension: String,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            resource_kinds: Vec::new(),
            extension: "stub".to_string(),
        }
    }
}

impl LoaderConfig {
    /// Pre-declare a resource kind
    pub fn resource_kind(mut self, kind: impl Into<String>) -> Self {
        self.resource_kinds.push(kind.into());
        self
    }

    pub fn extension(mut self, extension: impl Into<String>) -> Self {
        self.extension = extension.into();
        self
    }
}
