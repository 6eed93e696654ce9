use std::fs;
use std::path::Path;

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};

use super::code::CodeObject;

/// A serialized top-level code object, as read from disk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Program {
    pub code: CodeObject,
}

impl Program {
    pub fn new(code: CodeObject) -> Self {
        Self { code }
    }

    pub fn from_json_str(text: &str) -> Result<Self> {
        serde_json::from_str(text).context("invalid JSON program")
    }

    pub fn from_yaml_str(text: &str) -> Result<Self> {
        serde_yaml::from_str(text).context("invalid YAML program")
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).context("failed to serialize program")
    }

    /// Loads a program, picking the format from the file extension.
    pub fn from_file(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
        match path.extension().and_then(|ext| ext.to_str()) {
            Some("json") => Self::from_json_str(&text),
            Some("yaml" | "yml") => Self::from_yaml_str(&text),
            Some(other) => bail!("unsupported program format '.{other}' (expected .json, .yaml or .yml)"),
            None => bail!("cannot infer program format of {}", path.display()),
        }
        .with_context(|| format!("while loading {}", path.display()))
    }

    pub fn into_code(self) -> CodeObject {
        self.code
    }
}
