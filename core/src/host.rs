//! The seam between the engine and its embedder.

use std::io::Write;

use anyhow::{Context, Result};

use crate::module::ModuleRegistry;
use crate::val::Val;

/// Capabilities the engine needs from the outside world.
pub trait Host {
    /// Observable output, in instruction order.
    fn write_stdout(&mut self, text: &str) -> Result<()>;

    /// Resolves `import name` to a module value.
    fn import_module(&mut self, name: &str) -> Result<Val>;
}

/// Writes straight to the process stdout.
#[derive(Debug, Default)]
pub struct StdHost {
    registry: ModuleRegistry,
}

impl StdHost {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_registry(registry: ModuleRegistry) -> Self {
        Self { registry }
    }

    pub fn registry_mut(&mut self) -> &mut ModuleRegistry {
        &mut self.registry
    }
}

impl Host for StdHost {
    fn write_stdout(&mut self, text: &str) -> Result<()> {
        let mut out = std::io::stdout().lock();
        out.write_all(text.as_bytes()).context("failed to write to stdout")?;
        out.flush().context("failed to flush stdout")
    }

    fn import_module(&mut self, name: &str) -> Result<Val> {
        self.registry.load(name)
    }
}

/// Captures output in memory; used by tests and embedders.
#[derive(Debug, Default)]
pub struct BufferHost {
    output: String,
    registry: ModuleRegistry,
}

impl BufferHost {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_registry(registry: ModuleRegistry) -> Self {
        Self {
            output: String::new(),
            registry,
        }
    }

    pub fn registry_mut(&mut self) -> &mut ModuleRegistry {
        &mut self.registry
    }

    pub fn output(&self) -> &str {
        &self.output
    }

    pub fn take_output(&mut self) -> String {
        std::mem::take(&mut self.output)
    }
}

impl Host for BufferHost {
    fn write_stdout(&mut self, text: &str) -> Result<()> {
        self.output.push_str(text);
        Ok(())
    }

    fn import_module(&mut self, name: &str) -> Result<Val> {
        self.registry.load(name)
    }
}
