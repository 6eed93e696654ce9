pub mod json;
pub mod math;


use anyhow::Result;
use framevm_core::module::ModuleRegistry;
use tracing::debug;

/// Register all stdlib modules with the given registry
pub fn register_stdlib_modules(registry: &mut ModuleRegistry) -> Result<()> {
    registry.register_module(Box::new(json::JsonModule::new()))?;
    registry.register_module(Box::new(math::MathModule::new()))?;
    debug!(target: "framevm::stdlib", modules = ?registry.module_names(), "registered stdlib modules");
    Ok(())
}
