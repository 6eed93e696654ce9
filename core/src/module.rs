use std::cell::RefCell;
use std::rc::Rc;

use anyhow::{Result, anyhow, bail};
use tracing::debug;

use crate::util::fast_map::{FastHashMap, fast_hash_map_new};
use crate::val::{ExcKind, ModuleValue, Val, host_error};

/// Registry of importable host modules.
///
/// Modules are registered up front by the embedder (the stdlib crate
/// registers its own); `load` materializes a module value once and hands the
/// same value to every later import.
#[derive(Debug, Default)]
pub struct ModuleRegistry {
    modules: FastHashMap<String, Box<dyn Module>>,
    cache: RefCell<FastHashMap<String, Val>>,
}

impl ModuleRegistry {
    pub fn new() -> Self {
        Self {
            modules: fast_hash_map_new(),
            cache: RefCell::new(fast_hash_map_new()),
        }
    }

    /// Register a module under its own name
    pub fn register_module(&mut self, module: Box<dyn Module>) -> Result<()> {
        let name = module.name().to_string();
        if self.modules.contains_key(&name) {
            bail!("module '{name}' is already registered");
        }
        self.modules.insert(name, module);
        Ok(())
    }

    pub fn get_module(&self, name: &str) -> Result<&dyn Module> {
        self.modules
            .get(name)
            .map(|boxed| boxed.as_ref())
            .ok_or_else(|| anyhow!("Module '{}' not found", name))
    }

    /// Registered module names, sorted
    pub fn module_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.modules.keys().cloned().collect();
        names.sort();
        names
    }

    /// Resolve an import, raising `ModuleNotFoundError` for unknown names
    pub fn load(&self, name: &str) -> Result<Val> {
        if let Some(cached) = self.cache.borrow().get(name) {
            return Ok(cached.clone());
        }
        let Some(module) = self.modules.get(name) else {
            return Err(host_error(
                ExcKind::ModuleNotFoundError,
                format!("No module named '{name}'"),
            ));
        };
        debug!(target: "framevm::module", module = name, "loading host module");
        let value = Val::Module(Rc::new(ModuleValue::new(name, module.exports())));
        self.cache.borrow_mut().insert(name.to_string(), value.clone());
        Ok(value)
    }
}

/// A host module importable by guest code.
pub trait Module: std::fmt::Debug {
    fn name(&self) -> &str;

    fn description(&self) -> &str {
        ""
    }

    /// Attributes of the module value
    fn exports(&self) -> Vec<(String, Val)>;
}
