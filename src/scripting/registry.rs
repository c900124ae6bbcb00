/// `scripting/registry.rs` - plugin loading and the ordered plugin table
///
/// A plugin is the table a script returns. It is pinned in the Lua registry
/// so the collector keeps it alive, and the host only ever holds a
/// `PluginHandle` (engine id + slot index), never the Lua value itself.
use std::sync::atomic::{AtomicU64, Ordering};

use mlua::{Lua, MultiValue, RegistryKey, Table, Value};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Identifies one script engine for the lifetime of the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EngineId(u64);

impl EngineId {
    pub(crate) fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

/// Opaque reference to a registered plugin. Only valid for the engine that issued it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PluginHandle {
    engine: EngineId,
    index: usize,
}

impl PluginHandle {
    /// Position in load order.
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn engine(&self) -> EngineId {
        self.engine
    }
}

impl std::fmt::Display for PluginHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "plugin#{}", self.index)
    }
}

#[derive(Debug, Clone, Error)]
pub enum LoadError {
    /// Source failed to parse or raised while running.
    #[error("plugin '{name}' failed to evaluate: {message}")]
    Eval { name: String, message: String },
    /// Source ran but did not return a module table.
    #[error("plugin '{name}' returned {found}, expected a module table")]
    Shape { name: String, found: &'static str },
    #[error("plugin '{name}' could not be pinned: {message}")]
    Pin { name: String, message: String },
}

impl LoadError {
    pub fn plugin_name(&self) -> &str {
        match self {
            LoadError::Eval { name, .. } | LoadError::Shape { name, .. } | LoadError::Pin { name, .. } => name,
        }
    }
}

#[derive(Debug, Clone, Error)]
pub enum HandleError {
    #[error("{0} was issued by another engine")]
    Foreign(PluginHandle),
    #[error("{0} is not registered")]
    Unknown(PluginHandle),
    #[error("{handle} could not be resolved: {message}")]
    Lua { handle: PluginHandle, message: String },
}

struct PluginEntry {
    name: String,
    key: RegistryKey,
}

/// Registered plugins in load order. Load order is dispatch order.
pub struct PluginRegistry {
    engine: EngineId,
    entries: Vec<PluginEntry>,
}

impl PluginRegistry {
    pub fn new(engine: EngineId) -> Self {
        Self {
            engine,
            entries: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Handles in registration order.
    pub fn handles(&self) -> impl Iterator<Item = PluginHandle> + '_ {
        let engine = self.engine;
        (0..self.entries.len()).map(move |index| PluginHandle { engine, index })
    }

    pub fn name(&self, handle: PluginHandle) -> Option<&str> {
        self.entry(handle).ok().map(|e| e.name.as_str())
    }

    /// Fetch the module table behind `handle`.
    pub fn resolve(&self, lua: &Lua, handle: PluginHandle) -> Result<Table, HandleError> {
        let entry = self.entry(handle)?;
        lua.registry_value::<Table>(&entry.key)
            .map_err(|e| HandleError::Lua {
                handle,
                message: e.to_string(),
            })
    }

    fn entry(&self, handle: PluginHandle) -> Result<&PluginEntry, HandleError> {
        if handle.engine != self.engine {
            return Err(HandleError::Foreign(handle));
        }
        self.entries
            .get(handle.index)
            .ok_or(HandleError::Unknown(handle))
    }

    fn push(&mut self, name: &str, key: RegistryKey) -> PluginHandle {
        let handle = PluginHandle {
            engine: self.engine,
            index: self.entries.len(),
        };
        self.entries.push(PluginEntry {
            name: name.to_string(),
            key,
        });
        handle
    }
}

/// Evaluate `source` and register the returned table as a plugin.
///
/// On any failure the registry is left exactly as it was.
pub fn load_plugin(
    lua: &Lua,
    registry: &mut PluginRegistry,
    name: &str,
    source: &str,
) -> Result<PluginHandle, LoadError> {
    // Run as a statement chunk; the last returned value is the module.
    let returned: MultiValue = lua
        .load(source)
        .set_name(name)
        .call(())
        .map_err(|e| LoadError::Eval {
            name: name.to_string(),
            message: e.to_string(),
        })?;
    let value = returned.into_iter().last().unwrap_or(Value::Nil);

    let module = match value {
        Value::Table(t) => t,
        other => {
            return Err(LoadError::Shape {
                name: name.to_string(),
                found: other.type_name(),
            })
        }
    };

    let key = lua.create_registry_value(module).map_err(|e| LoadError::Pin {
        name: name.to_string(),
        message: e.to_string(),
    })?;
    let handle = registry.push(name, key);
    log::info!("registered lua plugin '{name}' as {handle}");
    Ok(handle)
}
