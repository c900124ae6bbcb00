/// `scripting/engine.rs` - the Lua VM and everything registered in it
///
/// `ScriptEngine` owns exactly one sandboxed Lua state, the plugins loaded
/// into it and the history of hook failures. It is driven from the firmware
/// tick only; nothing here is shared across threads.
use mlua::Lua;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::{
    api::{register_all, RangePolicy},
    dispatch::{dispatch, DispatchReport, FailureLog, Hook, HookFailure, MissingHookPolicy, DEFAULT_FAILURE_HISTORY},
    registry::{load_plugin, EngineId, LoadError, PluginHandle, PluginRegistry},
    sandbox::{create_sandboxed_vm, SandboxLimits},
};
use crate::led::SharedStrip;

/// Engine tuning, usually taken from the usermod config.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineOptions {
    pub missing_hook: MissingHookPolicy,
    pub pixel_range: RangePolicy,
    #[serde(flatten)]
    pub limits: SandboxLimits,
    /// Work done by one `step_gc` call, in KiB of allocation.
    pub gc_step_kbytes: i32,
    /// Hook failures retained for inspection.
    pub failure_history: usize,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            missing_hook: MissingHookPolicy::default(),
            pixel_range: RangePolicy::default(),
            limits: SandboxLimits::default(),
            gc_step_kbytes: 1,
            failure_history: DEFAULT_FAILURE_HISTORY,
        }
    }
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("failed to create Lua VM: {0}")]
    Vm(#[source] mlua::Error),
    #[error("failed to install host bindings: {0}")]
    Bindings(#[source] mlua::Error),
}

pub struct ScriptEngine {
    id: EngineId,
    lua: Lua,
    plugins: PluginRegistry,
    failures: FailureLog,
    options: EngineOptions,
}

impl ScriptEngine {
    /// Create the sandbox and install the LED bindings over `strip`.
    pub fn initialize(strip: SharedStrip, options: EngineOptions) -> Result<Self, EngineError> {
        let lua = create_sandboxed_vm(&options.limits).map_err(EngineError::Vm)?;
        register_all(&lua, strip, options.pixel_range).map_err(EngineError::Bindings)?;

        let id = EngineId::next();
        log::info!(
            "lua engine {id:?} ready (missing hooks: {:?}, pixel range: {:?})",
            options.missing_hook,
            options.pixel_range
        );
        Ok(Self {
            id,
            lua,
            plugins: PluginRegistry::new(id),
            failures: FailureLog::new(options.failure_history),
            options,
        })
    }

    pub fn id(&self) -> EngineId {
        self.id
    }

    pub fn options(&self) -> &EngineOptions {
        &self.options
    }

    // ── Plugins ───────────────────────────────────────────────────────────

    /// Evaluate `source` and register the module it returns.
    pub fn load(&mut self, name: &str, source: &str) -> Result<PluginHandle, LoadError> {
        load_plugin(&self.lua, &mut self.plugins, name, source)
            .inspect_err(|e| log::warn!("lua load error: {e}"))
    }

    pub fn plugins(&self) -> impl Iterator<Item = PluginHandle> + '_ {
        self.plugins.handles()
    }

    pub fn plugin_count(&self) -> usize {
        self.plugins.len()
    }

    pub fn plugin_name(&self, handle: PluginHandle) -> Option<&str> {
        self.plugins.name(handle)
    }

    // ── Dispatch ──────────────────────────────────────────────────────────

    pub fn dispatch(&mut self, hook: Hook) -> DispatchReport {
        self.dispatch_named(hook.name())
    }

    /// Dispatch a hook by field name, for events beyond [`Hook`].
    pub fn dispatch_named(&mut self, hook: &str) -> DispatchReport {
        dispatch(
            &self.lua,
            &self.plugins,
            hook,
            self.options.missing_hook,
            &mut self.failures,
        )
    }

    pub fn failures(&self) -> &FailureLog {
        &self.failures
    }

    pub fn take_failures(&mut self) -> Vec<HookFailure> {
        self.failures.drain()
    }

    // ── Memory ────────────────────────────────────────────────────────────

    /// One bounded increment of incremental collection. Call once per tick.
    pub fn step_gc(&self) {
        if let Err(e) = self.lua.gc_step_kbytes(self.options.gc_step_kbytes) {
            log::warn!("lua gc step failed: {e}");
        }
    }

    /// Bytes currently allocated by the interpreter.
    pub fn memory_used(&self) -> usize {
        self.lua.used_memory()
    }

    #[cfg(test)]
    pub(crate) fn global<T: mlua::FromLua>(&self, name: &str) -> T {
        self.lua.globals().get(name).unwrap()
    }
}
