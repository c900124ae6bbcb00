/// `scripting/dispatch.rs` - invokes lifecycle hooks on every plugin
///
/// Plugins are called synchronously in registration order. A hook that raises
/// is recorded and logged, and dispatch moves on to the next plugin. What
/// happens when a plugin has no such hook is decided by `MissingHookPolicy`.
use std::collections::VecDeque;

use mlua::{Function, Lua, Value};
use serde::{Deserialize, Serialize};

use super::registry::{PluginHandle, PluginRegistry};

/// Failure records kept per engine unless configured otherwise.
pub const DEFAULT_FAILURE_HISTORY: usize = 200;

/// Firmware lifecycle events forwarded to scripts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Hook {
    /// Once, after all scripts are loaded.
    Setup,
    /// Every firmware tick.
    Loop,
    /// When the device joins the network.
    Connected,
}

impl Hook {
    /// Field looked up on each module table.
    pub fn name(self) -> &'static str {
        match self {
            Hook::Setup => "setup",
            Hook::Loop => "loop",
            Hook::Connected => "connected",
        }
    }
}

impl std::fmt::Display for Hook {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// What to do when a plugin has no callable field for the dispatched hook.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MissingHookPolicy {
    /// Skip that plugin and keep going.
    #[default]
    Skip,
    /// Stop the whole dispatch at the first plugin without the hook.
    Halt,
}

/// One hook invocation that raised, or a plugin that could not be resolved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HookFailure {
    pub plugin: PluginHandle,
    pub plugin_name: String,
    pub hook: String,
    pub message: String,
    pub timestamp: i64,
}

/// Bounded history of hook failures, oldest evicted first.
#[derive(Debug, Clone)]
pub struct FailureLog {
    entries: VecDeque<HookFailure>,
    capacity: usize,
    total: u64,
}

impl Default for FailureLog {
    fn default() -> Self {
        Self::new(DEFAULT_FAILURE_HISTORY)
    }
}

impl FailureLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity.min(DEFAULT_FAILURE_HISTORY)),
            capacity,
            total: 0,
        }
    }

    pub fn push(&mut self, failure: HookFailure) {
        self.total += 1;
        if self.capacity == 0 {
            return;
        }
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(failure);
    }

    pub fn iter(&self) -> impl Iterator<Item = &HookFailure> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Failures seen since creation, including evicted ones.
    pub fn total(&self) -> u64 {
        self.total
    }

    /// Remove and return the retained records. `total` is not reset.
    pub fn drain(&mut self) -> Vec<HookFailure> {
        self.entries.drain(..).collect()
    }
}

/// Outcome of one dispatch call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchReport {
    /// Plugins whose hook was called, in call order. Includes ones that raised.
    pub invoked: Vec<PluginHandle>,
    /// Plugins with no callable hook of that name.
    pub missing: Vec<PluginHandle>,
    /// Plugins whose hook raised or could not be looked up.
    pub failed: Vec<PluginHandle>,
    /// Dispatch stopped early under `MissingHookPolicy::Halt`.
    pub halted: bool,
}

/// Call `hook` on every plugin in `registry`, in registration order.
pub fn dispatch(
    lua: &Lua,
    registry: &PluginRegistry,
    hook: &str,
    policy: MissingHookPolicy,
    failures: &mut FailureLog,
) -> DispatchReport {
    log::trace!("dispatching '{hook}' to {} plugin(s)", registry.len());
    let mut report = DispatchReport::default();

    for handle in registry.handles() {
        let plugin_name = registry.name(handle).unwrap_or_default();

        let func = match lookup_hook(lua, registry, handle, hook) {
            Ok(Some(func)) => func,
            Ok(None) => {
                report.missing.push(handle);
                if policy == MissingHookPolicy::Halt {
                    log::debug!("plugin '{plugin_name}' has no '{hook}' hook, halting dispatch");
                    report.halted = true;
                    break;
                }
                continue;
            }
            Err(message) => {
                record(failures, handle, plugin_name, hook, message);
                report.failed.push(handle);
                continue;
            }
        };

        report.invoked.push(handle);
        if let Err(e) = func.call::<()>(()) {
            record(failures, handle, plugin_name, hook, e.to_string());
            report.failed.push(handle);
        }
    }

    report
}

/// `Ok(None)` when the field is absent or not a function.
fn lookup_hook(
    lua: &Lua,
    registry: &PluginRegistry,
    handle: PluginHandle,
    hook: &str,
) -> Result<Option<Function>, String> {
    let module = registry.resolve(lua, handle).map_err(|e| e.to_string())?;
    // `get` honours __index, which can raise.
    match module.get::<Value>(hook).map_err(|e| e.to_string())? {
        Value::Function(func) => Ok(Some(func)),
        _ => Ok(None),
    }
}

fn record(failures: &mut FailureLog, plugin: PluginHandle, plugin_name: &str, hook: &str, message: String) {
    log::warn!("lua plugin '{plugin_name}' failed in '{hook}': {message}");
    failures.push(HookFailure {
        plugin,
        plugin_name: plugin_name.to_string(),
        hook: hook.to_string(),
        message,
        timestamp: chrono::Utc::now().timestamp(),
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scripting::registry::{load_plugin, EngineId};
    use crate::scripting::sandbox::{create_sandboxed_vm, SandboxLimits};

    const N: usize = 5;

    fn vm() -> (Lua, PluginRegistry) {
        let lua = create_sandboxed_vm(&SandboxLimits::default()).unwrap();
        (lua, PluginRegistry::new(EngineId::next()))
    }

    /// A module whose `loop` appends `tag` to the global `trace`.
    fn tracing_module(tag: &str) -> String {
        format!("trace = trace or {{}} return {{ loop = function() trace[#trace + 1] = '{tag}' end }}")
    }

    fn trace(lua: &Lua) -> Vec<String> {
        lua.globals().get::<Option<Vec<String>>>("trace").unwrap().unwrap_or_default()
    }

    #[test]
    fn hook_names_match_firmware_events() {
        assert_eq!(Hook::Setup.name(), "setup");
        assert_eq!(Hook::Loop.name(), "loop");
        assert_eq!(Hook::Connected.to_string(), "connected");
    }

    #[test]
    fn every_plugin_runs_once_in_registration_order() {
        let (lua, mut reg) = vm();
        for i in 0..N {
            load_plugin(&lua, &mut reg, &format!("p{i}"), &tracing_module(&format!("p{i}"))).unwrap();
        }
        let mut failures = FailureLog::default();
        let report = dispatch(&lua, &reg, "loop", MissingHookPolicy::Skip, &mut failures);

        let expected: Vec<String> = (0..N).map(|i| format!("p{i}")).collect();
        assert_eq!(trace(&lua), expected);
        assert_eq!(report.invoked.len(), N);
        assert!(report.missing.is_empty() && report.failed.is_empty() && !report.halted);
        assert!(failures.is_empty());
    }

    #[test]
    fn missing_hook_policy_holds_for_every_position() {
        for policy in [MissingHookPolicy::Skip, MissingHookPolicy::Halt] {
            for k in 0..N {
                let (lua, mut reg) = vm();
                for i in 0..N {
                    let src = if i == k {
                        "return { setup = function() end }".to_string()
                    } else {
                        tracing_module(&format!("p{i}"))
                    };
                    load_plugin(&lua, &mut reg, &format!("p{i}"), &src).unwrap();
                }
                let report = dispatch(&lua, &reg, "loop", policy, &mut FailureLog::default());

                let expected: Vec<String> = match policy {
                    MissingHookPolicy::Skip => (0..N).filter(|i| *i != k).map(|i| format!("p{i}")).collect(),
                    MissingHookPolicy::Halt => (0..k).map(|i| format!("p{i}")).collect(),
                };
                assert_eq!(trace(&lua), expected, "{policy:?} with missing hook at k={k}");
                assert_eq!(report.missing.len(), 1, "{policy:?} k={k}");
                assert_eq!(report.halted, policy == MissingHookPolicy::Halt, "{policy:?} k={k}");
            }
        }
    }

    #[test]
    fn raising_hook_does_not_stop_later_plugins() {
        let (lua, mut reg) = vm();
        load_plugin(&lua, &mut reg, "first", &tracing_module("first")).unwrap();
        let bad = load_plugin(&lua, &mut reg, "bad", "return { loop = function() error('boom') end }").unwrap();
        load_plugin(&lua, &mut reg, "last", &tracing_module("last")).unwrap();

        let mut failures = FailureLog::default();
        let report = dispatch(&lua, &reg, "loop", MissingHookPolicy::Halt, &mut failures);

        assert_eq!(trace(&lua), vec!["first", "last"]);
        assert_eq!(report.failed, vec![bad]);
        assert_eq!(report.invoked.len(), 3);
        let failure = failures.iter().next().unwrap();
        assert_eq!(failure.plugin, bad);
        assert_eq!(failure.plugin_name, "bad");
        assert_eq!(failure.hook, "loop");
        assert!(failure.message.contains("boom"), "{}", failure.message);
    }

    #[test]
    fn non_function_field_counts_as_missing() {
        let (lua, mut reg) = vm();
        load_plugin(&lua, &mut reg, "odd", "return { loop = 5 }").unwrap();
        load_plugin(&lua, &mut reg, "ok", &tracing_module("ok")).unwrap();
        let report = dispatch(&lua, &reg, "loop", MissingHookPolicy::Skip, &mut FailureLog::default());
        assert_eq!(report.missing.len(), 1);
        assert_eq!(trace(&lua), vec!["ok"]);
    }

    #[test]
    fn raising_index_metamethod_is_isolated() {
        let (lua, mut reg) = vm();
        load_plugin(
            &lua,
            &mut reg,
            "meta",
            "return setmetatable({}, { __index = function() error('no fields here') end })",
        )
        .unwrap();
        load_plugin(&lua, &mut reg, "ok", &tracing_module("ok")).unwrap();
        let mut failures = FailureLog::default();
        let report = dispatch(&lua, &reg, "loop", MissingHookPolicy::Skip, &mut failures);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(failures.len(), 1);
        assert_eq!(trace(&lua), vec!["ok"]);
    }

    #[test]
    fn hook_arguments_and_results_are_ignored() {
        let (lua, mut reg) = vm();
        load_plugin(
            &lua,
            &mut reg,
            "p",
            "return { loop = function(...) argc = select('#', ...) return 1, 2, 3 end }",
        )
        .unwrap();
        let report = dispatch(&lua, &reg, "loop", MissingHookPolicy::Skip, &mut FailureLog::default());
        assert!(report.failed.is_empty());
        let argc: i64 = lua.globals().get("argc").unwrap();
        assert_eq!(argc, 0);
    }

    #[test]
    fn failure_log_evicts_oldest() {
        let (lua, mut reg) = vm();
        load_plugin(&lua, &mut reg, "bad", "local n = 0 return { loop = function() n = n + 1 error('tick ' .. n) end }")
            .unwrap();
        let mut failures = FailureLog::new(3);
        for _ in 0..5 {
            dispatch(&lua, &reg, "loop", MissingHookPolicy::Skip, &mut failures);
        }
        assert_eq!(failures.len(), 3);
        assert_eq!(failures.total(), 5);
        let messages: Vec<_> = failures.drain().into_iter().map(|f| f.message).collect();
        assert!(messages[0].contains("tick 3"), "{messages:?}");
        assert!(messages[2].contains("tick 5"), "{messages:?}");
        assert!(failures.is_empty());
        assert_eq!(failures.total(), 5);
    }
}
