/// `scripting/` - Lua plugin bridge
///
/// One sandboxed Lua VM (mlua) per engine. Scripts return module tables that
/// are registered as plugins and receive firmware lifecycle hooks.
/// Script errors are caught and logged, they never take the firmware down.
pub mod api;
pub mod dispatch;
pub mod engine;
pub mod registry;
pub mod sandbox;

pub use api::{BindingError, RangePolicy};
pub use dispatch::{DispatchReport, FailureLog, Hook, HookFailure, MissingHookPolicy};
pub use engine::{EngineError, EngineOptions, ScriptEngine};
pub use registry::{EngineId, HandleError, LoadError, PluginHandle};
