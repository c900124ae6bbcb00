//! Lua plugin bridge for LED-controller firmware.
//!
//! Scripts return module tables with optional `setup`, `loop` and `connected`
//! functions. [`usermod::LuaFxUsermod`] loads them into one sandboxed VM and
//! forwards the firmware lifecycle to every plugin in load order. Scripts can
//! only touch the LEDs through `set_segment_range` and `set_segment_color`.
pub mod config;
pub mod led;
pub mod scripting;
pub mod usermod;

pub use config::{LuaFxConfig, ScriptSource};
pub use led::{LedStrip, MemoryStrip, SharedStrip};
pub use scripting::{Hook, MissingHookPolicy, PluginHandle, RangePolicy, ScriptEngine};
pub use usermod::{LuaFxUsermod, Usermod};
