/// `scripting/sandbox.rs` - Lua state creation with a reduced library set
///
/// The firmware has very little RAM, so only the base and math libraries are
/// opened. No io, os, package, debug, string or coroutine. A few base
/// functions that reach outside the sandbox or bypass the tick-driven
/// collector are removed from the globals as well.
use mlua::{Lua, LuaOptions, Result as LuaResult, StdLib, Value};
use serde::{Deserialize, Serialize};

/// Base-library globals scripts never get.
const STRIPPED_GLOBALS: &[&str] = &["dofile", "loadfile", "load", "require", "collectgarbage"];

/// Resource limits applied to a fresh VM.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SandboxLimits {
    /// Hard cap on interpreter heap, in bytes. `None` leaves it unbounded.
    pub memory_limit: Option<usize>,
}

/// Creates a new Lua VM with sandbox restrictions applied.
pub fn create_sandboxed_vm(limits: &SandboxLimits) -> LuaResult<Lua> {
    // The base library is always opened; math is the only extra.
    let lua = Lua::new_with(StdLib::MATH, LuaOptions::default())?;

    let globals = lua.globals();
    for name in STRIPPED_GLOBALS {
        globals.set(*name, Value::Nil)?;
    }

    if let Some(bytes) = limits.memory_limit {
        lua.set_memory_limit(bytes)?;
    }

    // Zeros keep Lua's default pause and step sizes.
    lua.gc_inc(0, 0, 0);

    Ok(lua)
}
