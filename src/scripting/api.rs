/// `scripting/api.rs` - registers the host functions scripts may call
///
/// Every exported function is an adapter: it pulls raw Lua values, checks and
/// narrows them to host types, then calls a statically typed operation on the
/// `LedStrip` capability. A failed check raises a script-catchable error and
/// leaves the strip untouched.
use mlua::{Error as LuaError, Lua, Result as LuaResult, Value, Variadic};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::led::{LedStrip, SegmentAddress, SharedStrip, StripError};

/// `log` target for output produced by scripts through `print`.
pub const SCRIPT_LOG_TARGET: &str = "lua_fx::script";

/// Names installed into the sandbox globals by [`register_all`].
pub const EXPORTED_FUNCTIONS: &[&str] = &["print", "set_segment_range", "set_segment_color"];

/// How `set_segment_color` treats pixels outside the addressed segment.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RangePolicy {
    /// Write the part of the range inside the segment; fail only if none of it is.
    #[default]
    Clamp,
    /// Fail if any pixel of the range is outside the segment.
    Strict,
}

#[derive(Debug, Error)]
pub enum BindingError {
    #[error("bad argument #{pos} to '{function}' ({expected} expected, got {got})")]
    BadArgument {
        function: &'static str,
        pos: usize,
        expected: &'static str,
        got: &'static str,
    },
    #[error("bad argument #{pos} to '{function}' ({value} is not a valid {expected})")]
    OutOfDomain {
        function: &'static str,
        pos: usize,
        value: i64,
        expected: &'static str,
    },
    #[error("{address} is outside segment bounds [{start}..={stop}]")]
    OutOfRange {
        address: SegmentAddress,
        start: u16,
        stop: u16,
    },
    #[error("segment {0} is not active")]
    NoSuchSegment(u8),
    #[error(transparent)]
    Strip(#[from] StripError),
    #[error("led strip lock poisoned")]
    Poisoned,
}

impl From<BindingError> for LuaError {
    fn from(err: BindingError) -> Self {
        LuaError::RuntimeError(err.to_string())
    }
}

/// Register all host functions on `lua`.
///
/// `strip` is the only LED state the bindings can reach.
pub fn register_all(lua: &Lua, strip: SharedStrip, range_policy: RangePolicy) -> LuaResult<()> {
    register_print(lua)?;
    register_segment(lua, strip, range_policy)?;
    Ok(())
}

// ── Host operations ───────────────────────────────────────────────────────────

/// Reposition segment `address.segment` to `[start, end]`.
///
/// The physical pixel count is not checked here; the strip decides.
pub fn set_segment_range(strip: &mut dyn LedStrip, address: SegmentAddress) -> Result<(), BindingError> {
    strip.set_segment(address.segment, address.start, address.end)?;
    Ok(())
}

/// Paint `color` over the addressed pixels. Returns how many pixels were written.
///
/// The range is validated against the segment before the first write.
pub fn set_segment_color(
    strip: &mut dyn LedStrip,
    address: SegmentAddress,
    color: u32,
    policy: RangePolicy,
) -> Result<usize, BindingError> {
    let (start, stop) = strip
        .segment_bounds(address.segment)
        .ok_or(BindingError::NoSuchSegment(address.segment))?;
    if address.is_empty() {
        return Ok(0);
    }

    let out_of_range = BindingError::OutOfRange { address, start, stop };
    let (from, to) = match policy {
        RangePolicy::Strict => {
            if address.start < start || address.end > stop {
                return Err(out_of_range);
            }
            (address.start, address.end)
        }
        RangePolicy::Clamp => {
            let from = address.start.max(start);
            let to = address.end.min(stop);
            if from > to {
                return Err(out_of_range);
            }
            (from, to)
        }
    };

    for index in from..=to {
        strip.set_pixel_color(address.segment, index, color)?;
    }
    Ok(usize::from(to - from) + 1)
}

// ── Argument adapters ─────────────────────────────────────────────────────────

/// Positional view over the values a script passed to `function`.
struct Args<'a> {
    function: &'static str,
    values: &'a [Value],
}

impl<'a> Args<'a> {
    fn new(function: &'static str, values: &'a [Value]) -> Self {
        Self { function, values }
    }

    /// 1-based, like Lua's own argument errors.
    fn integer(&self, pos: usize) -> Result<i64, BindingError> {
        let bad = |got| BindingError::BadArgument {
            function: self.function,
            pos,
            expected: "integer",
            got,
        };
        match self.values.get(pos - 1) {
            Some(Value::Integer(i)) => Ok(*i),
            Some(Value::Number(n))
                if n.fract() == 0.0 && *n >= i64::MIN as f64 && *n < i64::MAX as f64 =>
            {
                Ok(*n as i64)
            }
            Some(other) => Err(bad(other.type_name())),
            None => Err(bad("no value")),
        }
    }

    fn narrow<T: TryFrom<i64>>(&self, pos: usize, expected: &'static str) -> Result<T, BindingError> {
        let value = self.integer(pos)?;
        T::try_from(value).map_err(|_| BindingError::OutOfDomain {
            function: self.function,
            pos,
            value,
            expected,
        })
    }

    /// Arguments 1..=3 as a segment address.
    fn address(&self) -> Result<SegmentAddress, BindingError> {
        Ok(SegmentAddress {
            segment: self.narrow(1, "segment id")?,
            start: self.narrow(2, "pixel index")?,
            end: self.narrow(3, "pixel index")?,
        })
    }

    /// Packed colour; negative values are the two's-complement 32-bit word.
    fn color(&self, pos: usize) -> Result<u32, BindingError> {
        let value = self.integer(pos)?;
        if value < i64::from(i32::MIN) || value > i64::from(u32::MAX) {
            return Err(BindingError::OutOfDomain {
                function: self.function,
                pos,
                value,
                expected: "32-bit colour",
            });
        }
        Ok(value as u32)
    }
}

fn with_strip<R>(
    strip: &SharedStrip,
    op: impl FnOnce(&mut dyn LedStrip) -> Result<R, BindingError>,
) -> Result<R, BindingError> {
    let mut guard = strip.lock().map_err(|_| BindingError::Poisoned)?;
    op(&mut *guard)
}

// ── print ─────────────────────────────────────────────────────────────────────

fn register_print(lua: &Lua) -> LuaResult<()> {
    let print = lua.create_function(|_, args: Variadic<Value>| {
        let parts = args
            .iter()
            .map(|v| v.to_string())
            .collect::<LuaResult<Vec<_>>>()?;
        log::info!(target: SCRIPT_LOG_TARGET, "{}", parts.join("\t"));
        Ok(())
    })?;
    lua.globals().set("print", print)?;
    Ok(())
}

// ── segment ───────────────────────────────────────────────────────────────────

fn register_segment(lua: &Lua, strip: SharedStrip, range_policy: RangePolicy) -> LuaResult<()> {
    // set_segment_range(segmentId, lightStart, lightEnd)
    let set_range = {
        let strip = SharedStrip::clone(&strip);
        lua.create_function(move |_, values: Variadic<Value>| {
            let args = Args::new("set_segment_range", &values);
            let address = args.address()?;
            log::debug!("set_segment_range({address})");
            with_strip(&strip, |s| set_segment_range(s, address))?;
            Ok(())
        })?
    };

    // set_segment_color(segmentId, lightStart, lightEnd, color)
    let set_color = {
        let strip = SharedStrip::clone(&strip);
        lua.create_function(move |_, values: Variadic<Value>| {
            let args = Args::new("set_segment_color", &values);
            let address = args.address()?;
            let color = args.color(4)?;
            log::debug!("set_segment_color({address}, {color:#010x})");
            with_strip(&strip, |s| set_segment_color(s, address, color, range_policy))?;
            Ok(())
        })?
    };

    let globals = lua.globals();
    globals.set("set_segment_range", set_range)?;
    globals.set("set_segment_color", set_color)?;
    Ok(())
}
