use std::path::Path;

use lua_fx::{
    led::{shared, unpack_color, MemoryStrip},
    LuaFxConfig, LuaFxUsermod, Usermod,
};

/// Pixels on the simulated strip.
const STRIP_LENGTH: u16 = 30;
/// Firmware ticks to simulate after setup.
const TICKS: usize = 100;

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = match std::env::args().nth(1) {
        Some(path) => match LuaFxConfig::from_file(Path::new(&path)) {
            Ok(cfg) => cfg,
            Err(e) => {
                log::error!("{e}");
                std::process::exit(1);
            }
        },
        None => LuaFxConfig::default(),
    };

    let strip = shared(MemoryStrip::new(STRIP_LENGTH));
    if let Ok(s) = strip.lock() {
        log::info!("simulating a strip of {} pixels", s.length());
    }
    let mut usermod = LuaFxUsermod::new(config, strip.clone());

    if let Err(e) = usermod.setup() {
        log::error!("lua fx setup failed: {e}");
        std::process::exit(1);
    }
    usermod.connected();
    for _ in 0..TICKS {
        usermod.loop_tick();
    }

    if let Some(engine) = usermod.engine() {
        log::info!(
            "{} plugin(s), {} hook failure(s), {} bytes of Lua heap",
            engine.plugin_count(),
            engine.failures().total(),
            engine.memory_used()
        );
    }

    let Ok(strip) = strip.lock() else {
        log::error!("led strip lock poisoned");
        std::process::exit(1);
    };
    if let Some(segment) = strip.segment(0) {
        for (offset, color) in segment.colors().iter().enumerate() {
            let (w, r, g, b) = unpack_color(*color);
            log::info!(
                "pixel {:>3}: w={w:>3} r={r:>3} g={g:>3} b={b:>3}",
                usize::from(segment.start) + offset
            );
        }
    }
}
