/// `usermod.rs` - the firmware-facing side of the Lua bridge
///
/// The firmware calls `setup` once, `loop_tick` every tick and `connected`
/// when the network comes up. Each call is forwarded to the script engine as
/// the matching hook. JSON state hooks are accepted and ignored.
use serde_json::{json, Map, Value};
use thiserror::Error;

use crate::{
    config::{ConfigError, LuaFxConfig},
    led::SharedStrip,
    scripting::{EngineError, Hook, LoadError, ScriptEngine},
};

/// Firmware id for usermods without a reserved slot.
pub const USERMOD_ID_UNSPECIFIED: u16 = 1;

/// Entry points the firmware main loop invokes on every usermod.
pub trait Usermod {
    fn setup(&mut self) -> Result<(), EngineError>;
    fn loop_tick(&mut self);
    fn connected(&mut self);
    fn add_to_json_state(&self, _root: &mut Map<String, Value>) {}
    fn add_to_json_info(&self, _root: &mut Map<String, Value>) {}
    fn read_from_json_state(&mut self, _root: &Map<String, Value>) {}
    fn id(&self) -> u16 {
        USERMOD_ID_UNSPECIFIED
    }
}

/// A configured script that did not become a plugin.
#[derive(Debug, Error)]
pub enum ScriptLoadError {
    #[error(transparent)]
    Source(#[from] ConfigError),
    #[error(transparent)]
    Load(#[from] LoadError),
}

pub struct LuaFxUsermod {
    config: LuaFxConfig,
    strip: SharedStrip,
    engine: Option<ScriptEngine>,
    load_errors: Vec<ScriptLoadError>,
}

impl LuaFxUsermod {
    pub fn new(config: LuaFxConfig, strip: SharedStrip) -> Self {
        Self {
            config,
            strip,
            engine: None,
            load_errors: Vec::new(),
        }
    }

    /// `None` until `setup` ran with the usermod enabled.
    pub fn engine(&self) -> Option<&ScriptEngine> {
        self.engine.as_ref()
    }

    /// Scripts rejected during `setup`, in config order.
    pub fn load_errors(&self) -> &[ScriptLoadError] {
        &self.load_errors
    }

    fn fire(&mut self, hook: Hook) {
        match self.engine.as_mut() {
            Some(engine) => {
                engine.dispatch(hook);
            }
            None => log::debug!("lua fx: '{hook}' before setup, ignored"),
        }
    }
}

impl Usermod for LuaFxUsermod {
    fn setup(&mut self) -> Result<(), EngineError> {
        if !self.config.enabled {
            log::info!("lua fx disabled");
            return Ok(());
        }
        if self.engine.is_some() {
            log::warn!("lua fx setup called twice, ignoring");
            return Ok(());
        }

        let mut engine = ScriptEngine::initialize(SharedStrip::clone(&self.strip), self.config.engine.clone())?;

        for source in self.config.sources() {
            let loaded = source
                .map_err(ScriptLoadError::from)
                .and_then(|s| engine.load(&s.name, &s.source).map_err(ScriptLoadError::from));
            if let Err(e) = loaded {
                log::warn!("lua fx: script skipped: {e}");
                self.load_errors.push(e);
            }
        }
        log::info!(
            "lua fx: {} plugin(s) loaded, {} rejected",
            engine.plugin_count(),
            self.load_errors.len()
        );

        engine.dispatch(Hook::Setup);
        self.engine = Some(engine);
        Ok(())
    }

    fn loop_tick(&mut self) {
        self.fire(Hook::Loop);
        if let Some(engine) = &self.engine {
            engine.step_gc();
        }
    }

    fn connected(&mut self) {
        self.fire(Hook::Connected);
    }

    fn add_to_json_info(&self, root: &mut Map<String, Value>) {
        let Some(engine) = &self.engine else {
            return;
        };
        let user = root
            .entry("u")
            .or_insert_with(|| Value::Object(Map::new()));
        if let Value::Object(user) = user {
            user.insert("LuaFX".into(), json!([engine.plugin_count(), " plugins"]));
            user.insert("LuaFX errors".into(), json!([engine.failures().total(), ""]));
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;
    use crate::config::ScriptSource;
    use crate::led::{shared, MemoryStrip};

    fn usermod(config: LuaFxConfig) -> (LuaFxUsermod, Arc<Mutex<MemoryStrip>>) {
        let strip = shared(MemoryStrip::new(30));
        (LuaFxUsermod::new(config, strip.clone()), strip)
    }

    #[test]
    fn default_config_runs_example_module() {
        let (mut um, strip) = usermod(LuaFxConfig::default());
        um.setup().unwrap();
        um.connected();
        for _ in 0..5 {
            um.loop_tick();
        }
        assert_eq!(um.engine().unwrap().plugin_count(), 1);
        assert_eq!(strip.lock().unwrap().pixel(0, 1), Some((255 << 24) | 5));
        assert!(um.load_errors().is_empty());
    }

    #[test]
    fn rejected_scripts_are_reported_and_others_still_load() {
        let config = LuaFxConfig {
            scripts: vec![
                ScriptSource::new("syntax", "return {"),
                ScriptSource::new("a", "order = 'a' return { setup = function() order = order .. 'A' end }"),
                ScriptSource::new("number", "return 3"),
                ScriptSource::new("b", "return { setup = function() order = order .. 'B' end }"),
            ],
            ..Default::default()
        };
        let (mut um, _) = usermod(config);
        um.setup().unwrap();

        let engine = um.engine().unwrap();
        assert_eq!(engine.plugin_count(), 2);
        assert_eq!(engine.global::<String>("order"), "aAB");
        let errors = um.load_errors();
        assert_eq!(errors.len(), 2);
        assert!(matches!(errors[0], ScriptLoadError::Load(LoadError::Eval { .. })));
        assert!(matches!(errors[1], ScriptLoadError::Load(LoadError::Shape { .. })));
    }

    #[test]
    fn disabled_usermod_never_creates_a_vm() {
        let (mut um, strip) = usermod(LuaFxConfig {
            enabled: false,
            ..Default::default()
        });
        um.setup().unwrap();
        um.loop_tick();
        assert!(um.engine().is_none());
        assert_eq!(strip.lock().unwrap().pixel(0, 0), Some(0));
    }

    #[test]
    fn hooks_before_setup_are_ignored() {
        let (mut um, strip) = usermod(LuaFxConfig::default());
        um.loop_tick();
        um.connected();
        assert_eq!(strip.lock().unwrap().pixel(0, 0), Some(0));
    }

    #[test]
    fn second_setup_keeps_existing_engine() {
        let (mut um, _) = usermod(LuaFxConfig::default());
        um.setup().unwrap();
        let id = um.engine().unwrap().id();
        um.setup().unwrap();
        assert_eq!(um.engine().unwrap().id(), id);
        assert_eq!(um.engine().unwrap().plugin_count(), 1);
    }

    #[test]
    fn info_reports_plugins_and_state_hooks_are_noops() {
        let (mut um, _) = usermod(LuaFxConfig::default());
        um.setup().unwrap();

        let mut info = Map::new();
        um.add_to_json_info(&mut info);
        assert_eq!(info["u"]["LuaFX"], json!([1, " plugins"]));
        assert_eq!(info["u"]["LuaFX errors"], json!([0, ""]));

        let mut state = Map::new();
        um.add_to_json_state(&mut state);
        um.read_from_json_state(&state);
        assert!(state.is_empty());
        assert_eq!(um.id(), USERMOD_ID_UNSPECIFIED);
    }
}
