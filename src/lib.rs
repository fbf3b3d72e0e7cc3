// skirmish-core/src/lib.rs
//
// Deterministic tick core for grid battles. Native hosts drive `Simulator`
// directly; JS hosts go through `WasmSimulator`.

pub mod abilities;
pub mod catalog;
pub mod command;
pub mod config;
pub mod error;
pub mod event;
pub mod knockback;
pub mod melee;
pub mod movement;
pub mod phantom;
pub mod projectile;
pub mod rules;
pub mod scene;
pub mod simulator;
pub mod snapshot;
pub mod spatial_grid;
pub mod targeting;
pub mod unit;
pub mod world;

use std::collections::BTreeMap;

use wasm_bindgen::prelude::*;

pub use catalog::{Catalog, TemplateSource, UnitTemplate};
pub use command::{parse_command_line, Command};
pub use config::SimConfig;
pub use error::{CommandParseError, SceneError, SimError};
pub use event::{Event, EventKind};
pub use rules::{default_rulebook, Rule};
pub use scene::{parse_scene, Legend, Scene, SceneMeta};
pub use simulator::{Simulator, TickResult};
pub use unit::{Team, Unit, UnitState};
pub use world::World;

#[cfg(target_arch = "wasm32")]
mod console {
    use log::{Level, LevelFilter, Log, Metadata, Record};
    use wasm_bindgen::JsValue;

    /// Forwards `log` records to the JS console (browser and Node.js).
    struct ConsoleLogger;

    impl Log for ConsoleLogger {
        fn enabled(&self, _: &Metadata) -> bool {
            true
        }

        fn log(&self, record: &Record) {
            let line = JsValue::from_str(&format!("{}", record.args()));
            match record.level() {
                Level::Error => web_sys::console::error_1(&line),
                Level::Warn => web_sys::console::warn_1(&line),
                Level::Info => web_sys::console::info_1(&line),
                Level::Debug | Level::Trace => web_sys::console::log_1(&line),
            }
        }

        fn flush(&self) {}
    }

    static LOGGER: ConsoleLogger = ConsoleLogger;

    pub fn install() {
        // Already installed by an earlier simulator.
        if log::set_logger(&LOGGER).is_ok() {
            log::set_max_level(LevelFilter::Debug);
        }
    }
}

/// Seed from the platform entropy source, for hosts that do not pick one.
fn entropy_seed() -> u64 {
    let mut buf = [0u8; 8];
    match getrandom::getrandom(&mut buf) {
        Ok(()) => u64::from_le_bytes(buf),
        Err(e) => {
            log::warn!("[WASM] No entropy available ({}), seeding with 0", e);
            0
        }
    }
}

fn js_err(what: &str, e: impl std::fmt::Display) -> JsValue {
    JsValue::from_str(&format!("Failed to {}: {}", what, e))
}

/// WASM-exported simulator
#[wasm_bindgen]
pub struct WasmSimulator {
    simulator: Simulator,
}

#[wasm_bindgen]
impl WasmSimulator {
    /// Create new simulator from JSON units, an optional partial config and
    /// an optional seed.
    #[wasm_bindgen(constructor)]
    pub fn new(units_json: &str, config_json: Option<String>, seed: Option<u32>) -> Result<WasmSimulator, JsValue> {
        #[cfg(target_arch = "wasm32")]
        console::install();

        let seed = seed.map(u64::from).unwrap_or_else(entropy_seed);
        let simulator = Simulator::from_json(units_json, config_json.as_deref(), seed)
            .map_err(|e| js_err("create simulator", e))?;
        Ok(WasmSimulator { simulator })
    }

    /// Simulate one tick - returns JSON
    #[wasm_bindgen]
    pub fn step(&mut self) -> Result<String, JsValue> {
        let result = self.simulator.step().map_err(|e| js_err("step", e))?;
        serde_json::to_string(&result).map_err(|e| js_err("serialize result", e))
    }

    /// Queue a JSON command object
    #[wasm_bindgen]
    pub fn queue_command(&mut self, command_json: &str) -> Result<(), JsValue> {
        let command: Command = serde_json::from_str(command_json).map_err(|e| js_err("parse command", e))?;
        self.simulator.queue_command(command);
        Ok(())
    }

    /// Queue a `<verb> <args>` line
    #[wasm_bindgen]
    pub fn queue_command_line(&mut self, line: &str) -> Result<(), JsValue> {
        self.simulator
            .queue_command_line(line)
            .map_err(|e| js_err("parse command line", e))
    }

    /// Replace the template catalog - takes `{ name: template }` JSON
    #[wasm_bindgen]
    pub fn load_catalog(&mut self, catalog_json: &str) -> Result<(), JsValue> {
        let catalog = Catalog::from_json(catalog_json).map_err(|e| js_err("load catalog", e))?;
        self.simulator.set_catalog(catalog);
        Ok(())
    }

    /// Queue a text scene. The legend is `{ "glyph": "template" }` JSON.
    /// Returns the scene metadata as JSON.
    #[wasm_bindgen]
    pub fn load_scene(&mut self, text: &str, legend_json: &str) -> Result<String, JsValue> {
        let raw: BTreeMap<String, String> =
            serde_json::from_str(legend_json).map_err(|e| js_err("parse legend", e))?;
        let mut legend = Legend::new();
        for (glyph, template) in raw {
            let mut chars = glyph.chars();
            match (chars.next(), chars.next()) {
                (Some(c), None) => legend = legend.with(c, template),
                _ => return Err(js_err("parse legend", format!("'{}' is not a single glyph", glyph))),
            }
        }
        let meta = self
            .simulator
            .load_scene(text, &legend)
            .map_err(|e| js_err("load scene", e))?;
        serde_json::to_string(&meta).map_err(|e| js_err("serialize scene metadata", e))
    }

    /// Add unit mid-battle - takes JSON, returns the stored id
    #[wasm_bindgen]
    pub fn add_unit(&mut self, unit_json: &str) -> Result<String, JsValue> {
        let unit: Unit = serde_json::from_str(unit_json).map_err(|e| js_err("parse unit", e))?;
        Ok(self.simulator.add_unit(unit))
    }

    /// Current units - returns JSON
    #[wasm_bindgen]
    pub fn snapshot(&self) -> Result<String, JsValue> {
        self.simulator
            .snapshot_json()
            .map_err(|e| js_err("serialize units", e))
    }

    /// Projectiles in flight - returns JSON
    #[wasm_bindgen]
    pub fn projectiles(&self) -> Result<String, JsValue> {
        serde_json::to_string(self.simulator.projectiles()).map_err(|e| js_err("serialize projectiles", e))
    }

    #[wasm_bindgen]
    pub fn reset(&mut self, seed: u32) {
        self.simulator.reset(u64::from(seed));
    }

    #[wasm_bindgen]
    pub fn tick(&self) -> f64 {
        self.simulator.tick() as f64
    }

    /// Check if battle ended
    #[wasm_bindgen]
    pub fn is_battle_ended(&self) -> bool {
        self.simulator.is_battle_ended()
    }

    /// Get active teams - returns JSON array
    #[wasm_bindgen]
    pub fn get_active_teams(&self) -> Result<String, JsValue> {
        serde_json::to_string(&self.simulator.active_teams()).map_err(|e| js_err("serialize teams", e))
    }
}
