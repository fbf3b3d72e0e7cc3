use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::catalog::{Catalog, TemplateSource};
use crate::command::{parse_command_line, Command};
use crate::config::SimConfig;
use crate::error::{CommandParseError, SimError};
use crate::event::Event;
use crate::projectile::Projectile;
use crate::rules::{default_rulebook, Rule};
use crate::scene::{parse_scene, Legend, SceneMeta};
use crate::snapshot::{compute_delta, frames, DamagedUnit, MovedUnit};
use crate::unit::{Team, Unit};
use crate::world::{Weather, World};

/// Everything a client needs to redraw after one tick.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TickResult {
    pub tick: u64,
    pub moved: Vec<MovedUnit>,
    pub damaged: Vec<DamagedUnit>,
    pub healed: Vec<DamagedUnit>,
    pub destroyed: Vec<String>,
    pub spawned: Vec<String>,
    /// Events applied during this tick, in application order.
    pub events: Vec<Event>,
    #[serde(rename = "knockedBack")]
    pub knocked_back: Vec<String>,
}

/// Main battle simulator
///
/// Owns the world and the rulebook and advances them one tick at a time.
/// Output depends only on the seed, the initial units and the queued
/// commands.
pub struct Simulator {
    world: World,
    rules: Vec<Box<dyn Rule>>,
    timings: BTreeMap<&'static str, Duration>,
}

impl Simulator {
    pub fn new(units: Vec<Unit>, config: SimConfig, seed: u64) -> Self {
        let mut world = World::new(config, seed);
        for unit in units {
            world.insert_unit(unit);
        }
        info!("[Simulator] Created with {} units, seed {}", world.units.len(), seed);
        Self {
            world,
            rules: default_rulebook(),
            timings: BTreeMap::new(),
        }
    }

    /// Build from host JSON: an array of units and an optional partial
    /// config object.
    pub fn from_json(units_json: &str, config_json: Option<&str>, seed: u64) -> Result<Self, SimError> {
        let units: Vec<Unit> = serde_json::from_str(units_json).map_err(SimError::Units)?;
        let config = match config_json {
            Some(json) => SimConfig::from_json(json)?,
            None => SimConfig::default(),
        };
        Ok(Self::new(units, config, seed))
    }

    pub fn with_catalog(mut self, catalog: Catalog) -> Self {
        self.set_catalog(catalog);
        self
    }

    pub fn set_catalog(&mut self, catalog: Catalog) {
        debug!("[Simulator] Catalog loaded with {} templates", catalog.len());
        self.set_template_source(catalog);
    }

    /// Resolve `deploy` templates through a host-provided source instead of
    /// a loaded catalog.
    pub fn set_template_source(&mut self, source: impl TemplateSource + 'static) {
        self.world.templates = Box::new(source);
    }

    /// Replace the rulebook. Rules run in the order given.
    pub fn with_rulebook(mut self, rules: Vec<Box<dyn Rule>>) -> Self {
        self.rules = rules;
        self
    }

    /// Advance one tick.
    ///
    /// Bad commands and dangling references are logged and skipped inside
    /// the tick. `Err` means the engine broke one of its own invariants.
    pub fn step(&mut self) -> Result<TickResult, SimError> {
        let before = frames(&self.world.units);

        for rule in self.rules.iter_mut() {
            #[cfg(not(target_arch = "wasm32"))]
            let started = self
                .world
                .config
                .record_rule_timings
                .then(std::time::Instant::now);

            rule.apply(&mut self.world);

            #[cfg(not(target_arch = "wasm32"))]
            if let Some(started) = started {
                *self.timings.entry(rule.name()).or_default() += started.elapsed();
            }
        }

        let after = frames(&self.world.units);
        let delta = compute_delta(&before, &after)?;
        let tick = self.world.tick;
        let events: Vec<Event> = self.world.events.processed_at(tick).cloned().collect();
        let knocked_back = std::mem::take(&mut self.world.displaced);

        self.world.advance_weather();
        self.world.tick += 1;

        let interval = self.world.config.summary_interval;
        if interval > 0 && self.world.tick % interval == 0 {
            let alive = self.world.units.iter().filter(|u| u.is_alive()).count();
            debug!(
                "[Simulator] Tick {}: alive={}, projectiles={}, queued_commands={}, events={}",
                self.world.tick,
                alive,
                self.world.projectiles.len(),
                self.world.commands.len(),
                events.len()
            );
        }

        Ok(TickResult {
            tick,
            moved: delta.moved,
            damaged: delta.damaged,
            healed: delta.healed,
            destroyed: delta.destroyed,
            spawned: delta.spawned,
            events,
            knocked_back,
        })
    }

    /// Drop all state and restart from tick 0 with a fresh random stream.
    /// Config, catalog and rulebook are kept.
    pub fn reset(&mut self, seed: u64) {
        self.world.clear(seed);
        self.timings.clear();
        info!("[Simulator] Reset with seed {}", seed);
    }

    pub fn queue_command(&mut self, command: Command) {
        self.world.queue_command(command);
    }

    /// Parse and queue a `<verb> <args>` line.
    pub fn queue_command_line(&mut self, line: &str) -> Result<(), CommandParseError> {
        match parse_command_line(line) {
            Ok(command) => {
                self.world.queue_command(command);
                Ok(())
            }
            Err(e) => {
                warn!("[Simulator] Rejected command line '{}': {}", line, e);
                Err(e)
            }
        }
    }

    pub fn queue_event(&mut self, event: Event) {
        self.world.queue_event(event);
    }

    /// Queue a text scene's deploys and setup commands. The field grows to
    /// fit the scene grid if needed.
    pub fn load_scene(&mut self, text: &str, legend: &Legend) -> Result<SceneMeta, SimError> {
        let scene = parse_scene(text, legend)?;
        let config = &mut self.world.config;
        config.field_width = config.field_width.max(scene.width);
        config.field_height = config.field_height.max(scene.height);
        info!(
            "[Simulator] Loaded scene {}x{} with {} commands",
            scene.width,
            scene.height,
            scene.commands.len()
        );
        for command in scene.commands {
            self.world.queue_command(command);
        }
        Ok(scene.meta)
    }

    /// Add unit mid-battle. Returns the id it was stored under.
    pub fn add_unit(&mut self, unit: Unit) -> String {
        self.world.insert_unit(unit)
    }

    pub fn world(&self) -> &World {
        &self.world
    }

    pub fn units(&self) -> &[Unit] {
        self.world.units()
    }

    pub fn projectiles(&self) -> &[Projectile] {
        self.world.projectiles()
    }

    pub fn weather(&self) -> Option<&Weather> {
        self.world.weather()
    }

    pub fn event_history(&self) -> impl Iterator<Item = &Event> {
        self.world.events.history()
    }

    pub fn engagements(&self) -> &BTreeMap<String, String> {
        self.world.engagements()
    }

    /// Cumulative wall time per rule. Empty unless `record_rule_timings`.
    pub fn rule_timings(&self) -> &BTreeMap<&'static str, Duration> {
        &self.timings
    }

    pub fn tick(&self) -> u64 {
        self.world.tick()
    }

    /// Teams that still have a live fighting unit, in team order.
    pub fn active_teams(&self) -> Vec<Team> {
        let teams: BTreeSet<Team> = self
            .world
            .units
            .iter()
            .filter(|u| u.can_fight())
            .map(|u| u.team)
            .collect();
        teams.into_iter().collect()
    }

    pub fn is_battle_ended(&self) -> bool {
        self.active_teams().len() <= 1
    }

    /// Units as JSON. Equal output means equal state.
    pub fn snapshot_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(&self.world.units)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::UnitTemplate;

    fn duel() -> Simulator {
        let mut attacker = Unit::new("a", Team::Friendly, 5.0, 5.0);
        attacker.damage = 3.0;
        let defender = Unit::new("d", Team::Hostile, 6.0, 5.0);
        Simulator::new(vec![attacker, defender], SimConfig::default(), 42)
    }

    #[test]
    fn step_advances_tick_and_reports_damage() {
        let mut sim = duel();
        let result = sim.step().unwrap();
        assert_eq!(result.tick, 0);
        assert_eq!(sim.tick(), 1);
        assert_eq!(sim.engagements().len(), 1);
        assert_eq!(result.damaged, vec![DamagedUnit { id: "d".into(), hp: 7.0 }]);
        assert!(!result.events.is_empty());
    }

    #[test]
    fn reset_clears_everything() {
        let mut sim = duel();
        sim.queue_command_line("lightning 5 5").unwrap();
        sim.step().unwrap();
        sim.reset(1);
        assert_eq!(sim.tick(), 0);
        assert!(sim.units().is_empty());
        assert_eq!(sim.event_history().count(), 0);
        assert!(sim.is_battle_ended());
    }

    #[test]
    fn unknown_verbs_are_rejected() {
        let mut sim = duel();
        assert!(sim.queue_command_line("teleport a 1 1").is_err());
        assert!(sim.world().commands.is_empty());
    }

    #[test]
    fn scene_deploys_from_catalog() {
        let mut catalog = Catalog::default();
        catalog.insert(
            "farmer",
            UnitTemplate {
                team: Team::Friendly,
                ..UnitTemplate::default()
            },
        );
        let mut sim = Simulator::new(Vec::new(), SimConfig::default(), 1).with_catalog(catalog);
        let meta = sim
            .load_scene("f.f\n---\nbg farm\n", &Legend::new().with('f', "farmer"))
            .unwrap();
        assert_eq!(meta.background.as_deref(), Some("farm"));

        let result = sim.step().unwrap();
        assert_eq!(result.spawned.len(), 2);
        assert_eq!(sim.units().len(), 2);
        assert_eq!(sim.active_teams(), vec![Team::Friendly]);
    }

    #[test]
    fn deploys_resolve_through_custom_template_source() {
        // Every name resolves to the same hostile grunt.
        struct Grunts(UnitTemplate);

        impl TemplateSource for Grunts {
            fn lookup(&self, _: &str) -> Option<&UnitTemplate> {
                Some(&self.0)
            }
        }

        let mut sim = Simulator::new(Vec::new(), SimConfig::default(), 1);
        sim.set_template_source(Grunts(UnitTemplate {
            team: Team::Hostile,
            hp: 4.0,
            ..UnitTemplate::default()
        }));
        sim.queue_command_line("deploy anything 2 3").unwrap();
        let result = sim.step().unwrap();

        assert_eq!(result.spawned.len(), 1);
        let unit = &sim.units()[0];
        assert_eq!((unit.team, unit.hp, unit.cell()), (Team::Hostile, 4.0, (2, 3)));
    }

    #[test]
    fn snapshots_match_for_same_seed() {
        let mut a = duel();
        let mut b = duel();
        for _ in 0..5 {
            a.step().unwrap();
            b.step().unwrap();
        }
        assert_eq!(a.snapshot_json().unwrap(), b.snapshot_json().unwrap());
    }

    #[test]
    fn from_json_surfaces_parse_errors() {
        let sim = Simulator::from_json(
            r#"[{"id": "a", "pos_x": 1, "pos_y": 2, "hp": 5, "max_hp": 5}]"#,
            Some(r#"{"field_width": 8}"#),
            3,
        )
        .unwrap();
        assert_eq!(sim.units()[0].cell(), (1, 2));
        assert_eq!(sim.world().config().field_width, 8);

        assert!(matches!(Simulator::from_json("{", None, 3), Err(SimError::Units(_))));
        assert!(matches!(
            Simulator::from_json("[]", Some("[]"), 3),
            Err(SimError::Config(_))
        ));
    }

    #[test]
    fn timings_are_opt_in() {
        let mut sim = duel();
        sim.step().unwrap();
        assert!(sim.rule_timings().is_empty());

        let config = SimConfig {
            record_rule_timings: true,
            ..SimConfig::default()
        };
        let mut timed = Simulator::new(Vec::new(), config, 1);
        timed.step().unwrap();
        assert_eq!(timed.rule_timings().len(), default_rulebook().len());
    }
}
