use std::collections::BTreeMap;

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

use crate::catalog::{Catalog, TemplateSource};
use crate::command::{Command, CommandQueue, StampedCommand};
use crate::config::SimConfig;
use crate::event::{Event, EventQueue};
use crate::projectile::Projectile;
use crate::unit::Unit;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Weather {
    pub kind: String,
    pub remaining_ticks: u64,
    pub intensity: f32,
}

/// Everything one tick reads and writes.
///
/// Owned by the [`Simulator`](crate::simulator::Simulator) and lent to each
/// rule in turn. Rules read units freely; anything that needs filtering goes
/// through the command and event queues.
pub struct World {
    pub(crate) units: Vec<Unit>,
    pub(crate) projectiles: Vec<Projectile>,
    pub(crate) commands: CommandQueue,
    pub(crate) events: EventQueue,
    pub(crate) tick: u64,
    pub(crate) rng: ChaCha8Rng,
    pub(crate) config: SimConfig,
    /// Resolves `deploy` template names.
    pub(crate) templates: Box<dyn TemplateSource>,
    pub(crate) weather: Option<Weather>,
    /// attacker id -> defender id, rebuilt every tick by the melee rule.
    pub(crate) engagements: BTreeMap<String, String>,
    /// Units moved by knockback or tosses this tick, by id. Drained by the
    /// simulator at the end of the tick.
    pub(crate) displaced: Vec<String>,
    spawn_counter: u64,
}

impl World {
    pub fn new(config: SimConfig, seed: u64) -> Self {
        Self {
            units: Vec::new(),
            projectiles: Vec::new(),
            commands: CommandQueue::default(),
            events: EventQueue::default(),
            tick: 0,
            rng: ChaCha8Rng::seed_from_u64(seed),
            config,
            templates: Box::new(Catalog::default()),
            weather: None,
            engagements: BTreeMap::new(),
            displaced: Vec::new(),
            spawn_counter: 0,
        }
    }

    #[inline]
    pub fn tick(&self) -> u64 {
        self.tick
    }

    #[inline]
    pub fn config(&self) -> &SimConfig {
        &self.config
    }

    #[inline]
    pub fn units(&self) -> &[Unit] {
        &self.units
    }

    #[inline]
    pub fn projectiles(&self) -> &[Projectile] {
        &self.projectiles
    }

    pub fn weather(&self) -> Option<&Weather> {
        self.weather.as_ref()
    }

    pub fn engagements(&self) -> &BTreeMap<String, String> {
        &self.engagements
    }

    /// Commands waiting for the next command pass.
    pub fn queued_commands(&self) -> usize {
        self.commands.len()
    }

    /// Commands handled by the most recent command pass.
    pub fn processed_commands(&self) -> &[StampedCommand] {
        self.commands.processed()
    }

    pub fn queued_events(&self) -> usize {
        self.events.len()
    }

    pub fn index_of(&self, id: &str) -> Option<usize> {
        self.units.iter().position(|u| u.id == id)
    }

    pub fn find(&self, id: &str) -> Option<&Unit> {
        self.units.iter().find(|u| u.id == id)
    }

    pub fn queue_command(&mut self, command: Command) {
        self.commands.push(command);
    }

    pub fn queue_event(&mut self, event: Event) {
        self.events.push(event);
    }

    /// Random unit vector, for pushes between coincident units.
    pub fn random_direction(&mut self) -> (f32, f32) {
        let angle = self.rng.random::<f32>() * std::f32::consts::TAU;
        (angle.cos(), angle.sin())
    }

    /// Unique id for a spawned unit, derived from a base name.
    pub fn next_unit_id(&mut self, base: &str) -> String {
        loop {
            self.spawn_counter += 1;
            let id = format!("{}_{}", base, self.spawn_counter);
            if self.index_of(&id).is_none() {
                return id;
            }
        }
    }

    /// Add a unit, normalizing hp and staggering fresh abilities when
    /// configured. A duplicate id is replaced with a fresh one.
    pub(crate) fn insert_unit(&mut self, mut unit: Unit) -> String {
        if unit.id.is_empty() || self.index_of(&unit.id).is_some() {
            let base = if unit.id.is_empty() { unit.sprite.clone() } else { unit.id.clone() };
            let base = if base.is_empty() { "unit".to_string() } else { base };
            let fresh = self.next_unit_id(&base);
            log::warn!("[World] Unit id '{}' already taken, using '{}'", unit.id, fresh);
            unit.id = fresh;
        }
        unit.normalize();
        if self.config.stagger_abilities {
            let tick = self.tick;
            for ability in unit.abilities.values_mut() {
                if ability.cooldown > 0 && ability.last_used.is_none() {
                    ability.warmup = tick + self.rng.random_range(0..ability.cooldown);
                }
            }
        }
        let id = unit.id.clone();
        self.units.push(unit);
        id
    }

    /// Occupied cells of live units. The first unit found in a cell wins.
    pub fn occupancy(&self) -> BTreeMap<(i32, i32), usize> {
        let mut occupied = BTreeMap::new();
        for (idx, unit) in self.units.iter().enumerate() {
            if unit.is_alive() {
                occupied.entry(unit.cell()).or_insert(idx);
            }
        }
        occupied
    }

    pub(crate) fn clear(&mut self, seed: u64) {
        self.units.clear();
        self.projectiles.clear();
        self.commands.clear();
        self.events.clear();
        self.tick = 0;
        self.rng = ChaCha8Rng::seed_from_u64(seed);
        self.weather = None;
        self.engagements.clear();
        self.displaced.clear();
        self.spawn_counter = 0;
    }

    /// End-of-tick bookkeeping for the environment.
    pub(crate) fn advance_weather(&mut self) {
        if let Some(weather) = &mut self.weather {
            weather.remaining_ticks = weather.remaining_ticks.saturating_sub(1);
            if weather.remaining_ticks == 0 {
                log::debug!("[World] Weather '{}' cleared", weather.kind);
                self.weather = None;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::unit::Team;

    #[test]
    fn duplicate_ids_get_renamed() {
        let mut world = World::new(SimConfig::default(), 1);
        world.insert_unit(Unit::new("a", Team::Friendly, 0.0, 0.0));
        let second = world.insert_unit(Unit::new("a", Team::Friendly, 1.0, 0.0));
        assert_ne!(second, "a");
        assert_eq!(world.units().len(), 2);
    }

    #[test]
    fn same_seed_same_stream() {
        let mut a = World::new(SimConfig::default(), 7);
        let mut b = World::new(SimConfig::default(), 7);
        for _ in 0..10 {
            assert_eq!(a.random_direction(), b.random_direction());
        }
    }

    #[test]
    fn weather_expires() {
        let mut world = World::new(SimConfig::default(), 1);
        world.weather = Some(Weather {
            kind: "rain".into(),
            remaining_ticks: 2,
            intensity: 0.8,
        });
        world.advance_weather();
        assert!(world.weather().is_some());
        world.advance_weather();
        assert!(world.weather().is_none());
    }
}
