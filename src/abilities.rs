//! Ability cooldowns and triggers.
//!
//! What an ability does is data. This module only decides *when* it may
//! fire (cooldown, warmup, trigger predicate), stamps the use, and turns
//! the effect into commands and events.

use log::debug;
use serde::{Deserialize, Serialize};

use crate::command::Command;
use crate::event::{Aspect, Event, EventKind, Target};
use crate::rules::Rule;
use crate::unit::{Unit, META_FROZEN};
use crate::world::World;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ability {
    /// Minimum ticks between two uses.
    pub cooldown: u64,
    #[serde(default)]
    pub last_used: Option<u64>,
    /// First tick a never-used ability may fire. Set at spawn to stagger
    /// large groups.
    #[serde(default)]
    pub warmup: u64,
    #[serde(default)]
    pub trigger: Trigger,
    #[serde(default)]
    pub target: Selector,
    pub effect: Effect,
}

impl Ability {
    pub fn new(cooldown: u64, effect: Effect) -> Self {
        Self {
            cooldown,
            last_used: None,
            warmup: 0,
            trigger: Trigger::Always,
            target: Selector::Caster,
            effect,
        }
    }

    /// Off cooldown at `tick`.
    #[inline]
    pub fn ready(&self, tick: u64) -> bool {
        match self.last_used {
            Some(last) => tick.saturating_sub(last) >= self.cooldown && tick >= last,
            None => tick >= self.warmup,
        }
    }

    /// Record a use. Timestamps never move backwards.
    #[inline]
    pub fn stamp(&mut self, tick: u64) {
        self.last_used = Some(self.last_used.map_or(tick, |last| last.max(tick)));
    }
}

/// Closed set of fire conditions, evaluated against the caster.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Trigger {
    #[default]
    Always,
    EnemyWithin(f32),
    AllyHurtWithin(f32),
    /// Caster hp under this fraction of max.
    HealthBelow(f32),
    HasTag(String),
    All(Vec<Trigger>),
    Any(Vec<Trigger>),
    Not(Box<Trigger>),
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Selector {
    #[default]
    Caster,
    NearestEnemy {
        #[serde(default)]
        range: Option<f32>,
    },
    /// Lowest hp fraction among hurt allies in range, caster included.
    WeakestAlly { range: f32 },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Effect {
    Strike {
        amount: f32,
    },
    Mend {
        amount: f32,
    },
    Burst {
        radius: f32,
        amount: f32,
        #[serde(default)]
        heal: bool,
        #[serde(default)]
        mass: Option<f32>,
    },
    Shove {
        distance: f32,
    },
    Shoot {
        #[serde(default)]
        speed: Option<f32>,
        #[serde(default)]
        arc: bool,
        #[serde(default)]
        explode_radius: Option<f32>,
    },
    Summon {
        template: String,
    },
}

/// Where a selector points: a unit, or just a spot on the field.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Aim {
    pub unit: Option<usize>,
    pub x: f32,
    pub y: f32,
}

impl Aim {
    fn at(units: &[Unit], idx: usize) -> Self {
        Self {
            unit: Some(idx),
            x: units[idx].pos_x,
            y: units[idx].pos_y,
        }
    }
}

/// Pluggable trigger and targeting evaluation.
pub trait TriggerEvaluator {
    fn holds(&self, trigger: &Trigger, caster: usize, units: &[Unit]) -> bool;
    fn select(&self, selector: &Selector, caster: usize, units: &[Unit]) -> Option<Aim>;
}

/// Interprets [`Trigger`] and [`Selector`] directly.
#[derive(Debug, Default, Clone, Copy)]
pub struct BuiltinTriggers;

impl TriggerEvaluator for BuiltinTriggers {
    fn holds(&self, trigger: &Trigger, caster: usize, units: &[Unit]) -> bool {
        let me = &units[caster];
        match trigger {
            Trigger::Always => true,
            Trigger::EnemyWithin(range) => {
                let range_sq = range * range;
                units
                    .iter()
                    .any(|u| u.can_be_targeted() && me.is_enemy_of(u) && me.distance_sq(u) <= range_sq)
            }
            Trigger::AllyHurtWithin(range) => {
                let range_sq = range * range;
                units.iter().any(|u| {
                    is_ally(me, u) && u.is_hurt() && me.distance_sq(u) <= range_sq
                })
            }
            Trigger::HealthBelow(fraction) => me.max_hp > 0.0 && me.hp < me.max_hp * fraction,
            Trigger::HasTag(tag) => me.has_tag(tag),
            Trigger::All(all) => all.iter().all(|t| self.holds(t, caster, units)),
            Trigger::Any(any) => any.iter().any(|t| self.holds(t, caster, units)),
            Trigger::Not(inner) => !self.holds(inner, caster, units),
        }
    }

    fn select(&self, selector: &Selector, caster: usize, units: &[Unit]) -> Option<Aim> {
        let me = &units[caster];
        let pick = match selector {
            Selector::Caster => Some(caster),
            Selector::NearestEnemy { range } => {
                let range_sq = range.map(|r| r * r).unwrap_or(f32::INFINITY);
                best_by(units, |u| {
                    let d = me.distance_sq(u);
                    (u.can_be_targeted() && me.is_enemy_of(u) && d <= range_sq).then_some(d)
                })
            }
            Selector::WeakestAlly { range } => {
                let range_sq = range * range;
                best_by(units, |u| {
                    (is_ally(me, u) && u.is_hurt() && u.max_hp > 0.0 && me.distance_sq(u) <= range_sq)
                        .then(|| u.hp / u.max_hp)
                })
            }
        };
        pick.map(|idx| Aim::at(units, idx))
    }
}

#[inline]
fn is_ally(me: &Unit, other: &Unit) -> bool {
    other.is_alive() && !other.is_phantom() && other.team == me.team
}

/// Index with the smallest score; ties keep the lower index.
fn best_by(units: &[Unit], score: impl Fn(&Unit) -> Option<f32>) -> Option<usize> {
    let mut best: Option<(f32, usize)> = None;
    for (idx, unit) in units.iter().enumerate() {
        let Some(s) = score(unit) else { continue };
        if best.map_or(true, |(b, _)| s < b) {
            best = Some((s, idx));
        }
    }
    best.map(|(_, idx)| idx)
}

/// Fires every ready ability whose trigger holds.
pub struct AbilityRule {
    evaluator: Box<dyn TriggerEvaluator>,
}

impl Default for AbilityRule {
    fn default() -> Self {
        Self::with_evaluator(BuiltinTriggers)
    }
}

impl AbilityRule {
    pub fn with_evaluator(evaluator: impl TriggerEvaluator + 'static) -> Self {
        Self {
            evaluator: Box::new(evaluator),
        }
    }
}

impl Rule for AbilityRule {
    fn name(&self) -> &'static str {
        "abilities"
    }

    fn apply(&mut self, world: &mut World) {
        let tick = world.tick;
        let mut fired = Vec::new();
        for (idx, unit) in world.units.iter().enumerate() {
            if !unit.is_alive() || unit.is_phantom() || unit.flag(META_FROZEN) {
                continue;
            }
            for (name, ability) in &unit.abilities {
                if !ability.ready(tick) || !self.evaluator.holds(&ability.trigger, idx, &world.units) {
                    continue;
                }
                let Some(aim) = self.evaluator.select(&ability.target, idx, &world.units) else {
                    continue;
                };
                fired.push((idx, name.clone(), aim, ability.effect.clone()));
            }
        }

        for (idx, name, aim, effect) in fired {
            if let Some(ability) = world.units[idx].abilities.get_mut(&name) {
                ability.stamp(tick);
            }
            debug!("[Ability] Tick {}: {} uses {}", tick, world.units[idx].id, name);
            emit(world, idx, aim, effect);
        }
    }
}

fn emit(world: &mut World, caster: usize, aim: Aim, effect: Effect) {
    let me = &world.units[caster];
    let source = Some(me.id.clone());
    let target_id = aim.unit.map(|idx| world.units[idx].id.clone());
    match effect {
        Effect::Strike { amount } => {
            if let Some(target) = target_id {
                world.queue_event(Event::damage(source, target, Some(amount)));
            }
        }
        Effect::Mend { amount } => {
            if let Some(target) = target_id {
                world.queue_event(Event::heal(source, target, Some(amount)));
            }
        }
        Effect::Burst { radius, amount, heal, mass } => {
            let team = Some(me.team);
            world.queue_event(Event {
                kind: EventKind::Aoe {
                    radius,
                    amount,
                    aspect: if heal { Aspect::Heal } else { Aspect::Damage },
                    mass,
                    team,
                },
                source,
                target: Some(Target::Point { x: aim.x, y: aim.y }),
                tick: None,
            });
        }
        Effect::Shove { distance } => {
            if let Some(target) = target_id {
                let (dx, dy) = (aim.x - me.pos_x, aim.y - me.pos_y);
                world.queue_command(Command::Toss {
                    unit_id: target,
                    dx,
                    dy,
                    distance: Some(distance),
                    source,
                });
            }
        }
        Effect::Shoot { speed, arc, explode_radius } => {
            world.queue_command(Command::Fire {
                unit_id: me.id.clone(),
                x: aim.x,
                y: aim.y,
                speed,
                arc,
                explode_radius,
            });
        }
        Effect::Summon { template } => {
            let team = Some(me.team);
            world.queue_command(Command::Deploy {
                template,
                x: aim.x,
                y: aim.y,
                team,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SimConfig;
    use crate::unit::Team;

    fn caster_with(ability: Ability) -> Unit {
        let mut unit = Unit::new("caster", Team::Friendly, 0.0, 0.0);
        unit.abilities.insert("zap".into(), ability);
        unit
    }

    #[test]
    fn cooldown_gates_refire() {
        let mut ability = Ability::new(5, Effect::Mend { amount: 1.0 });
        assert!(ability.ready(0));
        ability.stamp(0);
        assert!(!ability.ready(4));
        assert!(ability.ready(5));
        ability.stamp(5);
        ability.stamp(3);
        assert_eq!(ability.last_used, Some(5));
    }

    #[test]
    fn warmup_delays_first_use() {
        let mut ability = Ability::new(5, Effect::Mend { amount: 1.0 });
        ability.warmup = 3;
        assert!(!ability.ready(2));
        assert!(ability.ready(3));
    }

    #[test]
    fn rule_fires_and_stamps() {
        let mut world = World::new(SimConfig::default(), 1);
        let mut ability = Ability::new(3, Effect::Strike { amount: 2.0 });
        ability.trigger = Trigger::EnemyWithin(4.0);
        ability.target = Selector::NearestEnemy { range: None };
        world.insert_unit(caster_with(ability));
        world.insert_unit(Unit::new("foe", Team::Hostile, 3.0, 0.0));

        let mut rule = AbilityRule::default();
        rule.apply(&mut world);
        assert_eq!(world.events.len(), 1);
        assert_eq!(world.units()[0].abilities["zap"].last_used, Some(0));

        world.tick = 1;
        rule.apply(&mut world);
        assert_eq!(world.events.len(), 1);
    }

    #[test]
    fn trigger_combinators() {
        let mut hurt = Unit::new("caster", Team::Friendly, 0.0, 0.0);
        hurt.hp = 2.0;
        hurt.tags.insert("construct".into());
        let units = vec![hurt, Unit::new("foe", Team::Hostile, 10.0, 0.0)];
        let eval = BuiltinTriggers;

        assert!(eval.holds(&Trigger::HealthBelow(0.5), 0, &units));
        assert!(!eval.holds(&Trigger::EnemyWithin(5.0), 0, &units));
        assert!(eval.holds(
            &Trigger::All(vec![
                Trigger::HasTag("construct".into()),
                Trigger::Not(Box::new(Trigger::EnemyWithin(5.0))),
            ]),
            0,
            &units
        ));
        assert!(eval.holds(
            &Trigger::Any(vec![Trigger::EnemyWithin(1.0), Trigger::AllyHurtWithin(0.5)]),
            0,
            &units
        ));
    }

    #[test]
    fn weakest_ally_selector() {
        let mut a = Unit::new("a", Team::Friendly, 0.0, 0.0);
        a.hp = 8.0;
        let mut b = Unit::new("b", Team::Friendly, 2.0, 0.0);
        b.hp = 3.0;
        let mut c = Unit::new("c", Team::Hostile, 1.0, 0.0);
        c.hp = 1.0;
        let units = vec![a, b, c];
        let aim = BuiltinTriggers
            .select(&Selector::WeakestAlly { range: 5.0 }, 0, &units)
            .unwrap();
        assert_eq!(aim.unit, Some(1));
    }

    #[test]
    fn ability_json_shape() {
        let ability: Ability = serde_json::from_str(
            r#"{"cooldown": 10, "trigger": {"enemy_within": 3.0},
                "target": {"nearest_enemy": {}}, "effect": {"type": "strike", "amount": 4}}"#,
        )
        .unwrap();
        assert_eq!(ability.trigger, Trigger::EnemyWithin(3.0));
        assert_eq!(ability.target, Selector::NearestEnemy { range: None });
        assert_eq!(ability.effect, Effect::Strike { amount: 4.0 });
    }

    struct Never;

    impl TriggerEvaluator for Never {
        fn holds(&self, _: &Trigger, _: usize, _: &[Unit]) -> bool {
            false
        }

        fn select(&self, _: &Selector, caster: usize, units: &[Unit]) -> Option<Aim> {
            Some(Aim::at(units, caster))
        }
    }

    #[test]
    fn custom_evaluator_is_consulted() {
        let mut world = World::new(SimConfig::default(), 1);
        world.insert_unit(caster_with(Ability::new(0, Effect::Mend { amount: 1.0 })));
        AbilityRule::with_evaluator(Never).apply(&mut world);
        assert!(world.events.is_empty());
        assert_eq!(world.units()[0].abilities["zap"].last_used, None);
    }
}
