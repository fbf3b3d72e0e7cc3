use std::collections::VecDeque;

use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::command::Command;
use crate::knockback;
use crate::rules::Rule;
use crate::unit::{Team, Unit};
use crate::world::World;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Aspect {
    Damage,
    Heal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Target {
    Unit(String),
    Point { x: f32, y: f32 },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EventKind {
    Damage {
        #[serde(default)]
        amount: Option<f32>,
    },
    Heal {
        #[serde(default)]
        amount: Option<f32>,
    },
    /// Area effect around the target point. `team` is the reference team
    /// for filtering; when absent it is taken from the source unit, and with
    /// neither every team is affected.
    Aoe {
        radius: f32,
        amount: f32,
        aspect: Aspect,
        #[serde(default)]
        mass: Option<f32>,
        #[serde(default)]
        team: Option<Team>,
    },
    Knockback { dx: f32, dy: f32, distance: f32 },
    Spawn { unit: Box<Unit> },
}

/// A queued effect. Processed events are stamped with the tick they ran in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    #[serde(flatten)]
    pub kind: EventKind,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub target: Option<Target>,
    #[serde(default)]
    pub tick: Option<u64>,
}

impl Event {
    pub fn damage(source: Option<String>, target: String, amount: Option<f32>) -> Self {
        Self {
            kind: EventKind::Damage { amount },
            source,
            target: Some(Target::Unit(target)),
            tick: None,
        }
    }

    pub fn heal(source: Option<String>, target: String, amount: Option<f32>) -> Self {
        Self {
            kind: EventKind::Heal { amount },
            source,
            target: Some(Target::Unit(target)),
            tick: None,
        }
    }

    pub fn spawn(unit: Unit, x: f32, y: f32) -> Self {
        Self {
            kind: EventKind::Spawn { unit: Box::new(unit) },
            source: None,
            target: Some(Target::Point { x, y }),
            tick: None,
        }
    }

    pub fn target_unit(&self) -> Option<&str> {
        match &self.target {
            Some(Target::Unit(id)) => Some(id),
            _ => None,
        }
    }
}

/// Live event FIFO plus a trailing window of processed events.
#[derive(Debug, Default)]
pub struct EventQueue {
    pending: VecDeque<Event>,
    history: VecDeque<Event>,
}

impl EventQueue {
    pub fn push(&mut self, event: Event) {
        self.pending.push_back(event);
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Processed events, oldest first.
    pub fn history(&self) -> impl Iterator<Item = &Event> {
        self.history.iter()
    }

    /// Processed events stamped with `tick`.
    pub fn processed_at(&self, tick: u64) -> impl Iterator<Item = &Event> {
        self.history.iter().filter(move |e| e.tick == Some(tick))
    }

    pub fn clear(&mut self) {
        self.pending.clear();
        self.history.clear();
    }

    fn pop(&mut self) -> Option<Event> {
        self.pending.pop_front()
    }

    fn record(&mut self, event: Event) {
        self.history.push_back(event);
    }

    /// Drop history older than `window` ticks before `now`.
    pub(crate) fn prune(&mut self, now: u64, window: u64) {
        let oldest = now.saturating_sub(window);
        while self
            .history
            .front()
            .is_some_and(|e| e.tick.unwrap_or(0) < oldest)
        {
            self.history.pop_front();
        }
    }
}

/// Applies queued events in FIFO order.
///
/// Events produced while handling (AoE fan-out) are appended to the same
/// queue and applied in this pass, up to `max_events_per_tick`.
pub struct EventHandler;

impl Rule for EventHandler {
    fn name(&self) -> &'static str {
        "events"
    }

    fn apply(&mut self, world: &mut World) {
        let cap = world.config.max_events_per_tick;
        let mut handled = 0;
        while let Some(mut event) = world.events.pop() {
            if handled == cap {
                warn!(
                    "[Event] Tick {}: event cap {} reached, dropping {} pending",
                    world.tick,
                    cap,
                    world.events.len() + 1
                );
                world.events.pending.clear();
                break;
            }
            handled += 1;
            handle(world, &event);
            event.tick = Some(world.tick);
            world.events.record(event);
        }
        if handled > 0 {
            debug!("[Event] Tick {}: applied {} events", world.tick, handled);
        }
        let window = world.config.event_history_ticks;
        world.events.prune(world.tick, window);
    }
}

fn handle(world: &mut World, event: &Event) {
    match &event.kind {
        EventKind::Damage { amount } => {
            let Some(idx) = target_index(world, event) else { return };
            let amount = amount.unwrap_or(world.config.default_damage);
            let unit = &mut world.units[idx];
            if !unit.is_alive() {
                return;
            }
            unit.take_damage(amount);
            if !unit.is_alive() {
                debug!("[Event] Unit {} killed by {:?}", unit.id, event.source);
            }
        }
        EventKind::Heal { amount } => {
            let Some(idx) = target_index(world, event) else { return };
            let amount = amount.unwrap_or(world.config.default_heal);
            world.units[idx].heal(amount);
        }
        EventKind::Aoe { radius, amount, aspect, mass, team } => {
            aoe(world, event, *radius, *amount, *aspect, *mass, *team);
        }
        EventKind::Knockback { dx, dy, distance } => {
            let Some(idx) = target_index(world, event) else { return };
            let len = (dx * dx + dy * dy).sqrt();
            let dir = if len > f32::EPSILON {
                (dx / len, dy / len)
            } else {
                world.random_direction()
            };
            let pusher = event.source.as_deref().and_then(|id| world.index_of(id));
            knockback::displace(world, idx, dir, *distance, pusher);
        }
        EventKind::Spawn { unit } => {
            let mut unit = (**unit).clone();
            if let Some(Target::Point { x, y }) = event.target {
                unit.pos_x = x;
                unit.pos_y = y;
            }
            let id = world.insert_unit(unit);
            debug!("[Event] Spawned {}", id);
        }
    }
}

fn target_index(world: &World, event: &Event) -> Option<usize> {
    let Some(id) = event.target_unit() else {
        warn!("[Event] {:?} without a unit target dropped", event.kind);
        return None;
    };
    let idx = world.index_of(id);
    if idx.is_none() {
        warn!("[Event] Target {} not found", id);
    }
    idx
}

fn aoe(
    world: &mut World,
    event: &Event,
    radius: f32,
    amount: f32,
    aspect: Aspect,
    mass: Option<f32>,
    team: Option<Team>,
) {
    let center = match &event.target {
        Some(Target::Point { x, y }) => (*x, *y),
        Some(Target::Unit(id)) => match world.find(id) {
            Some(u) => (u.pos_x, u.pos_y),
            None => {
                warn!("[Event] AoE centered on missing unit {}", id);
                return;
            }
        },
        None => {
            warn!("[Event] AoE without a target dropped");
            return;
        }
    };
    let (cx, cy) = (center.0.round(), center.1.round());
    let team = team.or_else(|| event.source.as_deref().and_then(|id| world.find(id)).map(|u| u.team));
    let radius_sq = radius * radius;

    let mut follow_ups = Vec::new();
    let mut tosses = Vec::new();
    for unit in &world.units {
        if !unit.is_alive() || unit.is_phantom() || unit.distance_sq_to(cx, cy) > radius_sq {
            continue;
        }
        match aspect {
            Aspect::Heal => {
                if team.is_some_and(|t| t != unit.team) || !unit.is_hurt() {
                    continue;
                }
                follow_ups.push(Event::heal(event.source.clone(), unit.id.clone(), Some(amount)));
            }
            Aspect::Damage => {
                if team.is_some_and(|t| t == unit.team) {
                    continue;
                }
                follow_ups.push(Event::damage(event.source.clone(), unit.id.clone(), Some(amount)));
                let heavy = mass.is_some_and(|m| m >= unit.mass * world.config.toss_mass_ratio);
                if heavy && !unit.is_huge() {
                    tosses.push((unit.id.clone(), unit.pos_x - cx, unit.pos_y - cy));
                }
            }
        }
    }

    debug!(
        "[Event] AoE {:?} at ({}, {}) r={} touched {} units",
        aspect,
        cx,
        cy,
        radius,
        follow_ups.len()
    );
    for follow_up in follow_ups {
        world.queue_event(follow_up);
    }
    for (unit_id, dx, dy) in tosses {
        let (dx, dy) = if dx == 0.0 && dy == 0.0 { world.random_direction() } else { (dx, dy) };
        world.queue_command(Command::Toss {
            unit_id,
            dx,
            dy,
            distance: None,
            source: event.source.clone(),
        });
    }
}
