use log::{debug, trace};
use serde::{Deserialize, Serialize};

use crate::config::SimConfig;
use crate::event::{Aspect, Event, EventKind, Target};
use crate::rules::Rule;
use crate::unit::{Team, Unit};
use crate::world::World;

/// A shot in flight.
///
/// Flat shots travel at a fixed speed and hit the first enemy they touch.
/// Lofted shots follow a ballistic arc over everything in between and only
/// resolve where they land.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Projectile {
    #[serde(rename = "posX")]
    pub pos_x: f32,
    #[serde(rename = "posY")]
    pub pos_y: f32,
    #[serde(rename = "velX")]
    pub vel_x: f32,
    #[serde(rename = "velY")]
    pub vel_y: f32,
    pub z: f32,
    pub vz: f32,
    pub arc: bool,
    pub radius: f32,
    pub damage: f32,
    pub team: Team,
    pub source: String,
    pub lifetime: u64,
    pub age: u64,
    #[serde(rename = "explodeRadius", default)]
    pub explode_radius: Option<f32>,
}

/// What a projectile ran into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Impact {
    Unit(usize),
    Ground,
}

impl Projectile {
    /// Flat shot from `shooter` toward `(x, y)`. `None` if the point is the
    /// shooter's own position, or the speed is not positive or too slow to
    /// arrive within [`MAX_FLIGHT_TICKS`].
    pub fn aimed(shooter: &Unit, x: f32, y: f32, speed: f32) -> Option<Self> {
        let (dx, dy, dist, flight) = aim(shooter, x, y, speed)?;
        // Flat shots keep flying past the aim point.
        Some(Self::launch(shooter, dx / dist * speed, dy / dist * speed, 0.0, false, flight * 2 + 2))
    }

    /// Arced shot that lands exactly on `(x, y)` after a whole number of
    /// ticks, travelling no faster than `speed`.
    pub fn lobbed(shooter: &Unit, x: f32, y: f32, speed: f32, gravity: f32) -> Option<Self> {
        let (dx, dy, _, n) = aim(shooter, x, y, speed)?;
        // z returns to 0 after exactly n ticks.
        let vz = gravity * (n as f32 - 1.0) / 2.0;
        Some(Self::launch(shooter, dx / n as f32, dy / n as f32, vz, true, n + 1))
    }

    fn launch(shooter: &Unit, vel_x: f32, vel_y: f32, vz: f32, arc: bool, lifetime: u64) -> Self {
        Self {
            pos_x: shooter.pos_x,
            pos_y: shooter.pos_y,
            vel_x,
            vel_y,
            z: 0.0,
            vz,
            arc,
            radius: shooter.meta_f32("projectileRadius").unwrap_or(0.0),
            damage: shooter.damage,
            team: shooter.team,
            source: shooter.id.clone(),
            lifetime,
            age: 0,
            explode_radius: None,
        }
    }

    fn advance(&mut self, gravity: f32) {
        self.pos_x += self.vel_x;
        self.pos_y += self.vel_y;
        if self.arc {
            self.z += self.vz;
            self.vz -= gravity;
        }
        self.age += 1;
    }

    fn in_bounds(&self, config: &SimConfig) -> bool {
        config.in_bounds(self.pos_x.round() as i32, self.pos_y.round() as i32)
    }

    fn touching(&self, units: &[Unit]) -> Option<usize> {
        let reach = self.radius + 0.5;
        let reach_sq = reach * reach;
        units.iter().position(|u| {
            u.is_alive()
                && !u.is_phantom()
                && u.team != self.team
                && u.distance_sq_to(self.pos_x, self.pos_y) <= reach_sq
        })
    }

    /// Resolve against the field after this tick's advance.
    pub fn impact(&self, units: &[Unit]) -> Option<Impact> {
        if self.arc {
            if self.z > 1e-4 {
                return None;
            }
            return Some(self.touching(units).map_or(Impact::Ground, Impact::Unit));
        }
        self.touching(units).map(Impact::Unit)
    }

    fn into_event(self, impact: Impact, units: &[Unit]) -> Option<Event> {
        let source = Some(self.source);
        if let Some(radius) = self.explode_radius {
            return Some(Event {
                kind: EventKind::Aoe {
                    radius,
                    amount: self.damage,
                    aspect: Aspect::Damage,
                    mass: None,
                    team: Some(self.team),
                },
                source,
                target: Some(Target::Point { x: self.pos_x, y: self.pos_y }),
                tick: None,
            });
        }
        match impact {
            Impact::Unit(idx) => Some(Event::damage(source, units[idx].id.clone(), Some(self.damage))),
            Impact::Ground => None,
        }
    }
}

/// Longest flight a shot is planned for. Anything slower is refused.
pub const MAX_FLIGHT_TICKS: u64 = 4096;

/// Direction, distance and whole flight ticks from `shooter` to `(x, y)`.
fn aim(shooter: &Unit, x: f32, y: f32, speed: f32) -> Option<(f32, f32, f32, u64)> {
    let (dx, dy) = (x - shooter.pos_x, y - shooter.pos_y);
    let dist = (dx * dx + dy * dy).sqrt();
    if !(dist >= f32::EPSILON && speed > 0.0) {
        return None;
    }
    // Also rejects NaN and infinite flight times.
    let ticks = (dist / speed).ceil();
    if !(ticks <= MAX_FLIGHT_TICKS as f32) {
        debug!("[Projectile] Shot from {} at speed {} would never land", shooter.id, speed);
        return None;
    }
    Some((dx, dy, dist, (ticks as u64).max(1)))
}

/// Moves projectiles and turns impacts into damage events.
pub struct ProjectileRule;

impl Rule for ProjectileRule {
    fn name(&self) -> &'static str {
        "projectiles"
    }

    fn apply(&mut self, world: &mut World) {
        if world.projectiles.is_empty() {
            return;
        }
        let gravity = world.config.projectile_gravity;
        let mut flying = Vec::with_capacity(world.projectiles.len());
        let mut events = Vec::new();

        for mut projectile in std::mem::take(&mut world.projectiles) {
            projectile.advance(gravity);
            if !projectile.in_bounds(&world.config) {
                trace!("[Projectile] Shot from {} left the field", projectile.source);
                continue;
            }
            match projectile.impact(&world.units) {
                Some(impact) => {
                    debug!(
                        "[Projectile] Shot from {} hit {:?} at ({:.1}, {:.1})",
                        projectile.source, impact, projectile.pos_x, projectile.pos_y
                    );
                    events.extend(projectile.into_event(impact, &world.units));
                }
                None if projectile.age >= projectile.lifetime => {}
                None => flying.push(projectile),
            }
        }

        world.projectiles = flying;
        for event in events {
            world.queue_event(event);
        }
    }
}
