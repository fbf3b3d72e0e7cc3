use std::collections::BTreeSet;

use log::debug;

use crate::config::SimConfig;
use crate::phantom;
use crate::rules::Rule;
use crate::spatial_grid::{intent, PairQuery};
use crate::unit::{Unit, META_JUMPING};
use crate::world::World;

/// Mass used only for push comparisons.
#[inline]
pub fn effective_mass(unit: &Unit, config: &SimConfig) -> f32 {
    if unit.is_phantom() {
        unit.mass * config.phantom_mass_multiplier
    } else if unit.is_huge() {
        unit.mass * config.huge_mass_multiplier
    } else {
        unit.mass
    }
}

/// Does `pusher` outweigh `target` enough to shove it?
///
/// Phantoms only need to be heavier than a huge target, so a body can
/// shoulder another huge unit aside.
pub fn outweighs(pusher: &Unit, target: &Unit, config: &SimConfig) -> bool {
    let pe = effective_mass(pusher, config);
    let te = effective_mass(target, config);
    if pusher.is_phantom() && target.is_huge() {
        pe > te
    } else {
        pe > te * config.knockback_mass_ratio
    }
}

fn can_push(pusher: &Unit, target: &Unit, config: &SimConfig) -> bool {
    pusher.mass > 0.0
        && !target.is_phantom()
        && !pusher.same_body(target)
        && !target.flag(META_JUMPING)
        && outweighs(pusher, target, config)
}

/// Displace unit `idx` along unit vector `dir` by `distance` cells.
///
/// The step is rounded to whole cells and clamped to the field. A huge
/// target moves with its whole body or not at all. Returns whether the
/// unit moved.
pub fn displace(world: &mut World, idx: usize, dir: (f32, f32), distance: f32, pusher: Option<usize>) -> bool {
    let unit = &world.units[idx];
    if !unit.is_alive() || unit.is_phantom() {
        return false;
    }
    let step = ((dir.0 * distance).round() as i32, (dir.1 * distance).round() as i32);
    if step == (0, 0) {
        return false;
    }
    let (cx, cy) = unit.cell();

    if unit.is_huge() {
        let head = (cx + step.0, cy + step.1);
        if !phantom::body_fits(world, idx, head, pusher) {
            debug!("[Knockback] {} has no room at {:?}, discarded", unit.id, head);
            return false;
        }
        phantom::relocate_body(world, idx, head);
    } else {
        let (x, y) = world.config.clamp((cx + step.0) as f32, (cy + step.1) as f32);
        if (x.round() as i32, y.round() as i32) == (cx, cy) {
            return false;
        }
        let unit = &mut world.units[idx];
        unit.pos_x = x;
        unit.pos_y = y;
    }
    let id = world.units[idx].id.clone();
    world.displaced.push(id);
    true
}

/// Heavier units shove lighter neighbours away.
///
/// Pairs are found from the state at the start of the rule; each target is
/// moved at most once per tick, by the first pusher found.
pub struct KnockbackRule;

impl Rule for KnockbackRule {
    fn name(&self) -> &'static str {
        "knockback"
    }

    fn apply(&mut self, world: &mut World) {
        let mut pushes: Vec<(usize, usize)> = Vec::new();
        {
            let config = &world.config;
            let mut query = PairQuery::new(config.spatial_grid_threshold);
            query.register(
                intent("knockback", Some(config.knockback_radius), |a, b| pushes.push((a, b)))
                    .with_filter(|a, b| can_push(a, b, config)),
            );
            query.run(&world.units);
        }

        let mut moved: BTreeSet<usize> = BTreeSet::new();
        for (pusher, target) in pushes {
            if moved.contains(&target) || !world.units[target].is_alive() {
                continue;
            }
            let (p, t) = (&world.units[pusher], &world.units[target]);
            let (dx, dy) = (t.pos_x - p.pos_x, t.pos_y - p.pos_y);
            let len = (dx * dx + dy * dy).sqrt();
            let dir = if len > f32::EPSILON {
                (dx / len, dy / len)
            } else {
                world.random_direction()
            };
            let step = world.config.knockback_step;
            if displace(world, target, dir, step, Some(pusher)) {
                debug!(
                    "[Knockback] {} pushed {} to ({}, {})",
                    world.units[pusher].id,
                    world.units[target].id,
                    world.units[target].pos_x,
                    world.units[target].pos_y
                );
                moved.insert(target);
            }
        }
    }
}
