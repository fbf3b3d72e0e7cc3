use log::trace;

use crate::phantom;
use crate::rules::Rule;
use crate::unit::{UnitState, META_FROZEN};
use crate::world::World;

/// Outcome of validating a single-cell step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepPlan {
    Free,
    /// Destination is taken by a unit that can be shoved one more cell.
    Push { occupant: usize, to: (i32, i32) },
    Blocked,
}

/// Validate a step of unit `idx` into `dest`.
///
/// Legal if `dest` is in bounds and either empty or held by a plain unit
/// that can itself move one more cell the same way into an empty cell.
/// Only one level of pushing is considered.
pub fn plan_step(world: &World, idx: usize, dest: (i32, i32)) -> StepPlan {
    let config = &world.config;
    if !config.in_bounds(dest.0, dest.1) {
        return StepPlan::Blocked;
    }
    let mover = &world.units[idx];
    let occupant = world
        .units
        .iter()
        .position(|u| u.is_alive() && u.cell() == dest && !u.same_body(mover));
    let Some(occupant) = occupant else {
        return StepPlan::Free;
    };

    let other = &world.units[occupant];
    if other.is_phantom() || other.is_huge() || other.flag(META_FROZEN) {
        return StepPlan::Blocked;
    }
    let (fx, fy) = mover.cell();
    let to = (dest.0 + (dest.0 - fx).signum(), dest.1 + (dest.1 - fy).signum());
    let free = config.in_bounds(to.0, to.1)
        && !world.units.iter().any(|u| u.is_alive() && u.cell() == to);
    if free {
        StepPlan::Push { occupant, to }
    } else {
        StepPlan::Blocked
    }
}

/// Try to move unit `idx` into `dest`, pushing an occupant if allowed.
/// Huge units validate their whole body instead. Returns whether it moved.
pub fn attempt_move(world: &mut World, idx: usize, dest: (i32, i32)) -> bool {
    if world.units[idx].cell() == dest {
        return true;
    }
    if world.units[idx].is_huge() {
        if phantom::body_fits(world, idx, dest, None) {
            phantom::relocate_body(world, idx, dest);
            return true;
        }
        return false;
    }
    match plan_step(world, idx, dest) {
        StepPlan::Free => {
            world.units[idx].set_cell(dest);
            true
        }
        StepPlan::Push { occupant, to } => {
            trace!(
                "[Movement] {} pushes {} to {:?}",
                world.units[idx].id,
                world.units[occupant].id,
                to
            );
            world.units[occupant].set_cell(to);
            world.units[idx].set_cell(dest);
            true
        }
        StepPlan::Blocked => false,
    }
}

/// Applies each unit's intended move for this tick, in unit order.
pub struct MovementRule;

impl Rule for MovementRule {
    fn name(&self) -> &'static str {
        "movement"
    }

    fn apply(&mut self, world: &mut World) {
        for idx in 0..world.units.len() {
            let unit = &world.units[idx];
            if !unit.is_alive() || unit.is_phantom() || !unit.has_intended_move() {
                continue;
            }
            if unit.flag(META_FROZEN) {
                world.units[idx].stop();
                continue;
            }
            let (cx, cy) = unit.cell();
            let dest = (cx + unit.move_x.round() as i32, cy + unit.move_y.round() as i32);
            let moved = attempt_move(world, idx, dest);

            let unit = &mut world.units[idx];
            if moved && unit.state != UnitState::Attack {
                unit.state = UnitState::Walk;
            }
            unit.stop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SimConfig;
    use crate::unit::{Team, Unit, TAG_HUGE};

    fn world_with(units: Vec<Unit>) -> World {
        let mut world = World::new(SimConfig::default(), 1);
        for unit in units {
            world.insert_unit(unit);
        }
        world
    }

    #[test]
    fn free_step() {
        let world = world_with(vec![Unit::new("a", Team::Friendly, 1.0, 1.0)]);
        assert_eq!(plan_step(&world, 0, (2, 1)), StepPlan::Free);
        assert_eq!(plan_step(&world, 0, (-1, 1)), StepPlan::Blocked);
    }

    #[test]
    fn single_level_push() {
        let world = world_with(vec![
            Unit::new("a", Team::Friendly, 1.0, 1.0),
            Unit::new("b", Team::Friendly, 2.0, 1.0),
        ]);
        assert_eq!(plan_step(&world, 0, (2, 1)), StepPlan::Push { occupant: 1, to: (3, 1) });
    }

    #[test]
    fn no_cascade_beyond_one() {
        let world = world_with(vec![
            Unit::new("a", Team::Friendly, 1.0, 1.0),
            Unit::new("b", Team::Friendly, 2.0, 1.0),
            Unit::new("c", Team::Friendly, 3.0, 1.0),
        ]);
        assert_eq!(plan_step(&world, 0, (2, 1)), StepPlan::Blocked);
    }

    #[test]
    fn push_blocked_at_edge() {
        let world = world_with(vec![
            Unit::new("a", Team::Friendly, 30.0, 1.0),
            Unit::new("b", Team::Friendly, 31.0, 1.0),
        ]);
        assert_eq!(plan_step(&world, 0, (31, 1)), StepPlan::Blocked);
    }

    #[test]
    fn huge_units_are_not_pushable() {
        let mut big = Unit::new("big", Team::Friendly, 2.0, 1.0);
        big.tags.insert(TAG_HUGE.into());
        let world = world_with(vec![Unit::new("a", Team::Friendly, 1.0, 1.0), big]);
        assert_eq!(plan_step(&world, 0, (2, 1)), StepPlan::Blocked);
    }

    #[test]
    fn movement_rule_applies_and_clears_intent() {
        let mut world = world_with(vec![
            Unit::new("a", Team::Friendly, 1.0, 1.0),
            Unit::new("b", Team::Friendly, 2.0, 1.0),
        ]);
        world.units[0].move_x = 1.0;
        MovementRule.apply(&mut world);
        assert_eq!(world.units()[0].cell(), (2, 1));
        assert_eq!(world.units()[1].cell(), (3, 1));
        assert!(!world.units()[0].has_intended_move());
        assert_eq!(world.units()[0].state, UnitState::Walk);
    }

    #[test]
    fn frozen_units_stay_put() {
        let mut world = world_with(vec![Unit::new("a", Team::Friendly, 1.0, 1.0)]);
        world.units[0].set_flag(META_FROZEN, true);
        world.units[0].move_x = 1.0;
        MovementRule.apply(&mut world);
        assert_eq!(world.units()[0].cell(), (1, 1));
    }
}
