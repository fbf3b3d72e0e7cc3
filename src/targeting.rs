use crate::rules::Rule;
use crate::spatial_grid::{intent, PairQuery};
use crate::unit::{Unit, META_FROZEN};
use crate::world::World;

/// Can `unit` go looking for a fight.
#[inline]
fn is_hunter(unit: &Unit) -> bool {
    unit.can_fight() && !unit.flag(META_FROZEN)
}

/// Nearest valid enemy for every unit, as `(distance_sq, index)`.
///
/// Ties keep the lower unit index so results do not depend on scan order.
pub fn nearest_enemies(units: &[Unit], grid_threshold: usize) -> Vec<Option<(f32, usize)>> {
    let mut nearest: Vec<Option<(f32, usize)>> = vec![None; units.len()];
    {
        let mut query = PairQuery::new(grid_threshold);
        query.register(
            intent("nearest_enemy", None, |a, b| {
                let d = units[a].distance_sq(&units[b]);
                let better = match nearest[a] {
                    None => true,
                    Some((best, idx)) => d < best || (d == best && b < idx),
                };
                if better {
                    nearest[a] = Some((d, b));
                }
            })
            .with_filter(|a, b| is_hunter(a) && b.can_be_targeted() && a.is_enemy_of(b)),
        );
        query.run(units);
    }
    nearest
}

/// Points every idle combatant one cell toward its nearest enemy.
///
/// Units already within melee range hold position; the melee rule decides
/// what they do.
pub struct ChaseRule;

impl Rule for ChaseRule {
    fn name(&self) -> &'static str {
        "chase"
    }

    fn apply(&mut self, world: &mut World) {
        let nearest = nearest_enemies(&world.units, world.config.spatial_grid_threshold);
        let reach_sq = world.config.melee_range * world.config.melee_range;

        for (idx, found) in nearest.into_iter().enumerate() {
            let Some((dist_sq, enemy)) = found else { continue };
            let (tx, ty) = (world.units[enemy].pos_x, world.units[enemy].pos_y);
            let unit = &mut world.units[idx];
            if dist_sq <= reach_sq {
                unit.stop();
            } else {
                unit.step_towards(tx, ty);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SimConfig;
    use crate::unit::{Team, TAG_NONCOMBATANT};

    #[test]
    fn picks_nearest_enemy_only() {
        let units = vec![
            Unit::new("a", Team::Friendly, 0.0, 0.0),
            Unit::new("ally", Team::Friendly, 1.0, 0.0),
            Unit::new("far", Team::Hostile, 9.0, 0.0),
            Unit::new("near", Team::Hostile, 4.0, 0.0),
        ];
        let nearest = nearest_enemies(&units, 50);
        assert_eq!(nearest[0].map(|(_, i)| i), Some(3));
        assert_eq!(nearest[2].map(|(_, i)| i), Some(1));
    }

    #[test]
    fn noncombatants_neither_hunt_nor_get_hunted() {
        let mut civilian = Unit::new("c", Team::Hostile, 1.0, 0.0);
        civilian.tags.insert(TAG_NONCOMBATANT.into());
        let units = vec![Unit::new("a", Team::Friendly, 0.0, 0.0), civilian];
        let nearest = nearest_enemies(&units, 50);
        assert!(nearest.iter().all(Option::is_none));
    }

    #[test]
    fn chase_steps_toward_enemy() {
        let mut world = World::new(SimConfig::default(), 1);
        world.insert_unit(Unit::new("a", Team::Friendly, 0.0, 0.0));
        world.insert_unit(Unit::new("b", Team::Hostile, 5.0, 3.0));
        ChaseRule.apply(&mut world);
        assert_eq!((world.units()[0].move_x, world.units()[0].move_y), (1.0, 1.0));
        assert_eq!((world.units()[1].move_x, world.units()[1].move_y), (-1.0, -1.0));
    }

    #[test]
    fn adjacent_units_hold() {
        let mut world = World::new(SimConfig::default(), 1);
        world.insert_unit(Unit::new("a", Team::Friendly, 0.0, 0.0));
        world.insert_unit(Unit::new("b", Team::Hostile, 1.0, 0.0));
        ChaseRule.apply(&mut world);
        assert!(!world.units()[0].has_intended_move());
    }
}
