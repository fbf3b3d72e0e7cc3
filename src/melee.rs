use std::collections::BTreeSet;

use log::trace;

use crate::event::Event;
use crate::rules::Rule;
use crate::spatial_grid::{intent, PairQuery};
use crate::unit::UnitState;
use crate::world::World;

/// Units within melee range of an enemy stop and strike it.
///
/// Attackers are visited in unit order. Each unit engages at most one
/// target per tick, and a unit that has already been engaged, as attacker
/// or as target, does not start a second fight. So a struck unit never
/// strikes back in the same tick: in a one-on-one duel only the earlier
/// unit deals damage, every tick, while several attackers may still pile
/// onto one target. The engagement map is rebuilt from scratch every tick.
pub struct MeleeRule;

impl Rule for MeleeRule {
    fn name(&self) -> &'static str {
        "melee"
    }

    fn apply(&mut self, world: &mut World) {
        world.engagements.clear();

        let mut candidates: Vec<Vec<(f32, usize)>> = vec![Vec::new(); world.units.len()];
        {
            let units = &world.units;
            let mut query = PairQuery::new(world.config.spatial_grid_threshold);
            query.register(
                intent("melee", Some(world.config.melee_range), |a, b| {
                    candidates[a].push((units[a].distance_sq(&units[b]), b));
                })
                .with_filter(|a, b| a.can_fight() && b.can_be_targeted() && a.is_enemy_of(b)),
            );
            query.run(units);
        }

        let mut engaged: BTreeSet<usize> = BTreeSet::new();
        let mut strikes = Vec::new();
        for (attacker, mut options) in candidates.into_iter().enumerate() {
            if options.is_empty() || engaged.contains(&attacker) {
                continue;
            }
            options.sort_by(|x, y| x.0.total_cmp(&y.0).then(x.1.cmp(&y.1)));
            let target = options[0].1;

            engaged.insert(attacker);
            engaged.insert(target);
            for idx in [attacker, target] {
                world.units[idx].stop();
            }
            let (a, t) = (&world.units[attacker], &world.units[target]);
            trace!("[Melee] {} engages {}", a.id, t.id);
            world.engagements.insert(a.id.clone(), t.id.clone());
            let amount = (a.damage > 0.0).then_some(a.damage);
            strikes.push(Event::damage(Some(a.id.clone()), t.id.clone(), amount));
            world.units[attacker].state = UnitState::Attack;
        }

        for strike in strikes {
            world.queue_event(strike);
        }
    }
}
