use log::debug;

use crate::abilities::AbilityRule;
use crate::command::CommandHandler;
use crate::event::EventHandler;
use crate::knockback::KnockbackRule;
use crate::melee::MeleeRule;
use crate::movement::MovementRule;
use crate::phantom::PhantomRule;
use crate::projectile::ProjectileRule;
use crate::targeting::ChaseRule;
use crate::world::World;

/// One stage of the tick pipeline.
///
/// Rules run to completion in rulebook order. They must not fail: a bad
/// reference or out-of-range value is logged and skipped so one bad input
/// cannot stall the whole simulation.
pub trait Rule {
    fn name(&self) -> &'static str;
    fn apply(&mut self, world: &mut World);
}

/// The standard rulebook, in execution order.
///
/// Melee runs ahead of the event handler so strikes land in the tick they
/// are declared; knockback and movement see the post-damage state.
pub fn default_rulebook() -> Vec<Box<dyn Rule>> {
    vec![
        Box::new(PhantomRule),
        Box::new(AbilityRule::default()),
        Box::new(ChaseRule),
        Box::new(MeleeRule),
        Box::new(CommandHandler),
        Box::new(EventHandler),
        Box::new(KnockbackRule),
        Box::new(MovementRule),
        Box::new(ProjectileRule),
        Box::new(Cleanup),
    ]
}

/// Purges dead units and phantoms left without a live parent.
pub struct Cleanup;

impl Rule for Cleanup {
    fn name(&self) -> &'static str {
        "cleanup"
    }

    fn apply(&mut self, world: &mut World) {
        let before = world.units.len();
        world.units.retain(|u| u.is_alive());
        let dead = before - world.units.len();
        let orphans = crate::phantom::remove_orphans(world);
        if dead + orphans > 0 {
            debug!(
                "[Cleanup] Tick {}: removed {} dead, {} orphaned phantoms",
                world.tick, dead, orphans
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SimConfig;
    use crate::unit::{Team, Unit, UnitState};

    #[test]
    fn rulebook_order_is_fixed() {
        let names: Vec<&str> = default_rulebook().iter().map(|r| r.name()).collect();
        assert_eq!(
            names,
            vec![
                "phantoms",
                "abilities",
                "chase",
                "melee",
                "commands",
                "events",
                "knockback",
                "movement",
                "projectiles",
                "cleanup"
            ]
        );
    }

    #[test]
    fn cleanup_removes_dead_units() {
        let mut world = World::new(SimConfig::default(), 1);
        world.insert_unit(Unit::new("alive", Team::Friendly, 0.0, 0.0));
        world.insert_unit(Unit::new("gone", Team::Hostile, 3.0, 0.0));
        world.units[1].state = UnitState::Dead;

        Cleanup.apply(&mut world);
        assert_eq!(world.units().len(), 1);
        assert_eq!(world.units()[0].id, "alive");
    }
}
