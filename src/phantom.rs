//! Multi-cell ("huge") units.
//!
//! A huge unit's extra footprint is made of phantom units that trail the
//! head at fixed offsets. Phantoms are noncombatant, practically
//! indestructible, and carry the head's mass so they can push.

use std::collections::BTreeMap;

use log::{debug, warn};
use serde_json::Value;

use crate::command::Command;
use crate::config::SimConfig;
use crate::event::Event;
use crate::rules::Rule;
use crate::unit::{Unit, META_FOOTPRINT, META_OFFSET_X, META_OFFSET_Y, META_PARENT_ID, TAG_NONCOMBATANT, TAG_PHANTOM};
use crate::world::World;

/// Offsets of a huge unit's phantoms relative to its head.
///
/// Read from `meta.footprint` (`[[dx, dy], ...]`) when present, otherwise
/// the configured default formation.
pub fn footprint(unit: &Unit, config: &SimConfig) -> Vec<(i32, i32)> {
    let custom = unit.meta.get(META_FOOTPRINT).and_then(Value::as_array).map(|cells| {
        cells
            .iter()
            .filter_map(|cell| {
                let pair = cell.as_array()?;
                let dx = pair.first()?.as_i64()?;
                let dy = pair.get(1)?.as_i64()?;
                Some((dx as i32, dy as i32))
            })
            .collect::<Vec<_>>()
    });
    match custom {
        Some(cells) if !cells.is_empty() => cells,
        _ => config.phantom_offsets.clone(),
    }
}

/// Offset a phantom keeps from its parent.
pub fn phantom_offset(phantom: &Unit) -> (i32, i32) {
    let dx = phantom.meta_f32(META_OFFSET_X).unwrap_or(0.0);
    let dy = phantom.meta_f32(META_OFFSET_Y).unwrap_or(0.0);
    (dx.round() as i32, dy.round() as i32)
}

/// Build the phantom for one footprint cell of `parent`.
pub fn make_phantom(parent: &Unit, index: usize, offset: (i32, i32), config: &SimConfig) -> Unit {
    let (px, py) = parent.cell();
    let mut phantom = Unit::new(
        format!("{}#phantom{}", parent.id, index),
        parent.team,
        (px + offset.0) as f32,
        (py + offset.1) as f32,
    );
    phantom.mass = parent.mass;
    phantom.hp = config.phantom_hp;
    phantom.max_hp = config.phantom_hp;
    phantom.damage = 0.0;
    phantom.tags.insert(TAG_PHANTOM.to_string());
    phantom.tags.insert(TAG_NONCOMBATANT.to_string());
    phantom.meta.insert(META_PARENT_ID.to_string(), Value::from(parent.id.clone()));
    phantom.meta.insert(META_OFFSET_X.to_string(), Value::from(offset.0));
    phantom.meta.insert(META_OFFSET_Y.to_string(), Value::from(offset.1));
    phantom
}

/// Indices of the live phantoms attached to each parent id.
pub fn phantoms_by_parent(units: &[Unit]) -> BTreeMap<&str, Vec<usize>> {
    let mut map: BTreeMap<&str, Vec<usize>> = BTreeMap::new();
    for (idx, unit) in units.iter().enumerate() {
        if unit.is_phantom() && unit.is_alive() {
            if let Some(parent) = unit.parent_id() {
                map.entry(parent).or_default().push(idx);
            }
        }
    }
    map
}

/// Would the whole body of `parent_idx` fit with its head at `head`?
///
/// Every cell must be in bounds and free of units other than the body
/// itself and the body doing the pushing.
pub fn body_fits(world: &World, parent_idx: usize, head: (i32, i32), pusher: Option<usize>) -> bool {
    let parent = &world.units[parent_idx];
    let pusher_body = pusher.map(|idx| world.units[idx].body_id());
    let mut cells = vec![head];
    cells.extend(
        footprint(parent, &world.config)
            .into_iter()
            .map(|(dx, dy)| (head.0 + dx, head.1 + dy)),
    );

    cells.iter().all(|&(x, y)| {
        world.config.in_bounds(x, y)
            && !world.units.iter().any(|other| {
                other.is_alive()
                    && other.cell() == (x, y)
                    && !other.same_body(parent)
                    && pusher_body.map_or(true, |body| other.body_id() != body)
            })
    })
}

/// Move a head and every attached phantom in one step.
pub fn relocate_body(world: &mut World, parent_idx: usize, head: (i32, i32)) {
    let parent_id = world.units[parent_idx].id.clone();
    world.units[parent_idx].set_cell(head);
    for unit in world.units.iter_mut() {
        if unit.is_phantom() && unit.parent_id() == Some(parent_id.as_str()) {
            let (dx, dy) = phantom_offset(unit);
            unit.set_cell((head.0 + dx, head.1 + dy));
        }
    }
}

/// Remove phantoms whose parent is gone or dead. Returns how many.
pub fn remove_orphans(world: &mut World) -> usize {
    let live_parents: std::collections::BTreeSet<String> = world
        .units
        .iter()
        .filter(|u| u.is_alive() && !u.is_phantom())
        .map(|u| u.id.clone())
        .collect();
    let before = world.units.len();
    world.units.retain(|u| {
        !u.is_phantom() || u.parent_id().is_some_and(|p| live_parents.contains(p))
    });
    before - world.units.len()
}

/// Creates missing phantoms and keeps existing ones glued to their head.
pub struct PhantomRule;

impl Rule for PhantomRule {
    fn name(&self) -> &'static str {
        "phantoms"
    }

    fn apply(&mut self, world: &mut World) {
        let removed = remove_orphans(world);
        if removed > 0 {
            debug!("[Phantom] Removed {} orphaned phantoms", removed);
        }

        let mut spawns = Vec::new();
        let mut glue = Vec::new();
        {
            let attached = phantoms_by_parent(&world.units);
            for unit in world.units.iter().filter(|u| u.is_huge() && u.is_alive()) {
                let (hx, hy) = unit.cell();
                match attached.get(unit.id.as_str()) {
                    None => {
                        for (index, offset) in footprint(unit, &world.config).into_iter().enumerate() {
                            spawns.push(make_phantom(unit, index, offset, &world.config));
                        }
                    }
                    Some(phantoms) => {
                        for &idx in phantoms {
                            let phantom = &world.units[idx];
                            let (dx, dy) = phantom_offset(phantom);
                            let expected = (hx + dx, hy + dy);
                            if phantom.cell() != expected {
                                glue.push(Command::Move {
                                    unit_id: phantom.id.clone(),
                                    x: expected.0 as f32,
                                    y: expected.1 as f32,
                                    forced: true,
                                });
                            }
                        }
                    }
                }
            }
        }

        if !spawns.is_empty() {
            debug!("[Phantom] Creating {} phantoms", spawns.len());
        }
        for phantom in spawns {
            if !world.config.in_bounds(phantom.cell().0, phantom.cell().1) {
                warn!("[Phantom] {} starts outside the field", phantom.id);
            }
            let (x, y) = (phantom.pos_x, phantom.pos_y);
            world.queue_event(Event::spawn(phantom, x, y));
        }
        for command in glue {
            world.queue_command(command);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::CommandHandler;
    use crate::event::EventHandler;
    use crate::unit::{Team, TAG_HUGE};

    fn huge(id: &str, x: f32, y: f32) -> Unit {
        let mut unit = Unit::new(id, Team::Hostile, x, y);
        unit.tags.insert(TAG_HUGE.into());
        unit.mass = 8.0;
        unit
    }

    fn run_phantom_pass(world: &mut World) {
        PhantomRule.apply(world);
        CommandHandler.apply(world);
        EventHandler.apply(world);
    }

    #[test]
    fn creates_phantoms_once() {
        let mut world = World::new(SimConfig::default(), 1);
        world.insert_unit(huge("worm", 10.0, 5.0));
        run_phantom_pass(&mut world);
        run_phantom_pass(&mut world);

        let phantoms: Vec<&Unit> = world.units().iter().filter(|u| u.is_phantom()).collect();
        assert_eq!(phantoms.len(), 3);
        let cells: Vec<(i32, i32)> = phantoms.iter().map(|p| p.cell()).collect();
        assert_eq!(cells, vec![(10, 6), (10, 7), (10, 8)]);
        for phantom in phantoms {
            assert_eq!(phantom.parent_id(), Some("worm"));
            assert_eq!(phantom.mass, 8.0);
            assert!(phantom.has_tag(TAG_NONCOMBATANT));
        }
    }

    #[test]
    fn custom_footprint_from_meta() {
        let mut unit = huge("crab", 4.0, 4.0);
        unit.meta.insert(META_FOOTPRINT.into(), serde_json::json!([[1, 0], [1, 1]]));
        assert_eq!(footprint(&unit, &SimConfig::default()), vec![(1, 0), (1, 1)]);
    }

    #[test]
    fn drifted_phantoms_are_glued_back() {
        let mut world = World::new(SimConfig::default(), 1);
        world.insert_unit(huge("worm", 10.0, 5.0));
        run_phantom_pass(&mut world);

        let idx = world.index_of("worm").unwrap();
        world.units[idx].set_cell((12, 5));
        run_phantom_pass(&mut world);

        let cells: Vec<(i32, i32)> = world.units().iter().filter(|u| u.is_phantom()).map(|p| p.cell()).collect();
        assert_eq!(cells, vec![(12, 6), (12, 7), (12, 8)]);
    }

    #[test]
    fn orphans_are_removed() {
        let mut world = World::new(SimConfig::default(), 1);
        world.insert_unit(huge("worm", 10.0, 5.0));
        run_phantom_pass(&mut world);
        world.units.retain(|u| u.id != "worm");

        assert_eq!(remove_orphans(&mut world), 3);
        assert!(world.units().is_empty());
    }

    #[test]
    fn body_fit_checks_bounds_and_strangers() {
        let mut world = World::new(SimConfig::default(), 1);
        world.insert_unit(huge("worm", 10.0, 5.0));
        run_phantom_pass(&mut world);
        world.insert_unit(Unit::new("rock", Team::Neutral, 11.0, 7.0));
        let idx = world.index_of("worm").unwrap();

        // Moving down one overlaps its own phantoms only.
        assert!(body_fits(&world, idx, (10, 6), None));
        // Tail would hang off the bottom edge.
        assert!(!body_fits(&world, idx, (10, 30), None));
        // Tail would land on the rock.
        assert!(!body_fits(&world, idx, (11, 5), None));
        // Unless the rock is the one pushing.
        let rock = world.index_of("rock").unwrap();
        assert!(body_fits(&world, idx, (11, 5), Some(rock)));
    }

    #[test]
    fn relocate_moves_whole_body() {
        let mut world = World::new(SimConfig::default(), 1);
        world.insert_unit(huge("worm", 10.0, 5.0));
        run_phantom_pass(&mut world);
        let idx = world.index_of("worm").unwrap();
        relocate_body(&mut world, idx, (3, 3));
        let cells: Vec<(i32, i32)> = world.units().iter().map(|u| u.cell()).collect();
        assert_eq!(cells, vec![(3, 3), (3, 4), (3, 5), (3, 6)]);
    }
}
