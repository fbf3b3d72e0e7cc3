use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::error::SimError;
use crate::unit::{Unit, UnitState};

/// The parts of a unit a client redraws from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnitFrame {
    pub id: String,
    pub x: f32,
    pub y: f32,
    pub hp: f32,
    pub state: UnitState,
}

impl From<&Unit> for UnitFrame {
    fn from(unit: &Unit) -> Self {
        Self {
            id: unit.id.clone(),
            x: unit.pos_x,
            y: unit.pos_y,
            hp: unit.hp,
            state: unit.state,
        }
    }
}

pub fn frames(units: &[Unit]) -> Vec<UnitFrame> {
    units.iter().map(UnitFrame::from).collect()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MovedUnit {
    pub id: String,
    pub x: f32,
    pub y: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DamagedUnit {
    pub id: String,
    pub hp: f32,
}

/// What changed between two frames of the same simulation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TickDelta {
    pub moved: Vec<MovedUnit>,
    pub damaged: Vec<DamagedUnit>,
    pub healed: Vec<DamagedUnit>,
    pub destroyed: Vec<String>,
    pub spawned: Vec<String>,
}

/// Diff two frame lists taken before and after a tick.
///
/// Units keep their relative order across a tick: cleanup removes without
/// reordering and spawns append. A walk over both lists therefore matches
/// survivors in order, and anything left in `after` must be new. A leftover
/// id that already existed means the order was broken.
pub fn compute_delta(before: &[UnitFrame], after: &[UnitFrame]) -> Result<TickDelta, SimError> {
    let mut delta = TickDelta::default();
    let mut j = 0;

    for old in before {
        let Some(new) = after.get(j).filter(|n| n.id == old.id) else {
            delta.destroyed.push(old.id.clone());
            continue;
        };
        j += 1;
        if (new.x, new.y) != (old.x, old.y) {
            delta.moved.push(MovedUnit {
                id: new.id.clone(),
                x: new.x,
                y: new.y,
            });
        }
        if new.hp < old.hp {
            delta.damaged.push(DamagedUnit {
                id: new.id.clone(),
                hp: new.hp,
            });
        } else if new.hp > old.hp {
            delta.healed.push(DamagedUnit {
                id: new.id.clone(),
                hp: new.hp,
            });
        }
    }

    let known: BTreeSet<&str> = before.iter().map(|f| f.id.as_str()).collect();
    let mut seen = BTreeSet::new();
    for new in &after[j..] {
        if known.contains(new.id.as_str()) {
            return Err(SimError::InvariantViolation(format!(
                "unit '{}' changed position in the unit order",
                new.id
            )));
        }
        if !seen.insert(new.id.as_str()) {
            return Err(SimError::InvariantViolation(format!("unit id '{}' appears twice", new.id)));
        }
        delta.spawned.push(new.id.clone());
    }
    Ok(delta)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(id: &str, x: f32, hp: f32) -> UnitFrame {
        UnitFrame {
            id: id.into(),
            x,
            y: 0.0,
            hp,
            state: UnitState::Idle,
        }
    }

    #[test]
    fn classifies_changes() {
        let before = vec![frame("a", 0.0, 10.0), frame("b", 1.0, 10.0), frame("c", 2.0, 5.0)];
        let after = vec![frame("a", 1.0, 7.0), frame("c", 2.0, 6.0), frame("d", 9.0, 10.0)];
        let delta = compute_delta(&before, &after).unwrap();

        assert_eq!(delta.moved, vec![MovedUnit { id: "a".into(), x: 1.0, y: 0.0 }]);
        assert_eq!(delta.damaged, vec![DamagedUnit { id: "a".into(), hp: 7.0 }]);
        assert_eq!(delta.healed, vec![DamagedUnit { id: "c".into(), hp: 6.0 }]);
        assert_eq!(delta.destroyed, vec!["b".to_string()]);
        assert_eq!(delta.spawned, vec!["d".to_string()]);
    }

    #[test]
    fn reordering_is_an_invariant_violation() {
        let before = vec![frame("a", 0.0, 10.0), frame("b", 1.0, 10.0)];
        let after = vec![frame("b", 1.0, 10.0), frame("a", 0.0, 10.0)];
        assert!(matches!(
            compute_delta(&before, &after),
            Err(SimError::InvariantViolation(_))
        ));
    }

    #[test]
    fn empty_frames() {
        assert_eq!(compute_delta(&[], &[]).unwrap(), TickDelta::default());
    }
}
