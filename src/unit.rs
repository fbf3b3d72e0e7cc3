use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::abilities::Ability;

/// Open key/value bag for cross-rule flags.
///
/// Readers treat a missing key as "off". Keys owned by this crate:
/// `huge`, `phantom`, `parentId`, `offsetX`, `offsetY`, `footprint`,
/// `jumping`, `frozen`, `dropping`, `projectileSpeed`.
pub type Meta = BTreeMap<String, Value>;

pub const TAG_HUGE: &str = "huge";
pub const TAG_PHANTOM: &str = "phantom";
pub const TAG_NONCOMBATANT: &str = "noncombatant";

pub const META_PARENT_ID: &str = "parentId";
pub const META_OFFSET_X: &str = "offsetX";
pub const META_OFFSET_Y: &str = "offsetY";
pub const META_FOOTPRINT: &str = "footprint";
pub const META_JUMPING: &str = "jumping";
pub const META_FROZEN: &str = "frozen";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Team {
    Friendly,
    Hostile,
    #[default]
    Neutral,
}

impl Team {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "friendly" => Some(Self::Friendly),
            "hostile" => Some(Self::Hostile),
            "neutral" => Some(Self::Neutral),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnitState {
    #[default]
    Idle,
    Walk,
    Attack,
    Dead,
}

/// A unit on the battle grid.
///
/// Positions are in cell units; fractional values are allowed between
/// ticks but every grid decision uses `cell()`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Unit {
    // Identity
    pub id: String,
    #[serde(default)]
    pub team: Team,
    #[serde(default)]
    pub sprite: String,

    // Kinematics
    pub pos_x: f32,
    pub pos_y: f32,
    #[serde(default)]
    pub move_x: f32,
    #[serde(default)]
    pub move_y: f32,
    #[serde(default)]
    pub mass: f32,

    // Vitality
    pub hp: f32,
    pub max_hp: f32,
    #[serde(default)]
    pub damage: f32,
    #[serde(default)]
    pub state: UnitState,

    // Capability
    #[serde(default)]
    pub abilities: BTreeMap<String, Ability>,
    #[serde(default)]
    pub tags: BTreeSet<String>,
    #[serde(default)]
    pub meta: Meta,
}

impl Unit {
    pub fn new(id: impl Into<String>, team: Team, x: f32, y: f32) -> Self {
        Self {
            id: id.into(),
            team,
            sprite: String::new(),
            pos_x: x,
            pos_y: y,
            move_x: 0.0,
            move_y: 0.0,
            mass: 1.0,
            hp: 10.0,
            max_hp: 10.0,
            damage: 1.0,
            state: UnitState::Idle,
            abilities: BTreeMap::new(),
            tags: BTreeSet::new(),
            meta: Meta::new(),
        }
    }

    #[inline]
    pub fn is_alive(&self) -> bool {
        self.state != UnitState::Dead
    }

    #[inline]
    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.contains(tag)
    }

    /// Truthy meta flag. Missing keys, `false`, `0` and `null` are off.
    pub fn flag(&self, key: &str) -> bool {
        match self.meta.get(key) {
            Some(Value::Bool(b)) => *b,
            Some(Value::Number(n)) => n.as_f64().is_some_and(|v| v != 0.0),
            Some(Value::String(s)) => !s.is_empty(),
            Some(Value::Null) | None => false,
            Some(_) => true,
        }
    }

    pub fn set_flag(&mut self, key: &str, on: bool) {
        if on {
            self.meta.insert(key.to_string(), Value::Bool(true));
        } else {
            self.meta.remove(key);
        }
    }

    pub fn meta_str(&self, key: &str) -> Option<&str> {
        self.meta.get(key).and_then(Value::as_str)
    }

    pub fn meta_f32(&self, key: &str) -> Option<f32> {
        self.meta.get(key).and_then(Value::as_f64).map(|v| v as f32)
    }

    #[inline]
    pub fn is_phantom(&self) -> bool {
        self.has_tag(TAG_PHANTOM) || self.flag(TAG_PHANTOM)
    }

    #[inline]
    pub fn is_huge(&self) -> bool {
        !self.is_phantom() && (self.has_tag(TAG_HUGE) || self.flag(TAG_HUGE))
    }

    #[inline]
    pub fn is_noncombatant(&self) -> bool {
        self.has_tag(TAG_NONCOMBATANT) || self.is_phantom()
    }

    pub fn parent_id(&self) -> Option<&str> {
        self.meta_str(META_PARENT_ID)
    }

    /// Id of the composite body this unit belongs to: its parent for a
    /// phantom, itself otherwise.
    pub fn body_id(&self) -> &str {
        self.parent_id().unwrap_or(&self.id)
    }

    #[inline]
    pub fn same_body(&self, other: &Unit) -> bool {
        self.body_id() == other.body_id()
    }

    /// Can this unit start a fight this tick.
    pub fn can_fight(&self) -> bool {
        self.is_alive() && !self.is_noncombatant() && !self.flag(META_JUMPING)
    }

    /// Can this unit be picked as a melee or targeting victim.
    pub fn can_be_targeted(&self) -> bool {
        self.is_alive() && !self.is_noncombatant() && !self.flag(META_JUMPING)
    }

    #[inline]
    pub fn is_enemy_of(&self, other: &Unit) -> bool {
        self.team != other.team
    }

    /// Grid cell of the current position.
    #[inline]
    pub fn cell(&self) -> (i32, i32) {
        (self.pos_x.round() as i32, self.pos_y.round() as i32)
    }

    #[inline]
    pub fn set_cell(&mut self, cell: (i32, i32)) {
        self.pos_x = cell.0 as f32;
        self.pos_y = cell.1 as f32;
    }

    /// Take damage, clamping hp at zero. Zero hp is terminal.
    #[inline]
    pub fn take_damage(&mut self, amount: f32) {
        if !self.is_alive() {
            return;
        }
        self.hp = (self.hp - amount.max(0.0)).max(0.0);
        if self.hp <= 0.0 {
            self.hp = 0.0;
            self.state = UnitState::Dead;
            self.stop();
        }
    }

    /// Heal up to `max_hp`. The dead stay dead.
    #[inline]
    pub fn heal(&mut self, amount: f32) {
        if !self.is_alive() {
            return;
        }
        self.hp = (self.hp + amount.max(0.0)).min(self.max_hp);
    }

    #[inline]
    pub fn is_hurt(&self) -> bool {
        self.hp < self.max_hp
    }

    /// Bring hp back into `[0, max_hp]` and fix up the state to match.
    pub fn normalize(&mut self) {
        self.max_hp = self.max_hp.max(0.0);
        self.mass = self.mass.max(0.0);
        self.hp = self.hp.clamp(0.0, self.max_hp);
        if self.hp <= 0.0 {
            self.state = UnitState::Dead;
        }
    }

    #[inline]
    pub fn stop(&mut self) {
        self.move_x = 0.0;
        self.move_y = 0.0;
    }

    #[inline]
    pub fn has_intended_move(&self) -> bool {
        self.move_x != 0.0 || self.move_y != 0.0
    }

    /// Request a single-cell step toward a point.
    pub fn step_towards(&mut self, x: f32, y: f32) {
        let dx = x - self.pos_x;
        let dy = y - self.pos_y;
        self.move_x = if dx.abs() >= 0.5 { dx.signum() } else { 0.0 };
        self.move_y = if dy.abs() >= 0.5 { dy.signum() } else { 0.0 };
    }

    /// Distance squared (no sqrt).
    #[inline]
    pub fn distance_sq(&self, other: &Unit) -> f32 {
        let dx = self.pos_x - other.pos_x;
        let dy = self.pos_y - other.pos_y;
        dx * dx + dy * dy
    }

    #[inline]
    pub fn distance(&self, other: &Unit) -> f32 {
        self.distance_sq(other).sqrt()
    }

    #[inline]
    pub fn distance_sq_to(&self, x: f32, y: f32) -> f32 {
        let dx = self.pos_x - x;
        let dy = self.pos_y - y;
        dx * dx + dy * dy
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn damage_clamps_and_kills() {
        let mut unit = Unit::new("a", Team::Friendly, 0.0, 0.0);
        unit.take_damage(25.0);
        assert_eq!(unit.hp, 0.0);
        assert_eq!(unit.state, UnitState::Dead);

        unit.heal(5.0);
        assert_eq!(unit.hp, 0.0);
    }

    #[test]
    fn heal_clamps_to_max() {
        let mut unit = Unit::new("a", Team::Friendly, 0.0, 0.0);
        unit.hp = 4.0;
        unit.heal(100.0);
        assert_eq!(unit.hp, unit.max_hp);
    }

    #[test]
    fn missing_meta_reads_as_off() {
        let mut unit = Unit::new("a", Team::Friendly, 0.0, 0.0);
        assert!(!unit.flag(META_FROZEN));
        unit.set_flag(META_FROZEN, true);
        assert!(unit.flag(META_FROZEN));
        unit.meta.insert(META_JUMPING.into(), Value::from(0));
        assert!(!unit.flag(META_JUMPING));
    }

    #[test]
    fn phantom_body_is_its_parent() {
        let head = Unit::new("worm", Team::Hostile, 0.0, 0.0);
        let mut tail = Unit::new("worm#1", Team::Hostile, 0.0, 1.0);
        tail.tags.insert(TAG_PHANTOM.into());
        tail.meta.insert(META_PARENT_ID.into(), Value::from("worm"));
        assert!(tail.same_body(&head));
        assert!(tail.is_noncombatant());
        assert!(!tail.is_huge());
    }

    #[test]
    fn normalize_fixes_out_of_range_hp() {
        let mut unit = Unit::new("a", Team::Friendly, 0.0, 0.0);
        unit.hp = 50.0;
        unit.normalize();
        assert_eq!(unit.hp, 10.0);
        unit.hp = -2.0;
        unit.normalize();
        assert_eq!(unit.state, UnitState::Dead);
    }
}
