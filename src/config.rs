use serde::{Deserialize, Serialize};

use crate::error::SimError;

/// Tuning constants for one simulation.
///
/// Every gameplay constant that was tuned by hand lives here so tests and
/// hosts can override it. Missing JSON keys fall back to `Default`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimConfig {
    // Field bounds, in cells. Valid cells are 0..width, 0..height.
    pub field_width: i32,
    pub field_height: i32,

    /// Active-unit count above which the spatial query switches to a grid.
    pub spatial_grid_threshold: usize,

    pub melee_range: f32,
    pub default_damage: f32,
    pub default_heal: f32,

    pub knockback_radius: f32,
    pub knockback_step: f32,
    /// Pusher effective mass must exceed target effective mass times this.
    pub knockback_mass_ratio: f32,
    pub phantom_mass_multiplier: f32,
    pub huge_mass_multiplier: f32,

    pub phantom_hp: f32,
    /// Formation behind a huge unit's head when the unit names none itself.
    pub phantom_offsets: Vec<(i32, i32)>,

    /// AoE impact mass over target mass at which the target is tossed.
    pub toss_mass_ratio: f32,
    pub toss_distance: f32,

    pub lightning_radius: f32,
    pub lightning_damage: f32,

    pub projectile_gravity: f32,
    pub projectile_default_speed: f32,

    /// How many ticks of processed events stay in the history.
    pub event_history_ticks: u64,
    /// Upper bound on events handled in one pass (AoE fan-out included).
    pub max_events_per_tick: usize,

    pub stagger_abilities: bool,
    pub summary_interval: u64,
    pub record_rule_timings: bool,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            field_width: 32,
            field_height: 32,
            spatial_grid_threshold: 50,
            melee_range: 1.5,
            default_damage: 1.0,
            default_heal: 1.0,
            knockback_radius: 1.1,
            knockback_step: 1.5,
            knockback_mass_ratio: 2.0,
            phantom_mass_multiplier: 100.0,
            huge_mass_multiplier: 3.0,
            phantom_hp: 1.0e9,
            phantom_offsets: vec![(0, 1), (0, 2), (0, 3)],
            toss_mass_ratio: 3.0,
            toss_distance: 2.0,
            lightning_radius: 2.0,
            lightning_damage: 10.0,
            projectile_gravity: 0.5,
            projectile_default_speed: 1.0,
            event_history_ticks: 60,
            max_events_per_tick: 10_000,
            stagger_abilities: false,
            summary_interval: 20,
            record_rule_timings: false,
        }
    }
}

impl SimConfig {
    pub fn from_json(json: &str) -> Result<Self, SimError> {
        serde_json::from_str(json).map_err(SimError::Config)
    }

    #[inline]
    pub fn in_bounds(&self, x: i32, y: i32) -> bool {
        x >= 0 && y >= 0 && x < self.field_width && y < self.field_height
    }

    /// Clamp a position into the field.
    #[inline]
    pub fn clamp(&self, x: f32, y: f32) -> (f32, f32) {
        (
            x.clamp(0.0, (self.field_width - 1).max(0) as f32),
            y.clamp(0.0, (self.field_height - 1).max(0) as f32),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_json_keeps_defaults() {
        let config = SimConfig::from_json(r#"{"knockback_step": 2.5, "field_width": 10}"#).unwrap();
        assert_eq!(config.knockback_step, 2.5);
        assert_eq!(config.field_width, 10);
        assert_eq!(config.spatial_grid_threshold, 50);
        assert_eq!(config.phantom_offsets, vec![(0, 1), (0, 2), (0, 3)]);
    }

    #[test]
    fn bad_json_is_a_config_error() {
        assert!(matches!(SimConfig::from_json("{"), Err(SimError::Config(_))));
    }

    #[test]
    fn clamp_stays_inside_field() {
        let config = SimConfig::default();
        assert_eq!(config.clamp(-3.0, 40.0), (0.0, 31.0));
        assert!(config.in_bounds(0, 31));
        assert!(!config.in_bounds(32, 0));
    }
}
