use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::abilities::Ability;
use crate::error::SimError;
use crate::unit::{Meta, Team, Unit, UnitState};

/// Blueprint a unit is stamped from by `deploy`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UnitTemplate {
    pub sprite: String,
    pub hp: f32,
    pub mass: f32,
    pub damage: f32,
    pub team: Team,
    pub tags: BTreeSet<String>,
    pub abilities: BTreeMap<String, Ability>,
    pub meta: Meta,
}

impl Default for UnitTemplate {
    fn default() -> Self {
        Self {
            sprite: String::new(),
            hp: 10.0,
            mass: 1.0,
            damage: 1.0,
            team: Team::Neutral,
            tags: BTreeSet::new(),
            abilities: BTreeMap::new(),
            meta: Meta::new(),
        }
    }
}

impl UnitTemplate {
    pub fn instantiate(&self, id: String, x: f32, y: f32) -> Unit {
        Unit {
            id,
            team: self.team,
            sprite: self.sprite.clone(),
            pos_x: x,
            pos_y: y,
            move_x: 0.0,
            move_y: 0.0,
            mass: self.mass,
            hp: self.hp,
            max_hp: self.hp,
            damage: self.damage,
            state: UnitState::Idle,
            abilities: self.abilities.clone(),
            tags: self.tags.clone(),
            meta: self.meta.clone(),
        }
    }
}

/// Anything that can resolve a template name.
pub trait TemplateSource {
    fn lookup(&self, name: &str) -> Option<&UnitTemplate>;
}

/// Named templates, iterated in name order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Catalog {
    templates: BTreeMap<String, UnitTemplate>,
}

impl Catalog {
    /// Parse a `{ "name": { template }, ... }` object. Templates without a
    /// sprite use their name.
    pub fn from_json(json: &str) -> Result<Self, SimError> {
        let mut catalog: Catalog = serde_json::from_str(json).map_err(SimError::Catalog)?;
        for (name, template) in catalog.templates.iter_mut() {
            if template.sprite.is_empty() {
                template.sprite = name.clone();
            }
        }
        Ok(catalog)
    }

    pub fn insert(&mut self, name: impl Into<String>, template: UnitTemplate) {
        self.templates.insert(name.into(), template);
    }

    pub fn get(&self, name: &str) -> Option<&UnitTemplate> {
        self.templates.get(name)
    }

    pub fn len(&self) -> usize {
        self.templates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.templates.keys().map(String::as_str)
    }
}

impl TemplateSource for Catalog {
    fn lookup(&self, name: &str) -> Option<&UnitTemplate> {
        self.get(name)
    }
}
