use std::collections::VecDeque;

use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::error::CommandParseError;
use crate::event::{Aspect, Event, EventKind, Target};
use crate::movement;
use crate::phantom;
use crate::projectile::Projectile;
use crate::rules::Rule;
use crate::unit::{Team, Unit};
use crate::world::{Weather, World};

/// A queued intention.
///
/// JSON uses `type` as the tag. A tag this crate does not know decodes to
/// `Unknown`, which the handler logs and drops.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Command {
    /// Move a unit to a cell. Unforced moves go through movement
    /// validation; forced ones (phantom glue, host corrections) do not.
    Move {
        unit_id: String,
        x: f32,
        y: f32,
        #[serde(default)]
        forced: bool,
    },
    /// Throw a unit along a direction.
    Toss {
        unit_id: String,
        dx: f32,
        dy: f32,
        #[serde(default)]
        distance: Option<f32>,
        #[serde(default)]
        source: Option<String>,
    },
    /// Place a catalog template on the field.
    Deploy {
        template: String,
        x: f32,
        y: f32,
        #[serde(default)]
        team: Option<Team>,
    },
    /// Place a fully specified unit on the field.
    Spawn { unit: Box<Unit> },
    Damage {
        unit_id: String,
        #[serde(default)]
        amount: Option<f32>,
        #[serde(default)]
        source: Option<String>,
    },
    Heal {
        unit_id: String,
        #[serde(default)]
        amount: Option<f32>,
        #[serde(default)]
        source: Option<String>,
    },
    /// Strike a point; hits every team.
    Lightning { x: f32, y: f32 },
    Weather {
        kind: String,
        duration: u64,
        intensity: f32,
    },
    /// Launch a projectile from a unit toward a point.
    Fire {
        unit_id: String,
        x: f32,
        y: f32,
        #[serde(default)]
        speed: Option<f32>,
        #[serde(default)]
        arc: bool,
        #[serde(default)]
        explode_radius: Option<f32>,
    },
    #[serde(other)]
    Unknown,
}

impl Command {
    /// Unit the command originates from or acts on, if any.
    pub fn unit_id(&self) -> Option<&str> {
        match self {
            Self::Move { unit_id, .. }
            | Self::Toss { unit_id, .. }
            | Self::Damage { unit_id, .. }
            | Self::Heal { unit_id, .. }
            | Self::Fire { unit_id, .. } => Some(unit_id),
            Self::Spawn { unit } => Some(&unit.id),
            Self::Deploy { .. } | Self::Lightning { .. } | Self::Weather { .. } | Self::Unknown => None,
        }
    }

    pub fn verb(&self) -> &'static str {
        match self {
            Self::Move { .. } => "move",
            Self::Toss { .. } => "toss",
            Self::Deploy { .. } => "deploy",
            Self::Spawn { .. } => "spawn",
            Self::Damage { .. } => "damage",
            Self::Heal { .. } => "heal",
            Self::Lightning { .. } => "lightning",
            Self::Weather { .. } => "weather",
            Self::Fire { .. } => "fire",
            Self::Unknown => "unknown",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StampedCommand {
    pub tick: u64,
    pub command: Command,
}

/// FIFO of pending commands plus the log of the last processed batch.
#[derive(Debug, Default)]
pub struct CommandQueue {
    pending: VecDeque<Command>,
    processed: Vec<StampedCommand>,
}

impl CommandQueue {
    pub fn push(&mut self, command: Command) {
        self.pending.push_back(command);
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn processed(&self) -> &[StampedCommand] {
        &self.processed
    }

    pub fn clear(&mut self) {
        self.pending.clear();
        self.processed.clear();
    }

    fn drain(&mut self) -> Vec<Command> {
        self.processed.clear();
        self.pending.drain(..).collect()
    }
}

/// Parse a `<verb> <args...>` line from the host command surface.
pub fn parse_command_line(line: &str) -> Result<Command, CommandParseError> {
    let mut parts = line.split_whitespace();
    let verb = parts.next().ok_or(CommandParseError::Empty)?.to_ascii_lowercase();
    let raw: Vec<&str> = parts.collect();
    let args = Args { verb: &verb, args: &raw };

    let command = match verb.as_str() {
        "deploy" | "spawn" => Command::Deploy {
            template: args.text(0, "template")?,
            x: args.number(1, "x")?,
            y: args.number(2, "y")?,
            team: args.team(3)?,
        },
        "weather" => Command::Weather {
            kind: args.text(0, "kind")?,
            duration: args.number::<u64>(1, "duration")?,
            intensity: args.number(2, "intensity")?,
        },
        "lightning" => Command::Lightning {
            x: args.number(0, "x")?,
            y: args.number(1, "y")?,
        },
        "move" => Command::Move {
            unit_id: args.text(0, "id")?,
            x: args.number(1, "x")?,
            y: args.number(2, "y")?,
            forced: false,
        },
        "toss" => Command::Toss {
            unit_id: args.text(0, "id")?,
            dx: args.number(1, "dx")?,
            dy: args.number(2, "dy")?,
            distance: args.optional_number(3, "distance")?,
            source: None,
        },
        "damage" => Command::Damage {
            unit_id: args.text(0, "id")?,
            amount: Some(args.number(1, "amount")?),
            source: None,
        },
        "heal" => Command::Heal {
            unit_id: args.text(0, "id")?,
            amount: Some(args.number(1, "amount")?),
            source: None,
        },
        "fire" => Command::Fire {
            unit_id: args.text(0, "id")?,
            x: args.number(1, "x")?,
            y: args.number(2, "y")?,
            speed: None,
            arc: false,
            explode_radius: None,
        },
        _ => return Err(CommandParseError::UnknownVerb(verb.clone())),
    };
    Ok(command)
}

struct Args<'a> {
    verb: &'a str,
    args: &'a [&'a str],
}

impl Args<'_> {
    fn text(&self, idx: usize, arg: &'static str) -> Result<String, CommandParseError> {
        self.args
            .get(idx)
            .map(|s| s.to_string())
            .ok_or_else(|| CommandParseError::MissingArgument {
                verb: self.verb.to_string(),
                arg,
            })
    }

    fn number<T: std::str::FromStr>(&self, idx: usize, arg: &'static str) -> Result<T, CommandParseError> {
        let raw = self.text(idx, arg)?;
        raw.parse().map_err(|_| CommandParseError::BadValue {
            verb: self.verb.to_string(),
            arg,
            value: raw,
        })
    }

    fn optional_number(&self, idx: usize, arg: &'static str) -> Result<Option<f32>, CommandParseError> {
        if idx < self.args.len() {
            self.number(idx, arg).map(Some)
        } else {
            Ok(None)
        }
    }

    fn team(&self, idx: usize) -> Result<Option<Team>, CommandParseError> {
        match self.args.get(idx) {
            None => Ok(None),
            Some(raw) => Team::parse(raw).map(Some).ok_or_else(|| CommandParseError::BadValue {
                verb: self.verb.to_string(),
                arg: "team",
                value: raw.to_string(),
            }),
        }
    }
}

/// Dequeues every pending command in FIFO order and dispatches it.
///
/// Commands needing team or condition filtering become events rather than
/// writing state here.
pub struct CommandHandler;

impl Rule for CommandHandler {
    fn name(&self) -> &'static str {
        "commands"
    }

    fn apply(&mut self, world: &mut World) {
        let batch = world.commands.drain();
        if !batch.is_empty() {
            debug!("[Command] Tick {}: processing {} commands", world.tick, batch.len());
        }
        for command in batch {
            handle(world, &command);
            let tick = world.tick;
            world.commands.processed.push(StampedCommand { tick, command });
        }
    }
}

fn handle(world: &mut World, command: &Command) {
    match command {
        Command::Move { unit_id, x, y, forced } => {
            let Some(idx) = live_unit(world, unit_id, "move") else { return };
            let dest = (x.round() as i32, y.round() as i32);
            if *forced {
                let (cx, cy) = world.config.clamp(dest.0 as f32, dest.1 as f32);
                if world.units[idx].is_huge() {
                    // Phantoms travel with the head.
                    phantom::relocate_body(world, idx, (cx as i32, cy as i32));
                } else {
                    world.units[idx].pos_x = cx;
                    world.units[idx].pos_y = cy;
                }
            } else if !movement::attempt_move(world, idx, dest) {
                debug!("[Command] Move of {} to {:?} blocked", unit_id, dest);
            }
        }
        Command::Toss { unit_id, dx, dy, distance, source } => {
            if live_unit(world, unit_id, "toss").is_none() {
                return;
            }
            let distance = distance.unwrap_or(world.config.toss_distance);
            world.queue_event(Event {
                kind: EventKind::Knockback { dx: *dx, dy: *dy, distance },
                source: source.clone(),
                target: Some(Target::Unit(unit_id.clone())),
                tick: None,
            });
        }
        Command::Deploy { template, x, y, team } => {
            let Some(found) = world.templates.lookup(template).cloned() else {
                warn!("[Command] Deploy of unknown template '{}' dropped", template);
                return;
            };
            let id = world.next_unit_id(template);
            let mut unit = found.instantiate(id, *x, *y);
            if let Some(team) = team {
                unit.team = *team;
            }
            world.queue_event(Event::spawn(unit, *x, *y));
        }
        Command::Spawn { unit } => {
            let (x, y) = (unit.pos_x, unit.pos_y);
            world.queue_event(Event::spawn((**unit).clone(), x, y));
        }
        Command::Damage { unit_id, amount, source } => {
            if live_unit(world, unit_id, "damage").is_none() {
                return;
            }
            world.queue_event(Event::damage(source.clone(), unit_id.clone(), *amount));
        }
        Command::Heal { unit_id, amount, source } => {
            if live_unit(world, unit_id, "heal").is_none() {
                return;
            }
            world.queue_event(Event::heal(source.clone(), unit_id.clone(), *amount));
        }
        Command::Lightning { x, y } => {
            let (radius, amount) = (world.config.lightning_radius, world.config.lightning_damage);
            world.queue_event(Event {
                kind: EventKind::Aoe {
                    radius,
                    amount,
                    aspect: Aspect::Damage,
                    mass: None,
                    team: None,
                },
                source: None,
                target: Some(Target::Point { x: *x, y: *y }),
                tick: None,
            });
        }
        Command::Weather { kind, duration, intensity } => {
            debug!("[Command] Weather set to {} for {} ticks", kind, duration);
            world.weather = Some(Weather {
                kind: kind.clone(),
                remaining_ticks: *duration,
                intensity: *intensity,
            });
        }
        Command::Fire { unit_id, x, y, speed, arc, explode_radius } => {
            let Some(idx) = live_unit(world, unit_id, "fire") else { return };
            let speed = speed
                .or_else(|| world.units[idx].meta_f32("projectileSpeed"))
                .unwrap_or(world.config.projectile_default_speed);
            let shooter = &world.units[idx];
            let shot = if *arc {
                Projectile::lobbed(shooter, *x, *y, speed, world.config.projectile_gravity)
            } else {
                Projectile::aimed(shooter, *x, *y, speed)
            };
            if let Some(mut projectile) = shot {
                projectile.explode_radius = *explode_radius;
                world.projectiles.push(projectile);
            }
        }
        Command::Unknown => {
            warn!("[Command] Unknown command type dropped");
        }
    }
}

fn live_unit(world: &World, unit_id: &str, verb: &str) -> Option<usize> {
    match world.index_of(unit_id) {
        Some(idx) if world.units[idx].is_alive() => Some(idx),
        Some(_) => {
            debug!("[Command] {} for dead unit {} dropped", verb, unit_id);
            None
        }
        None => {
            warn!("[Command] {} references unknown unit {}", verb, unit_id);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SimConfig;

    #[test]
    fn parses_surface_verbs() {
        assert_eq!(
            parse_command_line("weather rain 100 0.8").unwrap(),
            Command::Weather {
                kind: "rain".into(),
                duration: 100,
                intensity: 0.8
            }
        );
        assert_eq!(
            parse_command_line("deploy clanker 10 10 friendly").unwrap(),
            Command::Deploy {
                template: "clanker".into(),
                x: 10.0,
                y: 10.0,
                team: Some(Team::Friendly)
            }
        );
        assert_eq!(
            parse_command_line("lightning 5 5").unwrap(),
            Command::Lightning { x: 5.0, y: 5.0 }
        );
    }

    #[test]
    fn rejects_bad_lines() {
        assert_eq!(parse_command_line("   "), Err(CommandParseError::Empty));
        assert_eq!(
            parse_command_line("teleport a 1 2"),
            Err(CommandParseError::UnknownVerb("teleport".into()))
        );
        assert!(matches!(
            parse_command_line("lightning 5"),
            Err(CommandParseError::MissingArgument { arg: "y", .. })
        ));
        assert!(matches!(
            parse_command_line("deploy clanker x 1"),
            Err(CommandParseError::BadValue { arg: "x", .. })
        ));
        assert!(matches!(
            parse_command_line("deploy clanker 1 1 purple"),
            Err(CommandParseError::BadValue { arg: "team", .. })
        ));
    }

    #[test]
    fn unknown_json_type_decodes_to_unknown() {
        let command: Command = serde_json::from_str(r#"{"type": "bogus", "unit_id": "a"}"#).unwrap();
        assert_eq!(command, Command::Unknown);
    }

    #[test]
    fn json_commands_round_trip_through_tag() {
        let command: Command =
            serde_json::from_str(r#"{"type": "move", "unit_id": "a", "x": 3, "y": 4}"#).unwrap();
        assert_eq!(command.unit_id(), Some("a"));
        assert_eq!(command.verb(), "move");
    }

    #[test]
    fn handler_drains_queue_and_stamps() {
        let mut world = World::new(SimConfig::default(), 1);
        world.insert_unit(Unit::new("a", Team::Friendly, 0.0, 0.0));
        world.queue_command(Command::Unknown);
        world.queue_command(Command::Damage {
            unit_id: "a".into(),
            amount: Some(3.0),
            source: None,
        });
        world.queue_command(Command::Damage {
            unit_id: "missing".into(),
            amount: Some(3.0),
            source: None,
        });
        world.tick = 4;

        CommandHandler.apply(&mut world);

        assert!(world.commands.is_empty());
        assert_eq!(world.commands.processed().len(), 3);
        assert!(world.commands.processed().iter().all(|c| c.tick == 4));
        // Only the valid damage command turned into an event.
        assert_eq!(world.events.len(), 1);
        assert_eq!(world.units()[0].hp, 10.0);
    }

    #[test]
    fn weather_command_sets_environment() {
        let mut world = World::new(SimConfig::default(), 1);
        world.queue_command(parse_command_line("weather rain 100 0.8").unwrap());
        CommandHandler.apply(&mut world);
        let weather = world.weather().unwrap();
        assert_eq!(weather.kind, "rain");
        assert_eq!(weather.remaining_ticks, 100);
    }

    #[test]
    fn forced_move_is_clamped() {
        let mut world = World::new(SimConfig::default(), 1);
        world.insert_unit(Unit::new("a", Team::Friendly, 0.0, 0.0));
        world.queue_command(Command::Move {
            unit_id: "a".into(),
            x: 100.0,
            y: 3.0,
            forced: true,
        });
        CommandHandler.apply(&mut world);
        assert_eq!(world.units()[0].cell(), (31, 3));
    }

    #[test]
    fn forced_move_carries_a_huge_body() {
        let mut world = World::new(SimConfig::default(), 1);
        let mut titan = Unit::new("titan", Team::Neutral, 10.0, 5.0);
        titan.tags.insert(crate::unit::TAG_HUGE.to_string());
        world.insert_unit(titan);
        phantom::PhantomRule.apply(&mut world);
        crate::event::EventHandler.apply(&mut world);
        assert_eq!(world.units().len(), 4);

        world.queue_command(Command::Move {
            unit_id: "titan".into(),
            x: 3.0,
            y: 3.0,
            forced: true,
        });
        CommandHandler.apply(&mut world);

        let head = world.find("titan").unwrap().cell();
        assert_eq!(head, (3, 3));
        for unit in world.units().iter().filter(|u| u.is_phantom()) {
            let (dx, dy) = phantom::phantom_offset(unit);
            assert_eq!(unit.cell(), (head.0 + dx, head.1 + dy), "{}", unit.id);
        }
    }
}
