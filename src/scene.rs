//! Text scenes: a glyph grid, then metadata and setup commands.
//!
//! ```text
//! f..h
//! ....
//! ---
//! bg forest
//! weather rain 100 0.8
//! ```
//!
//! Each glyph maps to a template through a [`Legend`] and becomes a
//! `deploy` at `(column, row)`. `.` and space are empty cells.

use std::collections::BTreeMap;

use log::debug;
use serde::Serialize;

use crate::command::{parse_command_line, Command};
use crate::error::SceneError;

const SEPARATOR: &str = "---";

/// Glyph to template name.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Legend {
    glyphs: BTreeMap<char, String>,
}

impl Legend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, glyph: char, template: impl Into<String>) -> Self {
        self.glyphs.insert(glyph, template.into());
        self
    }

    pub fn get(&self, glyph: char) -> Option<&str> {
        self.glyphs.get(&glyph).map(String::as_str)
    }
}

impl FromIterator<(char, String)> for Legend {
    fn from_iter<I: IntoIterator<Item = (char, String)>>(iter: I) -> Self {
        Self {
            glyphs: iter.into_iter().collect(),
        }
    }
}

/// Renderer hints carried alongside the units.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SceneMeta {
    pub background: Option<String>,
    pub strip: bool,
    pub height: Option<u32>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Scene {
    pub width: i32,
    pub height: i32,
    /// Deploys in row-major order, then metadata commands in file order.
    pub commands: Vec<Command>,
    pub meta: SceneMeta,
}

pub fn parse_scene(text: &str, legend: &Legend) -> Result<Scene, SceneError> {
    let lines: Vec<&str> = text.lines().collect();
    let split = lines.iter().position(|l| l.trim() == SEPARATOR).unwrap_or(lines.len());

    let mut grid = &lines[..split];
    while let Some((last, rest)) = grid.split_last() {
        if !last.trim().is_empty() {
            break;
        }
        grid = rest;
    }
    let first = grid.iter().position(|l| !l.trim().is_empty()).ok_or(SceneError::Empty)?;
    let grid = &grid[first..];

    let mut commands = Vec::new();
    let mut width = 0;
    for (row, line) in grid.iter().enumerate() {
        let mut cols = 0;
        for (col, glyph) in line.chars().enumerate() {
            cols = col + 1;
            if glyph == '.' || glyph == ' ' {
                continue;
            }
            let template = legend.get(glyph).ok_or(SceneError::UnknownGlyph { glyph, row, col })?;
            commands.push(Command::Deploy {
                template: template.to_string(),
                x: col as f32,
                y: row as f32,
                team: None,
            });
        }
        width = width.max(cols);
    }
    let deploys = commands.len();

    let mut meta = SceneMeta::default();
    for (offset, raw) in lines.iter().enumerate().skip(split + 1) {
        let line_no = offset + 1;
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let mut words = line.split_whitespace();
        match words.next() {
            Some("bg") => {
                let name = words.next().ok_or_else(|| bad(line_no, "bg needs a name"))?;
                meta.background = Some(name.to_string());
            }
            Some("strip") => meta.strip = true,
            Some("height") => {
                let value = words.next().unwrap_or_default();
                let height = value
                    .parse()
                    .map_err(|_| bad(line_no, &format!("height '{}' is not a number", value)))?;
                meta.height = Some(height);
            }
            _ => {
                let command = parse_command_line(line).map_err(|e| bad(line_no, &e.to_string()))?;
                commands.push(command);
            }
        }
    }

    debug!(
        "[Scene] Parsed {}x{} grid: {} deploys, {} setup commands",
        width,
        grid.len(),
        deploys,
        commands.len() - deploys
    );
    Ok(Scene {
        width: width as i32,
        height: grid.len() as i32,
        commands,
        meta,
    })
}

fn bad(line: usize, reason: &str) -> SceneError {
    SceneError::BadMetadata {
        line,
        reason: reason.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn legend() -> Legend {
        Legend::new().with('f', "farmer").with('h', "hound")
    }

    #[test]
    fn grid_becomes_deploys() {
        let scene = parse_scene("f..h\n.f\n", &legend()).unwrap();
        assert_eq!((scene.width, scene.height), (4, 2));
        let placed: Vec<(String, f32, f32)> = scene
            .commands
            .iter()
            .map(|c| match c {
                Command::Deploy { template, x, y, .. } => (template.clone(), *x, *y),
                other => panic!("unexpected {:?}", other),
            })
            .collect();
        assert_eq!(
            placed,
            vec![
                ("farmer".to_string(), 0.0, 0.0),
                ("hound".to_string(), 3.0, 0.0),
                ("farmer".to_string(), 1.0, 1.0),
            ]
        );
    }

    #[test]
    fn metadata_and_setup_commands() {
        let text = "f\n---\nbg forest\nstrip\nheight 12\n\nweather rain 100 0.8\n";
        let scene = parse_scene(text, &legend()).unwrap();
        assert_eq!(scene.meta.background.as_deref(), Some("forest"));
        assert!(scene.meta.strip);
        assert_eq!(scene.meta.height, Some(12));
        assert_eq!(
            scene.commands.last(),
            Some(&Command::Weather {
                kind: "rain".into(),
                duration: 100,
                intensity: 0.8
            })
        );
    }

    #[test]
    fn unknown_glyph_reports_position() {
        assert_eq!(
            parse_scene("..\n.x", &legend()),
            Err(SceneError::UnknownGlyph { glyph: 'x', row: 1, col: 1 })
        );
    }

    #[test]
    fn bad_metadata_line() {
        let err = parse_scene("f\n---\nteleport 1 2", &legend()).unwrap_err();
        assert!(matches!(err, SceneError::BadMetadata { line: 3, .. }));
    }

    #[test]
    fn empty_grid() {
        assert_eq!(parse_scene("\n\n---\nbg x", &legend()), Err(SceneError::Empty));
    }
}
