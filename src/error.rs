use thiserror::Error;

/// Structural failures surfaced to the caller.
///
/// Bad per-tick input (unknown command types, dangling unit ids) never ends
/// up here; those are logged and dropped inside the tick.
#[derive(Debug, Error)]
pub enum SimError {
    #[error("invariant violated: {0}")]
    InvariantViolation(String),

    #[error("invalid config: {0}")]
    Config(#[source] serde_json::Error),

    #[error("invalid template catalog: {0}")]
    Catalog(#[source] serde_json::Error),

    #[error("invalid unit data: {0}")]
    Units(#[source] serde_json::Error),

    #[error("scene load failed: {0}")]
    Scene(#[from] SceneError),
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum SceneError {
    #[error("scene has no grid rows")]
    Empty,

    #[error("unknown glyph '{glyph}' at row {row}, column {col}")]
    UnknownGlyph { glyph: char, row: usize, col: usize },

    #[error("bad metadata on line {line}: {reason}")]
    BadMetadata { line: usize, reason: String },
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum CommandParseError {
    #[error("empty command line")]
    Empty,

    #[error("unknown verb '{0}'")]
    UnknownVerb(String),

    #[error("'{verb}' is missing argument <{arg}>")]
    MissingArgument { verb: String, arg: &'static str },

    #[error("'{verb}' got a bad value for <{arg}>: {value}")]
    BadValue {
        verb: String,
        arg: &'static str,
        value: String,
    },
}
