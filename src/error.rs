use thiserror::Error;

/// Errors surfaced by tree construction, configuration, and serialization.
///
/// Coordinate-out-of-range is deliberately *not* a variant here: `search`,
/// `insert_ray` and friends report it by returning `None`/`false`, since it
/// is an expected, frequent outcome for a sensor integration loop, not an
/// exceptional one.
#[derive(Debug, Error)]
pub enum OcTreeError {
    #[error("invalid tree configuration: {0}")]
    InvalidConfig(String),

    #[error("malformed serialized input: {0}")]
    MalformedInput(String),

    #[error("I/O error")]
    Io(#[from] std::io::Error),
}
