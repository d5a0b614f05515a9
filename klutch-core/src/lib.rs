pub mod config;
pub mod objects;
pub mod patch;
pub mod sequence;

/// Token emitted by a trigger source onto the shared trigger channel.
///
/// Triggers are fire-and-coalesce: any number of pending tokens starts at
/// most one scaling sequence, the engine drains and ignores the rest.
#[derive(Clone, Debug)]
pub struct Trigger {
    /// Name of the source that fired, only used for logging.
    pub source: String,
}

impl Trigger {
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
        }
    }
}
