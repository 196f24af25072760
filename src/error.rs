/// Construction-time configuration failures. The engine refuses to start
/// rather than run with nonsensical thresholds.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Failures from `Engine::restore`. The engine's prior state is left
/// untouched when these occur.
#[derive(Debug, thiserror::Error)]
pub enum SnapshotError {
    #[error("snapshot engine version {found} is incompatible with {expected}")]
    VersionMismatch { expected: u32, found: u32 },
    #[error("malformed snapshot: {0}")]
    Malformed(String),
}

/// Top-level engine error. `NotFound` is intentionally absent here — a
/// missing entry id is a recoverable signal (a concurrent prune may have
/// removed it), surfaced as `Option::None`, not an `Err` variant.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("config error: {0}")]
    Config(#[from] ConfigError),
    #[error("snapshot error: {0}")]
    Snapshot(#[from] SnapshotError),
}
