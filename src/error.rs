use thiserror::Error;

/// Why a persisted agent snapshot was rejected. The live agent is untouched
/// whenever one of these is returned.
#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("unsupported snapshot version {found} (expected {expected})")]
    Version { found: u32, expected: u32 },

    #[error("{network} network is {found:?} (in, hidden, out) but the agent needs {expected:?}")]
    Topology {
        network: &'static str,
        expected: (usize, usize, usize),
        found: (usize, usize, usize),
    },

    #[error("{tensor} has {found} values, expected {expected}")]
    Shape {
        tensor: &'static str,
        expected: usize,
        found: usize,
    },

    #[error("replay transition {index}: {reason}")]
    Transition { index: usize, reason: String },

    #[error("{0} contains a non-finite value")]
    NonFinite(&'static str),

    #[error("malformed snapshot: {0}")]
    Json(#[from] serde_json::Error),

    #[error("snapshot i/o: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config i/o: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed config: {0}")]
    Json(#[from] serde_json::Error),
}
