use thiserror::Error;

/// Canonical result for the compiler.
pub type Result<T> = std::result::Result<T, Error>;

/// Every variant is fatal for the compilation that raised it; no partial plan
/// is produced.
#[derive(Debug, Error)]
pub enum Error {
    #[error("unsupported operator {op}: {reason}")]
    UnsupportedOperator { op: String, reason: String },

    #[error("invalid join condition: {0}")]
    InvalidJoinCondition(String),

    #[error("inconsistent shuffle state: {0}")]
    InconsistentShuffleState(String),

    #[error("malformed DoWhile: {0}")]
    MalformedDoWhile(String),

    #[error("hypercube search visited {visited} assignments, exceeding the limit of {limit}")]
    SearchBound { visited: usize, limit: usize },

    #[error("Schema error: {0}")]
    Schema(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Internal invariant failed: {0}")]
    Invariant(String),
}

impl Error {
    pub fn unsupported(op: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::UnsupportedOperator {
            op: op.into(),
            reason: reason.into(),
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Parse(e.to_string())
    }
}

impl From<serde_yaml::Error> for Error {
    fn from(e: serde_yaml::Error) -> Self {
        Error::Parse(e.to_string())
    }
}
