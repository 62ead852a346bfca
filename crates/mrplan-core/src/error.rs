use thiserror::Error;

use crate::id::{JobId, OpId};

/// Canonical result for core and the planner.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// Internal defect: the plan or the compiler broke an invariant.
    #[error("structural violation{}: {msg}", fmt_op(.op))]
    Structural { op: Option<OpId>, msg: String },

    /// The input asks for something this compiler cannot lower.
    #[error("unsupported input{}: {msg}", fmt_op(.op))]
    UserInput { op: Option<OpId>, msg: String },

    /// The environment could not answer a question (e.g. cluster reducer count).
    #[error("environment: {0}")]
    Environment(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("plan parse error: {0}")]
    Parse(String),

    #[error("Hashing error: {0}")]
    Hash(String),
}

/// Coarse classification so callers can tell user errors from compiler defects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Structural,
    UserInput,
    Environment,
    Config,
    Parse,
    Hash,
}

impl Error {
    pub fn structural(op: Option<OpId>, msg: impl Into<String>) -> Self {
        Error::Structural {
            op,
            msg: msg.into(),
        }
    }

    pub fn user_input(op: Option<OpId>, msg: impl Into<String>) -> Self {
        Error::UserInput {
            op,
            msg: msg.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Structural { .. } => ErrorKind::Structural,
            Error::UserInput { .. } => ErrorKind::UserInput,
            Error::Environment(_) => ErrorKind::Environment,
            Error::Config(_) => ErrorKind::Config,
            Error::Parse(_) => ErrorKind::Parse,
            Error::Hash(_) => ErrorKind::Hash,
        }
    }

    /// Operator the failure is attributed to, if any.
    pub fn op(&self) -> Option<OpId> {
        match self {
            Error::Structural { op, .. } | Error::UserInput { op, .. } => *op,
            _ => None,
        }
    }
}

fn fmt_op(op: &Option<OpId>) -> String {
    op.map(|id| format!(" at {id}")).unwrap_or_default()
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Hash(e.to_string())
    }
}

/// Non-fatal condition observed during compilation.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Warning {
    pub op: Option<OpId>,
    pub job: Option<JobId>,
    pub message: String,
}

impl std::fmt::Display for Warning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if let Some(job) = self.job {
            write!(f, "[{job}] ")?;
        }
        if let Some(op) = self.op {
            write!(f, "[{op}] ")?;
        }
        write!(f, "{}", self.message)
    }
}
