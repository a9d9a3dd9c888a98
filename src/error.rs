use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    #[error("No home directory")]
    NoHomeDir,

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid plan: {0}")]
    InvalidPlan(String),

    #[error("Planning error: {0}")]
    Planning(String),

    #[error("Step {step_id} failed: {message}")]
    Step {
        step_id: String,
        message: String,
        /// The handler found earlier step output unusable.
        data_corrupted: bool,
    },

    #[error("Unknown category: {0}")]
    UnknownCategory(String),

    #[error("Orchestration error: {0}")]
    Orchestration(String),

    #[error("Task not found: {0}")]
    TaskNotFound(String),

    #[error("Task cancelled: {0}")]
    TaskCancelled(String),

    #[error("Operation timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("Task join error: {0}")]
    TaskJoin(String),
}

impl Error {
    /// The message used for keyword classification.
    ///
    /// Step failures classify on the handler's own message so that the
    /// step id never leaks into the keyword match.
    pub fn classification_text(&self) -> String {
        match self {
            Error::Step { message, .. } => message.clone(),
            other => other.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
