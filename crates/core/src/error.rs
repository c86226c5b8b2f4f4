use nutri_types::EntityId;

#[derive(Debug, thiserror::Error)]
pub enum ConsoleError {
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("Entity {entity} with ID {id} not found")]
    NotFound { entity: String, id: String },
    #[error("{message}")]
    Request {
        status: u16,
        message: String,
        body: serde_json::Value,
        /// Seconds from a `Retry-After` response header, when the server sent one.
        retry_after: Option<u64>,
    },
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error(
        "{entity} {id} was saved but reverse links failed at {failed_id} ({committed} already updated): {source}",
        committed = committed.len()
    )]
    LinkSync {
        entity: &'static str,
        id: EntityId,
        committed: Vec<EntityId>,
        failed_id: EntityId,
        #[source]
        source: Box<ConsoleError>,
    },

    #[error("unsupported import format: {0}")]
    UnsupportedImport(String),
    #[error("failed to read or write file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to (de)serialize JSON: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("failed to parse CSV: {0}")]
    Csv(#[from] csv::Error),
    #[error("text generation failed: {0}")]
    TextGeneration(String),
    #[error("upload failed: {0}")]
    Upload(String),
}

impl ConsoleError {
    /// HTTP status carried by the error, when it came from a response.
    pub fn status(&self) -> Option<u16> {
        match self {
            ConsoleError::Request { status, .. } => Some(*status),
            ConsoleError::NotFound { .. } => Some(404),
            _ => None,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, ConsoleError::NotFound { .. })
    }
}

pub type ConsoleResult<T> = std::result::Result<T, ConsoleError>;
