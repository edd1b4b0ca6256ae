use crate::types::{DocumentType, RecordId, Role};

pub type Result<T> = std::result::Result<T, WorkflowError>;

#[derive(thiserror::Error, Debug)]
pub enum WorkflowError {
    #[error("Record {0} was not found")]
    RecordNotFound(String),
    #[error("Linked resource {0} was not found")]
    ResourceNotFound(String),
    #[error("No {doc_type} rule for action '{action}' from status '{status}'")]
    InvalidTransition {
        doc_type: DocumentType,
        status: String,
        action: String,
    },
    #[error("Action '{action}' requires role {required}, actor has {actual}")]
    Forbidden {
        action: String,
        required: Role,
        actual: Role,
    },
    #[error("Field '{field}' is invalid: {reason}")]
    Validation { field: String, reason: String },
    #[error("Record {id} changed concurrently, expected version {expected}")]
    ConcurrencyConflict { id: RecordId, expected: u64 },
    #[error("Resource {resource_code} holds {available}, cannot remove {requested}")]
    InsufficientStock {
        resource_code: String,
        available: u64,
        requested: u64,
    },
    #[error("Document number {0} is already taken")]
    DuplicateNumber(String),
    #[error("Encoding failed: {0}")]
    Encoding(String),
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Storage(#[from] sled::Error),
}

impl WorkflowError {
    pub fn validation(field: impl Into<String>, reason: impl Into<String>) -> Self {
        WorkflowError::Validation {
            field: field.into(),
            reason: reason.into(),
        }
    }
    /// Only a version conflict may be retried by re-reading the record.
    pub fn is_retryable(&self) -> bool {
        matches!(self, WorkflowError::ConcurrencyConflict { .. })
    }
}

/// Problems found while assembling a state machine table
#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum RegistryError {
    #[error("{doc_type} declares '{action}' from '{status}' more than once")]
    DuplicateRule {
        doc_type: DocumentType,
        status: String,
        action: String,
    },
    #[error("{doc_type} references undeclared status '{status}'")]
    UnknownStatus {
        doc_type: DocumentType,
        status: String,
    },
    #[error("{doc_type} has an outgoing rule from terminal status '{status}'")]
    TerminalHasRule {
        doc_type: DocumentType,
        status: String,
    },
    #[error("{0} has no initial status")]
    MissingInitial(DocumentType),
    #[error("{0} is registered twice")]
    DuplicateMachine(DocumentType),
}

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("failed to read {}: {source}", .path.display())]
    Read {
        path: std::path::PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("sequence_width must be at least 3, got {0}")]
    SequenceWidth(usize),
    #[error("storage needs a path unless it is temporary")]
    MissingPath,
}
