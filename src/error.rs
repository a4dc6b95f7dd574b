use thiserror::Error;

#[derive(Error, Debug)]
pub enum BillingError {
    #[error("Validation error: {0}")]
    ValidationError(String),
    #[error("Authorization error: {0}")]
    AuthorizationError(String),
    #[error("Invalid operation: {0}")]
    InvalidOperationError(String),
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: String },
    #[error("Invalid funding instrument {uri}: {reason}")]
    InvalidInstrument { uri: String, reason: String },
    #[error("Storage conflict: {0}")]
    Conflict(String),
    #[error("CSV error: {0}")]
    CsvError(#[from] csv::Error),
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Serialization error: {0}")]
    SerdeError(#[from] serde_json::Error),
    #[cfg(feature = "storage-rocksdb")]
    #[error("RocksDB error: {0}")]
    RocksDbError(#[from] rocksdb::Error),
    #[error("Internal error: {0}")]
    InternalError(Box<dyn std::error::Error + Send + Sync>),
}

impl BillingError {
    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity,
            id: id.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, BillingError>;

/// Details of a failed submission as reported by the processor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessorFailure {
    pub message: String,
    pub code: Option<String>,
    pub number: Option<i64>,
}

impl ProcessorFailure {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            code: None,
            number: None,
        }
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    pub fn with_number(mut self, number: i64) -> Self {
        self.number = Some(number);
        self
    }
}

impl std::fmt::Display for ProcessorFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.code {
            Some(code) => write!(f, "{} ({})", self.message, code),
            None => write!(f, "{}", self.message),
        }
    }
}

/// Outcome of a call to the payment processor that did not succeed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProcessorError {
    /// Transient failure (rate limiting, network trouble, timeouts). Worth retrying.
    #[error("recoverable processor error: {0}")]
    Recoverable(ProcessorFailure),
    /// Declined, closed account and the like. Retrying will not help.
    #[error("permanent processor error: {0}")]
    Permanent(ProcessorFailure),
    #[error("invalid funding instrument: {0}")]
    InvalidInstrument(String),
}

impl ProcessorError {
    pub fn is_recoverable(&self) -> bool {
        matches!(self, ProcessorError::Recoverable(_))
    }

    /// The failure record to keep for this error.
    pub fn failure(&self) -> ProcessorFailure {
        match self {
            ProcessorError::Recoverable(failure) | ProcessorError::Permanent(failure) => {
                failure.clone()
            }
            ProcessorError::InvalidInstrument(reason) => {
                ProcessorFailure::new(reason.clone()).with_code("invalid-funding-instrument")
            }
        }
    }
}
