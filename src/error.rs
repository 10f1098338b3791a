use thiserror::Error;

/// Failure taxonomy for the analysis engine.
///
/// Division by zero in the percentage formulas is deliberately absent:
/// every formula substitutes 0 for a non-positive denominator so that
/// placeholder values entered during iterative lab work never abort a
/// submission.
#[derive(Error, Debug)]
pub enum EngineError {
    /// A required form field is absent or not a finite number. The
    /// submission is rejected before anything is written.
    #[error("invalid or missing field: {field}")]
    Validation { field: String },

    /// The aggregator needs exactly three finite replicate values.
    #[error("triplicate requires exactly 3 finite replicate values, got {got}")]
    InsufficientData { got: usize },

    /// A Carbohydrate row already exists for this (user, sample). Raised
    /// by the store's strict derived insert; the engine downgrades it to
    /// an "already stored" outcome rather than surfacing it to the user.
    #[error("carbohydrate already derived for sample '{sample}'")]
    DuplicateDerivedResult { sample: String },

    /// The persistence layer is unreachable or rejected the statement.
    /// Surfaced as-is; the engine never retries on its own.
    #[error("analysis store unavailable: {0}")]
    StoreUnavailable(#[from] rusqlite::Error),

    /// Registration with an email that is already taken.
    #[error("email '{email}' is already registered")]
    EmailTaken { email: String },

    /// Password hashing or hash parsing failed.
    #[error("credential processing failed: {0}")]
    Credential(String),

    /// The caller's role does not permit the operation.
    #[error("operation requires administrator access")]
    NotAuthorized,

    /// Workbook rendering failed while exporting to a spreadsheet.
    #[error("spreadsheet export failed: {0}")]
    Workbook(#[from] rust_xlsxwriter::XlsxError),

    /// JSON rendering of export rows failed.
    #[error("serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl EngineError {
    /// Whether the failure is something the submitting user can fix by
    /// correcting their input, as opposed to an infrastructure fault.
    pub fn is_user_error(&self) -> bool {
        match self {
            EngineError::Validation { .. } => true,
            EngineError::InsufficientData { .. } => true,
            EngineError::EmailTaken { .. } => true,
            EngineError::NotAuthorized => true,
            EngineError::DuplicateDerivedResult { .. } => false,
            EngineError::StoreUnavailable(_) => false,
            EngineError::Credential(_) => false,
            EngineError::Workbook(_) => false,
            EngineError::Serialization(_) => false,
        }
    }
}
