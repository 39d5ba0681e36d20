use formkit_core::{CoreError, RecordId};
use formkit_storage::StorageError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("module not found: {0}")]
    ModuleNotFound(String),

    #[error("form not found: {0}")]
    FormNotFound(String),

    #[error("section not found: {0}")]
    SectionNotFound(String),

    #[error("subform not found: {0}")]
    SubformNotFound(String),

    #[error("field not found: {0}")]
    FieldNotFound(String),

    #[error("unknown lookup source: {0}")]
    UnknownSource(String),

    #[error("invalid field: {0}")]
    InvalidField(String),
}

/// Failures of lookup-relation bookkeeping. These never escape the relation
/// hook; they are logged and the relation write is skipped.
#[derive(Debug, Error)]
pub enum LookupError {
    #[error("lookup field {field_id} declares no source")]
    MissingSource { field_id: String },

    #[error("lookup field {field_id}: {source}")]
    ReservedSourceId {
        field_id: String,
        #[source]
        source: CoreError,
    },

    #[error("lookup source {source_id} not found: {reason}")]
    SourceNotFound { source_id: String, reason: String },

    #[error("cannot resolve form/module for field {field_id}: {reason}")]
    AncestryNotFound { field_id: String, reason: String },

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
}

/// Rejections of a form submission. These are surfaced to the caller.
#[derive(Debug, Error)]
pub enum SubmissionError {
    #[error("submission contains no values")]
    EmptyPayload,

    #[error("submission references unknown fields: {}", field_ids.join(", "))]
    UnknownField { field_ids: Vec<String> },

    #[error("duplicate submission of existing record {record_id}")]
    DuplicateSubmission { record_id: RecordId },

    #[error("form not found: {0}")]
    FormNotFound(String),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("core error: {0}")]
    Core(#[from] CoreError),
}
