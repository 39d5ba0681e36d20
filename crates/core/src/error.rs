use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("invalid data: {0}")]
    InvalidData(String),

    #[error("source id {0:?} uses a reserved prefix (module_ or form_)")]
    ReservedSourceId(String),
}
