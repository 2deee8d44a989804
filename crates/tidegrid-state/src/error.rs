//! Store errors.
//!
//! redb reports a distinct error type per operation; they are flattened to
//! their message here so callers match on the failing step only.

use thiserror::Error;

pub type StateResult<T> = Result<T, StateError>;

#[derive(Debug, Error)]
pub enum StateError {
    #[error("cannot open state store: {0}")]
    Open(String),

    #[error("redb transaction: {0}")]
    Transaction(String),

    #[error("redb table: {0}")]
    Table(String),

    #[error("redb read: {0}")]
    Read(String),

    #[error("redb write: {0}")]
    Write(String),

    /// A value could not be encoded as JSON.
    #[error("encoding value: {0}")]
    Serialize(String),

    /// A stored value no longer matches its type.
    #[error("decoding stored value: {0}")]
    Deserialize(String),
}
