//! Error taxonomy for the object storage port.
//!
//! Adapters translate their SDK's failures into these abstract kinds; the
//! daemon maps them to kernel errnos at the FUSE boundary. Nothing in this
//! crate retries — retry policy, if any, belongs to an adapter.

pub type Result<T> = std::result::Result<T, StoreError>;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The key (or prefix) does not exist in the bucket.
    #[error("object not found")]
    NotFound,

    /// The store rejected the caller's credentials or the operation.
    #[error("access denied: {0}")]
    Denied(String),

    /// Network failure, timeout, cancellation, or any other transient fault.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// A conflicting object already exists at the key.
    #[error("object already exists")]
    AlreadyExists,

    /// The key or argument is malformed.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

impl StoreError {
    /// True for faults worth retrying by an adapter, were one to do so.
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Unavailable(_))
    }
}
