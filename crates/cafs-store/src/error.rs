use cafs_crypto::HasherError;
use cafs_types::Key;

use crate::network::StoreId;

/// Errors from store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The key is absent locally and on every reachable neighbor.
    #[error("not found: {0}")]
    NotFound(Key),

    /// Directory iteration was requested on a leaf.
    #[error("not a directory")]
    NotDirectory,

    /// A byte read was requested on a directory.
    #[error("file is not readable")]
    NotReader,

    #[error("already pinned")]
    AlreadyPinned,

    #[error("not pinned")]
    NotPinned,

    /// Reading source bytes failed.
    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    /// Computing a content key failed.
    #[error("error hashing file data: {0}")]
    Hash(#[from] HasherError),

    /// Resolving a child of a stored directory failed.
    #[error("error resolving directory child {key}: {source}")]
    Child {
        key: Key,
        #[source]
        source: Box<StoreError>,
    },

    /// An explicit fetch was requested on a store with no neighbors.
    #[error("this store cannot fetch from remote sources")]
    NoPeers,

    /// A fetch named a peer that is not linked to this store.
    #[error("store {0} is not a linked peer")]
    NotLinked(StoreId),

    /// Stores from different networks cannot be linked.
    #[error("stores belong to different networks")]
    ForeignNetwork,

    /// The adder session was already closed, or its worker stopped.
    #[error("adder is closed")]
    AdderClosed,

    /// The adder session was cancelled.
    #[error("adder was cancelled")]
    Cancelled,

    /// Background ingestion needs a tokio runtime.
    #[error("no tokio runtime available for background ingestion")]
    NoRuntime,

    /// Explicit cache population requires a secondary store.
    #[error("cache has no secondary store")]
    CacheUnavailable,

    /// Configuration could not be read or parsed.
    #[error("config error: {0}")]
    Config(String),
}

impl StoreError {
    /// Wrap an I/O error with a description of what was being done.
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    /// Returns `true` if this error, or the cause of a child failure, is
    /// [`StoreError::NotFound`].
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::NotFound(_) => true,
            Self::Child { source, .. } => source.is_not_found(),
            _ => false,
        }
    }
}

/// Result alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;
