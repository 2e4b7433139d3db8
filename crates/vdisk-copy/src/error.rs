use thiserror::Error;
use vdisk_provider::ProviderError;

pub type Result<T> = std::result::Result<T, CopyError>;

#[derive(Debug, Error)]
pub enum CopyError {
    #[error("read at offset {offset}: {source}")]
    Source {
        offset: u64,
        source: ProviderError,
    },

    /// Source returned no data for a non-empty request before the end of
    /// the extent.
    #[error("source returned no data at offset {offset} with {remaining} bytes remaining")]
    ShortRead { offset: u64, remaining: u64 },

    #[error("destination: {0}")]
    Dest(#[from] std::io::Error),

    #[error("copy cancelled at offset {0}")]
    Cancelled(u64),

    #[error("chunk size must be non-zero")]
    ZeroChunkSize,

    #[error("unknown hash algorithm {0:?}")]
    UnknownHashAlgorithm(String),
}
