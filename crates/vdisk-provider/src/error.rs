use thiserror::Error;

pub type Result<T> = std::result::Result<T, ProviderError>;

/// Unified error type for provider resolution and provider I/O.
///
/// Resolver-time failures (`NotFound`, `UnsupportedFormat`,
/// `UnsupportedAccessMode`, `Aborted`) are reported to the caller before any
/// service session starts; the remaining variants can surface mid-session and
/// are encoded into protocol responses by the transport layer.
///
/// [`ProviderError::Io`] stores the rendered message rather than the
/// `std::io::Error` itself; the transport layer only needs it for errno
/// mapping and logging.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("image not found: {0}")]
    NotFound(String),

    #[error("unrecognized container format: {0}")]
    UnsupportedFormat(String),

    #[error("access mode {mode} is not supported by proxy kind {kind}")]
    UnsupportedAccessMode { kind: &'static str, mode: &'static str },

    #[error("provider is read-only")]
    ReadOnly,

    #[error("short read: offset={offset} requested={requested} got={got}")]
    ShortRead {
        offset: u64,
        requested: usize,
        got: usize,
    },

    #[error("short write: offset={offset} requested={requested} wrote={wrote}")]
    WriteMismatch {
        offset: u64,
        requested: usize,
        wrote: usize,
    },

    #[error("out of bounds: offset={offset} len={len} capacity={capacity}")]
    OutOfBounds {
        offset: u64,
        len: usize,
        capacity: u64,
    },

    #[error("integer overflow while computing byte offsets")]
    OffsetOverflow,

    #[error("operation not supported: {0}")]
    NotSupported(&'static str),

    #[error("invalid parameter: {0}")]
    InvalidParameter(&'static str),

    #[error("reservation conflicts with an existing holder")]
    ReservationCollision,

    #[error("aborted: {0}")]
    Aborted(String),

    #[error("io error: {0}")]
    Io(String),
}

impl From<std::io::Error> for ProviderError {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value.to_string())
    }
}
