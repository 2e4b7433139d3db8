use thiserror::Error;

pub type Result<T> = std::result::Result<T, ProtoError>;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProtoError {
    #[error("buffer too small: need {need} bytes, have {have}")]
    BufferTooSmall { need: usize, have: usize },

    #[error("unknown request code {0:#x}")]
    UnknownRequestCode(u64),

    #[error("unknown shared operation code {0:#x}")]
    UnknownSharedOp(u64),

    #[error("unknown control code {0:#x}")]
    UnknownControlCode(u32),

    #[error("control response signature mismatch")]
    ProtocolMismatch,

    #[error("payload length {len} exceeds buffer capacity {capacity}")]
    PayloadTooLarge { len: u64, capacity: usize },
}
