use thiserror::Error;
use vdisk_proto::ControlCode;

pub type Result<T> = std::result::Result<T, ServiceError>;

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error(transparent)]
    Provider(#[from] vdisk_provider::ProviderError),

    #[error(transparent)]
    Proto(#[from] vdisk_proto::ProtoError),

    /// The serving peer released its liveness mutex without responding.
    /// Terminal for the session; never retried.
    #[error("peer exited without responding")]
    PeerExited,

    #[error("channel closed")]
    ChannelClosed,

    #[error("driver rejected {code:?} with return code {return_code:#x}")]
    Driver {
        code: ControlCode,
        return_code: u32,
    },

    #[error("dismount not confirmed within {0:?}; session force-stopped")]
    Timeout(std::time::Duration),

    #[error("session is in state {0}, expected {1}")]
    BadState(&'static str, &'static str),

    /// Remote peer reported a non-zero errno in a protocol response.
    #[error("remote error {errorno} for {op}")]
    Remote { op: &'static str, errorno: u64 },

    #[error("io error: {0}")]
    Io(String),
}
