//! Wire formats for the vdisk proxy protocol and driver control channel.
//!
//! Two independent framings live here:
//!
//! - [`wire`]: the synchronous request/response messages exchanged through a
//!   shared memory region between the driver and a transport server.
//! - [`control`]: the vendor control buffer sent to the driver to create,
//!   query and remove proxied devices.

mod control;
mod error;
mod wire;

pub use control::{
    decode_control_response, encode_control_request, pad_signature, ControlCode, ControlResponse,
    CONTROL_HEADER_SIZE, CONTROL_SIGNATURE,
};
pub use error::{ProtoError, Result};
pub use wire::{
    decode_info_response, decode_io_request, decode_io_response, decode_range_request,
    decode_range_response, decode_request_code, decode_scsi_request, decode_shared_request,
    decode_shared_response, encode_bare_request, encode_info_response, encode_io_request,
    encode_io_response, encode_range_request, encode_range_response, encode_scsi_request,
    encode_shared_error, encode_shared_request, encode_shared_response, errno, errno_for,
    shared_errno, shared_errno_for, DecodedSharedResponse, InfoFlags, InfoResponse, IoRequest,
    IoResponse, RangeEntry, ReqCode, ScsiRequest, HEADER_SIZE, PAYLOAD_OFFSET, RANGE_ENTRY_SIZE,
};
