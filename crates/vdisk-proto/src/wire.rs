//! Fixed binary layouts for the proxy request/response protocol.
//!
//! Every message lives in a shared buffer whose first [`HEADER_SIZE`] bytes
//! form the header region; READ/WRITE payload bytes start at
//! [`PAYLOAD_OFFSET`]. All integers are little-endian and every enum travels
//! as an 8-byte code for alignment. The first 8 bytes of a request are
//! always the request code; responses reuse the same region starting at
//! offset 0.
//!
//! Encode/decode here are explicit byte-offset functions over plain buffers
//! so the layout is auditable in one place and round-trip tested.

use bitflags::bitflags;
use vdisk_provider::{ProviderError, SharedOp, SharedRequest, SharedResponse};

use crate::{ProtoError, Result};

/// Size of the header region shared by every command.
pub const HEADER_SIZE: usize = 4096;

/// READ/WRITE payload bytes are placed immediately after the header region.
pub const PAYLOAD_OFFSET: usize = HEADER_SIZE;

/// Request codes (first 8 bytes of every request header).
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[repr(u64)]
pub enum ReqCode {
    Info = 1,
    Read = 2,
    Write = 3,
    Connect = 4,
    Close = 5,
    Unmap = 6,
    Zero = 7,
    Scsi = 8,
    Shared = 9,
}

impl ReqCode {
    pub fn from_u64(value: u64) -> Result<Self> {
        Ok(match value {
            1 => Self::Info,
            2 => Self::Read,
            3 => Self::Write,
            4 => Self::Connect,
            5 => Self::Close,
            6 => Self::Unmap,
            7 => Self::Zero,
            8 => Self::Scsi,
            9 => Self::Shared,
            other => return Err(ProtoError::UnknownRequestCode(other)),
        })
    }
}

bitflags! {
    /// Capability bits in the INFO response `flags` word.
    #[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
    pub struct InfoFlags: u64 {
        const READ_ONLY = 1 << 0;
        const SUPPORTS_UNMAP = 1 << 1;
        const SUPPORTS_ZERO = 1 << 2;
        const SUPPORTS_SCSI = 1 << 3;
        const SUPPORTS_SHARED = 1 << 4;
    }
}

/// General-purpose response errno values for READ/WRITE/UNMAP/ZERO/SCSI.
pub mod errno {
    pub const NONE: u64 = 0;
    pub const IO: u64 = 1;
    pub const READ_ONLY: u64 = 2;
    pub const NOT_SUPPORTED: u64 = 3;
    pub const OUT_OF_BOUNDS: u64 = 4;
    pub const INVALID_PARAMETER: u64 = 5;
}

/// Map a provider failure to the errno word carried in I/O responses.
pub fn errno_for(error: &ProviderError) -> u64 {
    match error {
        ProviderError::ReadOnly => errno::READ_ONLY,
        ProviderError::NotSupported(_) => errno::NOT_SUPPORTED,
        ProviderError::OutOfBounds { .. } | ProviderError::OffsetOverflow => errno::OUT_OF_BOUNDS,
        ProviderError::InvalidParameter(_) => errno::INVALID_PARAMETER,
        _ => errno::IO,
    }
}

/// SHARED response errno values (spec-fixed, distinct from [`errno`]).
pub mod shared_errno {
    pub const NO_ERROR: u64 = 0;
    pub const RESERVATION_COLLISION: u64 = 1;
    pub const INVALID_PARAMETER: u64 = 2;
    pub const IO_ERROR: u64 = 3;
}

/// Map a provider failure to the SHARED response errno word.
pub fn shared_errno_for(error: &ProviderError) -> u64 {
    match error {
        ProviderError::ReservationCollision => shared_errno::RESERVATION_COLLISION,
        ProviderError::InvalidParameter(_) => shared_errno::INVALID_PARAMETER,
        _ => shared_errno::IO_ERROR,
    }
}

fn check_len(buf: &[u8], need: usize) -> Result<()> {
    if buf.len() < need {
        return Err(ProtoError::BufferTooSmall {
            need,
            have: buf.len(),
        });
    }
    Ok(())
}

fn put_u64(buf: &mut [u8], offset: usize, value: u64) {
    buf[offset..offset + 8].copy_from_slice(&value.to_le_bytes());
}

fn get_u64(buf: &[u8], offset: usize) -> u64 {
    u64::from_le_bytes(buf[offset..offset + 8].try_into().expect("8-byte slice"))
}

/// Read the request code out of a request header.
pub fn decode_request_code(buf: &[u8]) -> Result<ReqCode> {
    check_len(buf, 8)?;
    ReqCode::from_u64(get_u64(buf, 0))
}

#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct InfoResponse {
    pub file_size: u64,
    pub required_alignment: u64,
    pub flags: InfoFlags,
}

pub fn encode_info_response(buf: &mut [u8], response: &InfoResponse) -> Result<()> {
    check_len(buf, 24)?;
    put_u64(buf, 0, response.file_size);
    put_u64(buf, 8, response.required_alignment);
    put_u64(buf, 16, response.flags.bits());
    Ok(())
}

pub fn decode_info_response(buf: &[u8]) -> Result<InfoResponse> {
    check_len(buf, 24)?;
    Ok(InfoResponse {
        file_size: get_u64(buf, 0),
        required_alignment: get_u64(buf, 8),
        flags: InfoFlags::from_bits_retain(get_u64(buf, 16)),
    })
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct IoRequest {
    pub offset: u64,
    pub length: u64,
}

pub fn encode_io_request(buf: &mut [u8], code: ReqCode, request: &IoRequest) -> Result<()> {
    debug_assert!(matches!(code, ReqCode::Read | ReqCode::Write));
    check_len(buf, 24)?;
    put_u64(buf, 0, code as u64);
    put_u64(buf, 8, request.offset);
    put_u64(buf, 16, request.length);
    Ok(())
}

pub fn decode_io_request(buf: &[u8]) -> Result<IoRequest> {
    check_len(buf, 24)?;
    Ok(IoRequest {
        offset: get_u64(buf, 8),
        length: get_u64(buf, 16),
    })
}

#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct IoResponse {
    pub errorno: u64,
    pub length: u64,
}

pub fn encode_io_response(buf: &mut [u8], response: &IoResponse) -> Result<()> {
    check_len(buf, 16)?;
    put_u64(buf, 0, response.errorno);
    put_u64(buf, 8, response.length);
    Ok(())
}

pub fn decode_io_response(buf: &[u8]) -> Result<IoResponse> {
    check_len(buf, 16)?;
    Ok(IoResponse {
        errorno: get_u64(buf, 0),
        length: get_u64(buf, 8),
    })
}

/// Header-only request (CONNECT, CLOSE, INFO).
pub fn encode_bare_request(buf: &mut [u8], code: ReqCode) -> Result<()> {
    check_len(buf, 8)?;
    put_u64(buf, 0, code as u64);
    Ok(())
}

/// One discard/zero range in an UNMAP/ZERO payload (16 bytes each).
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct RangeEntry {
    pub offset: u64,
    pub length: u64,
}

pub const RANGE_ENTRY_SIZE: usize = 16;

/// UNMAP/ZERO request: header carries the payload byte count, the payload
/// region carries [`RangeEntry`] records. The range encoding is part of the
/// driver contract and must stay bit-exact.
pub fn encode_range_request(
    buf: &mut [u8],
    code: ReqCode,
    ranges: &[RangeEntry],
) -> Result<()> {
    debug_assert!(matches!(code, ReqCode::Unmap | ReqCode::Zero));
    let payload_len = ranges.len() * RANGE_ENTRY_SIZE;
    check_len(buf, PAYLOAD_OFFSET + payload_len)?;
    put_u64(buf, 0, code as u64);
    put_u64(buf, 8, payload_len as u64);
    for (i, range) in ranges.iter().enumerate() {
        let at = PAYLOAD_OFFSET + i * RANGE_ENTRY_SIZE;
        put_u64(buf, at, range.offset);
        put_u64(buf, at + 8, range.length);
    }
    Ok(())
}

pub fn decode_range_request(buf: &[u8]) -> Result<Vec<RangeEntry>> {
    check_len(buf, 16)?;
    let payload_len = get_u64(buf, 8);
    if payload_len % RANGE_ENTRY_SIZE as u64 != 0 {
        return Err(ProtoError::PayloadTooLarge {
            len: payload_len,
            capacity: buf.len().saturating_sub(PAYLOAD_OFFSET),
        });
    }
    let end = PAYLOAD_OFFSET as u64 + payload_len;
    if end > buf.len() as u64 {
        return Err(ProtoError::PayloadTooLarge {
            len: payload_len,
            capacity: buf.len().saturating_sub(PAYLOAD_OFFSET),
        });
    }
    let count = (payload_len / RANGE_ENTRY_SIZE as u64) as usize;
    let mut ranges = Vec::with_capacity(count);
    for i in 0..count {
        let at = PAYLOAD_OFFSET + i * RANGE_ENTRY_SIZE;
        ranges.push(RangeEntry {
            offset: get_u64(buf, at),
            length: get_u64(buf, at + 8),
        });
    }
    Ok(ranges)
}

/// UNMAP/ZERO response is a bare errno word.
pub fn encode_range_response(buf: &mut [u8], errorno: u64) -> Result<()> {
    check_len(buf, 8)?;
    put_u64(buf, 0, errorno);
    Ok(())
}

pub fn decode_range_response(buf: &[u8]) -> Result<u64> {
    check_len(buf, 8)?;
    Ok(get_u64(buf, 0))
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct ScsiRequest {
    pub cdb: [u8; 16],
    pub length: u64,
}

pub fn encode_scsi_request(buf: &mut [u8], request: &ScsiRequest) -> Result<()> {
    check_len(buf, 32)?;
    put_u64(buf, 0, ReqCode::Scsi as u64);
    buf[8..24].copy_from_slice(&request.cdb);
    put_u64(buf, 24, request.length);
    Ok(())
}

pub fn decode_scsi_request(buf: &[u8]) -> Result<ScsiRequest> {
    check_len(buf, 32)?;
    let mut cdb = [0u8; 16];
    cdb.copy_from_slice(&buf[8..24]);
    Ok(ScsiRequest {
        cdb,
        length: get_u64(buf, 24),
    })
}

fn shared_op_code(op: SharedOp) -> u64 {
    match op {
        SharedOp::GetUniqueId => 0,
        SharedOp::ReadKeys => 1,
        SharedOp::Register => 2,
        SharedOp::ClearKeys => 3,
        SharedOp::Reserve => 4,
        SharedOp::Release => 5,
        SharedOp::Preempt => 6,
        SharedOp::RegisterIgnoreExisting => 7,
    }
}

fn shared_op_from_code(code: u64) -> Result<SharedOp> {
    Ok(match code {
        0 => SharedOp::GetUniqueId,
        1 => SharedOp::ReadKeys,
        2 => SharedOp::Register,
        3 => SharedOp::ClearKeys,
        4 => SharedOp::Reserve,
        5 => SharedOp::Release,
        6 => SharedOp::Preempt,
        7 => SharedOp::RegisterIgnoreExisting,
        other => return Err(ProtoError::UnknownSharedOp(other)),
    })
}

pub fn encode_shared_request(buf: &mut [u8], request: &SharedRequest) -> Result<()> {
    check_len(buf, 56)?;
    put_u64(buf, 0, ReqCode::Shared as u64);
    put_u64(buf, 8, shared_op_code(request.op));
    put_u64(buf, 16, request.reserve_scope as u64);
    put_u64(buf, 24, request.reserve_type as u64);
    put_u64(buf, 32, request.existing_key);
    put_u64(buf, 40, request.current_channel_key);
    put_u64(buf, 48, request.operation_channel_key);
    Ok(())
}

pub fn decode_shared_request(buf: &[u8]) -> Result<SharedRequest> {
    check_len(buf, 56)?;
    Ok(SharedRequest {
        op: shared_op_from_code(get_u64(buf, 8))?,
        reserve_scope: get_u64(buf, 16) as u8,
        reserve_type: get_u64(buf, 24) as u8,
        existing_key: get_u64(buf, 32),
        current_channel_key: get_u64(buf, 40),
        operation_channel_key: get_u64(buf, 48),
    })
}

/// Encode a successful SHARED response. Registered keys (ReadKeys) ride in
/// the payload region as packed little-endian u64s, with their byte length
/// in the `length` field.
pub fn encode_shared_response(buf: &mut [u8], response: &SharedResponse) -> Result<()> {
    let payload_len = response.keys.len() * 8;
    check_len(buf, 72.max(PAYLOAD_OFFSET + payload_len))?;
    put_u64(buf, 0, shared_errno::NO_ERROR);
    buf[8..24].copy_from_slice(&response.unique_id);
    put_u64(buf, 24, response.channel_key);
    put_u64(buf, 32, response.generation);
    put_u64(buf, 40, response.reservation_key);
    put_u64(buf, 48, response.reservation_scope as u64);
    put_u64(buf, 56, response.reservation_type as u64);
    put_u64(buf, 64, payload_len as u64);
    for (i, key) in response.keys.iter().enumerate() {
        put_u64(buf, PAYLOAD_OFFSET + i * 8, *key);
    }
    Ok(())
}

/// Encode a failed SHARED response carrying only the errno word.
pub fn encode_shared_error(buf: &mut [u8], errorno: u64) -> Result<()> {
    check_len(buf, 72)?;
    buf[..72].fill(0);
    put_u64(buf, 0, errorno);
    Ok(())
}

pub struct DecodedSharedResponse {
    pub errorno: u64,
    pub response: SharedResponse,
}

pub fn decode_shared_response(buf: &[u8]) -> Result<DecodedSharedResponse> {
    check_len(buf, 72)?;
    let mut unique_id = [0u8; 16];
    unique_id.copy_from_slice(&buf[8..24]);
    let payload_len = get_u64(buf, 64);
    let end = PAYLOAD_OFFSET as u64 + payload_len;
    if payload_len % 8 != 0 || end > buf.len() as u64 {
        return Err(ProtoError::PayloadTooLarge {
            len: payload_len,
            capacity: buf.len().saturating_sub(PAYLOAD_OFFSET),
        });
    }
    let keys = (0..(payload_len / 8) as usize)
        .map(|i| get_u64(buf, PAYLOAD_OFFSET + i * 8))
        .collect();
    Ok(DecodedSharedResponse {
        errorno: get_u64(buf, 0),
        response: SharedResponse {
            unique_id,
            channel_key: get_u64(buf, 24),
            generation: get_u64(buf, 32),
            reservation_key: get_u64(buf, 40),
            reservation_scope: get_u64(buf, 48) as u8,
            reservation_type: get_u64(buf, 56) as u8,
            keys,
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn buffer() -> Vec<u8> {
        vec![0u8; HEADER_SIZE + 4096]
    }

    #[test]
    fn request_code_is_first_eight_bytes() {
        let mut buf = buffer();
        encode_io_request(
            &mut buf,
            ReqCode::Read,
            &IoRequest {
                offset: 0x1122,
                length: 0x3344,
            },
        )
        .unwrap();
        assert_eq!(&buf[..8], &2u64.to_le_bytes());
        assert_eq!(decode_request_code(&buf).unwrap(), ReqCode::Read);
    }

    #[test]
    fn io_request_roundtrip() {
        let mut buf = buffer();
        let request = IoRequest {
            offset: 0xDEAD_BEEF_0102,
            length: 0x10_0000,
        };
        encode_io_request(&mut buf, ReqCode::Write, &request).unwrap();
        assert_eq!(decode_io_request(&buf).unwrap(), request);
    }

    #[test]
    fn info_response_roundtrip_preserves_flags() {
        let mut buf = buffer();
        let response = InfoResponse {
            file_size: 1 << 40,
            required_alignment: 4096,
            flags: InfoFlags::READ_ONLY | InfoFlags::SUPPORTS_ZERO,
        };
        encode_info_response(&mut buf, &response).unwrap();
        assert_eq!(decode_info_response(&buf).unwrap(), response);
    }

    #[test]
    fn range_request_roundtrip() {
        let mut buf = buffer();
        let ranges = [
            RangeEntry {
                offset: 0,
                length: 1 << 20,
            },
            RangeEntry {
                offset: 1 << 30,
                length: 512,
            },
        ];
        encode_range_request(&mut buf, ReqCode::Unmap, &ranges).unwrap();
        assert_eq!(decode_request_code(&buf).unwrap(), ReqCode::Unmap);
        assert_eq!(decode_range_request(&buf).unwrap(), ranges);
    }

    #[test]
    fn scsi_request_roundtrip() {
        let mut buf = buffer();
        let mut cdb = [0u8; 16];
        cdb[0] = 0x28; // READ(10)
        cdb[8] = 0x08;
        let request = ScsiRequest { cdb, length: 4096 };
        encode_scsi_request(&mut buf, &request).unwrap();
        assert_eq!(decode_scsi_request(&buf).unwrap(), request);
    }

    #[test]
    fn shared_roundtrip_with_keys_payload() {
        use vdisk_provider::{SharedOp, SharedRequest, SharedResponse};

        let mut buf = buffer();
        let request = SharedRequest {
            op: SharedOp::Preempt,
            reserve_scope: 1,
            reserve_type: 3,
            existing_key: 0x1111,
            current_channel_key: 0x2222,
            operation_channel_key: 0x3333,
        };
        encode_shared_request(&mut buf, &request).unwrap();
        let back = decode_shared_request(&buf).unwrap();
        assert_eq!(back.op, SharedOp::Preempt);
        assert_eq!(back.existing_key, 0x1111);

        let response = SharedResponse {
            unique_id: *b"abcdefghijklmnop",
            channel_key: 5,
            generation: 9,
            reservation_key: 0x3333,
            reservation_scope: 1,
            reservation_type: 3,
            keys: vec![0x3333, 0x4444],
        };
        encode_shared_response(&mut buf, &response).unwrap();
        let decoded = decode_shared_response(&buf).unwrap();
        assert_eq!(decoded.errorno, shared_errno::NO_ERROR);
        assert_eq!(decoded.response.unique_id, response.unique_id);
        assert_eq!(decoded.response.keys, response.keys);
    }

    #[test]
    fn truncated_buffers_are_rejected() {
        let tiny = [0u8; 4];
        assert!(matches!(
            decode_request_code(&tiny).unwrap_err(),
            ProtoError::BufferTooSmall { .. }
        ));
        let mut small = vec![0u8; 16];
        assert!(encode_io_request(
            &mut small,
            ReqCode::Read,
            &IoRequest { offset: 0, length: 0 }
        )
        .is_err());
    }

    #[test]
    fn unknown_request_code_is_rejected() {
        let mut buf = buffer();
        buf[..8].copy_from_slice(&99u64.to_le_bytes());
        assert!(matches!(
            decode_request_code(&buf).unwrap_err(),
            ProtoError::UnknownRequestCode(99)
        ));
    }
}
