//! Framing for vendor control requests sent to the disk driver.
//!
//! Wire layout (little-endian), fixed 24-byte header before payload:
//!
//! | offset | size | field                              |
//! |--------|------|------------------------------------|
//! | 0      | 8    | ASCII signature, space-padded      |
//! | 8      | 4    | timeout (seconds)                  |
//! | 12     | 4    | control code                       |
//! | 16     | 4    | return code (driver-populated)     |
//! | 20     | 4    | payload length                     |
//! | 24     | ...  | payload                            |
//!
//! Responses use the same framing; a response whose signature does not match
//! the request's is rejected as a protocol mismatch.

use crate::{ProtoError, Result};

pub const CONTROL_HEADER_SIZE: usize = 24;

/// Default subsystem signature. Shorter configured signatures are
/// space-padded to 8 bytes.
pub const CONTROL_SIGNATURE: [u8; 8] = *b"VDiskSrv";

/// Space-pad an ASCII signature to its 8-byte wire form.
pub fn pad_signature(signature: &str) -> [u8; 8] {
    let mut out = [b' '; 8];
    for (dst, src) in out.iter_mut().zip(signature.bytes()) {
        *dst = src;
    }
    out
}

/// Control operations understood by the driver.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[repr(u32)]
pub enum ControlCode {
    QueryVersion = 0,
    CreateDevice = 1,
    QueryDevice = 2,
    QueryAdapter = 3,
    Check = 4,
    SetDeviceFlags = 5,
    RemoveDevice = 6,
    ExtendDevice = 7,
}

impl ControlCode {
    pub fn from_u32(value: u32) -> Result<Self> {
        Ok(match value {
            0 => Self::QueryVersion,
            1 => Self::CreateDevice,
            2 => Self::QueryDevice,
            3 => Self::QueryAdapter,
            4 => Self::Check,
            5 => Self::SetDeviceFlags,
            6 => Self::RemoveDevice,
            7 => Self::ExtendDevice,
            other => return Err(ProtoError::UnknownControlCode(other)),
        })
    }
}

/// Build a control request buffer. The return-code field is zero on send and
/// populated by the driver on the way back.
pub fn encode_control_request(
    signature: [u8; 8],
    code: ControlCode,
    timeout_secs: u32,
    payload: &[u8],
) -> Vec<u8> {
    let mut buf = vec![0u8; CONTROL_HEADER_SIZE + payload.len()];
    buf[0..8].copy_from_slice(&signature);
    buf[8..12].copy_from_slice(&timeout_secs.to_le_bytes());
    buf[12..16].copy_from_slice(&(code as u32).to_le_bytes());
    // bytes 16..20: return code, zero in requests
    buf[20..24].copy_from_slice(&(payload.len() as u32).to_le_bytes());
    buf[CONTROL_HEADER_SIZE..].copy_from_slice(payload);
    buf
}

/// Parsed control response header plus the payload bytes the caller asked
/// for.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ControlResponse {
    pub code: ControlCode,
    pub return_code: u32,
    pub payload: Vec<u8>,
}

/// Parse a control response, validating the signature and copying back at
/// most `min(reported length, buffer capacity, requested)` payload bytes.
pub fn decode_control_response(
    signature: [u8; 8],
    buf: &[u8],
    requested: usize,
) -> Result<ControlResponse> {
    if buf.len() < CONTROL_HEADER_SIZE {
        return Err(ProtoError::BufferTooSmall {
            need: CONTROL_HEADER_SIZE,
            have: buf.len(),
        });
    }
    if buf[0..8] != signature {
        return Err(ProtoError::ProtocolMismatch);
    }

    let code = ControlCode::from_u32(u32::from_le_bytes(buf[12..16].try_into().expect("4 bytes")))?;
    let return_code = u32::from_le_bytes(buf[16..20].try_into().expect("4 bytes"));
    let reported = u32::from_le_bytes(buf[20..24].try_into().expect("4 bytes")) as usize;

    let available = buf.len() - CONTROL_HEADER_SIZE;
    let take = reported.min(available).min(requested);
    let payload = buf[CONTROL_HEADER_SIZE..CONTROL_HEADER_SIZE + take].to_vec();

    Ok(ControlResponse {
        code,
        return_code,
        payload,
    })
}
