//! Requesting half of a proxy session.
//!
//! Mirrors the driver's side of the channel contract: write a request into
//! the shared region, fire the request signal, then wait for the response
//! signal racing it against the server's liveness mutex. A lost race maps to
//! [`ServiceError::PeerExited`] and the session is dead.

use vdisk_proto::{
    decode_info_response, decode_io_response, decode_range_response, decode_shared_response,
    encode_bare_request, encode_io_request, encode_range_request, encode_shared_request, errno,
    shared_errno, InfoResponse, IoRequest, RangeEntry, ReqCode, HEADER_SIZE, PAYLOAD_OFFSET,
};
use vdisk_provider::{SharedRequest, SharedResponse};

use crate::channel::{ClientChannel, WaitOutcome};
use crate::{Result, ServiceError};

pub struct ProxyClient<C: ClientChannel> {
    channel: C,
    header: Vec<u8>,
}

impl<C: ClientChannel> ProxyClient<C> {
    pub fn new(channel: C) -> Self {
        Self {
            channel,
            header: vec![0u8; HEADER_SIZE],
        }
    }

    /// Largest READ/WRITE transfer the shared region can carry.
    pub fn max_transfer(&self) -> usize {
        self.channel.region_len().saturating_sub(PAYLOAD_OFFSET)
    }

    fn roundtrip(&mut self) -> Result<()> {
        self.channel.write_region(0, &self.header);
        self.channel.signal_request();
        match self.channel.wait_response_or_peer_exit() {
            WaitOutcome::Response => {
                self.channel.read_region(0, &mut self.header);
                Ok(())
            }
            WaitOutcome::PeerExited => Err(ServiceError::PeerExited),
        }
    }

    /// Open the session; the server answers with its capabilities.
    pub fn connect(&mut self) -> Result<InfoResponse> {
        self.header.fill(0);
        encode_bare_request(&mut self.header, ReqCode::Connect)?;
        self.roundtrip()?;
        Ok(decode_info_response(&self.header)?)
    }

    pub fn info(&mut self) -> Result<InfoResponse> {
        self.header.fill(0);
        encode_bare_request(&mut self.header, ReqCode::Info)?;
        self.roundtrip()?;
        Ok(decode_info_response(&self.header)?)
    }

    /// Read into `buf`; returns the transferred byte count, which is short
    /// only at end of extent.
    pub fn read(&mut self, offset: u64, buf: &mut [u8]) -> Result<usize> {
        self.header.fill(0);
        encode_io_request(
            &mut self.header,
            ReqCode::Read,
            &IoRequest {
                offset,
                length: buf.len() as u64,
            },
        )?;
        self.roundtrip()?;
        let response = decode_io_response(&self.header)?;
        if response.errorno != errno::NONE {
            return Err(ServiceError::Remote {
                op: "read",
                errorno: response.errorno,
            });
        }
        let got = (response.length as usize).min(buf.len());
        self.channel.read_region(PAYLOAD_OFFSET, &mut buf[..got]);
        Ok(got)
    }

    pub fn write(&mut self, offset: u64, data: &[u8]) -> Result<usize> {
        self.channel.write_region(PAYLOAD_OFFSET, data);
        self.header.fill(0);
        encode_io_request(
            &mut self.header,
            ReqCode::Write,
            &IoRequest {
                offset,
                length: data.len() as u64,
            },
        )?;
        self.roundtrip()?;
        let response = decode_io_response(&self.header)?;
        if response.errorno != errno::NONE {
            return Err(ServiceError::Remote {
                op: "write",
                errorno: response.errorno,
            });
        }
        Ok(response.length as usize)
    }

    pub fn unmap(&mut self, ranges: &[RangeEntry]) -> Result<()> {
        self.range_request(ReqCode::Unmap, "unmap", ranges)
    }

    pub fn zero(&mut self, ranges: &[RangeEntry]) -> Result<()> {
        self.range_request(ReqCode::Zero, "zero", ranges)
    }

    fn range_request(&mut self, code: ReqCode, op: &'static str, ranges: &[RangeEntry]) -> Result<()> {
        let mut region = vec![0u8; self.channel.region_len()];
        encode_range_request(&mut region, code, ranges)?;
        self.channel.write_region(0, &region);
        self.channel.signal_request();
        match self.channel.wait_response_or_peer_exit() {
            WaitOutcome::Response => {}
            WaitOutcome::PeerExited => return Err(ServiceError::PeerExited),
        }
        self.channel.read_region(0, &mut self.header);
        let errorno = decode_range_response(&self.header)?;
        if errorno != errno::NONE {
            return Err(ServiceError::Remote { op, errorno });
        }
        Ok(())
    }

    /// Persistent-reservation command. Registered keys ride back in the
    /// payload region.
    pub fn shared(&mut self, request: &SharedRequest) -> Result<SharedResponse> {
        self.header.fill(0);
        encode_shared_request(&mut self.header, request)?;
        self.roundtrip()?;
        let mut region = vec![0u8; self.channel.region_len()];
        self.channel.read_region(0, &mut region);
        let decoded = decode_shared_response(&region)?;
        if decoded.errorno != shared_errno::NO_ERROR {
            return Err(ServiceError::Remote {
                op: "shared",
                errorno: decoded.errorno,
            });
        }
        Ok(decoded.response)
    }

    /// Tell the server to flush and exit. CLOSE is fire-and-forget; no
    /// response is defined for it.
    pub fn close(&mut self) -> Result<()> {
        self.header.fill(0);
        encode_bare_request(&mut self.header, ReqCode::Close)?;
        self.channel.write_region(0, &self.header);
        self.channel.signal_request();
        Ok(())
    }
}
