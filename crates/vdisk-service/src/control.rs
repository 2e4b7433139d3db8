//! Typed client for the driver's vendor control interface.
//!
//! [`DeviceControl`] abstracts the transport that actually carries a framed
//! control buffer to the driver and returns the driver's reply. On top of it,
//! [`ControlChannel`] offers one method per [`ControlCode`], handling the
//! framing, signature check and return-code mapping.

use tracing::debug;
use vdisk_proto::{
    decode_control_response, encode_control_request, pad_signature, ControlCode, ControlResponse,
    CONTROL_SIGNATURE,
};

use crate::{Result, ServiceError};

/// Device-number value asking the driver to pick a free slot.
pub const DEVICE_NUMBER_AUTO: u32 = u32::MAX;

/// Transport for framed control buffers. `response_capacity` is the number
/// of payload bytes the caller is prepared to copy back.
pub trait DeviceControl: Send {
    fn issue(&mut self, request: &[u8], response_capacity: usize) -> Result<Vec<u8>>;
}

/// Parameters for a CreateDevice call.
///
/// Payload layout (little-endian): device number u32, block size u32, disk
/// size u64, flags u64, then a u16 name length followed by the UTF-8 shared
/// object base name.
#[derive(Clone, Debug)]
pub struct CreateDeviceParams {
    pub device_number: u32,
    pub block_size: u32,
    pub disk_size: u64,
    pub flags: u64,
    pub object_name: String,
}

impl CreateDeviceParams {
    pub fn new(disk_size: u64, block_size: u32, object_name: &str) -> Self {
        Self {
            device_number: DEVICE_NUMBER_AUTO,
            block_size,
            disk_size,
            flags: 0,
            object_name: object_name.to_owned(),
        }
    }

    fn encode(&self) -> Vec<u8> {
        let name = self.object_name.as_bytes();
        let mut payload = vec![0u8; 26 + name.len()];
        payload[0..4].copy_from_slice(&self.device_number.to_le_bytes());
        payload[4..8].copy_from_slice(&self.block_size.to_le_bytes());
        payload[8..16].copy_from_slice(&self.disk_size.to_le_bytes());
        payload[16..24].copy_from_slice(&self.flags.to_le_bytes());
        payload[24..26].copy_from_slice(&(name.len() as u16).to_le_bytes());
        payload[26..].copy_from_slice(name);
        payload
    }
}

/// One control connection to the driver, carrying a fixed signature and
/// request timeout.
pub struct ControlChannel<D: DeviceControl> {
    device: D,
    signature: [u8; 8],
    timeout_secs: u32,
}

impl<D: DeviceControl> ControlChannel<D> {
    pub fn new(device: D) -> Self {
        Self {
            device,
            signature: CONTROL_SIGNATURE,
            timeout_secs: 30,
        }
    }

    pub fn with_signature(mut self, signature: &str) -> Self {
        self.signature = pad_signature(signature);
        self
    }

    pub fn with_timeout_secs(mut self, timeout_secs: u32) -> Self {
        self.timeout_secs = timeout_secs;
        self
    }

    fn call(
        &mut self,
        code: ControlCode,
        payload: &[u8],
        response_capacity: usize,
    ) -> Result<ControlResponse> {
        let request = encode_control_request(self.signature, code, self.timeout_secs, payload);
        let raw = self.device.issue(&request, response_capacity)?;
        let response = decode_control_response(self.signature, &raw, response_capacity)?;
        debug!(
            code = ?code,
            return_code = response.return_code,
            payload_len = response.payload.len(),
            "control exchange"
        );
        if response.return_code != 0 {
            return Err(ServiceError::Driver {
                code,
                return_code: response.return_code,
            });
        }
        Ok(response)
    }

    /// Driver protocol version, from the first four payload bytes.
    pub fn query_version(&mut self) -> Result<u32> {
        let response = self.call(ControlCode::QueryVersion, &[], 4)?;
        Ok(read_u32(&response.payload)?)
    }

    /// Create (bind) a proxied device. Returns the device number the driver
    /// assigned, which may differ from the requested one.
    pub fn create_device(&mut self, params: &CreateDeviceParams) -> Result<u32> {
        let response = self.call(ControlCode::CreateDevice, &params.encode(), 4)?;
        Ok(read_u32(&response.payload)?)
    }

    /// Raw device description blob for one device number.
    pub fn query_device(&mut self, device_number: u32, capacity: usize) -> Result<Vec<u8>> {
        let response = self.call(
            ControlCode::QueryDevice,
            &device_number.to_le_bytes(),
            capacity,
        )?;
        Ok(response.payload)
    }

    /// Device numbers currently present on the adapter, as packed u32s.
    pub fn query_adapter(&mut self, capacity: usize) -> Result<Vec<u32>> {
        let response = self.call(ControlCode::QueryAdapter, &[], capacity)?;
        if response.payload.len() % 4 != 0 {
            return Err(ServiceError::Io(format!(
                "adapter list has odd length {}",
                response.payload.len()
            )));
        }
        Ok(response
            .payload
            .chunks_exact(4)
            .map(|chunk| u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
            .collect())
    }

    /// Liveness probe for one device number.
    pub fn check(&mut self, device_number: u32) -> Result<()> {
        self.call(ControlCode::Check, &device_number.to_le_bytes(), 0)?;
        Ok(())
    }

    pub fn set_device_flags(&mut self, device_number: u32, flags: u64) -> Result<()> {
        let mut payload = [0u8; 12];
        payload[0..4].copy_from_slice(&device_number.to_le_bytes());
        payload[4..12].copy_from_slice(&flags.to_le_bytes());
        self.call(ControlCode::SetDeviceFlags, &payload, 0)?;
        Ok(())
    }

    /// Ask the driver to tear the device down. The driver confirms by
    /// sending CLOSE over the proxy channel.
    pub fn remove_device(&mut self, device_number: u32) -> Result<()> {
        self.call(ControlCode::RemoveDevice, &device_number.to_le_bytes(), 0)?;
        Ok(())
    }

    pub fn extend_device(&mut self, device_number: u32, new_size: u64) -> Result<()> {
        let mut payload = [0u8; 12];
        payload[0..4].copy_from_slice(&device_number.to_le_bytes());
        payload[4..12].copy_from_slice(&new_size.to_le_bytes());
        self.call(ControlCode::ExtendDevice, &payload, 0)?;
        Ok(())
    }
}

fn read_u32(payload: &[u8]) -> Result<u32> {
    let bytes: [u8; 4] = payload
        .get(..4)
        .and_then(|slice| slice.try_into().ok())
        .ok_or_else(|| ServiceError::Io(format!("control payload too short: {}", payload.len())))?;
    Ok(u32::from_le_bytes(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Answers every request with a fixed return code and payload.
    struct ScriptedDevice {
        return_code: u32,
        payload: Vec<u8>,
    }

    impl DeviceControl for ScriptedDevice {
        fn issue(&mut self, request: &[u8], _response_capacity: usize) -> Result<Vec<u8>> {
            let mut buf = request.to_vec();
            buf.truncate(vdisk_proto::CONTROL_HEADER_SIZE);
            buf[16..20].copy_from_slice(&self.return_code.to_le_bytes());
            buf[20..24].copy_from_slice(&(self.payload.len() as u32).to_le_bytes());
            buf.extend_from_slice(&self.payload);
            Ok(buf)
        }
    }

    #[test]
    fn create_device_returns_assigned_number() {
        let device = ScriptedDevice {
            return_code: 0,
            payload: 7u32.to_le_bytes().to_vec(),
        };
        let mut channel = ControlChannel::new(device);
        let params = CreateDeviceParams::new(1 << 30, 512, "vdisk0");
        assert_eq!(channel.create_device(&params).unwrap(), 7);
    }

    #[test]
    fn nonzero_return_code_maps_to_driver_error() {
        let device = ScriptedDevice {
            return_code: 0xC000_0001,
            payload: Vec::new(),
        };
        let mut channel = ControlChannel::new(device);
        match channel.check(3) {
            Err(ServiceError::Driver { code, return_code }) => {
                assert_eq!(code, ControlCode::Check);
                assert_eq!(return_code, 0xC000_0001);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn adapter_list_parses_packed_numbers() {
        let mut payload = Vec::new();
        for n in [0u32, 2, 5] {
            payload.extend_from_slice(&n.to_le_bytes());
        }
        let device = ScriptedDevice {
            return_code: 0,
            payload,
        };
        let mut channel = ControlChannel::new(device);
        assert_eq!(channel.query_adapter(64).unwrap(), vec![0, 2, 5]);
    }
}
