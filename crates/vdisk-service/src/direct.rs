//! In-process stand-ins for the driver-side pieces of a deployment.
//!
//! [`DirectAdapter`] implements the control interface without a driver: a
//! device table behind a clonable handle, answering every control code the
//! way the driver would (assigned numbers for CreateDevice, packed number
//! lists for QueryAdapter, not-found return codes for absent slots). A
//! remove hook per device lets the owner deliver the CLOSE that a real
//! driver would send over the proxy channel when a device is removed.
//!
//! [`DirectDevice`] is the call-through transport for same-process mounts:
//! no shared region, no framing, requests go straight to the provider.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use tracing::debug;
use vdisk_proto::{ControlCode, InfoResponse, CONTROL_HEADER_SIZE};
use vdisk_provider::{Provider, SharedRequest, SharedResponse};

use crate::control::{DeviceControl, DEVICE_NUMBER_AUTO};
use crate::session::info_for;
use crate::{Result, ServiceError};

/// Return codes produced by the adapter (0 is success).
pub mod retcode {
    pub const OK: u32 = 0;
    pub const NOT_FOUND: u32 = 2;
    pub const IN_USE: u32 = 3;
    pub const BAD_REQUEST: u32 = 4;
}

pub const ADAPTER_VERSION: u32 = 1;

struct DeviceSlot {
    block_size: u32,
    disk_size: u64,
    flags: u64,
    object_name: String,
    on_remove: Option<Box<dyn FnMut() + Send>>,
}

struct AdapterState {
    devices: BTreeMap<u32, DeviceSlot>,
    next_number: u32,
}

/// Clonable handle to one in-process adapter.
#[derive(Clone)]
pub struct DirectAdapter {
    state: Arc<Mutex<AdapterState>>,
}

impl Default for DirectAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl DirectAdapter {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(AdapterState {
                devices: BTreeMap::new(),
                next_number: 0,
            })),
        }
    }

    /// Install the closure invoked when `device_number` is removed. The
    /// session owner uses this to deliver CLOSE over the proxy channel.
    pub fn set_remove_hook<F>(&self, device_number: u32, hook: F)
    where
        F: FnMut() + Send + 'static,
    {
        let mut state = self.state.lock().expect("adapter state");
        if let Some(slot) = state.devices.get_mut(&device_number) {
            slot.on_remove = Some(Box::new(hook));
        }
    }

    pub fn device_count(&self) -> usize {
        self.state.lock().expect("adapter state").devices.len()
    }

    fn dispatch(&self, code: ControlCode, payload: &[u8]) -> (u32, Vec<u8>) {
        let mut state = self.state.lock().expect("adapter state");
        match code {
            ControlCode::QueryVersion => (retcode::OK, ADAPTER_VERSION.to_le_bytes().to_vec()),
            ControlCode::CreateDevice => create_device(&mut state, payload),
            ControlCode::QueryDevice => match device_number(payload) {
                Some(number) => match state.devices.get(&number) {
                    Some(slot) => (retcode::OK, describe(slot)),
                    None => (retcode::NOT_FOUND, Vec::new()),
                },
                None => (retcode::BAD_REQUEST, Vec::new()),
            },
            ControlCode::QueryAdapter => {
                let mut payload = Vec::with_capacity(state.devices.len() * 4);
                for number in state.devices.keys() {
                    payload.extend_from_slice(&number.to_le_bytes());
                }
                (retcode::OK, payload)
            }
            ControlCode::Check => match device_number(payload) {
                Some(number) if state.devices.contains_key(&number) => (retcode::OK, Vec::new()),
                Some(_) => (retcode::NOT_FOUND, Vec::new()),
                None => (retcode::BAD_REQUEST, Vec::new()),
            },
            ControlCode::SetDeviceFlags => {
                match (device_number(payload), payload.get(4..12)) {
                    (Some(number), Some(flags)) => match state.devices.get_mut(&number) {
                        Some(slot) => {
                            slot.flags =
                                u64::from_le_bytes(flags.try_into().expect("8 bytes"));
                            (retcode::OK, Vec::new())
                        }
                        None => (retcode::NOT_FOUND, Vec::new()),
                    },
                    _ => (retcode::BAD_REQUEST, Vec::new()),
                }
            }
            ControlCode::RemoveDevice => match device_number(payload) {
                Some(number) => match state.devices.remove(&number) {
                    Some(mut slot) => {
                        debug!(device = number, object = %slot.object_name, "device removed");
                        // Hook runs outside the lock; it may reach back in.
                        drop(state);
                        if let Some(mut hook) = slot.on_remove.take() {
                            hook();
                        }
                        (retcode::OK, Vec::new())
                    }
                    None => (retcode::NOT_FOUND, Vec::new()),
                },
                None => (retcode::BAD_REQUEST, Vec::new()),
            },
            ControlCode::ExtendDevice => {
                match (device_number(payload), payload.get(4..12)) {
                    (Some(number), Some(size)) => match state.devices.get_mut(&number) {
                        Some(slot) => {
                            let new_size = u64::from_le_bytes(size.try_into().expect("8 bytes"));
                            if new_size < slot.disk_size {
                                (retcode::BAD_REQUEST, Vec::new())
                            } else {
                                slot.disk_size = new_size;
                                (retcode::OK, Vec::new())
                            }
                        }
                        None => (retcode::NOT_FOUND, Vec::new()),
                    },
                    _ => (retcode::BAD_REQUEST, Vec::new()),
                }
            }
        }
    }
}

fn device_number(payload: &[u8]) -> Option<u32> {
    payload
        .get(..4)
        .map(|bytes| u32::from_le_bytes(bytes.try_into().expect("4 bytes")))
}

fn describe(slot: &DeviceSlot) -> Vec<u8> {
    let name = slot.object_name.as_bytes();
    let mut out = vec![0u8; 22 + name.len()];
    out[0..4].copy_from_slice(&slot.block_size.to_le_bytes());
    out[4..12].copy_from_slice(&slot.disk_size.to_le_bytes());
    out[12..20].copy_from_slice(&slot.flags.to_le_bytes());
    out[20..22].copy_from_slice(&(name.len() as u16).to_le_bytes());
    out[22..].copy_from_slice(name);
    out
}

fn create_device(state: &mut AdapterState, payload: &[u8]) -> (u32, Vec<u8>) {
    if payload.len() < 26 {
        return (retcode::BAD_REQUEST, Vec::new());
    }
    let requested = u32::from_le_bytes(payload[0..4].try_into().expect("4 bytes"));
    let block_size = u32::from_le_bytes(payload[4..8].try_into().expect("4 bytes"));
    let disk_size = u64::from_le_bytes(payload[8..16].try_into().expect("8 bytes"));
    let flags = u64::from_le_bytes(payload[16..24].try_into().expect("8 bytes"));
    let name_len = u16::from_le_bytes(payload[24..26].try_into().expect("2 bytes")) as usize;
    let name = match payload.get(26..26 + name_len).map(String::from_utf8_lossy) {
        Some(name) => name.into_owned(),
        None => return (retcode::BAD_REQUEST, Vec::new()),
    };
    if block_size == 0 || disk_size == 0 {
        return (retcode::BAD_REQUEST, Vec::new());
    }

    let number = if requested == DEVICE_NUMBER_AUTO {
        while state.devices.contains_key(&state.next_number) {
            state.next_number += 1;
        }
        state.next_number
    } else if state.devices.contains_key(&requested) {
        return (retcode::IN_USE, Vec::new());
    } else {
        requested
    };

    state.devices.insert(
        number,
        DeviceSlot {
            block_size,
            disk_size,
            flags,
            object_name: name,
            on_remove: None,
        },
    );
    (retcode::OK, number.to_le_bytes().to_vec())
}

/// Call-through transport for a same-process mount. Offers the framed
/// client's operations over direct provider calls, so callers can swap one
/// for the other; provider failures surface as
/// [`ServiceError::Provider`](crate::ServiceError) instead of remote errnos.
pub struct DirectDevice {
    provider: Box<dyn Provider>,
}

impl DirectDevice {
    pub fn new(provider: Box<dyn Provider>) -> Self {
        Self { provider }
    }

    /// Same capability word and geometry the dispatch loop would answer
    /// INFO with.
    pub fn info(&self) -> InfoResponse {
        info_for(self.provider.as_ref())
    }

    pub fn read(&mut self, offset: u64, buf: &mut [u8]) -> Result<usize> {
        Ok(self.provider.read_at(offset, buf)?)
    }

    pub fn write(&mut self, offset: u64, data: &[u8]) -> Result<usize> {
        Ok(self.provider.write_at(offset, data)?)
    }

    pub fn zero(&mut self, offset: u64, length: u64) -> Result<()> {
        Ok(self.provider.zero_at(offset, length)?)
    }

    pub fn shared(&mut self, request: &SharedRequest) -> Result<SharedResponse> {
        Ok(self.provider.shared_keys(request)?)
    }

    pub fn flush(&mut self) -> Result<()> {
        Ok(self.provider.flush()?)
    }

    /// Equivalent of CLOSE on the framed transport.
    pub fn close(mut self) -> Result<()> {
        self.flush()
    }
}

impl DeviceControl for DirectAdapter {
    fn issue(&mut self, request: &[u8], response_capacity: usize) -> Result<Vec<u8>> {
        if request.len() < CONTROL_HEADER_SIZE {
            return Err(ServiceError::Io(format!(
                "control request too short: {}",
                request.len()
            )));
        }
        let code = ControlCode::from_u32(u32::from_le_bytes(
            request[12..16].try_into().expect("4 bytes"),
        ))?;
        let payload_len = u32::from_le_bytes(request[20..24].try_into().expect("4 bytes")) as usize;
        let payload = request
            .get(CONTROL_HEADER_SIZE..CONTROL_HEADER_SIZE + payload_len)
            .ok_or_else(|| {
                ServiceError::Io(format!("control payload truncated: {payload_len} declared"))
            })?;

        let (return_code, mut out) = self.dispatch(code, payload);
        out.truncate(out.len().min(response_capacity));

        let mut response = vec![0u8; CONTROL_HEADER_SIZE + out.len()];
        response[0..8].copy_from_slice(&request[0..8]);
        response[8..12].copy_from_slice(&request[8..12]);
        response[12..16].copy_from_slice(&(code as u32).to_le_bytes());
        response[16..20].copy_from_slice(&return_code.to_le_bytes());
        response[20..24].copy_from_slice(&(out.len() as u32).to_le_bytes());
        response[CONTROL_HEADER_SIZE..].copy_from_slice(&out);
        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control::{ControlChannel, CreateDeviceParams};
    use vdisk_proto::InfoFlags;
    use vdisk_provider::{MemStore, ProviderError, RawProvider};

    #[test]
    fn create_assigns_sequential_numbers() {
        let adapter = DirectAdapter::new();
        let mut channel = ControlChannel::new(adapter.clone());

        let a = channel
            .create_device(&CreateDeviceParams::new(1 << 20, 512, "a"))
            .unwrap();
        let b = channel
            .create_device(&CreateDeviceParams::new(1 << 20, 512, "b"))
            .unwrap();
        assert_ne!(a, b);
        assert_eq!(channel.query_adapter(64).unwrap(), vec![a, b]);
    }

    #[test]
    fn requested_number_collision_is_rejected() {
        let mut channel = ControlChannel::new(DirectAdapter::new());
        let mut params = CreateDeviceParams::new(1 << 20, 512, "a");
        params.device_number = 4;
        channel.create_device(&params).unwrap();
        match channel.create_device(&params) {
            Err(ServiceError::Driver { return_code, .. }) => {
                assert_eq!(return_code, retcode::IN_USE);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn remove_runs_hook_and_frees_slot() {
        let adapter = DirectAdapter::new();
        let mut channel = ControlChannel::new(adapter.clone());
        let number = channel
            .create_device(&CreateDeviceParams::new(1 << 20, 512, "a"))
            .unwrap();

        let fired = Arc::new(Mutex::new(false));
        let flag = Arc::clone(&fired);
        adapter.set_remove_hook(number, move || {
            *flag.lock().unwrap() = true;
        });

        channel.remove_device(number).unwrap();
        assert!(*fired.lock().unwrap());
        assert_eq!(adapter.device_count(), 0);
        assert!(matches!(
            channel.check(number),
            Err(ServiceError::Driver { .. })
        ));
    }

    #[test]
    fn direct_device_forwards_io_to_the_provider() {
        let provider = Box::new(RawProvider::new(MemStore::new(1 << 16)).unwrap());
        let mut device = DirectDevice::new(provider);

        let info = device.info();
        assert_eq!(info.file_size, 1 << 16);
        assert!(info.flags.contains(InfoFlags::SUPPORTS_ZERO));

        assert_eq!(device.write(100, &[1, 2, 3, 4]).unwrap(), 4);
        let mut back = [0u8; 4];
        assert_eq!(device.read(100, &mut back).unwrap(), 4);
        assert_eq!(back, [1, 2, 3, 4]);

        device.zero(100, 2).unwrap();
        device.read(100, &mut back).unwrap();
        assert_eq!(back, [0, 0, 3, 4]);
        device.close().unwrap();
    }

    #[test]
    fn direct_device_surfaces_provider_errors() {
        let store = MemStore::from_vec(vec![7; 512]).with_read_only(true);
        let mut device = DirectDevice::new(Box::new(RawProvider::new(store).unwrap()));
        assert!(device.info().flags.contains(InfoFlags::READ_ONLY));

        match device.write(0, &[1]) {
            Err(ServiceError::Provider(ProviderError::ReadOnly)) => {}
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn extend_refuses_shrink() {
        let mut channel = ControlChannel::new(DirectAdapter::new());
        let number = channel
            .create_device(&CreateDeviceParams::new(1 << 20, 512, "a"))
            .unwrap();
        assert!(channel.extend_device(number, 2 << 20).is_ok());
        assert!(channel.extend_device(number, 1 << 10).is_err());
    }
}
