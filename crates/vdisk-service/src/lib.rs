//! Transport server for proxied virtual disks.
//!
//! A session serves one [`vdisk_provider::Provider`] over a shared-buffer
//! channel ([`channel`]), registers the device with the disk driver through
//! the vendor control interface ([`control`]) and runs the request dispatch
//! loop until the peer closes or a dismount drains it ([`session`]).
//! [`client`] is the requesting half of the same channel contract;
//! [`direct`] holds the in-process control adapter and the call-through
//! device transport used when no driver is present.

mod channel;
mod client;
mod control;
mod direct;
mod error;
mod session;

pub use channel::{
    liveness_mutex_name, request_signal_name, response_signal_name, ClientChannel, InProcChannel,
    InProcClient, InProcServer, RequestWait, ServerChannel, WaitOutcome, REQUEST_SUFFIX,
    RESPONSE_SUFFIX, SERVER_SUFFIX,
};
pub use client::ProxyClient;
pub use control::{ControlChannel, CreateDeviceParams, DeviceControl, DEVICE_NUMBER_AUTO};
pub use direct::{retcode, DirectAdapter, DirectDevice, ADAPTER_VERSION};
pub use error::{Result, ServiceError};
pub use session::{DeviceService, SessionState, StopReason};
