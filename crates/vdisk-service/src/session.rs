//! Session lifecycle and the per-device dispatch loop.
//!
//! A [`DeviceService`] owns one provider and one server channel. `start`
//! spawns the dispatch thread (state `Listening`); `bind` registers the
//! device with the driver over a control channel (state `Bound`); `dismount`
//! asks the driver to remove the device, then waits for the driver's CLOSE
//! to drain the dispatch loop. A dismount that the driver never confirms is
//! force-stopped after the caller's timeout.
//!
//! Exactly one request is outstanding per channel, so the loop services
//! commands strictly in order with no queueing.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use tracing::{debug, info, warn};
use vdisk_proto::{
    decode_io_request, decode_range_request, decode_request_code, decode_shared_request,
    encode_info_response, encode_io_response, encode_range_response, encode_shared_error,
    encode_shared_response, errno, errno_for, shared_errno_for, InfoFlags, InfoResponse,
    IoResponse, ReqCode, PAYLOAD_OFFSET,
};
use vdisk_provider::Provider;

use crate::channel::{RequestWait, ServerChannel};
use crate::control::{ControlChannel, CreateDeviceParams, DeviceControl};
use crate::{Result, ServiceError};

/// How often a blocked dispatch loop rechecks the force-stop flag.
const POLL_INTERVAL: Duration = Duration::from_millis(250);

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum SessionState {
    /// Constructed, dispatch thread not yet running.
    Created,
    /// Dispatch thread serving the channel, device not yet registered.
    Listening,
    /// Device registered with the driver.
    Bound,
    /// Dismount requested, waiting for the driver's CLOSE.
    Draining,
    Stopped,
}

impl SessionState {
    pub fn label(self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Listening => "listening",
            Self::Bound => "bound",
            Self::Draining => "draining",
            Self::Stopped => "stopped",
        }
    }
}

/// Why the dispatch loop exited.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum StopReason {
    /// Peer sent CLOSE; the normal shutdown path.
    Closed,
    /// The channel went away underneath the loop.
    ChannelClosed,
    /// The force-stop flag was raised (dismount timeout).
    ForceStopped,
}

/// One mounted device: a provider being served over a proxy channel.
pub struct DeviceService {
    object_name: String,
    state: Arc<Mutex<SessionState>>,
    stop: Arc<AtomicBool>,
    done_rx: Receiver<StopReason>,
    handle: Option<JoinHandle<()>>,
    device_number: Option<u32>,
}

impl DeviceService {
    /// Spawn the dispatch thread over `channel`. The session is `Listening`
    /// until [`bind`](Self::bind) registers it with the driver.
    pub fn start<C>(provider: Box<dyn Provider>, mut channel: C, object_name: &str) -> Self
    where
        C: ServerChannel + 'static,
    {
        // Claim liveness before the dispatch thread exists. A client that
        // connects right after `start` returns must find the mutex held; an
        // unclaimed mutex is indistinguishable from a released one and would
        // read as peer exit.
        channel.claim_liveness();
        let state = Arc::new(Mutex::new(SessionState::Listening));
        let stop = Arc::new(AtomicBool::new(false));
        let (done_tx, done_rx) = mpsc::channel();

        let thread_state = Arc::clone(&state);
        let thread_stop = Arc::clone(&stop);
        let name = object_name.to_owned();
        let handle = std::thread::spawn(move || {
            let reason = dispatch_loop(provider, channel, &thread_stop);
            info!(object = %name, reason = ?reason, "dispatch loop exited");
            *thread_state.lock().expect("session state") = SessionState::Stopped;
            // Receiver may already be gone after a force-stop.
            let _ = done_tx.send(reason);
        });

        Self {
            object_name: object_name.to_owned(),
            state,
            stop,
            done_rx,
            handle: Some(handle),
            device_number: None,
        }
    }

    pub fn object_name(&self) -> &str {
        &self.object_name
    }

    pub fn state(&self) -> SessionState {
        *self.state.lock().expect("session state")
    }

    pub fn device_number(&self) -> Option<u32> {
        self.device_number
    }

    /// Register the device with the driver. A rejected registration stops
    /// the session: a listening loop nobody can reach is useless.
    pub fn bind<D: DeviceControl>(
        &mut self,
        control: &mut ControlChannel<D>,
        params: &CreateDeviceParams,
    ) -> Result<u32> {
        {
            let state = self.state();
            if state != SessionState::Listening {
                return Err(ServiceError::BadState(state.label(), "listening"));
            }
        }
        match control.create_device(params) {
            Ok(number) => {
                self.device_number = Some(number);
                *self.state.lock().expect("session state") = SessionState::Bound;
                info!(object = %self.object_name, device = number, "device bound");
                Ok(number)
            }
            Err(err) => {
                warn!(object = %self.object_name, error = %err, "bind rejected, stopping session");
                self.force_stop();
                Err(err)
            }
        }
    }

    /// Unregister the device and drain the dispatch loop. Waits up to
    /// `timeout` for the driver's CLOSE; on expiry the loop is force-stopped
    /// and [`ServiceError::Timeout`] is returned.
    pub fn dismount<D: DeviceControl>(
        &mut self,
        control: &mut ControlChannel<D>,
        timeout: Duration,
    ) -> Result<StopReason> {
        let number = match self.device_number {
            Some(number) => number,
            None => return Err(ServiceError::BadState(self.state().label(), "bound")),
        };
        *self.state.lock().expect("session state") = SessionState::Draining;
        if let Err(err) = control.remove_device(number) {
            // The device is still registered; the session stays usable.
            *self.state.lock().expect("session state") = SessionState::Bound;
            return Err(err);
        }

        match self.done_rx.recv_timeout(timeout) {
            Ok(reason) => {
                self.join();
                Ok(reason)
            }
            Err(RecvTimeoutError::Timeout) => {
                warn!(object = %self.object_name, "dismount unconfirmed, force-stopping");
                self.force_stop();
                Err(ServiceError::Timeout(timeout))
            }
            Err(RecvTimeoutError::Disconnected) => {
                self.join();
                Err(ServiceError::ChannelClosed)
            }
        }
    }

    /// Block until the dispatch loop exits on its own (peer CLOSE or channel
    /// teardown).
    pub fn wait_stopped(&mut self, timeout: Duration) -> Result<StopReason> {
        match self.done_rx.recv_timeout(timeout) {
            Ok(reason) => {
                self.join();
                Ok(reason)
            }
            Err(RecvTimeoutError::Timeout) => Err(ServiceError::Timeout(timeout)),
            Err(RecvTimeoutError::Disconnected) => Err(ServiceError::ChannelClosed),
        }
    }

    /// Raise the stop flag and join the dispatch thread.
    pub fn force_stop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        self.join();
    }

    fn join(&mut self) {
        if let Some(handle) = self.handle.take() {
            // A panicked dispatch thread already logged why.
            let _ = handle.join();
        }
        *self.state.lock().expect("session state") = SessionState::Stopped;
    }
}

impl Drop for DeviceService {
    fn drop(&mut self) {
        self.force_stop();
    }
}

fn dispatch_loop<C: ServerChannel>(
    mut provider: Box<dyn Provider>,
    mut channel: C,
    stop: &AtomicBool,
) -> StopReason {
    let region_len = channel.region_len();
    let max_transfer = region_len.saturating_sub(PAYLOAD_OFFSET);
    let mut header = vec![0u8; PAYLOAD_OFFSET.min(region_len)];

    let reason = loop {
        if stop.load(Ordering::SeqCst) {
            break StopReason::ForceStopped;
        }
        match channel.wait_request(POLL_INTERVAL) {
            Ok(RequestWait::TimedOut) => continue,
            Ok(RequestWait::Closed) => break StopReason::ChannelClosed,
            Ok(RequestWait::Request) => {}
            Err(_) => break StopReason::ChannelClosed,
        }

        channel.read_region(0, &mut header);
        let code = match decode_request_code(&header) {
            Ok(code) => code,
            Err(err) => {
                // Unknown code: answer with an errno so the peer is never
                // left hanging on its single outstanding request.
                warn!(error = %err, "malformed request header");
                respond_io(&mut channel, &mut header, errno::INVALID_PARAMETER, 0);
                continue;
            }
        };
        debug!(code = ?code, "request");

        match code {
            ReqCode::Info | ReqCode::Connect => {
                let info = info_for(provider.as_ref());
                header.fill(0);
                let _ = encode_info_response(&mut header, &info);
                channel.write_region(0, &header);
                channel.signal_response();
            }
            ReqCode::Read => handle_read(provider.as_mut(), &mut channel, &mut header, max_transfer),
            ReqCode::Write => {
                handle_write(provider.as_mut(), &mut channel, &mut header, max_transfer)
            }
            ReqCode::Unmap | ReqCode::Zero => {
                handle_ranges(provider.as_mut(), &mut channel, region_len)
            }
            ReqCode::Scsi => {
                // No SCSI passthrough; the capability bit is never offered.
                respond_io(&mut channel, &mut header, errno::NOT_SUPPORTED, 0);
            }
            ReqCode::Shared => handle_shared(provider.as_mut(), &mut channel, &header, region_len),
            ReqCode::Close => {
                let _ = provider.flush();
                break StopReason::Closed;
            }
        }
    };

    channel.release_liveness();
    reason
}

/// Capability word and geometry offered in INFO and CONNECT responses.
pub(crate) fn info_for(provider: &dyn Provider) -> InfoResponse {
    let mut flags = InfoFlags::empty();
    if !provider.is_writable() {
        flags |= InfoFlags::READ_ONLY;
    } else {
        flags |= InfoFlags::SUPPORTS_UNMAP | InfoFlags::SUPPORTS_ZERO;
    }
    if provider.supports_shared() {
        flags |= InfoFlags::SUPPORTS_SHARED;
    }
    InfoResponse {
        file_size: provider.length(),
        required_alignment: provider.sector_size() as u64,
        flags,
    }
}

fn respond_io<C: ServerChannel>(channel: &mut C, header: &mut [u8], errorno: u64, length: u64) {
    header.fill(0);
    let _ = encode_io_response(header, &IoResponse { errorno, length });
    channel.write_region(0, header);
    channel.signal_response();
}

fn handle_read<C: ServerChannel>(
    provider: &mut dyn Provider,
    channel: &mut C,
    header: &mut [u8],
    max_transfer: usize,
) {
    let request = match decode_io_request(header) {
        Ok(request) => request,
        Err(_) => return respond_io(channel, header, errno::INVALID_PARAMETER, 0),
    };
    if request.length > max_transfer as u64 {
        return respond_io(channel, header, errno::INVALID_PARAMETER, 0);
    }
    let mut data = vec![0u8; request.length as usize];
    match provider.read_at(request.offset, &mut data) {
        Ok(got) => {
            channel.write_region(PAYLOAD_OFFSET, &data[..got]);
            respond_io(channel, header, errno::NONE, got as u64);
        }
        Err(err) => respond_io(channel, header, errno_for(&err), 0),
    }
}

fn handle_write<C: ServerChannel>(
    provider: &mut dyn Provider,
    channel: &mut C,
    header: &mut [u8],
    max_transfer: usize,
) {
    let request = match decode_io_request(header) {
        Ok(request) => request,
        Err(_) => return respond_io(channel, header, errno::INVALID_PARAMETER, 0),
    };
    if request.length > max_transfer as u64 {
        return respond_io(channel, header, errno::INVALID_PARAMETER, 0);
    }
    let mut data = vec![0u8; request.length as usize];
    channel.read_region(PAYLOAD_OFFSET, &mut data);
    match provider.write_at(request.offset, &data) {
        Ok(wrote) => respond_io(channel, header, errno::NONE, wrote as u64),
        Err(err) => respond_io(channel, header, errno_for(&err), 0),
    }
}

fn handle_ranges<C: ServerChannel>(
    provider: &mut dyn Provider,
    channel: &mut C,
    region_len: usize,
) {
    let mut region = vec![0u8; region_len];
    channel.read_region(0, &mut region);
    let result = decode_range_request(&region).map_err(ServiceError::from).and_then(|ranges| {
        for range in ranges {
            provider.zero_at(range.offset, range.length)?;
        }
        Ok(())
    });
    let errorno = match result {
        Ok(()) => errno::NONE,
        Err(ServiceError::Provider(ref err)) => errno_for(err),
        Err(_) => errno::INVALID_PARAMETER,
    };
    let mut header = vec![0u8; 8];
    let _ = encode_range_response(&mut header, errorno);
    channel.write_region(0, &header);
    channel.signal_response();
}

fn handle_shared<C: ServerChannel>(
    provider: &mut dyn Provider,
    channel: &mut C,
    header: &[u8],
    region_len: usize,
) {
    let mut region = vec![0u8; region_len];
    let outcome = decode_shared_request(header)
        .map_err(ServiceError::from)
        .and_then(|request| Ok(provider.shared_keys(&request)?));
    match outcome {
        Ok(response) => {
            let _ = encode_shared_response(&mut region, &response);
        }
        Err(ServiceError::Provider(ref err)) => {
            let _ = encode_shared_error(&mut region, shared_errno_for(err));
        }
        Err(_) => {
            let _ = encode_shared_error(&mut region, vdisk_proto::shared_errno::INVALID_PARAMETER);
        }
    }
    channel.write_region(0, &region);
    channel.signal_response();
}
