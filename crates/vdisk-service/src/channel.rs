//! Transport channel capability: a shared buffer plus the synchronization
//! primitives derived from its base name.
//!
//! A real deployment maps a named shared memory region and opens two named
//! events and a mutex (names derived with [`request_signal_name`],
//! [`response_signal_name`] and [`liveness_mutex_name`]). The serving side
//! holds the liveness mutex while alive; the client detects peer death by
//! racing mutex acquisition against the response signal. [`InProcChannel`]
//! implements both halves over process-local primitives for same-process
//! sessions and tests.

use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

use crate::{Result, ServiceError};

/// Suffix appended to the base object name for the request event.
pub const REQUEST_SUFFIX: &str = "_Request";
/// Suffix appended to the base object name for the response event.
pub const RESPONSE_SUFFIX: &str = "_Response";
/// Suffix appended to the base object name for the server liveness mutex.
pub const SERVER_SUFFIX: &str = "_Server";

pub fn request_signal_name(base: &str) -> String {
    format!("{base}{REQUEST_SUFFIX}")
}

pub fn response_signal_name(base: &str) -> String {
    format!("{base}{RESPONSE_SUFFIX}")
}

pub fn liveness_mutex_name(base: &str) -> String {
    format!("{base}{SERVER_SUFFIX}")
}

/// What a client-side wait resolved to.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum WaitOutcome {
    /// The response signal fired; the response is in the buffer.
    Response,
    /// The liveness mutex was acquired first: the peer exited without
    /// responding.
    PeerExited,
}

/// Result of a bounded server-side wait for the next request.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum RequestWait {
    Request,
    TimedOut,
    Closed,
}

/// Serving half of a proxy channel. Exactly one request is outstanding at a
/// time; the header region is reused for every message.
pub trait ServerChannel: Send {
    fn region_len(&self) -> usize;

    fn read_region(&self, offset: usize, out: &mut [u8]);

    fn write_region(&mut self, offset: usize, data: &[u8]);

    /// Take the liveness mutex. Claimed by the session owner before the
    /// dispatch thread starts and held until the loop exits, so a client is
    /// never exposed to the unclaimed state.
    fn claim_liveness(&mut self);

    /// Drop the liveness mutex, letting any waiting client observe peer
    /// exit.
    fn release_liveness(&mut self);

    fn wait_request(&mut self, timeout: Duration) -> Result<RequestWait>;

    fn signal_response(&mut self);
}

/// Client half of a proxy channel.
pub trait ClientChannel: Send {
    fn region_len(&self) -> usize;

    fn read_region(&self, offset: usize, out: &mut [u8]);

    fn write_region(&mut self, offset: usize, data: &[u8]);

    fn signal_request(&mut self);

    /// Wait for the response signal, racing it against acquisition of the
    /// server's liveness mutex.
    fn wait_response_or_peer_exit(&mut self) -> WaitOutcome;
}

struct ChannelState {
    buffer: Vec<u8>,
    request_pending: bool,
    response_pending: bool,
    server_alive: bool,
    closed: bool,
}

struct ChannelShared {
    state: Mutex<ChannelState>,
    request_cv: Condvar,
    response_cv: Condvar,
}

/// In-process channel pair sharing one buffer, used for same-process
/// sessions and tests.
pub struct InProcChannel;

impl InProcChannel {
    pub fn pair(region_len: usize) -> (InProcServer, InProcClient) {
        let shared = Arc::new(ChannelShared {
            state: Mutex::new(ChannelState {
                buffer: vec![0u8; region_len],
                request_pending: false,
                response_pending: false,
                server_alive: false,
                closed: false,
            }),
            request_cv: Condvar::new(),
            response_cv: Condvar::new(),
        });
        (
            InProcServer {
                shared: Arc::clone(&shared),
            },
            InProcClient { shared },
        )
    }
}

pub struct InProcServer {
    shared: Arc<ChannelShared>,
}

/// Clonable: clones address the same shared region, like reopening the named
/// objects in another part of the process.
#[derive(Clone)]
pub struct InProcClient {
    shared: Arc<ChannelShared>,
}

impl InProcClient {
    /// Close the channel, waking a server blocked on `wait_request`.
    pub fn close(&self) {
        let mut state = self.shared.state.lock().expect("channel mutex");
        state.closed = true;
        self.shared.request_cv.notify_all();
        self.shared.response_cv.notify_all();
    }
}

fn lock<'a>(shared: &'a ChannelShared) -> std::sync::MutexGuard<'a, ChannelState> {
    shared.state.lock().expect("channel mutex")
}

impl ServerChannel for InProcServer {
    fn region_len(&self) -> usize {
        lock(&self.shared).buffer.len()
    }

    fn read_region(&self, offset: usize, out: &mut [u8]) {
        let state = lock(&self.shared);
        out.copy_from_slice(&state.buffer[offset..offset + out.len()]);
    }

    fn write_region(&mut self, offset: usize, data: &[u8]) {
        let mut state = lock(&self.shared);
        state.buffer[offset..offset + data.len()].copy_from_slice(data);
    }

    fn claim_liveness(&mut self) {
        lock(&self.shared).server_alive = true;
    }

    fn release_liveness(&mut self) {
        let mut state = lock(&self.shared);
        state.server_alive = false;
        drop(state);
        self.shared.response_cv.notify_all();
    }

    fn wait_request(&mut self, timeout: Duration) -> Result<RequestWait> {
        let mut state = lock(&self.shared);
        loop {
            if state.request_pending {
                state.request_pending = false;
                return Ok(RequestWait::Request);
            }
            if state.closed {
                return Ok(RequestWait::Closed);
            }
            let (next, wait) = self
                .shared
                .request_cv
                .wait_timeout(state, timeout)
                .map_err(|_| ServiceError::ChannelClosed)?;
            state = next;
            if wait.timed_out() && !state.request_pending && !state.closed {
                return Ok(RequestWait::TimedOut);
            }
        }
    }

    fn signal_response(&mut self) {
        let mut state = lock(&self.shared);
        state.response_pending = true;
        drop(state);
        self.shared.response_cv.notify_all();
    }
}

impl Drop for InProcServer {
    fn drop(&mut self) {
        // A vanished server must never leave a client blocked.
        self.release_liveness();
    }
}

impl ClientChannel for InProcClient {
    fn region_len(&self) -> usize {
        lock(&self.shared).buffer.len()
    }

    fn read_region(&self, offset: usize, out: &mut [u8]) {
        let state = lock(&self.shared);
        out.copy_from_slice(&state.buffer[offset..offset + out.len()]);
    }

    fn write_region(&mut self, offset: usize, data: &[u8]) {
        let mut state = lock(&self.shared);
        state.buffer[offset..offset + data.len()].copy_from_slice(data);
    }

    fn signal_request(&mut self) {
        let mut state = lock(&self.shared);
        state.request_pending = true;
        drop(state);
        self.shared.request_cv.notify_all();
    }

    fn wait_response_or_peer_exit(&mut self) -> WaitOutcome {
        let mut state = lock(&self.shared);
        loop {
            if state.response_pending {
                state.response_pending = false;
                return WaitOutcome::Response;
            }
            // Acquiring the liveness mutex "wins" only when the server has
            // released it.
            if !state.server_alive {
                return WaitOutcome::PeerExited;
            }
            state = self
                .shared
                .response_cv
                .wait(state)
                .expect("channel mutex");
        }
    }
}
