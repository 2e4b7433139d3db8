use crate::{Provider, ProviderError, Result};

/// SHARED protocol operation codes.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum SharedOp {
    GetUniqueId,
    ReadKeys,
    Register,
    ClearKeys,
    Reserve,
    Release,
    Preempt,
    RegisterIgnoreExisting,
}

/// Decoded SHARED command.
#[derive(Clone, Debug)]
pub struct SharedRequest {
    pub op: SharedOp,
    pub reserve_scope: u8,
    pub reserve_type: u8,
    /// Key the caller believes it currently has registered (0 when none).
    pub existing_key: u64,
    /// Key identifying the issuing channel.
    pub current_channel_key: u64,
    /// Key the operation acts on (register/reserve/preempt target).
    pub operation_channel_key: u64,
}

/// Successful SHARED command result. Failures are reported through
/// [`ProviderError`] and mapped to protocol errno values by the codec.
#[derive(Clone, Debug, Default)]
pub struct SharedResponse {
    pub unique_id: [u8; 16],
    pub channel_key: u64,
    pub generation: u64,
    pub reservation_key: u64,
    pub reservation_scope: u8,
    pub reservation_type: u8,
    /// Registered keys, populated for `ReadKeys`.
    pub keys: Vec<u64>,
}

#[derive(Copy, Clone, Debug)]
struct Reservation {
    key: u64,
    scope: u8,
    type_: u8,
}

/// Decorator adding SCSI-style persistent reservation state to any provider.
///
/// The reservation table lives as long as the provider instance: a set of
/// registered keys plus at most one active reservation holder. Conflicting
/// reservation attempts fail with [`ProviderError::ReservationCollision`].
pub struct SharedAccessProvider<P> {
    inner: P,
    unique_id: [u8; 16],
    generation: u64,
    keys: Vec<u64>,
    holder: Option<Reservation>,
}

impl<P: Provider> SharedAccessProvider<P> {
    pub fn new(inner: P, unique_id: [u8; 16]) -> Self {
        Self {
            inner,
            unique_id,
            generation: 0,
            keys: Vec::new(),
            holder: None,
        }
    }

    pub fn inner(&self) -> &P {
        &self.inner
    }

    pub fn into_inner(self) -> P {
        self.inner
    }

    fn base_response(&self, channel_key: u64) -> SharedResponse {
        let holder = self.holder;
        SharedResponse {
            unique_id: self.unique_id,
            channel_key,
            generation: self.generation,
            reservation_key: holder.map(|r| r.key).unwrap_or(0),
            reservation_scope: holder.map(|r| r.scope).unwrap_or(0),
            reservation_type: holder.map(|r| r.type_).unwrap_or(0),
            keys: Vec::new(),
        }
    }

    fn register(&mut self, request: &SharedRequest, check_existing: bool) -> Result<SharedResponse> {
        if check_existing && request.existing_key != 0 && !self.keys.contains(&request.existing_key)
        {
            return Err(ProviderError::ReservationCollision);
        }
        if request.existing_key != 0 {
            self.keys.retain(|k| *k != request.existing_key);
            if let Some(holder) = self.holder {
                if holder.key == request.existing_key {
                    self.holder = None;
                }
            }
        }
        if request.operation_channel_key != 0
            && !self.keys.contains(&request.operation_channel_key)
        {
            self.keys.push(request.operation_channel_key);
        }
        self.generation += 1;
        Ok(self.base_response(request.current_channel_key))
    }

    fn reserve(&mut self, request: &SharedRequest) -> Result<SharedResponse> {
        let key = request.operation_channel_key;
        if key == 0 {
            return Err(ProviderError::InvalidParameter("reservation key is zero"));
        }
        if !self.keys.contains(&key) {
            return Err(ProviderError::ReservationCollision);
        }
        if let Some(holder) = self.holder {
            let same = holder.key == key
                && holder.scope == request.reserve_scope
                && holder.type_ == request.reserve_type;
            if !same {
                return Err(ProviderError::ReservationCollision);
            }
        }
        self.holder = Some(Reservation {
            key,
            scope: request.reserve_scope,
            type_: request.reserve_type,
        });
        Ok(self.base_response(request.current_channel_key))
    }

    fn release(&mut self, request: &SharedRequest) -> Result<SharedResponse> {
        match self.holder {
            Some(holder) if holder.key == request.operation_channel_key => {
                self.holder = None;
                Ok(self.base_response(request.current_channel_key))
            }
            Some(_) => Err(ProviderError::ReservationCollision),
            // Releasing with no active reservation is a no-op.
            None => Ok(self.base_response(request.current_channel_key)),
        }
    }

    fn preempt(&mut self, request: &SharedRequest) -> Result<SharedResponse> {
        let preemptor = request.operation_channel_key;
        if preemptor == 0 || !self.keys.contains(&preemptor) {
            return Err(ProviderError::ReservationCollision);
        }
        // The victim loses both its reservation and its registration.
        self.keys
            .retain(|k| *k != request.existing_key || *k == preemptor);
        self.holder = Some(Reservation {
            key: preemptor,
            scope: request.reserve_scope,
            type_: request.reserve_type,
        });
        self.generation += 1;
        Ok(self.base_response(request.current_channel_key))
    }
}

impl<P: Provider> Provider for SharedAccessProvider<P> {
    fn length(&self) -> u64 {
        self.inner.length()
    }

    fn sector_size(&self) -> u32 {
        self.inner.sector_size()
    }

    fn is_writable(&self) -> bool {
        self.inner.is_writable()
    }

    fn supports_shared(&self) -> bool {
        true
    }

    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> Result<usize> {
        self.inner.read_at(offset, buf)
    }

    fn write_at(&mut self, offset: u64, buf: &[u8]) -> Result<usize> {
        self.inner.write_at(offset, buf)
    }

    fn flush(&mut self) -> Result<()> {
        self.inner.flush()
    }

    fn zero_at(&mut self, offset: u64, len: u64) -> Result<()> {
        self.inner.zero_at(offset, len)
    }

    fn shared_keys(&mut self, request: &SharedRequest) -> Result<SharedResponse> {
        match request.op {
            SharedOp::GetUniqueId => Ok(self.base_response(request.current_channel_key)),
            SharedOp::ReadKeys => {
                let mut response = self.base_response(request.current_channel_key);
                response.keys = self.keys.clone();
                Ok(response)
            }
            SharedOp::Register => self.register(request, true),
            SharedOp::RegisterIgnoreExisting => self.register(request, false),
            SharedOp::ClearKeys => {
                self.keys.clear();
                self.holder = None;
                self.generation += 1;
                Ok(self.base_response(request.current_channel_key))
            }
            SharedOp::Reserve => self.reserve(request),
            SharedOp::Release => self.release(request),
            SharedOp::Preempt => self.preempt(request),
        }
    }
}
