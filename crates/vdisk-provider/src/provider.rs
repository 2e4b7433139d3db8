use crate::shared::{SharedRequest, SharedResponse};
use crate::{ProviderError, Result};

/// Default sector size advertised by providers that are not told otherwise.
pub const SECTOR_SIZE: u32 = 512;

/// Byte-addressable random-access storage exposed to the transport server and
/// the conversion pipeline.
///
/// `length` and `sector_size` are fixed at construction. Reads may transfer
/// fewer bytes than requested only at the end of the extent; writes report
/// partial transfers rather than retrying. Implementations are driven
/// single-threaded per session by the transport server and are not required
/// to tolerate concurrent callers.
pub trait Provider: Send {
    fn length(&self) -> u64;

    fn sector_size(&self) -> u32;

    fn is_writable(&self) -> bool;

    fn supports_shared(&self) -> bool {
        false
    }

    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> Result<usize>;

    fn write_at(&mut self, offset: u64, buf: &[u8]) -> Result<usize>;

    fn flush(&mut self) -> Result<()> {
        Ok(())
    }

    /// Zero-fill `len` bytes starting at `offset` (UNMAP/ZERO protocol ops).
    fn zero_at(&mut self, offset: u64, len: u64) -> Result<()> {
        if !self.is_writable() {
            return Err(ProviderError::ReadOnly);
        }
        let zeros = vec![0u8; 64 * 1024];
        let mut pos = 0u64;
        while pos < len {
            let chunk = (len - pos).min(zeros.len() as u64) as usize;
            let wrote = self.write_at(offset + pos, &zeros[..chunk])?;
            if wrote != chunk {
                return Err(ProviderError::WriteMismatch {
                    offset: offset + pos,
                    requested: chunk,
                    wrote,
                });
            }
            pos += chunk as u64;
        }
        Ok(())
    }

    /// SCSI-style persistent reservation commands (SHARED protocol ops).
    ///
    /// Only meaningful when `supports_shared` returns true.
    fn shared_keys(&mut self, _request: &SharedRequest) -> Result<SharedResponse> {
        Err(ProviderError::NotSupported("shared reservation commands"))
    }
}
