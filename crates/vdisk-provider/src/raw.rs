use std::path::Path;

use crate::store::{ByteStore, FileStore};
use crate::{Provider, ProviderError, Result, SECTOR_SIZE};

/// Provider over a single seekable byte store (plain image file or raw
/// physical device).
///
/// The extent is snapshotted from the store at construction and stays fixed
/// for the life of the provider.
pub struct RawProvider<S> {
    store: S,
    length: u64,
    sector_size: u32,
}

impl<S: ByteStore> RawProvider<S> {
    pub fn new(store: S) -> Result<Self> {
        Self::with_sector_size(store, SECTOR_SIZE)
    }

    pub fn with_sector_size(mut store: S, sector_size: u32) -> Result<Self> {
        if sector_size == 0 {
            return Err(ProviderError::InvalidParameter("sector size is zero"));
        }
        let length = store.len()?;
        Ok(Self {
            store,
            length,
            sector_size,
        })
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn into_store(self) -> S {
        self.store
    }
}

impl RawProvider<FileStore> {
    pub fn open(path: impl AsRef<Path>, writable: bool) -> Result<Self> {
        let store = if writable {
            FileStore::open_read_write(path)?
        } else {
            FileStore::open_read_only(path)?
        };
        Self::new(store)
    }
}

impl<S: ByteStore> Provider for RawProvider<S> {
    fn length(&self) -> u64 {
        self.length
    }

    fn sector_size(&self) -> u32 {
        self.sector_size
    }

    fn is_writable(&self) -> bool {
        !self.store.is_read_only()
    }

    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> Result<usize> {
        let want = crate::util::clamped_len(offset, buf.len(), self.length)?;
        self.store.read_at(offset, &mut buf[..want])
    }

    fn write_at(&mut self, offset: u64, buf: &[u8]) -> Result<usize> {
        if self.store.is_read_only() {
            return Err(ProviderError::ReadOnly);
        }
        crate::util::checked_range(offset, buf.len(), self.length)?;
        self.store.write_at(offset, buf)
    }

    fn flush(&mut self) -> Result<()> {
        self.store.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MemStore;

    #[test]
    fn length_and_sector_size_are_fixed_at_construction() {
        let p = RawProvider::with_sector_size(MemStore::new(8192), 4096).unwrap();
        assert_eq!(p.length(), 8192);
        assert_eq!(p.sector_size(), 4096);
        assert!(p.is_writable());
    }

    #[test]
    fn write_read_roundtrip() {
        let mut p = RawProvider::new(MemStore::new(4096)).unwrap();
        let data: Vec<u8> = (0..=255).collect();
        assert_eq!(p.write_at(1000, &data).unwrap(), data.len());

        let mut back = vec![0u8; data.len()];
        assert_eq!(p.read_at(1000, &mut back).unwrap(), data.len());
        assert_eq!(back, data);
    }

    #[test]
    fn read_only_store_rejects_writes() {
        let store = MemStore::new(512).with_read_only(true);
        let mut p = RawProvider::new(store).unwrap();
        assert!(!p.is_writable());
        assert!(matches!(
            p.write_at(0, &[1]).unwrap_err(),
            ProviderError::ReadOnly
        ));
    }

    #[test]
    fn write_past_extent_is_out_of_bounds() {
        let mut p = RawProvider::new(MemStore::new(512)).unwrap();
        assert!(matches!(
            p.write_at(500, &[0u8; 64]).unwrap_err(),
            ProviderError::OutOfBounds { .. }
        ));
    }

    #[test]
    fn zero_at_clears_a_range() {
        let mut p = RawProvider::new(MemStore::from_vec(vec![0xFF; 4096])).unwrap();
        p.zero_at(100, 200).unwrap();

        let mut buf = vec![0u8; 4096];
        p.read_at(0, &mut buf).unwrap();
        assert!(buf[..100].iter().all(|b| *b == 0xFF));
        assert!(buf[100..300].iter().all(|b| *b == 0));
        assert!(buf[300..].iter().all(|b| *b == 0xFF));
    }
}
