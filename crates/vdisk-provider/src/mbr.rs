use crate::{Provider, Result};

const PARTITION_TABLE_OFFSET: usize = 446;
const BOOT_SIGNATURE_OFFSET: usize = 510;

/// Decorator that answers reads of the first sector with a synthesized MBR.
///
/// Used when the backing store's own sector 0 is readable but not a valid
/// boot sector. The synthesized table holds a single partition starting at
/// LBA 1 and spanning the rest of the extent; all other I/O (including
/// writes anywhere) passes through to the wrapped provider.
pub struct FakeMbrProvider<P> {
    inner: P,
    sector0: Vec<u8>,
}

impl<P: Provider> FakeMbrProvider<P> {
    pub fn new(inner: P) -> Self {
        let sector0 = build_fake_mbr(inner.length(), inner.sector_size());
        Self { inner, sector0 }
    }

    pub fn inner(&self) -> &P {
        &self.inner
    }

    pub fn into_inner(self) -> P {
        self.inner
    }
}

fn build_fake_mbr(length: u64, sector_size: u32) -> Vec<u8> {
    let sector_size = sector_size.max(512) as usize;
    let mut sector = vec![0u8; sector_size];

    let total_sectors = length / sector_size as u64;
    let partition_sectors = total_sectors.saturating_sub(1).min(u32::MAX as u64) as u32;

    let entry = &mut sector[PARTITION_TABLE_OFFSET..PARTITION_TABLE_OFFSET + 16];
    entry[0] = 0x00; // not bootable
    // CHS fields are the LBA-only filler values.
    entry[1..4].copy_from_slice(&[0xFE, 0xFF, 0xFF]);
    entry[4] = 0x07; // IFS/NTFS/exFAT partition id
    entry[5..8].copy_from_slice(&[0xFE, 0xFF, 0xFF]);
    entry[8..12].copy_from_slice(&1u32.to_le_bytes()); // start LBA
    entry[12..16].copy_from_slice(&partition_sectors.to_le_bytes());

    sector[BOOT_SIGNATURE_OFFSET] = 0x55;
    sector[BOOT_SIGNATURE_OFFSET + 1] = 0xAA;
    sector
}

impl<P: Provider> Provider for FakeMbrProvider<P> {
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
        self.inner.supports_shared()
    }

    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> Result<usize> {
        let sector0_len = self.sector0.len() as u64;
        if offset >= sector0_len {
            return self.inner.read_at(offset, buf);
        }

        // Serve the overlapping prefix from the synthesized sector, the rest
        // from the backing provider.
        let got = self.inner.read_at(offset, buf)?;
        let overlap = ((sector0_len - offset) as usize).min(got);
        buf[..overlap].copy_from_slice(&self.sector0[offset as usize..offset as usize + overlap]);
        Ok(got)
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

    fn shared_keys(
        &mut self,
        request: &crate::shared::SharedRequest,
    ) -> Result<crate::shared::SharedResponse> {
        self.inner.shared_keys(request)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{MemStore, RawProvider};

    fn fake_mbr_over_ones(len: usize) -> FakeMbrProvider<RawProvider<MemStore>> {
        let raw = RawProvider::new(MemStore::from_vec(vec![0x11; len])).unwrap();
        FakeMbrProvider::new(raw)
    }

    #[test]
    fn sector_zero_reads_synthesized_mbr() {
        let mut p = fake_mbr_over_ones(1 << 20);
        let mut sector = vec![0u8; 512];
        assert_eq!(p.read_at(0, &mut sector).unwrap(), 512);

        assert_eq!(&sector[510..512], &[0x55, 0xAA]);
        assert_eq!(sector[446 + 4], 0x07);
        let start_lba = u32::from_le_bytes(sector[454..458].try_into().unwrap());
        assert_eq!(start_lba, 1);
        let sectors = u32::from_le_bytes(sector[458..462].try_into().unwrap());
        assert_eq!(sectors as u64, (1u64 << 20) / 512 - 1);
    }

    #[test]
    fn reads_past_sector_zero_pass_through() {
        let mut p = fake_mbr_over_ones(1 << 20);
        let mut buf = vec![0u8; 512];
        p.read_at(512, &mut buf).unwrap();
        assert!(buf.iter().all(|b| *b == 0x11));
    }

    #[test]
    fn straddling_read_mixes_fake_and_real_bytes() {
        let mut p = fake_mbr_over_ones(1 << 20);
        let mut buf = vec![0u8; 1024];
        assert_eq!(p.read_at(256, &mut buf).unwrap(), 1024);

        // First 256 bytes come from the synthesized sector (zeros here),
        // the rest from the backing store.
        assert!(buf[..254].iter().all(|b| *b == 0));
        assert_eq!(&buf[254..256], &[0x55, 0xAA]);
        assert!(buf[256..].iter().all(|b| *b == 0x11));
    }
}
