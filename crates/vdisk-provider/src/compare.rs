use crate::{Provider, Result, SharedRequest, SharedResponse};

/// Debug decorator that cross-checks every read against a second,
/// independently opened copy of the same image.
///
/// Discrepancies (byte counts or contents) are reported through `tracing`
/// and never fail the read; the base provider's data is always returned.
/// Writes are mirrored so the two stores stay comparable. A verification
/// aid, not a production path.
pub struct CompareProvider<P, Q> {
    base: P,
    mirror: Q,
    discrepancies: u64,
}

impl<P: Provider, Q: Provider> CompareProvider<P, Q> {
    pub fn new(base: P, mirror: Q) -> Self {
        if base.length() != mirror.length() {
            tracing::warn!(
                base = base.length(),
                mirror = mirror.length(),
                "compare provider: extents differ"
            );
        }
        Self {
            base,
            mirror,
            discrepancies: 0,
        }
    }

    /// Number of mismatching reads/writes observed so far.
    pub fn discrepancies(&self) -> u64 {
        self.discrepancies
    }

    pub fn into_inner(self) -> (P, Q) {
        (self.base, self.mirror)
    }
}

impl<P: Provider, Q: Provider> Provider for CompareProvider<P, Q> {
    fn length(&self) -> u64 {
        self.base.length()
    }

    fn sector_size(&self) -> u32 {
        self.base.sector_size()
    }

    fn is_writable(&self) -> bool {
        self.base.is_writable()
    }

    fn supports_shared(&self) -> bool {
        self.base.supports_shared()
    }

    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> Result<usize> {
        let got = self.base.read_at(offset, buf)?;

        let mut check = vec![0u8; buf.len()];
        match self.mirror.read_at(offset, &mut check) {
            Ok(mirror_got) if mirror_got != got => {
                self.discrepancies += 1;
                tracing::warn!(
                    offset,
                    base = got,
                    mirror = mirror_got,
                    "compare provider: transfer counts differ"
                );
            }
            Ok(_) => {
                if let Some(at) = buf[..got].iter().zip(&check[..got]).position(|(a, b)| a != b) {
                    self.discrepancies += 1;
                    tracing::warn!(
                        offset,
                        first_mismatch = offset + at as u64,
                        "compare provider: read contents differ"
                    );
                }
            }
            Err(err) => {
                self.discrepancies += 1;
                tracing::warn!(offset, %err, "compare provider: mirror read failed");
            }
        }

        Ok(got)
    }

    fn write_at(&mut self, offset: u64, buf: &[u8]) -> Result<usize> {
        let wrote = self.base.write_at(offset, buf)?;
        match self.mirror.write_at(offset, &buf[..wrote]) {
            Ok(mirror_wrote) if mirror_wrote != wrote => {
                self.discrepancies += 1;
                tracing::warn!(
                    offset,
                    base = wrote,
                    mirror = mirror_wrote,
                    "compare provider: write counts differ"
                );
            }
            Ok(_) => {}
            Err(err) => {
                self.discrepancies += 1;
                tracing::warn!(offset, %err, "compare provider: mirror write failed");
            }
        }
        Ok(wrote)
    }

    fn flush(&mut self) -> Result<()> {
        self.base.flush()?;
        if let Err(err) = self.mirror.flush() {
            tracing::warn!(%err, "compare provider: mirror flush failed");
        }
        Ok(())
    }

    fn zero_at(&mut self, offset: u64, len: u64) -> Result<()> {
        self.base.zero_at(offset, len)?;
        if let Err(err) = self.mirror.zero_at(offset, len) {
            self.discrepancies += 1;
            tracing::warn!(offset, %err, "compare provider: mirror zero failed");
        }
        Ok(())
    }

    fn shared_keys(&mut self, request: &SharedRequest) -> Result<SharedResponse> {
        // Reservation state lives in the base; the mirror holds plain data.
        self.base.shared_keys(request)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{MemStore, RawProvider, SharedAccessProvider, SharedOp};

    #[test]
    fn matching_stores_report_no_discrepancies() {
        let base = RawProvider::new(MemStore::from_vec(vec![7; 1024])).unwrap();
        let mirror = RawProvider::new(MemStore::from_vec(vec![7; 1024])).unwrap();
        let mut p = CompareProvider::new(base, mirror);

        let mut buf = [0u8; 64];
        p.read_at(100, &mut buf).unwrap();
        assert_eq!(p.discrepancies(), 0);

        p.write_at(0, &[1, 2, 3]).unwrap();
        p.read_at(0, &mut buf[..3]).unwrap();
        assert_eq!(p.discrepancies(), 0);
    }

    #[test]
    fn mismatching_read_is_reported_but_not_fatal() {
        let base = RawProvider::new(MemStore::from_vec(vec![7; 1024])).unwrap();
        let mirror = RawProvider::new(MemStore::from_vec(vec![9; 1024])).unwrap();
        let mut p = CompareProvider::new(base, mirror);

        let mut buf = [0u8; 16];
        assert_eq!(p.read_at(0, &mut buf).unwrap(), 16);
        // Base data wins.
        assert!(buf.iter().all(|b| *b == 7));
        assert_eq!(p.discrepancies(), 1);
    }

    #[test]
    fn shared_capability_and_zero_fill_pass_through() {
        let inner = RawProvider::new(MemStore::from_vec(vec![7; 1024])).unwrap();
        let base = SharedAccessProvider::new(inner, *b"0123456789abcdef");
        let mirror = RawProvider::new(MemStore::from_vec(vec![7; 1024])).unwrap();
        let mut p = CompareProvider::new(base, mirror);
        assert!(p.supports_shared());

        p.shared_keys(&SharedRequest {
            op: SharedOp::Register,
            reserve_scope: 0,
            reserve_type: 0,
            existing_key: 0,
            current_channel_key: 0x42,
            operation_channel_key: 0x42,
        })
        .unwrap();
        let keys = p
            .shared_keys(&SharedRequest {
                op: SharedOp::ReadKeys,
                reserve_scope: 0,
                reserve_type: 0,
                existing_key: 0,
                current_channel_key: 0,
                operation_channel_key: 0,
            })
            .unwrap();
        assert_eq!(keys.keys, vec![0x42]);

        // Zero fill hits both stores, so the cross-check stays clean.
        p.zero_at(0, 16).unwrap();
        let mut buf = [1u8; 16];
        p.read_at(0, &mut buf).unwrap();
        assert!(buf.iter().all(|b| *b == 0));
        assert_eq!(p.discrepancies(), 0);
    }
}
