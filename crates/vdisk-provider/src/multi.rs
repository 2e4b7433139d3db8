use std::path::{Path, PathBuf};

use crate::store::{ByteStore, FileStore};
use crate::util::clamped_len;
use crate::{Provider, ProviderError, Result, SECTOR_SIZE};

struct Segment<S> {
    store: S,
    start: u64,
    len: u64,
}

/// Provider concatenating numbered raw segment files into one logical extent.
///
/// Segment order is the ordinal (byte-wise) sort of the discovered file
/// names; a request spanning a segment boundary is split and dispatched to
/// each segment in order, accumulating transferred bytes until the request is
/// satisfied or a segment comes back short.
pub struct MultiSegmentProvider<S> {
    segments: Vec<Segment<S>>,
    length: u64,
    sector_size: u32,
    writable: bool,
}

/// Discover the sibling segment files belonging to `first`.
///
/// A file participates in multi-segment discovery when its extension ends in
/// a digit run whose last two digits are `00` or `01` (`img.000`, `img.001`,
/// `disk.raw01`, ...). The digit run is replaced by `?` placeholders of the
/// same width and all matching siblings are collected and sorted byte-wise.
/// Names that do not trigger discovery resolve to just the named file.
pub fn discover_segments(first: &Path) -> Result<Vec<PathBuf>> {
    let Some(pattern) = segment_pattern(first) else {
        if !first.exists() {
            return Err(ProviderError::NotFound(first.display().to_string()));
        }
        return Ok(vec![first.to_path_buf()]);
    };

    let dir = match first.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };

    let mut found = Vec::new();
    for entry in std::fs::read_dir(&dir).map_err(ProviderError::from)? {
        let entry = entry.map_err(ProviderError::from)?;
        let name = entry.file_name();
        if let Some(name) = name.to_str() {
            if pattern.matches(name) {
                found.push(dir.join(name));
            }
        }
    }

    if found.is_empty() {
        return Err(ProviderError::NotFound(first.display().to_string()));
    }
    found.sort();
    Ok(found)
}

struct SegmentPattern {
    stem: String,
    ext_prefix: String,
    digit_width: usize,
}

impl SegmentPattern {
    fn matches(&self, name: &str) -> bool {
        let Some((stem, ext)) = name.rsplit_once('.') else {
            return false;
        };
        if stem != self.stem {
            return false;
        }
        let Some(run) = ext.strip_prefix(self.ext_prefix.as_str()) else {
            return false;
        };
        run.len() == self.digit_width && run.bytes().all(|b| b.is_ascii_digit())
    }
}

fn segment_pattern(first: &Path) -> Option<SegmentPattern> {
    let name = first.file_name()?.to_str()?;
    let (stem, ext) = name.rsplit_once('.')?;

    let digits = ext
        .bytes()
        .rev()
        .take_while(|b| b.is_ascii_digit())
        .count();
    if digits < 2 {
        return None;
    }
    let run = &ext[ext.len() - digits..];
    if !(run.ends_with("00") || run.ends_with("01")) {
        return None;
    }

    Some(SegmentPattern {
        stem: stem.to_string(),
        ext_prefix: ext[..ext.len() - digits].to_string(),
        digit_width: digits,
    })
}

impl MultiSegmentProvider<FileStore> {
    /// Open all segments reachable from the first segment's file name.
    pub fn open(first: impl AsRef<Path>, writable: bool) -> Result<Self> {
        let paths = discover_segments(first.as_ref())?;
        let mut stores = Vec::with_capacity(paths.len());
        for path in &paths {
            stores.push(if writable {
                FileStore::open_read_write(path)?
            } else {
                FileStore::open_read_only(path)?
            });
        }
        Self::from_stores(stores, SECTOR_SIZE)
    }
}

impl<S: ByteStore> MultiSegmentProvider<S> {
    pub fn from_stores(stores: Vec<S>, sector_size: u32) -> Result<Self> {
        if stores.is_empty() {
            return Err(ProviderError::NotFound("no segment files".into()));
        }
        if sector_size == 0 {
            return Err(ProviderError::InvalidParameter("sector size is zero"));
        }

        let mut segments = Vec::with_capacity(stores.len());
        let mut start = 0u64;
        let mut writable = true;
        for mut store in stores {
            let len = store.len()?;
            writable &= !store.is_read_only();
            segments.push(Segment { store, start, len });
            start = start
                .checked_add(len)
                .ok_or(ProviderError::OffsetOverflow)?;
        }

        Ok(Self {
            segments,
            length: start,
            sector_size,
            writable,
        })
    }

    pub fn segment_count(&self) -> usize {
        self.segments.len()
    }

    fn segment_index(&self, offset: u64) -> usize {
        // Last segment whose start is <= offset.
        self.segments
            .partition_point(|s| s.start <= offset)
            .saturating_sub(1)
    }
}

impl<S: ByteStore> Provider for MultiSegmentProvider<S> {
    fn length(&self) -> u64 {
        self.length
    }

    fn sector_size(&self) -> u32 {
        self.sector_size
    }

    fn is_writable(&self) -> bool {
        self.writable
    }

    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> Result<usize> {
        let want = clamped_len(offset, buf.len(), self.length)?;
        let mut done = 0usize;
        while done < want {
            let abs = offset + done as u64;
            let idx = self.segment_index(abs);
            let segment = &mut self.segments[idx];
            let within = abs - segment.start;
            let chunk = ((segment.len - within) as usize).min(want - done);

            let got = segment.store.read_at(within, &mut buf[done..done + chunk])?;
            done += got;
            if got < chunk {
                break;
            }
        }
        Ok(done)
    }

    fn write_at(&mut self, offset: u64, buf: &[u8]) -> Result<usize> {
        if !self.writable {
            return Err(ProviderError::ReadOnly);
        }
        crate::util::checked_range(offset, buf.len(), self.length)?;

        let mut done = 0usize;
        while done < buf.len() {
            let abs = offset + done as u64;
            let idx = self.segment_index(abs);
            let segment = &mut self.segments[idx];
            let within = abs - segment.start;
            let chunk = ((segment.len - within) as usize).min(buf.len() - done);

            let wrote = segment.store.write_at(within, &buf[done..done + chunk])?;
            done += wrote;
            if wrote < chunk {
                break;
            }
        }
        Ok(done)
    }

    fn flush(&mut self) -> Result<()> {
        for segment in &mut self.segments {
            segment.store.flush()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MemStore;

    fn provider_with_segments(sizes: &[usize]) -> MultiSegmentProvider<MemStore> {
        let stores = sizes.iter().map(|s| MemStore::new(*s)).collect();
        MultiSegmentProvider::from_stores(stores, SECTOR_SIZE).unwrap()
    }

    #[test]
    fn logical_length_is_sum_of_segments() {
        let p = provider_with_segments(&[100, 250, 50]);
        assert_eq!(p.length(), 400);
        assert_eq!(p.segment_count(), 3);
    }

    #[test]
    fn io_across_segment_boundary() {
        let mut p = provider_with_segments(&[128, 128, 128]);
        let data: Vec<u8> = (0u16..200).map(|v| (v % 251) as u8).collect();

        assert_eq!(p.write_at(100, &data).unwrap(), data.len());

        let mut back = vec![0u8; data.len()];
        assert_eq!(p.read_at(100, &mut back).unwrap(), data.len());
        assert_eq!(back, data);

        // Bytes landed in the right segments.
        let mut first = vec![0u8; 28];
        p.read_at(100, &mut first).unwrap();
        assert_eq!(first, data[..28]);
    }

    #[test]
    fn pattern_detection() {
        assert!(segment_pattern(Path::new("img.001")).is_some());
        assert!(segment_pattern(Path::new("img.000")).is_some());
        assert!(segment_pattern(Path::new("disk.raw01")).is_some());
        assert!(segment_pattern(Path::new("img.002")).is_none());
        assert!(segment_pattern(Path::new("img.iso")).is_none());
        assert!(segment_pattern(Path::new("plain")).is_none());

        let p = segment_pattern(Path::new("img.001")).unwrap();
        assert!(p.matches("img.001"));
        assert!(p.matches("img.010"));
        assert!(!p.matches("img.0010"));
        assert!(!p.matches("other.001"));
    }
}
