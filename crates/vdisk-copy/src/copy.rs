//! Streaming image copy with zero-skip, checksumming and cancellation.

use std::collections::BTreeMap;

use tracing::debug;
use vdisk_provider::Provider;

use crate::{CopyError, CopyProgress, CopySink, HashAlgorithm, Result};

pub const DEFAULT_CHUNK_SIZE: usize = 2 * 1024 * 1024;

#[derive(Clone, Debug)]
pub struct CopyOptions {
    pub chunk_size: usize,
    /// Skip all-zero chunks instead of writing them, leaving holes in sinks
    /// that support them.
    pub skip_zero: bool,
    pub hashes: Vec<HashAlgorithm>,
}

impl Default for CopyOptions {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            skip_zero: true,
            hashes: Vec::new(),
        }
    }
}

/// Outcome of a completed copy.
#[derive(Debug, Default)]
pub struct CopyReport {
    pub bytes_copied: u64,
    pub bytes_skipped: u64,
    /// Finalized digests keyed by algorithm name.
    pub digests: BTreeMap<&'static str, Vec<u8>>,
}

/// Stream the whole extent of `provider` into `sink`.
///
/// Chunks are `min(chunk_size, remaining)` bytes. Digests cover every byte
/// of the extent including skipped zero ranges; each algorithm is updated
/// on its own scoped thread and all are joined before the next read. The
/// cancel flag is honored once per chunk boundary.
pub fn copy_image(
    provider: &mut dyn Provider,
    sink: &mut dyn CopySink,
    options: &CopyOptions,
    progress: &CopyProgress,
) -> Result<CopyReport> {
    if options.chunk_size == 0 {
        return Err(CopyError::ZeroChunkSize);
    }

    let total = provider.length();
    progress.set_total(total);
    progress.set_position(0);

    let mut digests: Vec<(HashAlgorithm, Box<dyn digest::DynDigest + Send>)> = options
        .hashes
        .iter()
        .map(|algorithm| (*algorithm, algorithm.new_digest()))
        .collect();

    let mut buf = vec![0u8; options.chunk_size];
    let mut report = CopyReport::default();
    let mut position = 0u64;

    while position < total {
        if progress.is_cancelled() {
            return Err(CopyError::Cancelled(position));
        }

        let want = (total - position).min(options.chunk_size as u64) as usize;
        let got = provider
            .read_at(position, &mut buf[..want])
            .map_err(|source| CopyError::Source {
                offset: position,
                source,
            })?;
        if got == 0 {
            return Err(CopyError::ShortRead {
                offset: position,
                remaining: total - position,
            });
        }
        let data = &buf[..got];

        if !digests.is_empty() {
            std::thread::scope(|scope| {
                for (_, digest) in digests.iter_mut() {
                    scope.spawn(move || digest.update(data));
                }
            });
        }

        if options.skip_zero && is_all_zero(data) {
            sink.skip(position, got as u64)?;
            report.bytes_skipped += got as u64;
        } else {
            sink.write_chunk(position, data)?;
            report.bytes_copied += got as u64;
        }

        position += got as u64;
        progress.set_position(position);
    }

    sink.finish(total)?;
    debug!(
        copied = report.bytes_copied,
        skipped = report.bytes_skipped,
        total,
        "copy complete"
    );

    for (algorithm, digest) in digests {
        report
            .digests
            .insert(algorithm.name(), digest.finalize().to_vec());
    }
    Ok(report)
}

pub fn is_all_zero(buf: &[u8]) -> bool {
    // SAFETY: only reinterprets bytes as `u64`; every bit pattern is a
    // valid `u64`.
    let (prefix, words, suffix) = unsafe { buf.align_to::<u64>() };
    prefix.iter().all(|&b| b == 0)
        && words.iter().all(|&w| w == 0)
        && suffix.iter().all(|&b| b == 0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_zero_handles_unaligned_slices() {
        let buf = vec![0u8; 4099];
        assert!(is_all_zero(&buf));
        assert!(is_all_zero(&buf[1..]));
        assert!(is_all_zero(&buf[3..4098]));

        let mut dirty = buf;
        dirty[4098] = 1;
        assert!(!is_all_zero(&dirty));
    }

    #[test]
    fn zero_chunk_size_is_rejected() {
        use vdisk_provider::{MemStore, RawProvider};

        let mut provider = RawProvider::new(MemStore::new(512)).unwrap();
        let mut sink = crate::ProviderSink::new(RawProvider::new(MemStore::new(512)).unwrap());
        let options = CopyOptions {
            chunk_size: 0,
            ..Default::default()
        };
        assert!(matches!(
            copy_image(&mut provider, &mut sink, &options, &CopyProgress::new()),
            Err(CopyError::ZeroChunkSize)
        ));
    }
}
