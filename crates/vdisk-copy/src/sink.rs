//! Destinations for the conversion pipeline.

use std::fs::{File, OpenOptions};
use std::io::{self, Seek, SeekFrom, Write};
use std::path::Path;

use vdisk_provider::Provider;

/// Write side of a conversion. `skip` is a hint that the range is all
/// zeroes; a sink that represents unwritten ranges as zero may leave a hole
/// instead of writing. `finish` pins the destination to the source length.
pub trait CopySink {
    fn write_chunk(&mut self, offset: u64, data: &[u8]) -> io::Result<()>;

    fn skip(&mut self, _offset: u64, _len: u64) -> io::Result<()> {
        Ok(())
    }

    fn finish(&mut self, total_len: u64) -> io::Result<()>;
}

/// Plain-file destination. Skipped ranges are never written, so filesystems
/// with hole support store them sparsely; `finish` truncates or extends the
/// file to the exact source length either way.
pub struct FileSink {
    file: File,
}

impl FileSink {
    /// Create the output file. With `overwrite` the file is truncated if
    /// present; without it an existing file is an error.
    pub fn create(path: impl AsRef<Path>, overwrite: bool) -> io::Result<Self> {
        let mut opts = OpenOptions::new();
        opts.read(true).write(true);
        if overwrite {
            opts.create(true).truncate(true);
        } else {
            opts.create_new(true);
        }
        Ok(Self {
            file: opts.open(path)?,
        })
    }

    pub fn from_file(file: File) -> Self {
        Self { file }
    }

    pub fn into_file(self) -> File {
        self.file
    }
}

impl CopySink for FileSink {
    fn write_chunk(&mut self, offset: u64, data: &[u8]) -> io::Result<()> {
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.write_all(data)
    }

    fn finish(&mut self, total_len: u64) -> io::Result<()> {
        self.file.set_len(total_len)?;
        self.file.flush()
    }
}

/// Destination backed by another provider, for copying into an already
/// sized device or image. Skipped ranges are assumed to read as zero on the
/// destination.
pub struct ProviderSink<P> {
    provider: P,
}

impl<P: Provider> ProviderSink<P> {
    pub fn new(provider: P) -> Self {
        Self { provider }
    }

    pub fn into_inner(self) -> P {
        self.provider
    }
}

fn to_io(err: vdisk_provider::ProviderError) -> io::Error {
    io::Error::new(io::ErrorKind::Other, err)
}

impl<P: Provider> CopySink for ProviderSink<P> {
    fn write_chunk(&mut self, offset: u64, data: &[u8]) -> io::Result<()> {
        let mut done = 0;
        while done < data.len() {
            let wrote = self
                .provider
                .write_at(offset + done as u64, &data[done..])
                .map_err(to_io)?;
            if wrote == 0 {
                return Err(io::Error::new(
                    io::ErrorKind::WriteZero,
                    "destination accepted no bytes",
                ));
            }
            done += wrote;
        }
        Ok(())
    }

    fn finish(&mut self, _total_len: u64) -> io::Result<()> {
        self.provider.flush().map_err(to_io)
    }
}
