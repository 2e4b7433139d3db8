use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use crate::util::clamped_len;
use crate::{ProviderError, Result};

/// Byte-addressed backing store for providers.
///
/// `read_at`/`write_at` return the number of bytes transferred. A transfer may
/// come back short only at the end of the store; offsets beyond the end are an
/// error. Implementations are used single-threaded per session, so methods
/// take `&mut self`.
pub trait ByteStore: Send {
    fn len(&mut self) -> Result<u64>;

    fn is_empty(&mut self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    fn is_read_only(&self) -> bool;

    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> Result<usize>;

    fn write_at(&mut self, offset: u64, buf: &[u8]) -> Result<usize>;

    fn set_len(&mut self, len: u64) -> Result<()>;

    fn flush(&mut self) -> Result<()>;
}

/// [`ByteStore`] over an OS file using positional I/O.
///
/// Positional reads/writes do not disturb any cursor shared with other users
/// of the handle. Writes past the current end grow the file, leaving a sparse
/// hole where the filesystem supports it.
pub struct FileStore {
    file: File,
    path: PathBuf,
    read_only: bool,
}

impl FileStore {
    pub fn open_read_only(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = OpenOptions::new()
            .read(true)
            .open(path)
            .map_err(|e| map_open_error(path, e))?;
        Ok(Self {
            file,
            path: path.to_path_buf(),
            read_only: true,
        })
    }

    pub fn open_read_write(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .map_err(|e| map_open_error(path, e))?;
        Ok(Self {
            file,
            path: path.to_path_buf(),
            read_only: false,
        })
    }

    pub fn create(path: impl AsRef<Path>, overwrite: bool) -> Result<Self> {
        let path = path.as_ref();
        let mut opts = OpenOptions::new();
        opts.read(true).write(true);
        if overwrite {
            opts.create(true).truncate(true);
        } else {
            opts.create_new(true);
        }
        let file = opts.open(path).map_err(|e| map_open_error(path, e))?;
        Ok(Self {
            file,
            path: path.to_path_buf(),
            read_only: false,
        })
    }

    pub fn from_file(file: File, path: impl AsRef<Path>, read_only: bool) -> Self {
        Self {
            file,
            path: path.as_ref().to_path_buf(),
            read_only,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn into_file(self) -> File {
        self.file
    }
}

fn map_open_error(path: &Path, err: std::io::Error) -> ProviderError {
    if err.kind() == std::io::ErrorKind::NotFound {
        ProviderError::NotFound(path.display().to_string())
    } else {
        ProviderError::Io(format!("{}: {err}", path.display()))
    }
}

#[cfg(unix)]
fn positional_read(file: &File, offset: u64, buf: &mut [u8]) -> std::io::Result<usize> {
    use std::os::unix::fs::FileExt;
    file.read_at(buf, offset)
}

#[cfg(unix)]
fn positional_write(file: &File, offset: u64, buf: &[u8]) -> std::io::Result<usize> {
    use std::os::unix::fs::FileExt;
    file.write_at(buf, offset)
}

#[cfg(windows)]
fn positional_read(file: &File, offset: u64, buf: &mut [u8]) -> std::io::Result<usize> {
    use std::os::windows::fs::FileExt;
    file.seek_read(buf, offset)
}

#[cfg(windows)]
fn positional_write(file: &File, offset: u64, buf: &[u8]) -> std::io::Result<usize> {
    use std::os::windows::fs::FileExt;
    file.seek_write(buf, offset)
}

impl ByteStore for FileStore {
    fn len(&mut self) -> Result<u64> {
        Ok(self.file.metadata().map_err(ProviderError::from)?.len())
    }

    fn is_read_only(&self) -> bool {
        self.read_only
    }

    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> Result<usize> {
        let capacity = self.len()?;
        let want = clamped_len(offset, buf.len(), capacity)?;

        let mut done = 0;
        while done < want {
            match positional_read(&self.file, offset + done as u64, &mut buf[done..want]) {
                Ok(0) => break,
                Ok(n) => done += n,
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
        Ok(done)
    }

    fn write_at(&mut self, offset: u64, buf: &[u8]) -> Result<usize> {
        if self.read_only {
            return Err(ProviderError::ReadOnly);
        }
        offset
            .checked_add(buf.len() as u64)
            .ok_or(ProviderError::OffsetOverflow)?;

        let mut done = 0;
        while done < buf.len() {
            match positional_write(&self.file, offset + done as u64, &buf[done..]) {
                Ok(0) => break,
                Ok(n) => done += n,
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
        Ok(done)
    }

    fn set_len(&mut self, len: u64) -> Result<()> {
        if self.read_only {
            return Err(ProviderError::ReadOnly);
        }
        self.file.set_len(len).map_err(ProviderError::from)
    }

    fn flush(&mut self) -> Result<()> {
        if self.read_only {
            return Ok(());
        }
        self.file.sync_data().map_err(ProviderError::from)
    }
}

/// In-memory [`ByteStore`] used by tests and fixtures.
pub struct MemStore {
    data: Vec<u8>,
    read_only: bool,
}

impl MemStore {
    pub fn new(len: usize) -> Self {
        Self {
            data: vec![0; len],
            read_only: false,
        }
    }

    pub fn from_vec(data: Vec<u8>) -> Self {
        Self {
            data,
            read_only: false,
        }
    }

    pub fn with_read_only(mut self, read_only: bool) -> Self {
        self.read_only = read_only;
        self
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn into_vec(self) -> Vec<u8> {
        self.data
    }
}

impl ByteStore for MemStore {
    fn len(&mut self) -> Result<u64> {
        Ok(self.data.len() as u64)
    }

    fn is_read_only(&self) -> bool {
        self.read_only
    }

    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> Result<usize> {
        let want = clamped_len(offset, buf.len(), self.data.len() as u64)?;
        let start = offset as usize;
        buf[..want].copy_from_slice(&self.data[start..start + want]);
        Ok(want)
    }

    fn write_at(&mut self, offset: u64, buf: &[u8]) -> Result<usize> {
        if self.read_only {
            return Err(ProviderError::ReadOnly);
        }
        let end = offset
            .checked_add(buf.len() as u64)
            .ok_or(ProviderError::OffsetOverflow)? as usize;
        if end > self.data.len() {
            self.data.resize(end, 0);
        }
        self.data[offset as usize..end].copy_from_slice(buf);
        Ok(buf.len())
    }

    fn set_len(&mut self, len: u64) -> Result<()> {
        if self.read_only {
            return Err(ProviderError::ReadOnly);
        }
        self.data.resize(len as usize, 0);
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        Ok(())
    }
}
