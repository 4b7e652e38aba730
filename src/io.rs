//! Positioned I/O over a data file.
//!
//! Two backends satisfy the same [`IoManager`] trait: [`FileIo`] for the active,
//! still-growing file, and [`MmapIo`] for older files the engine only ever reads
//! once they are immutable.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;
use std::sync::{Arc, Mutex};

use crate::error::{Error, Result};

/// Capability set a data file needs from its underlying storage.
pub trait IoManager: Send + Sync {
    /// Reads into `buf` starting at `offset`, returning the number of bytes read.
    fn read(&self, buf: &mut [u8], offset: u64) -> Result<usize>;
    /// Appends `buf` to the end of the file, returning the number of bytes written.
    fn write(&self, buf: &[u8]) -> Result<usize>;
    /// Flushes any buffered data to stable storage.
    fn sync(&self) -> Result<()>;
    /// Returns the current size of the underlying file, in bytes.
    fn size(&self) -> u64;
}

/// Standard buffered positional I/O: create+read+write+append, mode 0644.
pub struct FileIo {
    file: Arc<Mutex<File>>,
}

impl FileIo {
    pub fn new(file_name: impl AsRef<Path>) -> Result<Self> {
        let file = open_with_mode(file_name.as_ref())?;
        Ok(Self {
            file: Arc::new(Mutex::new(file)),
        })
    }
}

#[cfg(unix)]
fn open_with_mode(path: &Path) -> Result<File> {
    use std::os::unix::fs::OpenOptionsExt;
    OpenOptions::new()
        .create(true)
        .read(true)
        .write(true)
        .append(true)
        .mode(0o644)
        .open(path)
        .map_err(Error::from)
}

#[cfg(not(unix))]
fn open_with_mode(path: &Path) -> Result<File> {
    OpenOptions::new()
        .create(true)
        .read(true)
        .write(true)
        .append(true)
        .open(path)
        .map_err(Error::from)
}

impl IoManager for FileIo {
    fn read(&self, buf: &mut [u8], offset: u64) -> Result<usize> {
        let mut file = self.file.lock().expect("file mutex poisoned");
        file.seek(SeekFrom::Start(offset))?;
        let mut read_total = 0;
        while read_total < buf.len() {
            match file.read(&mut buf[read_total..])? {
                0 => break,
                n => read_total += n,
            }
        }
        Ok(read_total)
    }

    fn write(&self, buf: &[u8]) -> Result<usize> {
        let mut file = self.file.lock().expect("file mutex poisoned");
        Ok(file.write(buf)?)
    }

    fn sync(&self) -> Result<()> {
        let file = self.file.lock().expect("file mutex poisoned");
        file.sync_all()?;
        Ok(())
    }

    fn size(&self) -> u64 {
        self.file
            .lock()
            .expect("file mutex poisoned")
            .metadata()
            .map(|m| m.len())
            .unwrap_or(0)
    }
}

/// Read-only memory-mapped I/O, used to accelerate recovery over immutable older files.
///
/// `write` and `sync` are unsupported: a file that is being mapped read-only is, by
/// the engine's own contract, never appended to again by this process.
pub struct MmapIo {
    mmap: memmap2::Mmap,
}

impl MmapIo {
    #[allow(unsafe_code)]
    pub fn new(file_name: impl AsRef<Path>) -> Result<Self> {
        let file = OpenOptions::new().read(true).open(file_name)?;
        // SAFETY: the file is never truncated or written to by this process while
        // mapped — mmap-backed data files only ever belong to `older_files`, which
        // the engine treats as immutable for the remainder of the process lifetime.
        let mmap = unsafe { memmap2::Mmap::map(&file)? };
        Ok(Self { mmap })
    }
}

impl IoManager for MmapIo {
    fn read(&self, buf: &mut [u8], offset: u64) -> Result<usize> {
        let offset = offset as usize;
        if offset >= self.mmap.len() {
            return Ok(0);
        }
        let end = (offset + buf.len()).min(self.mmap.len());
        let n = end - offset;
        buf[..n].copy_from_slice(&self.mmap[offset..end]);
        Ok(n)
    }

    fn write(&self, _buf: &[u8]) -> Result<usize> {
        Err(Error::Io(std::io::Error::other(
            "write is not supported on a memory-mapped (read-only) data file",
        )))
    }

    fn sync(&self) -> Result<()> {
        Err(Error::Io(std::io::Error::other(
            "sync is not supported on a memory-mapped (read-only) data file",
        )))
    }

    fn size(&self) -> u64 {
        self.mmap.len() as u64
    }
}
