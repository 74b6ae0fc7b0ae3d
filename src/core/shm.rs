//! Named shared-memory regions.
//!
//! A region is a file under [`ShmConfig::root`] mapped read/write into the
//! process. With the default root (`/dev/shm` on Linux) this is exactly what
//! POSIX `shm_open` does, so regions are visible to any process that knows
//! the name and never touch a disk.

use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

use memmap2::{MmapOptions, MmapRaw};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::core::{Error, Result};

#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ShmConfig {
    /// Directory holding the named regions.
    pub root: PathBuf,
    /// Pin the mapping in RAM with `mlock(2)`.
    pub memlock: bool,
}

impl Default for ShmConfig {
    fn default() -> Self {
        Self {
            root: default_root(),
            memlock: false,
        }
    }
}

impl ShmConfig {
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            ..Self::default()
        }
    }

    pub fn path_for(&self, name: &str) -> Result<PathBuf> {
        validate_name(name)?;
        Ok(self.root.join(name))
    }
}

fn default_root() -> PathBuf {
    let shm = Path::new("/dev/shm");
    if cfg!(target_os = "linux") && shm.is_dir() {
        shm.to_path_buf()
    } else {
        std::env::temp_dir()
    }
}

pub fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(Error::InvalidArgument("shared memory name is empty"));
    }
    if name == "." || name == ".." {
        return Err(Error::InvalidArgument("shared memory name is reserved"));
    }
    if name.contains(|c: char| matches!(c, '/' | '\\' | '\0')) {
        return Err(Error::InvalidArgument(
            "shared memory name must be a single path component",
        ));
    }
    Ok(())
}

/// A mapped named region.
///
/// Dropping the segment only unmaps it. The owner removes the name through
/// [`ShmSegment::remove`] once every user is done with it.
pub struct ShmSegment {
    name: String,
    path: PathBuf,
    _file: File,
    map: MmapRaw,
    len: usize,
}

impl ShmSegment {
    /// Creates (or truncates) the named region with `len` zeroed bytes.
    pub fn create(config: &ShmConfig, name: &str, len: usize) -> Result<Self> {
        if len == 0 {
            return Err(Error::InvalidArgument("shared memory length must be non-zero"));
        }
        let path = config.path_for(name)?;
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(true)
            .open(&path)
            .map_err(|err| Error::resource_init(name, err))?;
        file.set_len(len as u64)
            .map_err(|err| Error::resource_init(name, err))?;
        let segment = Self::map(config, name, path, file, len)?;
        log::debug!("created shared memory `{}` ({} bytes)", name, len);
        Ok(segment)
    }

    /// Opens an existing region that must hold at least `min_len` bytes.
    pub fn open(config: &ShmConfig, name: &str, min_len: usize) -> Result<Self> {
        let path = config.path_for(name)?;
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&path)
            .map_err(|err| Error::resource_init(name, err))?;
        let len = file
            .metadata()
            .map_err(|err| Error::resource_init(name, err))?
            .len() as usize;
        if len == 0 || len < min_len {
            return Err(Error::resource_init(
                name,
                io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("region holds {len} bytes, queue needs {min_len}"),
                ),
            ));
        }
        let segment = Self::map(config, name, path, file, min_len)?;
        log::debug!("opened shared memory `{}` ({} bytes mapped)", name, min_len);
        Ok(segment)
    }

    /// Removes the named region. A missing region is not an error.
    pub fn remove(config: &ShmConfig, name: &str) -> Result<()> {
        let path = config.path_for(name)?;
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(Error::Io(err)),
        }
    }

    fn map(config: &ShmConfig, name: &str, path: PathBuf, file: File, len: usize) -> Result<Self> {
        let map = MmapOptions::new()
            .len(len)
            .map_raw(&file)
            .map_err(|err| Error::resource_init(name, err))?;
        let segment = Self {
            name: name.to_string(),
            path,
            _file: file,
            map,
            len,
        };
        if config.memlock {
            segment.lock().map_err(|err| Error::resource_init(name, err))?;
        }
        Ok(segment)
    }

    #[cfg(unix)]
    fn lock(&self) -> io::Result<()> {
        // SAFETY: the range is exactly the live mapping owned by `self.map`.
        let rc = unsafe { libc::mlock(self.map.as_ptr() as *const libc::c_void, self.len) };
        if rc == 0 {
            Ok(())
        } else {
            Err(io::Error::last_os_error())
        }
    }

    #[cfg(not(unix))]
    fn lock(&self) -> io::Result<()> {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "memlock is only supported on unix",
        ))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn as_mut_ptr(&self) -> *mut u8 {
        self.map.as_mut_ptr()
    }
}
