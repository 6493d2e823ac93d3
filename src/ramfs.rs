/// In-RAM filesystem: a flat, bounded table of named byte blobs.
///
/// No directories, no persistence. Enough for the shell to stash and
/// read back text, and for boot code to drop status files. File count
/// and size are bounded; writes replace content.

extern crate alloc;

use alloc::string::String;
use alloc::vec::Vec;

use spin::Mutex;

use crate::config::{RAMFS_FILE_MAX, RAMFS_MAX_FILES};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FsError {
    NotFound,
    TableFull,
    TooLarge,
    BadName,
}

impl core::fmt::Display for FsError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            FsError::NotFound => write!(f, "no such file"),
            FsError::TableFull => write!(f, "file table full"),
            FsError::TooLarge => write!(f, "file too large"),
            FsError::BadName => write!(f, "bad file name"),
        }
    }
}

struct RamFile {
    name: String,
    data: Vec<u8>,
}

pub struct RamFs {
    files: Vec<RamFile>,
}

static RAMFS: Mutex<Option<RamFs>> = Mutex::new(None);

pub fn init() {
    *RAMFS.lock() = Some(RamFs {
        files: Vec::with_capacity(RAMFS_MAX_FILES),
    });
}

fn with_fs<R>(f: impl FnOnce(&mut RamFs) -> Result<R, FsError>) -> Result<R, FsError> {
    x86_64::instructions::interrupts::without_interrupts(|| {
        let mut guard = RAMFS.lock();
        let fs = guard.as_mut().ok_or(FsError::NotFound)?;
        f(fs)
    })
}

fn valid_name(name: &str) -> bool {
    !name.is_empty() && name.len() <= 64 && !name.contains(char::is_whitespace)
}

/// Create or replace `name` with `data`.
pub fn write(name: &str, data: &[u8]) -> Result<(), FsError> {
    if !valid_name(name) {
        return Err(FsError::BadName);
    }
    if data.len() > RAMFS_FILE_MAX {
        return Err(FsError::TooLarge);
    }
    with_fs(|fs| {
        if let Some(file) = fs.files.iter_mut().find(|f| f.name == name) {
            file.data = data.to_vec();
            return Ok(());
        }
        if fs.files.len() >= RAMFS_MAX_FILES {
            return Err(FsError::TableFull);
        }
        fs.files.push(RamFile {
            name: String::from(name),
            data: data.to_vec(),
        });
        Ok(())
    })
}

/// Create `name` empty if it does not exist yet.
pub fn touch(name: &str) -> Result<(), FsError> {
    if !valid_name(name) {
        return Err(FsError::BadName);
    }
    with_fs(|fs| {
        if fs.files.iter().any(|f| f.name == name) {
            return Ok(());
        }
        if fs.files.len() >= RAMFS_MAX_FILES {
            return Err(FsError::TableFull);
        }
        fs.files.push(RamFile {
            name: String::from(name),
            data: Vec::new(),
        });
        Ok(())
    })
}

pub fn read(name: &str) -> Result<Vec<u8>, FsError> {
    with_fs(|fs| {
        fs.files
            .iter()
            .find(|f| f.name == name)
            .map(|f| f.data.clone())
            .ok_or(FsError::NotFound)
    })
}

pub fn remove(name: &str) -> Result<(), FsError> {
    with_fs(|fs| {
        let before = fs.files.len();
        fs.files.retain(|f| f.name != name);
        if fs.files.len() == before {
            Err(FsError::NotFound)
        } else {
            Ok(())
        }
    })
}

/// (name, size) pairs in creation order.
pub fn list() -> Vec<(String, usize)> {
    with_fs(|fs| {
        Ok(fs
            .files
            .iter()
            .map(|f| (f.name.clone(), f.data.len()))
            .collect())
    })
    .unwrap_or_default()
}
