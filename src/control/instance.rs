//! Single-instance marker
//!
//! An exclusive `flock` on the lock file decides which process is the
//! primary instance. The kernel drops the lock when its holder dies, so a
//! leftover file never blocks a new start. The holder's pid is stored in the
//! file for remote control.

use super::ControlError;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Held for the lifetime of the primary instance
#[derive(Debug)]
pub struct InstanceLock {
    path: PathBuf,
    _file: File,
}

impl InstanceLock {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[derive(Debug)]
pub enum Instance {
    Primary(InstanceLock),
    Running { pid: i32 },
}

pub fn acquire(path: &Path) -> Result<Instance, ControlError> {
    let lock_error = |source| ControlError::Lock {
        path: path.to_path_buf(),
        source,
    };

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(lock_error)?;
    }
    let mut file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(path)
        .map_err(lock_error)?;

    // SAFETY: the descriptor belongs to `file`, which outlives the call
    let locked = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) } == 0;
    if !locked {
        let err = std::io::Error::last_os_error();
        if err.raw_os_error() != Some(libc::EWOULDBLOCK) {
            return Err(lock_error(err));
        }
        let mut content = String::new();
        file.read_to_string(&mut content).map_err(lock_error)?;
        let pid = content
            .trim()
            .parse::<i32>()
            .map_err(|_| ControlError::InstanceUnknown)?;
        debug!("Instance lock {} held by pid {}", path.display(), pid);
        return Ok(Instance::Running { pid });
    }

    file.set_len(0).map_err(lock_error)?;
    file.seek(SeekFrom::Start(0)).map_err(lock_error)?;
    writeln!(file, "{}", std::process::id()).map_err(lock_error)?;
    file.flush().map_err(lock_error)?;
    info!("Acquired instance lock {}", path.display());

    Ok(Instance::Primary(InstanceLock {
        path: path.to_path_buf(),
        _file: file,
    }))
}
