use std::{
    fmt, fs,
    io::{self, Write},
    path::{Path, PathBuf},
    time::Duration,
};

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::{deadline::Deadline, process};

pub const QUEUE_POLLING_INTERVAL: Duration = Duration::from_secs(5);

/// Written into the lock file so that a rejected run can tell who holds the lock.
#[derive(Debug, Serialize, Deserialize)]
struct LockOwner {
    pid: u32,
    user: String,
    #[serde(with = "time::serde::rfc3339")]
    started: OffsetDateTime,
}

impl fmt::Display for LockOwner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "pid {pid} of {user}, started {started}",
            pid = self.pid,
            user = self.user,
            started = self.started
        )
    }
}

#[derive(Debug)]
pub enum LockError {
    /// Another run holds the lock.
    Busy {
        path: PathBuf,
        owner: Option<String>,
    },
    /// The user interrupted the run while it was waiting for the lock.
    Interrupted {
        path: PathBuf,
    },
    Io {
        path: PathBuf,
        error: io::Error,
    },
}

impl fmt::Display for LockError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LockError::Busy { path, owner } => {
                write!(f, "another run is in progress")?;
                if let Some(owner) = owner {
                    write!(f, " ({owner})")?;
                }
                write!(f, ", remove {path:?} if that run no longer exists")
            }
            LockError::Interrupted { path } => {
                write!(f, "interrupted while waiting for lock {path:?}")
            }
            LockError::Io { path, error } => write!(f, "unable to create lock {path:?}: {error}"),
        }
    }
}

impl std::error::Error for LockError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            LockError::Busy { .. } | LockError::Interrupted { .. } => None,
            LockError::Io { error, .. } => Some(error),
        }
    }
}

/// Guarantees at most one run per pipeline. The lock file is removed when the guard is dropped.
#[derive(Debug)]
pub struct RunLock {
    path: PathBuf,
}

impl RunLock {
    pub fn try_acquire(path: impl Into<PathBuf>) -> Result<Self, LockError> {
        let path = path.into();
        let io_error = |error| LockError::Io {
            path: path.clone(),
            error,
        };

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(io_error)?;
        }

        let mut file = match fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
        {
            Ok(file) => file,
            Err(error) if error.kind() == io::ErrorKind::AlreadyExists => {
                return Err(LockError::Busy {
                    owner: read_owner(&path),
                    path,
                })
            }
            Err(error) => return Err(io_error(error)),
        };

        // The lock is held from here on, the guard removes the file if writing the owner fails.
        let lock = Self { path };

        let owner = LockOwner {
            pid: std::process::id(),
            user: whoami::username(),
            started: OffsetDateTime::now_utc(),
        };
        let contents = serde_json::to_vec(&owner).map_err(io::Error::from);
        contents
            .and_then(|contents| file.write_all(&contents))
            .map_err(|error| LockError::Io {
                path: lock.path.clone(),
                error,
            })?;

        debug!("acquired lock {:?}", lock.path);
        Ok(lock)
    }

    /// Like [`RunLock::try_acquire`], but while another run holds the lock, keeps polling until `queue` passes or the
    /// user interrupts.
    pub fn acquire(
        path: impl Into<PathBuf>,
        queue: Deadline,
        interval: Duration,
    ) -> Result<Self, LockError> {
        Self::acquire_unless(path, queue, interval, process::interrupted)
    }

    fn acquire_unless(
        path: impl Into<PathBuf>,
        queue: Deadline,
        interval: Duration,
        interrupted: impl Fn() -> bool,
    ) -> Result<Self, LockError> {
        let path = path.into();
        let mut announced = false;
        loop {
            match Self::try_acquire(path.clone()) {
                Err(LockError::Busy { path, owner }) => {
                    if interrupted() {
                        return Err(LockError::Interrupted { path });
                    }
                    if !announced {
                        info!(
                            "Waiting for the run holding {path:?} to finish ({owner})...",
                            owner = owner.as_deref().unwrap_or("unknown owner")
                        );
                        announced = true;
                    }
                    if queue.sleep(interval).is_err() {
                        return Err(LockError::Busy { path, owner });
                    }
                }
                other => return other,
            }
        }
    }
}

fn read_owner(path: &Path) -> Option<String> {
    let contents = fs::read(path).ok()?;
    let owner: LockOwner = serde_json::from_slice(&contents).ok()?;
    Some(owner.to_string())
}

impl Drop for RunLock {
    fn drop(&mut self) {
        match fs::remove_file(&self.path) {
            Ok(()) => debug!("released lock {:?}", self.path),
            Err(error) => warn!("failed to release lock {:?}: {error}", self.path),
        }
    }
}
