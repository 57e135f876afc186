//! Rendezvous socket path handling and election primitives
//!
//! Claiming the socket is the election: whoever binds becomes primary.
//! The check-stale / remove / bind sequence runs under an exclusive
//! advisory lock on `<socket>.lock` so two instances starting at the same
//! moment cannot both conclude the file is stale.

use std::fs::{self, OpenOptions};
use std::io;
use std::os::unix::fs::{FileTypeExt, PermissionsExt};
use std::os::unix::net::{UnixListener as StdUnixListener, UnixStream as StdUnixStream};
use std::path::{Path, PathBuf};
use std::time::Duration;

use fs2::FileExt;
use serde::{Deserialize, Serialize};
use tokio::net::{UnixListener, UnixStream};
use tracing::{debug, info, warn};

use crate::error::{Error, Result};

/// Longest accepted socket path, in characters
pub const MAX_SOCKET_PATH_LEN: usize = 100;

/// Socket file name in production mode
pub const SOCKET_FILE_NAME: &str = "tasksync.sock";

/// Socket file name in development mode
pub const DEV_SOCKET_FILE_NAME: &str = "tasksync-dev.sock";

/// Permission bits applied to the bound socket (any local user may connect)
pub const SOCKET_MODE: u32 = 0o666;

/// Installation mode; development and production instances never meet
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncMode {
    #[default]
    Production,
    Development,
}

impl SyncMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncMode::Production => "production",
            SyncMode::Development => "development",
        }
    }

    pub fn socket_file_name(&self) -> &'static str {
        match self {
            SyncMode::Production => SOCKET_FILE_NAME,
            SyncMode::Development => DEV_SOCKET_FILE_NAME,
        }
    }
}

/// Well-known socket path inside a state directory
pub fn socket_path(state_dir: &Path, mode: SyncMode) -> PathBuf {
    state_dir.join(mode.socket_file_name())
}

/// Reject paths a Unix socket cannot live at
pub fn validate_socket_path(path: &Path) -> Result<()> {
    if path.as_os_str().is_empty() {
        return Err(Error::socket_path_invalid(path, "path is empty"));
    }
    if !path.is_absolute() {
        return Err(Error::socket_path_invalid(path, "path must be absolute"));
    }
    if path.file_name().is_none() {
        return Err(Error::socket_path_invalid(path, "path has no file name"));
    }

    let len = path.to_string_lossy().chars().count();
    if len > MAX_SOCKET_PATH_LEN {
        return Err(Error::socket_path_invalid(
            path,
            format!("path is {} characters, limit is {}", len, MAX_SOCKET_PATH_LEN),
        ));
    }

    Ok(())
}

/// Sibling lock file guarding the election
pub fn lock_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".lock");
    PathBuf::from(name)
}

/// Whether a live instance currently accepts connections at `path`.
///
/// A live primary briefly registers the probe as a peer; it sends nothing
/// and hangs up at once.
pub fn probe(path: &Path) -> bool {
    StdUnixStream::connect(path).is_ok()
}

// ─────────────────────────────────────────────────────────────────
// Claiming
// ─────────────────────────────────────────────────────────────────

/// Bind the rendezvous socket, or report `AddressInUse` if a live peer owns it
pub async fn claim(path: &Path) -> Result<UnixListener> {
    validate_socket_path(path)?;

    let owned = path.to_path_buf();
    let std_listener = tokio::task::spawn_blocking(move || claim_blocking(&owned))
        .await
        .map_err(|e| Error::Internal(format!("socket claim task failed: {}", e)))??;

    UnixListener::from_std(std_listener).map_err(|source| Error::ListenFailed {
        path: path.to_path_buf(),
        source,
    })
}

fn claim_blocking(path: &Path) -> Result<StdUnixListener> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|source| Error::IoWrite {
            path: parent.to_path_buf(),
            source,
        })?;
    }

    let lock_file_path = lock_path(path);
    let lock = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(&lock_file_path)
        .map_err(|source| Error::IoWrite {
            path: lock_file_path.clone(),
            source,
        })?;
    lock.lock_exclusive().map_err(|source| Error::IoWrite {
        path: lock_file_path,
        source,
    })?;

    let result = bind_locked(path);
    let _ = lock.unlock();
    result
}

fn bind_locked(path: &Path) -> Result<StdUnixListener> {
    if let Ok(metadata) = fs::symlink_metadata(path) {
        if !metadata.file_type().is_socket() {
            return Err(Error::socket_path_invalid(
                path,
                "path exists and is not a socket",
            ));
        }
        if probe(path) {
            debug!(path = %path.display(), "Socket is live");
            return Err(Error::AddressInUse {
                path: path.to_path_buf(),
            });
        }

        info!(path = %path.display(), "Removing stale socket file");
        remove_socket_file(path)?;
    }

    let listener = StdUnixListener::bind(path).map_err(|source| {
        if source.kind() == io::ErrorKind::AddrInUse {
            Error::AddressInUse {
                path: path.to_path_buf(),
            }
        } else {
            Error::ListenFailed {
                path: path.to_path_buf(),
                source,
            }
        }
    })?;

    let configure = || -> io::Result<()> {
        fs::set_permissions(path, fs::Permissions::from_mode(SOCKET_MODE))?;
        listener.set_nonblocking(true)
    };
    if let Err(source) = configure() {
        drop(listener);
        let _ = remove_socket_file(path);
        return Err(Error::ListenFailed {
            path: path.to_path_buf(),
            source,
        });
    }

    Ok(listener)
}

/// Delete the socket file; a missing file is not an error
pub fn remove_socket_file(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(source) => {
            warn!(path = %path.display(), error = %source, "Failed to remove socket file");
            Err(Error::IoWrite {
                path: path.to_path_buf(),
                source,
            })
        }
    }
}

// ─────────────────────────────────────────────────────────────────
// Dialing
// ─────────────────────────────────────────────────────────────────

/// Connect to the rendezvous socket within `timeout`
pub async fn dial(path: &Path, timeout: Duration) -> Result<UnixStream> {
    match tokio::time::timeout(timeout, UnixStream::connect(path)).await {
        Ok(Ok(stream)) => Ok(stream),
        Ok(Err(source)) => Err(Error::DialFailed {
            path: path.to_path_buf(),
            source,
        }),
        Err(_) => Err(Error::timeout("dial", timeout)),
    }
}
