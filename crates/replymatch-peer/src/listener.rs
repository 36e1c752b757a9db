use std::os::unix::fs::{FileTypeExt, MetadataExt, PermissionsExt};
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use replymatch_core::{CodecStage, Message, MessageCodec};
use tracing::{debug, info};

use crate::connection::{Connection, ConnectionConfig};
use crate::error::{PeerError, Result};

/// Maximum socket path length.
/// Unix `sockaddr_un.sun_path` is 108 bytes on Linux, 104 elsewhere.
#[cfg(target_os = "linux")]
const MAX_PATH_LEN: usize = 108;
#[cfg(not(target_os = "linux"))]
const MAX_PATH_LEN: usize = 104;

/// Accepts connections on a filesystem Unix domain socket.
///
/// The socket file is removed when the listener drops, unless something else
/// has replaced it in the meantime.
pub struct Listener {
    listener: UnixListener,
    path: PathBuf,
    created_inode: (u64, u64),
    config: ConnectionConfig,
}

impl Listener {
    /// Default permission mode for created socket paths.
    pub const DEFAULT_SOCKET_MODE: u32 = 0o600;

    /// Bind to `path`, replacing a stale socket file left by a previous run.
    pub fn bind(path: impl AsRef<Path>) -> Result<Self> {
        Self::bind_with_mode(path, Self::DEFAULT_SOCKET_MODE)
    }

    pub fn bind_with_mode(path: impl AsRef<Path>, mode: u32) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let len = path.as_os_str().len();
        if len >= MAX_PATH_LEN {
            return Err(PeerError::PathTooLong {
                path,
                len,
                max: MAX_PATH_LEN,
            });
        }

        let bind_err = |source| PeerError::Bind {
            path: path.clone(),
            source,
        };

        // Never remove anything that is not a socket.
        if let Ok(metadata) = std::fs::symlink_metadata(&path) {
            if !metadata.file_type().is_socket() {
                return Err(bind_err(std::io::Error::new(
                    std::io::ErrorKind::AlreadyExists,
                    "existing path is not a unix socket",
                )));
            }
            debug!(?path, "removing stale socket");
            std::fs::remove_file(&path).map_err(bind_err)?;
        }

        let listener = UnixListener::bind(&path).map_err(bind_err)?;
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(mode)).map_err(bind_err)?;
        let metadata = std::fs::symlink_metadata(&path).map_err(bind_err)?;

        info!(?path, "listening on unix domain socket");
        Ok(Self {
            listener,
            created_inode: (metadata.dev(), metadata.ino()),
            path,
            config: ConnectionConfig::default(),
        })
    }

    /// Config applied to every accepted connection.
    pub fn with_connection_config(mut self, config: ConnectionConfig) -> Self {
        self.config = config;
        self
    }

    /// Block for the next client and drive it through `stage`.
    pub fn accept<T, C>(
        &self,
        stage: &Arc<CodecStage<T, C>>,
    ) -> Result<Connection<T, C, UnixStream>>
    where
        T: Message + Default + Clone + Send + Sync + 'static,
        C: MessageCodec<T> + 'static,
    {
        let (stream, _addr) = self.listener.accept()?;
        debug!(path = ?self.path, "accepted connection");
        Connection::spawn(stream, Arc::clone(stage), self.config.clone())
    }

    /// Bound socket path.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for Listener {
    fn drop(&mut self) {
        let (dev, ino) = self.created_inode;
        match std::fs::symlink_metadata(&self.path) {
            Ok(metadata)
                if metadata.file_type().is_socket()
                    && metadata.dev() == dev
                    && metadata.ino() == ino =>
            {
                debug!(path = ?self.path, "cleaning up socket file");
                let _ = std::fs::remove_file(&self.path);
            }
            Ok(_) => debug!(path = ?self.path, "socket path replaced; skipping cleanup"),
            Err(_) => {}
        }
    }
}

impl std::fmt::Debug for Listener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Listener").field("path", &self.path).finish()
    }
}
