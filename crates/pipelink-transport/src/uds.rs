use std::io::ErrorKind;
use std::os::unix::fs::{FileTypeExt, MetadataExt, PermissionsExt};
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::Path;
use std::time::Duration;

use tracing::{debug, info, trace};

use crate::error::{Result, TransportError};
use crate::name::PipeName;
use crate::signal::ShutdownSignal;
use crate::stream::PipeStream;
use crate::ListenerOptions;

/// Server side of a pipe: a Unix domain socket listening at the resolved path.
///
/// Accept runs in non-blocking mode and polls, so [`PipeListener::destroy`]
/// from another thread ends a pending [`PipeListener::accept`] within one
/// poll interval. The socket file is removed on drop.
pub struct PipeListener {
    listener: UnixListener,
    name: PipeName,
    created_inode: Option<(u64, u64)>,
    options: ListenerOptions,
    shutdown: ShutdownSignal,
}

impl PipeListener {
    /// Permission mode for created socket paths.
    pub const SOCKET_MODE: u32 = 0o600;

    /// Create the endpoint and start listening.
    ///
    /// If the path already exists and is a socket, it is removed first
    /// (stale socket cleanup). Any other kind of file is left alone and the
    /// call fails.
    pub fn create(name: &PipeName, options: ListenerOptions) -> Result<Self> {
        let path = name.path().to_path_buf();
        let bind_err = |source: std::io::Error| TransportError::Bind {
            path: path.clone(),
            source,
        };

        if let Ok(metadata) = std::fs::symlink_metadata(&path) {
            if metadata.file_type().is_socket() {
                debug!(?path, "removing stale socket");
                std::fs::remove_file(&path).map_err(bind_err)?;
            } else {
                return Err(bind_err(std::io::Error::new(
                    ErrorKind::AlreadyExists,
                    "existing path is not a unix socket",
                )));
            }
        }

        let listener = UnixListener::bind(&path).map_err(bind_err)?;
        listener.set_nonblocking(true).map_err(bind_err)?;
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(Self::SOCKET_MODE))
            .map_err(bind_err)?;
        let created = std::fs::symlink_metadata(&path).map_err(bind_err)?;

        info!(?path, "listening on pipe");

        Ok(Self {
            listener,
            name: name.clone(),
            created_inode: Some((created.dev(), created.ino())),
            options,
            shutdown: ShutdownSignal::new(),
        })
    }

    /// Wait for a peer to attach.
    ///
    /// Returns [`TransportError::Shutdown`] once the listener is destroyed.
    pub fn accept(&self) -> Result<PipeStream> {
        loop {
            if self.shutdown.is_triggered() {
                return Err(TransportError::Shutdown);
            }

            match self.listener.accept() {
                Ok((stream, _addr)) => {
                    // Accepted sockets inherit O_NONBLOCK on some platforms.
                    stream.set_nonblocking(false)?;
                    debug!(path = ?self.name.path(), "accepted connection");
                    return Ok(PipeStream::from_unix(stream));
                }
                Err(err) if err.kind() == ErrorKind::WouldBlock => {
                    if self.shutdown.wait_timeout(self.options.poll_interval) {
                        return Err(TransportError::Shutdown);
                    }
                }
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(TransportError::Accept(err)),
            }
        }
    }

    /// Destroy the endpoint; a concurrent or later accept returns `Shutdown`.
    pub fn destroy(&self) {
        self.shutdown.trigger();
    }

    pub fn is_destroyed(&self) -> bool {
        self.shutdown.is_triggered()
    }

    pub fn name(&self) -> &PipeName {
        &self.name
    }

    pub fn path(&self) -> &Path {
        self.name.path()
    }
}

impl Drop for PipeListener {
    fn drop(&mut self) {
        let path = self.name.path();
        if let Some((expected_dev, expected_ino)) = self.created_inode {
            if let Ok(metadata) = std::fs::symlink_metadata(path) {
                if metadata.file_type().is_socket()
                    && metadata.dev() == expected_dev
                    && metadata.ino() == expected_ino
                {
                    debug!(?path, "cleaning up socket file");
                    let _ = std::fs::remove_file(path);
                } else {
                    debug!(?path, "socket path identity changed; skipping cleanup");
                }
            }
        }
    }
}

impl std::fmt::Debug for PipeListener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipeListener")
            .field("name", &self.name)
            .field("destroyed", &self.is_destroyed())
            .finish()
    }
}

/// Client side of a pipe: attaches to an endpoint created by someone else.
#[derive(Debug)]
pub struct PipeConnector {
    name: PipeName,
    shutdown: ShutdownSignal,
}

impl PipeConnector {
    pub fn new(name: &PipeName) -> Result<Self> {
        Ok(Self {
            name: name.clone(),
            shutdown: ShutdownSignal::new(),
        })
    }

    /// Make one attach attempt.
    ///
    /// A missing socket or one nobody is accepting on yields
    /// [`TransportError::NotReady`]. Unix domain socket connects resolve
    /// immediately, so `timeout` never has to be waited out here.
    pub fn try_connect(&self, timeout: Duration) -> Result<PipeStream> {
        if self.shutdown.is_triggered() {
            return Err(TransportError::Shutdown);
        }

        let path = self.name.path();
        match UnixStream::connect(path) {
            Ok(stream) => {
                debug!(?path, "connected to pipe");
                Ok(PipeStream::from_unix(stream))
            }
            Err(err)
                if matches!(
                    err.kind(),
                    ErrorKind::NotFound | ErrorKind::ConnectionRefused | ErrorKind::WouldBlock
                ) =>
            {
                trace!(?path, ?timeout, error = %err, "pipe not ready");
                Err(TransportError::NotReady {
                    path: path.to_path_buf(),
                })
            }
            Err(source) => Err(TransportError::Connect {
                path: path.to_path_buf(),
                source,
            }),
        }
    }

    /// Sleep between attempts. Returns `false` if the connector was
    /// destroyed in the meantime.
    pub fn backoff(&self, delay: Duration) -> bool {
        !self.shutdown.wait_timeout(delay)
    }

    /// Destroy the connector; pending backoff wakes and further attempts fail
    /// with `Shutdown`.
    pub fn destroy(&self) {
        self.shutdown.trigger();
    }

    pub fn is_destroyed(&self) -> bool {
        self.shutdown.is_triggered()
    }

    pub fn name(&self) -> &PipeName {
        &self.name
    }
}

#[cfg(test)]
mod tests {
    use std::io::{Read, Write};
    use std::path::PathBuf;
    use std::sync::Arc;
    use std::thread;
    use std::time::Instant;

    use super::*;

    fn make_pipe_name(tag: &str) -> (PathBuf, PipeName) {
        let dir = std::env::temp_dir().join(format!(
            "pipelink-uds-{}-{}-{}",
            tag,
            std::process::id(),
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .expect("time should be after epoch")
                .as_nanos()
        ));
        std::fs::create_dir_all(&dir).expect("temp dir should be creatable");
        let sock = dir.join("p.sock");
        let name = PipeName::resolve(sock.to_str().expect("utf-8 path")).expect("name resolves");
        (dir, name)
    }

    #[test]
    fn create_accept_connect() {
        let (dir, name) = make_pipe_name("roundtrip");
        let listener = PipeListener::create(&name, ListenerOptions::default()).unwrap();
        assert!(name.path().exists());

        let connector = PipeConnector::new(&name).unwrap();
        let client = thread::spawn(move || {
            let mut stream = connector.try_connect(Duration::from_millis(10)).unwrap();
            stream.write_all(b"hello").unwrap();
        });

        let mut server = listener.accept().unwrap();
        let mut buf = [0u8; 5];
        server.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"hello");
        client.join().unwrap();

        drop(listener);
        assert!(
            !name.path().exists(),
            "socket file should be cleaned up on drop"
        );
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn destroy_unblocks_pending_accept() {
        let (dir, name) = make_pipe_name("destroy");
        let listener = Arc::new(PipeListener::create(&name, ListenerOptions::default()).unwrap());

        let waiter = {
            let listener = listener.clone();
            thread::spawn(move || listener.accept())
        };

        thread::sleep(Duration::from_millis(50));
        listener.destroy();

        let result = waiter.join().expect("accept thread should finish");
        assert!(matches!(result, Err(TransportError::Shutdown)));
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn connect_to_missing_pipe_is_not_ready() {
        let (dir, name) = make_pipe_name("missing");
        let connector = PipeConnector::new(&name).unwrap();
        let err = connector.try_connect(Duration::from_millis(10)).unwrap_err();
        assert!(err.is_not_ready());
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn destroyed_connector_stops_backoff_and_attempts() {
        let (dir, name) = make_pipe_name("backoff");
        let connector = Arc::new(PipeConnector::new(&name).unwrap());

        let sleeper = {
            let connector = connector.clone();
            thread::spawn(move || {
                let start = Instant::now();
                let keep_going = connector.backoff(Duration::from_secs(10));
                (keep_going, start.elapsed())
            })
        };

        thread::sleep(Duration::from_millis(20));
        connector.destroy();
        let (keep_going, elapsed) = sleeper.join().unwrap();
        assert!(!keep_going);
        assert!(elapsed < Duration::from_secs(5));
        assert!(matches!(
            connector.try_connect(Duration::from_millis(10)),
            Err(TransportError::Shutdown)
        ));
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn shutdown_unblocks_read_on_clone() {
        let (dir, name) = make_pipe_name("shutdown");
        let listener = PipeListener::create(&name, ListenerOptions::default()).unwrap();
        let connector = PipeConnector::new(&name).unwrap();
        let _client = connector.try_connect(Duration::from_millis(10)).unwrap();

        let server = listener.accept().unwrap();
        let mut reader = server.try_clone().unwrap();
        let blocked = thread::spawn(move || {
            let mut buf = [0u8; 16];
            reader.read(&mut buf)
        });

        thread::sleep(Duration::from_millis(50));
        server.shutdown();
        server.shutdown();

        let read = blocked.join().expect("reader should finish");
        assert!(matches!(read, Ok(0) | Err(_)));
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn create_replaces_stale_socket() {
        let (dir, name) = make_pipe_name("stale");
        let first = PipeListener::create(&name, ListenerOptions::default()).unwrap();
        // Forget the first listener so its socket file survives.
        std::mem::forget(first);

        let second = PipeListener::create(&name, ListenerOptions::default());
        assert!(second.is_ok());
        drop(second);
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn create_default_permissions_hardened() {
        let (dir, name) = make_pipe_name("perms");
        let listener = PipeListener::create(&name, ListenerOptions::default()).unwrap();
        let mode = std::fs::metadata(name.path()).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o600);
        drop(listener);
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn create_rejects_existing_non_socket_file() {
        let (dir, name) = make_pipe_name("file");
        std::fs::write(name.path(), b"regular-file").unwrap();
        let result = PipeListener::create(&name, ListenerOptions::default());
        assert!(matches!(result, Err(TransportError::Bind { .. })));
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn drop_does_not_remove_replaced_path() {
        let (dir, name) = make_pipe_name("drop-race");
        let listener = PipeListener::create(&name, ListenerOptions::default()).unwrap();

        std::fs::remove_file(name.path()).unwrap();
        std::fs::write(name.path(), b"replacement-file").unwrap();

        drop(listener);
        assert!(
            name.path().exists(),
            "drop must not remove path if inode identity changed"
        );
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn peer_credentials_report_own_process() {
        let (dir, name) = make_pipe_name("creds");
        let listener = PipeListener::create(&name, ListenerOptions::default()).unwrap();
        let connector = PipeConnector::new(&name).unwrap();
        let _client = connector.try_connect(Duration::from_millis(10)).unwrap();
        let server = listener.accept().unwrap();

        let (_, _, pid) = server.peer_credentials().expect("linux exposes SO_PEERCRED");
        assert_eq!(pid, std::process::id());
        let _ = std::fs::remove_dir_all(&dir);
    }
}
