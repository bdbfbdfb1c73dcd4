use std::ffi::OsStr;
use std::io::{self, Read, Write};
use std::os::windows::ffi::OsStrExt;
use std::os::windows::io::{AsRawHandle, FromRawHandle, OwnedHandle};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tracing::{debug, info, trace};
use windows_sys::Win32::Foundation::{
    GetLastError, ERROR_FILE_NOT_FOUND, ERROR_IO_PENDING, ERROR_NO_DATA,
    ERROR_OPERATION_ABORTED, ERROR_PIPE_BUSY, ERROR_PIPE_CONNECTED, ERROR_SEM_TIMEOUT,
    GENERIC_READ, GENERIC_WRITE, HANDLE, INVALID_HANDLE_VALUE, WAIT_OBJECT_0, WAIT_TIMEOUT,
};
use windows_sys::Win32::Storage::FileSystem::{
    CreateFileW, ReadFile, WriteFile, FILE_FLAG_OVERLAPPED, OPEN_EXISTING, PIPE_ACCESS_DUPLEX,
};
use windows_sys::Win32::System::Pipes::{
    ConnectNamedPipe, CreateNamedPipeW, DisconnectNamedPipe, WaitNamedPipeW, PIPE_READMODE_BYTE,
    PIPE_TYPE_BYTE, PIPE_WAIT,
};
use windows_sys::Win32::System::Threading::{
    CreateEventW, SetEvent, WaitForMultipleObjects, WaitForSingleObject, INFINITE,
};
use windows_sys::Win32::System::IO::{CancelIoEx, GetOverlappedResult, OVERLAPPED};

use crate::error::{Result, TransportError};
use crate::name::PipeName;
use crate::signal::ShutdownSignal;
use crate::stream::PipeStream;
use crate::ListenerOptions;

fn wide(name: &PipeName) -> Vec<u16> {
    OsStr::new(name.path())
        .encode_wide()
        .chain(std::iter::once(0))
        .collect()
}

fn last_error() -> io::Error {
    io::Error::last_os_error()
}

fn millis(duration: Duration) -> u32 {
    u32::try_from(duration.as_millis()).unwrap_or(u32::MAX)
}

/// Manual-reset Win32 event.
#[derive(Debug)]
struct Event(OwnedHandle);

impl Event {
    fn new() -> io::Result<Self> {
        // SAFETY: null attributes and name are allowed; the result is checked.
        let handle = unsafe { CreateEventW(std::ptr::null(), 1, 0, std::ptr::null()) };
        if handle.is_null() {
            return Err(last_error());
        }
        // SAFETY: `handle` is a freshly created event we now own.
        Ok(Self(unsafe { OwnedHandle::from_raw_handle(handle as _) }))
    }

    fn raw(&self) -> HANDLE {
        self.0.as_raw_handle() as HANDLE
    }

    fn set(&self) {
        // SAFETY: the event handle is open for the lifetime of `self`.
        unsafe { SetEvent(self.raw()) };
    }

    fn is_set(&self) -> bool {
        // SAFETY: as above; a zero timeout only polls.
        unsafe { WaitForSingleObject(self.raw(), 0) == WAIT_OBJECT_0 }
    }
}

fn overlapped_for(event: &Event) -> OVERLAPPED {
    // SAFETY: an all-zero OVERLAPPED is the documented initial state.
    let mut overlapped: OVERLAPPED = unsafe { std::mem::zeroed() };
    overlapped.hEvent = event.raw();
    overlapped
}

/// Cancel `overlapped` and wait until the kernel has let go of it.
fn cancel_and_reap(handle: HANDLE, overlapped: &OVERLAPPED) {
    let mut transferred = 0u32;
    // SAFETY: `overlapped` is the pending operation on `handle`; waiting for
    // its result guarantees the kernel no longer references it on return.
    unsafe {
        CancelIoEx(handle, overlapped);
        GetOverlappedResult(handle, overlapped, &mut transferred, 1);
    }
}

fn closed_error() -> io::Error {
    io::Error::new(io::ErrorKind::NotConnected, "pipe closed")
}

/// The pipe handle every clone of one connection shares.
#[derive(Debug)]
struct Connection {
    handle: OwnedHandle,
    /// Set once by `shutdown`; every blocked read or write waits on it too.
    closed: Event,
    server: bool,
}

impl Connection {
    fn raw(&self) -> HANDLE {
        self.handle.as_raw_handle() as HANDLE
    }
}

/// One end of a connected named pipe, opened for overlapped I/O.
///
/// Clones share the pipe handle but each owns the event its own operations
/// complete on, so a read pending on one clone never holds up a write on
/// another.
#[derive(Debug)]
pub(crate) struct PipeHandle {
    connection: Arc<Connection>,
    io_event: Event,
}

impl PipeHandle {
    fn new(handle: OwnedHandle, server: bool) -> io::Result<Self> {
        Ok(Self {
            connection: Arc::new(Connection {
                handle,
                closed: Event::new()?,
                server,
            }),
            io_event: Event::new()?,
        })
    }

    pub(crate) fn try_clone(&self) -> io::Result<Self> {
        Ok(Self {
            connection: self.connection.clone(),
            io_event: Event::new()?,
        })
    }

    pub(crate) fn shutdown(&self) {
        self.connection.closed.set();
        if self.connection.server {
            // SAFETY: the pipe handle stays open while `connection` lives.
            unsafe { DisconnectNamedPipe(self.connection.raw()) };
        }
    }

    /// Run one overlapped operation to completion, or cancel it once the
    /// connection is shut down.
    fn run_io(&self, start: impl FnOnce(HANDLE, *mut OVERLAPPED) -> i32) -> io::Result<usize> {
        let connection = &self.connection;
        if connection.closed.is_set() {
            return Err(closed_error());
        }

        let handle = connection.raw();
        let mut overlapped = overlapped_for(&self.io_event);
        if start(handle, &mut overlapped) == 0 {
            // SAFETY: reads the calling thread's last-error value.
            let code = unsafe { GetLastError() };
            if code != ERROR_IO_PENDING {
                return Err(io::Error::from_raw_os_error(code as i32));
            }
            let waits = [self.io_event.raw(), connection.closed.raw()];
            // SAFETY: both handles are open for the duration of the wait.
            let woke = unsafe { WaitForMultipleObjects(2, waits.as_ptr(), 0, INFINITE) };
            if woke != WAIT_OBJECT_0 {
                cancel_and_reap(handle, &overlapped);
                return Err(closed_error());
            }
        }

        let mut transferred = 0u32;
        // SAFETY: the operation has completed; this only collects its result.
        let ok = unsafe { GetOverlappedResult(handle, &overlapped, &mut transferred, 1) };
        if ok == 0 {
            let err = last_error();
            if err.raw_os_error() == Some(ERROR_OPERATION_ABORTED as i32)
                || connection.closed.is_set()
            {
                return Err(closed_error());
            }
            return Err(err);
        }
        Ok(transferred as usize)
    }
}

impl Read for PipeHandle {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let len = u32::try_from(buf.len()).unwrap_or(u32::MAX);
        let ptr = buf.as_mut_ptr();
        let result = self.run_io(|handle, overlapped| {
            // SAFETY: `buf` outlives the operation, which `run_io` waits out.
            unsafe { ReadFile(handle, ptr, len, std::ptr::null_mut(), overlapped) }
        });
        match result {
            // Either end closing reads as end-of-stream.
            Err(err)
                if matches!(
                    err.kind(),
                    io::ErrorKind::BrokenPipe | io::ErrorKind::NotConnected
                ) =>
            {
                Ok(0)
            }
            other => other,
        }
    }
}

impl Write for PipeHandle {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let len = u32::try_from(buf.len()).unwrap_or(u32::MAX);
        let ptr = buf.as_ptr();
        self.run_io(|handle, overlapped| {
            // SAFETY: `buf` outlives the operation, which `run_io` waits out.
            unsafe { WriteFile(handle, ptr, len, std::ptr::null_mut(), overlapped) }
        })
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Server side of a named pipe: a single-instance duplex byte pipe.
///
/// The instance is opened for overlapped I/O. Accept waits on the connect
/// in `poll_interval` slices so [`PipeListener::destroy`] is noticed.
pub struct PipeListener {
    instance: Mutex<Option<OwnedHandle>>,
    name: PipeName,
    options: ListenerOptions,
    shutdown: ShutdownSignal,
}

enum Pending {
    Connected,
    /// A client attached and left before the connect completed.
    Vanished,
    Destroyed,
}

impl PipeListener {
    pub fn create(name: &PipeName, options: ListenerOptions) -> Result<Self> {
        let wide_name = wide(name);
        let buffer = u32::try_from(options.buffer_size).unwrap_or(u32::MAX);

        // SAFETY: `wide_name` is NUL-terminated and outlives the call.
        let handle = unsafe {
            CreateNamedPipeW(
                wide_name.as_ptr(),
                PIPE_ACCESS_DUPLEX | FILE_FLAG_OVERLAPPED,
                PIPE_TYPE_BYTE | PIPE_READMODE_BYTE | PIPE_WAIT,
                1,
                buffer,
                buffer,
                0,
                std::ptr::null(),
            )
        };
        if handle == INVALID_HANDLE_VALUE {
            return Err(TransportError::Bind {
                path: name.path().to_path_buf(),
                source: last_error(),
            });
        }

        info!(path = ?name.path(), "listening on pipe");

        // SAFETY: `handle` is a freshly created, valid handle we now own.
        let owned = unsafe { OwnedHandle::from_raw_handle(handle as _) };
        Ok(Self {
            instance: Mutex::new(Some(owned)),
            name: name.clone(),
            options,
            shutdown: ShutdownSignal::new(),
        })
    }

    pub fn accept(&self) -> Result<PipeStream> {
        let event = Event::new().map_err(TransportError::Accept)?;
        loop {
            if self.shutdown.is_triggered() {
                return Err(TransportError::Shutdown);
            }

            let mut slot = self
                .instance
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            let Some(instance) = slot.as_ref() else {
                return Err(TransportError::Shutdown);
            };
            let handle = instance.as_raw_handle() as HANDLE;

            match self.connect_instance(handle, &event)? {
                Pending::Connected => {
                    let owned = slot.take().ok_or(TransportError::Shutdown)?;
                    debug!(path = ?self.name.path(), "accepted connection");
                    let pipe = PipeHandle::new(owned, true).map_err(TransportError::Accept)?;
                    return Ok(PipeStream::from_windows(pipe));
                }
                Pending::Vanished => {
                    // SAFETY: `handle` is the instance owned by `slot`.
                    unsafe { DisconnectNamedPipe(handle) };
                }
                Pending::Destroyed => return Err(TransportError::Shutdown),
            }
        }
    }

    fn connect_instance(&self, handle: HANDLE, event: &Event) -> Result<Pending> {
        let mut overlapped = overlapped_for(event);
        // SAFETY: `overlapped` stays in place until the connect completes or
        // is reaped below.
        let done = unsafe { ConnectNamedPipe(handle, &mut overlapped) } != 0;
        let code = if done { 0 } else { unsafe { GetLastError() } };
        match code {
            0 | ERROR_PIPE_CONNECTED => return Ok(Pending::Connected),
            ERROR_NO_DATA => return Ok(Pending::Vanished),
            ERROR_IO_PENDING => {}
            _ => {
                return Err(TransportError::Accept(io::Error::from_raw_os_error(
                    code as i32,
                )))
            }
        }

        let poll = millis(self.options.poll_interval).max(1);
        loop {
            // SAFETY: the event handle is open for the duration of the wait.
            let woke = unsafe { WaitForSingleObject(event.raw(), poll) };
            if woke == WAIT_OBJECT_0 {
                let mut transferred = 0u32;
                // SAFETY: the connect has completed.
                let ok =
                    unsafe { GetOverlappedResult(handle, &overlapped, &mut transferred, 0) };
                if ok != 0 {
                    return Ok(Pending::Connected);
                }
                let err = last_error();
                if err.raw_os_error() == Some(ERROR_NO_DATA as i32) {
                    return Ok(Pending::Vanished);
                }
                return Err(TransportError::Accept(err));
            }
            if woke != WAIT_TIMEOUT {
                let err = last_error();
                cancel_and_reap(handle, &overlapped);
                return Err(TransportError::Accept(err));
            }
            if self.shutdown.is_triggered() {
                cancel_and_reap(handle, &overlapped);
                return Ok(Pending::Destroyed);
            }
        }
    }

    pub fn destroy(&self) {
        self.shutdown.trigger();
        let mut slot = self
            .instance
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        slot.take();
    }

    pub fn is_destroyed(&self) -> bool {
        self.shutdown.is_triggered()
    }

    pub fn name(&self) -> &PipeName {
        &self.name
    }

    pub fn path(&self) -> &std::path::Path {
        self.name.path()
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

/// Client side of a named pipe.
#[derive(Debug)]
pub struct PipeConnector {
    name: PipeName,
    wide_name: Vec<u16>,
    shutdown: ShutdownSignal,
}

impl PipeConnector {
    pub fn new(name: &PipeName) -> Result<Self> {
        Ok(Self {
            name: name.clone(),
            wide_name: wide(name),
            shutdown: ShutdownSignal::new(),
        })
    }

    /// Wait up to `timeout` for a free pipe instance, then open it.
    pub fn try_connect(&self, timeout: Duration) -> Result<PipeStream> {
        if self.shutdown.is_triggered() {
            return Err(TransportError::Shutdown);
        }

        let path = self.name.path();
        // SAFETY: `wide_name` is NUL-terminated.
        let available = unsafe { WaitNamedPipeW(self.wide_name.as_ptr(), millis(timeout)) } != 0;
        if !available {
            let code = unsafe { GetLastError() };
            if code == ERROR_SEM_TIMEOUT || code == ERROR_FILE_NOT_FOUND || code == ERROR_PIPE_BUSY
            {
                trace!(?path, code, "pipe not ready");
                return Err(TransportError::NotReady {
                    path: path.to_path_buf(),
                });
            }
            return Err(TransportError::Connect {
                path: path.to_path_buf(),
                source: io::Error::from_raw_os_error(code as i32),
            });
        }

        // SAFETY: `wide_name` is NUL-terminated; all pointer args are null or valid.
        let handle = unsafe {
            CreateFileW(
                self.wide_name.as_ptr(),
                GENERIC_READ | GENERIC_WRITE,
                0,
                std::ptr::null(),
                OPEN_EXISTING,
                FILE_FLAG_OVERLAPPED,
                std::ptr::null_mut(),
            )
        };
        if handle == INVALID_HANDLE_VALUE {
            let code = unsafe { GetLastError() };
            if code == ERROR_PIPE_BUSY || code == ERROR_FILE_NOT_FOUND {
                return Err(TransportError::NotReady {
                    path: path.to_path_buf(),
                });
            }
            return Err(TransportError::Connect {
                path: path.to_path_buf(),
                source: io::Error::from_raw_os_error(code as i32),
            });
        }

        debug!(?path, "connected to pipe");
        // SAFETY: `handle` is a valid handle we now own.
        let owned = unsafe { OwnedHandle::from_raw_handle(handle as _) };
        let pipe = PipeHandle::new(owned, false).map_err(|source| TransportError::Connect {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(PipeStream::from_windows(pipe))
    }

    pub fn backoff(&self, delay: Duration) -> bool {
        !self.shutdown.wait_timeout(delay)
    }

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
    use std::sync::mpsc;
    use std::thread;

    use super::*;

    fn unique_name(tag: &str) -> PipeName {
        PipeName::resolve(&format!(
            "pipelink-np-{tag}-{}-{}",
            std::process::id(),
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .expect("time should be after epoch")
                .as_nanos()
        ))
        .expect("name resolves")
    }

    /// A connected (server, client) pair.
    fn connected_pair(tag: &str) -> (PipeStream, PipeStream) {
        let name = unique_name(tag);
        let listener = PipeListener::create(&name, ListenerOptions::default()).unwrap();
        let connector = PipeConnector::new(&name).unwrap();
        let client = thread::spawn(move || {
            connector
                .try_connect(Duration::from_secs(2))
                .expect("client should attach")
        });
        let server = listener.accept().expect("server should accept");
        (server, client.join().expect("client thread should finish"))
    }

    #[test]
    fn create_accept_connect() {
        let (mut server, mut client) = connected_pair("roundtrip");
        client.write_all(b"hello").unwrap();
        let mut buf = [0u8; 5];
        server.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"hello");
    }

    #[test]
    fn write_proceeds_while_read_pending_on_clone() {
        let (server, mut client) = connected_pair("duplex");
        let mut reader = server.try_clone().unwrap();
        let mut writer = server.try_clone().unwrap();

        let (tx, rx) = mpsc::channel();
        let pending_read = thread::spawn(move || {
            let mut buf = [0u8; 16];
            let n = reader.read(&mut buf).unwrap();
            tx.send(buf[..n].to_vec()).unwrap();
        });
        thread::sleep(Duration::from_millis(50));

        // The write must not wait for the blocked read to finish.
        let (done_tx, done_rx) = mpsc::channel();
        let write = thread::spawn(move || {
            writer.write_all(b"cmd\r\n").unwrap();
            done_tx.send(()).unwrap();
        });
        assert!(done_rx.recv_timeout(Duration::from_secs(2)).is_ok());
        let mut buf = [0u8; 5];
        client.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"cmd\r\n");
        write.join().unwrap();

        client.write_all(b"ok").unwrap();
        assert_eq!(rx.recv_timeout(Duration::from_secs(2)).unwrap(), b"ok");
        pending_read.join().unwrap();
    }

    #[test]
    fn shutdown_unblocks_read_on_clone() {
        let (server, _client) = connected_pair("shutdown");
        let mut reader = server.try_clone().unwrap();
        let read = thread::spawn(move || {
            let mut buf = [0u8; 8];
            reader.read(&mut buf)
        });

        thread::sleep(Duration::from_millis(50));
        server.shutdown();
        assert_eq!(read.join().unwrap().unwrap(), 0);
    }

    #[test]
    fn destroy_unblocks_pending_accept() {
        let name = unique_name("destroy");
        let listener = Arc::new(PipeListener::create(&name, ListenerOptions::default()).unwrap());
        let waiter = {
            let listener = listener.clone();
            thread::spawn(move || listener.accept())
        };

        thread::sleep(Duration::from_millis(50));
        listener.destroy();
        assert!(matches!(
            waiter.join().unwrap(),
            Err(TransportError::Shutdown)
        ));
    }

    #[test]
    fn connect_to_missing_pipe_is_not_ready() {
        let connector = PipeConnector::new(&unique_name("missing")).unwrap();
        assert!(connector
            .try_connect(Duration::from_millis(10))
            .unwrap_err()
            .is_not_ready());
    }
}
