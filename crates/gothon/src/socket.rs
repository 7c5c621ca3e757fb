//! Unix datagram endpoints.
//!
//! Every (worker, variable, operation) channel half is one socket file. By
//! convention paths ending in `_in` carry requests from a worker to the
//! coordinator, which binds them up front. Paths ending in `_out` or `_ok`
//! carry responses: the worker binds those, and the coordinator
//! connects lazily on first send (by which time the worker's shim has bound
//! the file, since it binds during import and only then issues requests).
//!
//! Sockets are shared as `Arc<DatagramSocket>` between the register reader
//! thread that services them and the [`SocketArray`] that closes them at
//! session teardown; `close` shuts the channel down, which unblocks a reader
//! with a zero-length receive.

use std::io;
use std::net::Shutdown;
use std::os::unix::net::UnixDatagram;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, OnceLock};

use crate::error::Result;

/// One endpoint: a socket file path plus whichever channel halves it needs.
pub struct DatagramSocket {
    path: PathBuf,
    /// Endpoint path relative to the per-worker socket root; the fabric uses
    /// it to route the endpoint to a register slot.
    tag: String,
    listener: OnceLock<UnixDatagram>,
    sender: Mutex<Option<UnixDatagram>>,
}

impl DatagramSocket {
    pub fn new(path: PathBuf, tag: impl Into<String>) -> Self {
        DatagramSocket {
            path,
            tag: tag.into(),
            listener: OnceLock::new(),
            sender: Mutex::new(None),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn tag(&self) -> &str {
        &self.tag
    }

    /// Creates the parent directory and, for request (`_in`) endpoints, binds
    /// the listening socket. Response endpoints only record their address.
    pub fn listen(&self) -> io::Result<()> {
        if let Some(dir) = self.path.parent() {
            std::fs::create_dir_all(dir)?;
        }

        if self.is_response_endpoint() {
            return Ok(());
        }

        let socket = UnixDatagram::bind(&self.path)?;
        let _ = self.listener.set(socket);
        Ok(())
    }

    fn is_response_endpoint(&self) -> bool {
        let name = self.path.to_string_lossy();
        name.ends_with("_out") || name.ends_with("_ok")
    }

    /// Receives one datagram. Returns `Ok(0)` once the endpoint is closed.
    pub fn recv(&self, buf: &mut [u8]) -> io::Result<usize> {
        match self.listener.get() {
            Some(listener) => listener.recv(buf),
            None => Err(io::Error::new(
                io::ErrorKind::NotConnected,
                "endpoint is not bound for receiving",
            )),
        }
    }

    /// Sends one datagram, dialing the peer on first use.
    pub fn send(&self, data: &[u8]) -> io::Result<usize> {
        let mut guard = self.sender.lock().expect("sender mutex poisoned");
        let sender = match guard.as_ref() {
            Some(sender) => sender,
            None => {
                let socket = UnixDatagram::unbound()?;
                socket.connect(&self.path)?;
                guard.insert(socket)
            }
        };
        sender.send(data)
    }

    /// Shuts both halves down. Reader threads blocked in [`recv`](Self::recv)
    /// observe a zero-length datagram and exit.
    pub fn close(&self) {
        if let Some(listener) = self.listener.get() {
            let _ = listener.shutdown(Shutdown::Both);
        }
        if let Ok(guard) = self.sender.lock() {
            if let Some(sender) = guard.as_ref() {
                let _ = sender.shutdown(Shutdown::Both);
            }
        }
    }
}

impl std::fmt::Debug for DatagramSocket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DatagramSocket")
            .field("path", &self.path)
            .field("tag", &self.tag)
            .finish()
    }
}

/// All endpoints of one session: `node_count` copies of the package's
/// endpoint paths, rooted under `<base>/<worker-index>/`.
pub struct SocketArray {
    sockets: Vec<Arc<DatagramSocket>>,
}

impl SocketArray {
    pub fn new(base: &Path, paths: &[String], node_count: usize) -> Self {
        let mut sockets = Vec::with_capacity(paths.len() * node_count);
        for node in 0..node_count {
            for path in paths {
                let full = base.join(node.to_string()).join(path);
                sockets.push(Arc::new(DatagramSocket::new(full, path.clone())));
            }
        }
        SocketArray { sockets }
    }

    /// Binds every request endpoint. Any failure aborts session startup.
    pub fn listen(&self) -> Result<()> {
        for socket in &self.sockets {
            socket.listen()?;
        }
        Ok(())
    }

    pub fn close(&self) {
        for socket in &self.sockets {
            socket.close();
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<DatagramSocket>> {
        self.sockets.iter()
    }

    pub fn len(&self) -> usize {
        self.sockets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sockets.is_empty()
    }
}
