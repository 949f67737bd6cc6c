//! Listening socket setup.
//!
//! The supervisor binds (or adopts) exactly one listening socket before any
//! worker exists. Workers inherit the descriptor across `fork` and each turns
//! its copy into a tokio listener with [`ListenerHandle::to_listener`].

use std::fs;
use std::io;
use std::net::{SocketAddr, ToSocketAddrs};
use std::os::fd::{AsRawFd, FromRawFd, RawFd};
use std::path::{Path, PathBuf};
use std::time::Duration;

use prefork_http::connection::HttpConnection;
use prefork_http::handler::Application;
use prefork_http::protocol::{ConnectionInfo, HttpError};
use socket2::{Domain, Protocol, SockAddr, Socket, Type};
use tokio::net::{TcpListener, TcpStream, UnixListener, UnixStream};
use tracing::{debug, info, trace, warn};

use crate::ServerError;
use crate::config::ServerConfig;

/// Environment variable carrying a pre-bound listening descriptor.
pub const HANDOFF_ENV: &str = "SERVER_STARTER_PORT";

/// Server identity reported to requests served over a Unix-domain socket.
const UNIX_SERVER_NAME: &str = "0.0.0.0";

/// A listening descriptor handed over by an external process manager.
///
/// Parsed from the first `;`-separated entry of [`HANDOFF_ENV`], in one of the
/// forms `host:port=fd`, `port=fd`, `path=fd` or a bare `fd`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Handoff {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub fd: RawFd,
}

impl Handoff {
    pub fn from_env() -> Result<Option<Self>, ServerError> {
        match std::env::var(HANDOFF_ENV) {
            Ok(value) => Self::parse(&value).map(Some),
            Err(_) => Ok(None),
        }
    }

    pub fn parse(value: &str) -> Result<Self, ServerError> {
        let entry = value.split(';').next().unwrap_or_default().trim();
        if entry.is_empty() {
            return Err(ServerError::handoff(value, "no listener entry"));
        }

        let (addr, fd) = match entry.split_once('=') {
            Some((addr, fd)) => (Some(addr.trim()), fd.trim()),
            None => (None, entry),
        };

        let fd: RawFd = fd.parse().map_err(|e| ServerError::handoff(value, format!("bad descriptor: {e}")))?;
        if fd < 0 {
            return Err(ServerError::handoff(value, "negative descriptor"));
        }

        let (host, port) = match addr {
            None => (None, None),
            Some(addr) => match addr.rsplit_once(':') {
                Some((host, port)) => {
                    let port = port.parse().map_err(|e| ServerError::handoff(value, format!("bad port: {e}")))?;
                    (Some(host.trim_start_matches('[').trim_end_matches(']').to_owned()), Some(port))
                }
                // `port=fd`, or `path=fd` for a Unix-domain socket
                None => (None, addr.parse().ok()),
            },
        };

        Ok(Handoff { host, port, fd })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenerKind {
    Tcp,
    Unix,
}

/// The bound or inherited listening socket, plus the identity requests see.
#[derive(Debug)]
pub struct ListenerHandle {
    socket: Socket,
    kind: ListenerKind,
    inherited: bool,
    server_name: String,
    server_port: u16,
    unix_path: Option<PathBuf>,
}

impl ListenerHandle {
    /// Adopts the descriptor in [`HANDOFF_ENV`] if present, otherwise binds per `config`.
    pub fn setup(config: &ServerConfig) -> Result<Self, ServerError> {
        Self::setup_with(config, Handoff::from_env()?)
    }

    pub fn setup_with(config: &ServerConfig, handoff: Option<Handoff>) -> Result<Self, ServerError> {
        let handle = match (handoff, &config.path) {
            (Some(handoff), _) => Self::adopt(&handoff, &config.host)?,
            (None, Some(path)) => Self::bind_unix(path, config.backlog())?,
            (None, None) => Self::bind_tcp(&config.host, config.port, config.backlog(), config.reuse_port)?,
        };

        if handle.is_tcp() {
            handle.enable_defer_accept();
        }

        info!(
            kind = ?handle.kind,
            inherited = handle.inherited,
            server_name = %handle.server_name,
            server_port = handle.server_port,
            "listener ready"
        );
        Ok(handle)
    }

    pub fn bind_tcp(host: &str, port: u16, backlog: i32, reuse_port: bool) -> Result<Self, ServerError> {
        let display = format!("{host}:{port}");
        let addr = (host, port)
            .to_socket_addrs()
            .and_then(|mut addrs| {
                addrs.next().ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "address resolved to nothing"))
            })
            .map_err(|e| ServerError::bind(&display, e))?;

        let socket = Self::listen_tcp(addr, backlog, reuse_port).map_err(|e| ServerError::bind(&display, e))?;
        let server_port = local_port(&socket).unwrap_or(port);

        Ok(Self {
            socket,
            kind: ListenerKind::Tcp,
            inherited: false,
            server_name: host.to_owned(),
            server_port,
            unix_path: None,
        })
    }

    fn listen_tcp(addr: SocketAddr, backlog: i32, reuse_port: bool) -> io::Result<Socket> {
        let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;
        socket.set_reuse_address(true)?;
        if reuse_port {
            socket.set_reuse_port(true)?;
        }
        socket.bind(&addr.into())?;
        socket.listen(backlog)?;
        Ok(socket)
    }

    /// Binds a Unix-domain socket at `path`, replacing any stale socket file.
    pub fn bind_unix(path: &Path, backlog: i32) -> Result<Self, ServerError> {
        if let Err(e) = fs::remove_file(path) {
            trace!(path = %path.display(), cause = %e, "no stale socket removed");
        }

        let socket = Self::listen_unix(path, backlog).map_err(|e| ServerError::bind(path.display().to_string(), e))?;

        Ok(Self {
            socket,
            kind: ListenerKind::Unix,
            inherited: false,
            server_name: UNIX_SERVER_NAME.to_owned(),
            server_port: 0,
            unix_path: Some(path.to_owned()),
        })
    }

    fn listen_unix(path: &Path, backlog: i32) -> io::Result<Socket> {
        let socket = Socket::new(Domain::UNIX, Type::STREAM, None)?;
        let addr = SockAddr::unix(path)?;

        // SAFETY: umask only swaps the process file-creation mask; the supervisor is single-threaded here.
        let previous = unsafe { libc::umask(0) };
        let bound = socket.bind(&addr);
        // SAFETY: restores the mask saved above.
        unsafe { libc::umask(previous) };

        bound?;
        socket.listen(backlog)?;
        Ok(socket)
    }

    /// Takes ownership of a pre-bound listening descriptor.
    ///
    /// The socket type is read from the descriptor itself; no bind or listen
    /// is performed.
    pub fn adopt(handoff: &Handoff, default_host: &str) -> Result<Self, ServerError> {
        // SAFETY: the process manager hands this descriptor to us alone; from here on `socket` owns it.
        let socket = unsafe { Socket::from_raw_fd(handoff.fd) };
        let local = socket
            .local_addr()
            .map_err(|e| ServerError::handoff(handoff.fd.to_string(), format!("not a socket: {e}")))?;

        let handle = match local.as_socket() {
            Some(addr) => Self {
                socket,
                kind: ListenerKind::Tcp,
                inherited: true,
                server_name: handoff.host.clone().unwrap_or_else(|| default_host.to_owned()),
                server_port: handoff.port.unwrap_or(addr.port()),
                unix_path: None,
            },
            None => Self {
                socket,
                kind: ListenerKind::Unix,
                inherited: true,
                server_name: UNIX_SERVER_NAME.to_owned(),
                server_port: 0,
                unix_path: local.as_pathname().map(Path::to_path_buf),
            },
        };
        Ok(handle)
    }

    #[cfg(target_os = "linux")]
    fn enable_defer_accept(&self) {
        let enable: libc::c_int = 1;
        // SAFETY: the descriptor is owned by `self.socket` and `enable` outlives the call.
        let rc = unsafe {
            libc::setsockopt(
                self.socket.as_raw_fd(),
                libc::IPPROTO_TCP,
                libc::TCP_DEFER_ACCEPT,
                (&raw const enable).cast(),
                size_of::<libc::c_int>() as libc::socklen_t,
            )
        };
        if rc == 0 {
            debug!("TCP_DEFER_ACCEPT enabled");
        } else {
            warn!(cause = %io::Error::last_os_error(), "TCP_DEFER_ACCEPT not enabled");
        }
    }

    #[cfg(not(target_os = "linux"))]
    fn enable_defer_accept(&self) {}

    #[inline]
    pub fn kind(&self) -> ListenerKind {
        self.kind
    }

    #[inline]
    pub fn is_tcp(&self) -> bool {
        self.kind == ListenerKind::Tcp
    }

    #[inline]
    pub fn is_inherited(&self) -> bool {
        self.inherited
    }

    pub fn server_name(&self) -> &str {
        &self.server_name
    }

    pub fn server_port(&self) -> u16 {
        self.server_port
    }

    pub fn connection_info(&self) -> ConnectionInfo {
        ConnectionInfo::new(self.server_name.clone(), self.server_port)
    }

    /// Duplicates the descriptor into a non-blocking tokio listener.
    ///
    /// Must be called from inside a tokio runtime.
    pub fn to_listener(&self) -> io::Result<Listener> {
        let socket = self.socket.try_clone()?;
        socket.set_nonblocking(true)?;
        let listener = match self.kind {
            ListenerKind::Tcp => Listener::Tcp(TcpListener::from_std(std::net::TcpListener::from(socket))?),
            ListenerKind::Unix => {
                Listener::Unix(UnixListener::from_std(std::os::unix::net::UnixListener::from(socket))?)
            }
        };
        Ok(listener)
    }

    /// Removes the socket file of a locally bound Unix listener.
    pub fn cleanup(&self) {
        if self.inherited {
            return;
        }
        if let Some(path) = &self.unix_path
            && let Err(e) = fs::remove_file(path)
        {
            warn!(path = %path.display(), cause = %e, "failed to remove socket file");
        }
    }
}

fn local_port(socket: &Socket) -> Option<u16> {
    socket.local_addr().ok()?.as_socket().map(|addr| addr.port())
}

/// A worker's view of the shared listening socket.
#[derive(Debug)]
pub enum Listener {
    Tcp(TcpListener),
    Unix(UnixListener),
}

impl From<TcpListener> for Listener {
    fn from(listener: TcpListener) -> Self {
        Listener::Tcp(listener)
    }
}

impl From<UnixListener> for Listener {
    fn from(listener: UnixListener) -> Self {
        Listener::Unix(listener)
    }
}

impl Listener {
    /// Accepts one connection; the peer address is `None` for Unix-domain peers.
    pub async fn accept(&self) -> io::Result<(Accepted, Option<SocketAddr>)> {
        match self {
            Listener::Tcp(listener) => {
                let (stream, peer) = listener.accept().await?;
                if let Err(e) = stream.set_nodelay(true) {
                    trace!(cause = %e, "failed to set TCP_NODELAY");
                }
                Ok((Accepted::Tcp(stream), Some(peer)))
            }
            Listener::Unix(listener) => {
                let (stream, _) = listener.accept().await?;
                Ok((Accepted::Unix(stream), None))
            }
        }
    }
}

/// One accepted connection.
#[derive(Debug)]
pub enum Accepted {
    Tcp(TcpStream),
    Unix(UnixStream),
}

impl Accepted {
    /// Runs the connection engine over this stream; the stream is closed when this returns.
    pub async fn serve<A>(self, app: &A, info: ConnectionInfo, timeout: Duration) -> Result<(), HttpError>
    where
        A: Application,
    {
        match self {
            Accepted::Tcp(stream) => {
                let (reader, writer) = stream.into_split();
                HttpConnection::new(reader, writer, info, timeout).process(app).await
            }
            Accepted::Unix(stream) => {
                let (reader, writer) = stream.into_split();
                HttpConnection::new(reader, writer, info, timeout).process(app).await
            }
        }
    }
}
