//! Readiness-driven server loop
//!
//! One thread owns the listener, the poller and the [`ConnectionTable`].
//! Each wake-up services every ready connection once, in table order,
//! then accepts whatever is waiting on the listener.
//!
//! # Example
//!
//! ```no_run
//! use ws_echo::{Config, Server};
//!
//! let server = Server::bind(Config::default())?;
//! println!("listening on {}", server.local_addr());
//! server.run()?;
//! # Ok::<(), ws_echo::Error>(())
//! ```

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use mio::net::{TcpListener, TcpStream};
use mio::{Events, Interest, Poll, Token, Waker};
use socket2::{Domain, Protocol, Socket, Type};
use tracing::{debug, error, info, trace, warn};

use crate::Config;
use crate::connection::{Connection, Step};
use crate::error::Result;
use crate::table::ConnectionTable;

const LISTENER: Token = Token(0);
const WAKER: Token = Token(1);
const FIRST_CONNECTION: usize = 2;

/// WebSocket echo server
pub struct Server {
    poll: Poll,
    listener: TcpListener,
    local_addr: SocketAddr,
    table: ConnectionTable<TcpStream>,
    config: Config,
    /// Shared read buffer for handshake reads
    scratch: Box<[u8]>,
    next_token: usize,
    shutdown: Arc<AtomicBool>,
    waker: Arc<Waker>,
}

impl Server {
    /// Bind the listening socket described by `config`
    ///
    /// The listen backlog equals the connection table capacity.
    pub fn bind(config: Config) -> Result<Self> {
        let listener = bind_listener(config.bind_addr, config.max_connections)?;
        let mut listener = TcpListener::from_std(listener);
        let local_addr = listener.local_addr()?;

        let poll = Poll::new()?;
        poll.registry()
            .register(&mut listener, LISTENER, Interest::READABLE)?;
        let waker = Arc::new(Waker::new(poll.registry(), WAKER)?);

        info!(addr = %local_addr, capacity = config.max_connections, "listening");

        Ok(Self {
            poll,
            listener,
            local_addr,
            table: ConnectionTable::with_capacity(config.max_connections),
            scratch: vec![0u8; config.read_buffer_size.max(1)].into_boxed_slice(),
            config,
            next_token: FIRST_CONNECTION,
            shutdown: Arc::new(AtomicBool::new(false)),
            waker,
        })
    }

    /// Address the listener is bound to
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Handle for stopping [`run`](Self::run) from another thread
    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            flag: Arc::clone(&self.shutdown),
            waker: Arc::clone(&self.waker),
        }
    }

    /// Run the event loop
    ///
    /// Returns `Ok(())` after a shutdown request, or the error that made
    /// the readiness wait fail. Every socket is closed in both cases.
    pub fn run(mut self) -> Result<()> {
        let mut events = Events::with_capacity(self.config.max_connections + FIRST_CONNECTION);

        loop {
            if let Err(e) = self.poll.poll(&mut events, Some(self.config.poll_timeout)) {
                if e.kind() == io::ErrorKind::Interrupted {
                    continue;
                }
                return self.fail(e);
            }

            if events.is_empty() {
                trace!(live = self.table.len(), "poll timeout");
                continue;
            }

            let mut accept = false;
            for event in events.iter() {
                match event.token() {
                    LISTENER => accept = true,
                    WAKER => {}
                    token => {
                        if let Some(conn) = self
                            .table
                            .position(token)
                            .and_then(|slot| self.table.get_mut(slot))
                        {
                            conn.mark_ready();
                        }
                    }
                }
            }

            if self.shutdown.load(Ordering::Acquire) {
                info!(live = self.table.len(), "shutting down");
                self.close_all();
                return Ok(());
            }

            self.service_connections();

            if accept {
                self.accept_connections();
            }
        }
    }

    /// Give each ready connection one step, in slot order
    fn service_connections(&mut self) {
        let mut slot = 0;
        while let Some(conn) = self.table.get_mut(slot) {
            if !conn.take_ready() {
                slot += 1;
                continue;
            }

            match conn.on_ready(&mut self.scratch, &self.config) {
                Step::Continue => slot += 1,
                Step::Close(cause) => {
                    // The last entry moves into this slot and has not been serviced yet
                    let mut conn = self.table.swap_remove(slot);
                    if let Err(e) = self.poll.registry().deregister(conn.stream_mut()) {
                        debug!(error = %e, "deregister failed");
                    }
                    debug!(
                        token = conn.token().0,
                        peer = %conn.peer(),
                        phase = conn.phase().name(),
                        live = self.table.len(),
                        %cause,
                        "connection closed"
                    );
                }
            }
        }
    }

    /// Accept until the listener would block
    fn accept_connections(&mut self) {
        loop {
            let (mut stream, peer) = match self.listener.accept() {
                Ok(accepted) => accepted,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    warn!(error = %e, "accept failed");
                    break;
                }
            };

            if self.table.is_full() {
                warn!(%peer, live = self.table.len(), "connection table full, rejecting");
                continue;
            }

            let token = Token(self.next_token);
            self.next_token += 1;

            if let Err(e) = self.poll.registry().register(
                &mut stream,
                token,
                Interest::READABLE | Interest::WRITABLE,
            ) {
                warn!(%peer, error = %e, "failed to register connection");
                continue;
            }
            stream.set_nodelay(true).ok();

            match self
                .table
                .push(Connection::new(stream, token, peer, &self.config))
            {
                Ok(slot) => info!(
                    slot,
                    %peer,
                    token = token.0,
                    live = self.table.len(),
                    "connection accepted"
                ),
                Err(mut conn) => {
                    let _ = self.poll.registry().deregister(conn.stream_mut());
                }
            }
        }
    }

    /// Tear everything down after a fatal readiness error
    fn fail(&mut self, e: io::Error) -> Result<()> {
        error!(error = %e, live = self.table.len(), "readiness wait failed");
        self.close_all();
        Err(e.into())
    }

    fn close_all(&mut self) {
        let registry = self.poll.registry();
        for mut conn in self.table.drain() {
            let _ = registry.deregister(conn.stream_mut());
        }
        let _ = registry.deregister(&mut self.listener);
    }
}

/// Cross-thread handle that stops a running [`Server`]
#[derive(Debug, Clone)]
pub struct ShutdownHandle {
    flag: Arc<AtomicBool>,
    waker: Arc<Waker>,
}

impl ShutdownHandle {
    /// Ask the server loop to close every socket and return
    pub fn shutdown(&self) -> io::Result<()> {
        self.flag.store(true, Ordering::Release);
        self.waker.wake()
    }
}

fn bind_listener(addr: SocketAddr, backlog: usize) -> io::Result<std::net::TcpListener> {
    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;
    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(i32::try_from(backlog).unwrap_or(i32::MAX))?;
    Ok(socket.into())
}
