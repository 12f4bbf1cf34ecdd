//! Socket layer: the userspace-facing API over the protocol tables.
//!
//! Sockets live in a bounded table of [`MAX_SOCKETS`] slots; the descriptor
//! is the slot index.  Only `AF_INET` stream sockets carry real protocol
//! state (a TCP tuple); datagram and raw sockets can be created and bound
//! but have no transport underneath.
//!
//! All operations here are non-blocking.  `accept` reports `WouldBlock`
//! because there is no pending-connection queue, and `recv` reports zero
//! bytes because there is no receive buffer.

use crate::netstack::NetStack;
use crate::tcp::{self, TcpInputResult, TcpTuple};
use crate::types::{NetError, Port, SockAddr, SockFd};
use rillos_abi::net::{MAX_SOCKETS, SOCK_DGRAM, SOCK_RAW, SOCK_STREAM};
use rillos_lib::{klog_debug, klog_warn};

/// Socket type, decoded from the ABI constant.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SockType {
    Stream,
    Datagram,
    Raw,
}

impl SockType {
    pub fn from_raw(raw: u16) -> Option<Self> {
        match raw {
            SOCK_STREAM => Some(Self::Stream),
            SOCK_DGRAM => Some(Self::Datagram),
            SOCK_RAW => Some(Self::Raw),
            _ => None,
        }
    }
}

/// Lifecycle state of a socket, independent of TCP connection state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SocketState {
    Closed,
    Listening,
    Connecting,
    Connected,
}

/// Per-type protocol state.
#[derive(Clone, Copy, Debug)]
pub enum ProtoState {
    /// Stream sockets carry the TCP tuple once a connection exists.
    Stream { conn: Option<TcpTuple> },
    Datagram,
    Raw,
}

/// One socket table entry.
#[derive(Debug)]
pub struct Socket {
    pub sock_type: SockType,
    /// IP protocol number requested at creation; 0 means "default for type".
    pub protocol: u16,
    pub state: SocketState,
    pub local: SockAddr,
    pub remote: SockAddr,
    pub proto: ProtoState,
}

impl Socket {
    fn new(sock_type: SockType, protocol: u16) -> Self {
        Self {
            sock_type,
            protocol,
            state: SocketState::Closed,
            local: SockAddr::UNSPECIFIED,
            remote: SockAddr::UNSPECIFIED,
            proto: match sock_type {
                SockType::Stream => ProtoState::Stream { conn: None },
                SockType::Datagram => ProtoState::Datagram,
                SockType::Raw => ProtoState::Raw,
            },
        }
    }

    fn tcp_tuple(&self) -> Option<TcpTuple> {
        match self.proto {
            ProtoState::Stream { conn } => conn,
            _ => None,
        }
    }
}

/// Bounded socket table.  Descriptors index directly into `slots`.
pub struct SocketTable {
    slots: [Option<Socket>; MAX_SOCKETS],
}

impl SocketTable {
    pub const fn new() -> Self {
        Self {
            slots: [const { None }; MAX_SOCKETS],
        }
    }

    fn alloc(&mut self, sock_type: SockType, protocol: u16) -> Option<SockFd> {
        for (i, slot) in self.slots.iter_mut().enumerate() {
            if slot.is_none() {
                *slot = Some(Socket::new(sock_type, protocol));
                return Some(SockFd(i));
            }
        }
        None
    }

    fn get_mut(&mut self, fd: SockFd) -> Result<&mut Socket, NetError> {
        self.slots
            .get_mut(fd.0)
            .and_then(|slot| slot.as_mut())
            .ok_or(NetError::BadDescriptor)
    }

    fn take(&mut self, fd: SockFd) -> Result<Socket, NetError> {
        self.slots
            .get_mut(fd.0)
            .and_then(|slot| slot.take())
            .ok_or(NetError::BadDescriptor)
    }
}

impl Default for SocketTable {
    fn default() -> Self {
        Self::new()
    }
}

impl NetStack {
    /// Create a socket.  Only `AF_INET` is supported.
    pub fn socket(&self, domain: u16, sock_type: u16, protocol: u16) -> Result<SockFd, NetError> {
        if domain != rillos_abi::net::AF_INET {
            return Err(NetError::AddressFamilyNotSupported);
        }
        let sock_type = SockType::from_raw(sock_type).ok_or(NetError::ProtocolNotSupported)?;
        self.sockets
            .lock()
            .alloc(sock_type, protocol)
            .ok_or(NetError::NoDescriptors)
    }

    /// Bind a socket to a local address.  Rebinding is an error.
    pub fn bind(&self, fd: SockFd, addr: SockAddr) -> Result<(), NetError> {
        let mut sockets = self.sockets.lock();
        let sock = sockets.get_mut(fd)?;
        if sock.local.port != Port(0) {
            return Err(NetError::AddressInUse);
        }
        sock.local = addr;
        Ok(())
    }

    /// Start an active TCP connect.  Returns as soon as the SYN is out; the
    /// socket moves to `Connected` when the handshake completes.
    pub fn connect(&self, fd: SockFd, remote: SockAddr) -> Result<(), NetError> {
        let mut sockets = self.sockets.lock();
        let sock = sockets.get_mut(fd)?;
        if sock.sock_type != SockType::Stream {
            return Err(NetError::OperationNotSupported);
        }
        if matches!(sock.state, SocketState::Connected | SocketState::Connecting) {
            return Err(NetError::AlreadyConnected);
        }

        // Auto-bind: local address from the default interface, port derived
        // from the descriptor so it is stable and collision-free per table.
        if sock.local.port == Port(0) {
            let local_ip = {
                let ifaces = self.ifaces.lock();
                match ifaces.by_name(self.config.default_iface.as_str()) {
                    Some((_, iface)) => iface.addr,
                    None => return Err(NetError::NetworkUnreachable),
                }
            };
            let port = Port(Port::EPHEMERAL_FIRST.0 + (fd.0 as u16 % 16384));
            sock.local = SockAddr::new(local_ip, port);
        }

        let (tuple, syn) = self
            .tcp
            .lock()
            .connect(sock.local.ip, remote, Some(sock.local.port))?;
        sock.remote = remote;
        sock.state = SocketState::Connecting;
        sock.proto = ProtoState::Stream { conn: Some(tuple) };
        drop(sockets);

        // Losing the SYN on the wire is not a connect failure; the caller
        // observes the socket stuck in Connecting.
        if let Err(err) = tcp::emit_segment(self, &syn, &[]) {
            klog_warn!("socket: fd {} syn transmit failed: {}", fd, err);
        }
        Ok(())
    }

    /// Mark a bound stream socket passive.
    pub fn listen(&self, fd: SockFd) -> Result<(), NetError> {
        let mut sockets = self.sockets.lock();
        let sock = sockets.get_mut(fd)?;
        if sock.sock_type != SockType::Stream {
            return Err(NetError::OperationNotSupported);
        }
        if sock.local.port == Port(0) {
            return Err(NetError::InvalidArgument);
        }
        sock.state = SocketState::Listening;
        Ok(())
    }

    /// Accept never completes: inbound connections are tracked in the TCP
    /// table but there is no queue handing them to listeners.
    pub fn accept(&self, fd: SockFd) -> Result<SockFd, NetError> {
        let mut sockets = self.sockets.lock();
        let sock = sockets.get_mut(fd)?;
        if sock.state != SocketState::Listening {
            return Err(NetError::InvalidArgument);
        }
        Err(NetError::WouldBlock)
    }

    /// Transmit `data` on a connected stream socket.
    pub fn send(&self, fd: SockFd, data: &[u8]) -> Result<usize, NetError> {
        let (tuple, seg) = {
            let mut sockets = self.sockets.lock();
            let sock = sockets.get_mut(fd)?;
            if sock.sock_type != SockType::Stream {
                return Err(NetError::OperationNotSupported);
            }
            if sock.state != SocketState::Connected {
                return Err(NetError::NotConnected);
            }
            let tuple = sock.tcp_tuple().ok_or(NetError::NotConnected)?;
            let seg = self.tcp.lock().send(tuple, data.len())?;
            (tuple, seg)
        };
        tcp::emit_segment(self, &seg, data)?;
        klog_debug!("socket: fd {} sent {} bytes to {}", fd, data.len(), tuple.remote);
        Ok(data.len())
    }

    /// Receive on a socket.  There is no receive buffer, so a connected
    /// socket always reports zero bytes available.
    pub fn recv(&self, fd: SockFd, _buf: &mut [u8]) -> Result<usize, NetError> {
        let mut sockets = self.sockets.lock();
        let sock = sockets.get_mut(fd)?;
        if sock.sock_type != SockType::Stream {
            return Err(NetError::OperationNotSupported);
        }
        if sock.state != SocketState::Connected {
            return Err(NetError::NotConnected);
        }
        Ok(0)
    }

    /// Close a socket.  The slot is freed immediately; if a TCP connection
    /// exists its FIN goes out after the tables are unlocked.
    pub fn close(&self, fd: SockFd) -> Result<(), NetError> {
        let fin = {
            let mut sockets = self.sockets.lock();
            let sock = sockets.take(fd)?;
            match sock.tcp_tuple() {
                Some(tuple) => self.tcp.lock().close(tuple)?,
                None => None,
            }
        };
        if let Some(fin) = fin {
            if let Err(err) = tcp::emit_segment(self, &fin, &[]) {
                klog_warn!("socket: fd {} fin transmit failed: {}", fd, err);
            }
        }
        Ok(())
    }

    /// Socket options are accepted and ignored.
    pub fn set_opt(&self, fd: SockFd, _level: u32, _name: u32) -> Result<(), NetError> {
        self.sockets.lock().get_mut(fd)?;
        Ok(())
    }

    /// Socket options read back as zero.
    pub fn get_opt(&self, fd: SockFd, _level: u32, _name: u32) -> Result<u32, NetError> {
        self.sockets.lock().get_mut(fd)?;
        Ok(0)
    }
}

/// Propagate TCP state-machine outcomes to the socket table.  Called after
/// the TCP lock is released.
pub(crate) fn notify_tcp(stack: &NetStack, result: &TcpInputResult) {
    let Some(tuple) = result.established else {
        return;
    };
    let mut sockets = stack.sockets.lock();
    for slot in sockets.slots.iter_mut().flatten() {
        if slot.tcp_tuple() == Some(tuple) {
            slot.state = SocketState::Connected;
            klog_debug!("socket: {} connected", tuple.remote);
            return;
        }
    }
}
