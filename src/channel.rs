//! Per-connection channel: state machine, bounded buffers, drain policy.

use crate::buffer::BoundedBuffer;
use crate::metrics::{
    add_counter, inc_counter, BytesReceived, BytesSent, SocketErrorEconnreset, SocketErrorEnetdown,
    SocketErrorEpipe, SocketErrorEtimedout, SocketErrorOther, SocketErrorTotal,
};
use crate::protocol::{BufferIo, Protocol};
use mio::net::TcpStream;
use mio::Interest;
use std::io::{self, Read, Write};
use std::os::unix::io::{AsRawFd, RawFd};
use tracing::warn;

/// Channel lifecycle state (spec §4.4). Closed is terminal-and-reusable: a
/// slot cycles back to Closed on every detach, ready for the next `attach`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    /// No socket attached.
    Closed,
    /// Normal bidirectional service.
    Running,
    /// Peer EOF observed or shutdown requested; finishing pending writes.
    Draining,
    /// Unrecoverable transport error; eligible to close immediately.
    Aborting,
}

/// One logical TCP connection: socket, bounded RX/TX, state, embedded protocol.
pub struct Channel<P: Protocol> {
    fd: RawFd,
    socket: Option<TcpStream>,
    rx: BoundedBuffer,
    tx: BoundedBuffer,
    state: ChannelState,
    /// What interest is currently registered with the reactor's readiness
    /// set, as of the last (re)registration. Bookkeeping only — never
    /// consulted to derive `desired_interest`.
    last_known_mask: Option<Interest>,
    protocol: P,
}

impl<P: Protocol + Default> Channel<P> {
    pub(crate) fn new(rx_capacity: usize, tx_capacity: usize) -> Self {
        Self {
            fd: -1,
            socket: None,
            rx: BoundedBuffer::with_capacity(rx_capacity),
            tx: BoundedBuffer::with_capacity(tx_capacity),
            state: ChannelState::Closed,
            last_known_mask: None,
            protocol: P::default(),
        }
    }

    /// Transition Closed -> Running, adopting `socket`. Buffers are cleared.
    pub(crate) fn attach(&mut self, socket: TcpStream) {
        debug_assert!(matches!(self.state, ChannelState::Closed));
        self.fd = socket.as_raw_fd();
        self.socket = Some(socket);
        self.rx.clear();
        self.tx.clear();
        self.state = ChannelState::Running;
        self.last_known_mask = None;
    }

    /// Transition back to Closed, releasing (and returning) the socket.
    /// Buffers are cleared. Does not touch the pool's slot bookkeeping.
    pub(crate) fn detach(&mut self) -> Option<TcpStream> {
        self.rx.clear();
        self.tx.clear();
        self.fd = -1;
        self.state = ChannelState::Closed;
        self.last_known_mask = None;
        self.socket.take()
    }
}

impl<P: Protocol> Channel<P> {
    /// The attached socket's descriptor, or `-1` if Closed.
    pub fn fd(&self) -> RawFd {
        self.fd
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ChannelState {
        self.state
    }

    /// Request a graceful transition out of Running. A no-op from any other
    /// state (§4.4: Running -> Draining is the only `begin_shutdown` edge).
    pub fn begin_shutdown(&mut self) {
        if self.state == ChannelState::Running {
            self.state = ChannelState::Draining;
        }
    }

    /// The readiness interest the reactor should have registered right now.
    /// Always recomputed from `(state, rx, tx)` — never cached.
    pub fn desired_interest(&self) -> Option<Interest> {
        let readable = self.state == ChannelState::Running && !self.rx.is_full();
        let writable =
            matches!(self.state, ChannelState::Running | ChannelState::Draining) && !self.tx.is_empty();
        match (readable, writable) {
            (true, true) => Some(Interest::READABLE | Interest::WRITABLE),
            (true, false) => Some(Interest::READABLE),
            (false, true) => Some(Interest::WRITABLE),
            (false, false) => None,
        }
    }

    /// What the reactor currently has registered, per the last call to
    /// [`Self::set_last_known_mask`].
    pub fn last_known_mask(&self) -> Option<Interest> {
        self.last_known_mask
    }

    /// Record what the reactor just (re)registered.
    pub fn set_last_known_mask(&mut self, mask: Option<Interest>) {
        self.last_known_mask = mask;
    }

    /// True iff the channel is ready to be finalized and its slot released.
    pub fn should_close(&self) -> bool {
        self.state == ChannelState::Aborting
            || (self.state == ChannelState::Draining && self.tx.is_empty())
    }

    /// Finalize: invoke the protocol's `on_close` hook. Must be followed by
    /// [`Self::detach`] by the caller (spec §4.4: "finalized externally by
    /// the reactor via `notify_close()` then `detach()`").
    pub fn notify_close(&mut self) {
        let mut io = BufferIo { rx: &mut self.rx, tx: &mut self.tx, accepting_writes: false };
        self.protocol.on_close(&mut io);
    }

    /// Direct access to the attached socket, for the reactor's
    /// (re)registration and deregistration bookkeeping. `None` iff Closed.
    pub(crate) fn socket_mut(&mut self) -> Option<&mut TcpStream> {
        self.socket.as_mut()
    }

    /// Transition into Aborting on a transport error: account the errno,
    /// best-effort shut the socket down, and fire the protocol's error hook.
    ///
    /// Exposed at `pub(crate)` so the reactor can call it directly on a
    /// readiness-error event, skipping the normal drain (spec §4.6).
    pub(crate) fn abort(&mut self, errno: i32) {
        self.state = ChannelState::Aborting;
        record_socket_error(errno);
        if let Some(socket) = &self.socket {
            let _ = socket.shutdown(std::net::Shutdown::Both);
        }
        let mut io = BufferIo { rx: &mut self.rx, tx: &mut self.tx, accepting_writes: false };
        self.protocol.on_error(&mut io, errno);
    }

    /// Run the edge-triggered drain policy (spec §4.4) for one readiness
    /// fire: pull until it would block or RX fills, hand bytes to the
    /// protocol, flush TX, and repeat until neither read nor the protocol
    /// made forward progress.
    pub fn drain(&mut self) {
        loop {
            let mut bytes_received = 0usize;

            if self.state == ChannelState::Running {
                loop {
                    if self.rx.is_full() {
                        break;
                    }
                    let free = self.rx.free();
                    let span = self.rx.writable_span(free);
                    let socket = self.socket.as_mut().expect("Running channel has a socket");
                    match socket.read(span) {
                        Ok(0) => {
                            self.state = ChannelState::Draining;
                            break;
                        }
                        Ok(n) => {
                            self.rx.commit(n);
                            bytes_received += n;
                            add_counter::<BytesReceived>(n as u64);
                        }
                        Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                        Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                        Err(e) => {
                            let errno = e.raw_os_error().unwrap_or(0);
                            warn!(fd = self.fd, errno, "channel read failed");
                            self.abort(errno);
                            return;
                        }
                    }
                }
            }

            let mut rx_consumed = 0usize;
            if self.rx.used() > 0 {
                let before = self.rx.used();
                let accepting_writes =
                    matches!(self.state, ChannelState::Running | ChannelState::Draining);
                let mut io = BufferIo { rx: &mut self.rx, tx: &mut self.tx, accepting_writes };
                self.protocol.on_read(&mut io);
                rx_consumed = before - self.rx.used();
            }

            if matches!(self.state, ChannelState::Running | ChannelState::Draining) {
                while !self.tx.is_empty() {
                    let used = self.tx.used();
                    let span = self.tx.readable_span(used);
                    let socket = self.socket.as_mut().expect("live channel has a socket");
                    match socket.write(span) {
                        Ok(0) => break,
                        Ok(n) => {
                            self.tx.consume(n);
                            add_counter::<BytesSent>(n as u64);
                        }
                        Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                        Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                        Err(e) => {
                            let errno = e.raw_os_error().unwrap_or(0);
                            warn!(fd = self.fd, errno, "channel write failed");
                            self.abort(errno);
                            return;
                        }
                    }
                }
            }

            if bytes_received == 0 && rx_consumed == 0 {
                break;
            }
        }
    }

    #[cfg(test)]
    fn with_state_for_test(rx_capacity: usize, tx_capacity: usize, state: ChannelState) -> Self
    where
        P: Default,
    {
        Self {
            fd: -1,
            socket: None,
            rx: BoundedBuffer::with_capacity(rx_capacity),
            tx: BoundedBuffer::with_capacity(tx_capacity),
            state,
            last_known_mask: None,
            protocol: P::default(),
        }
    }
}

fn record_socket_error(errno: i32) {
    inc_counter::<SocketErrorTotal>();
    match errno {
        e if e == libc::ECONNRESET => inc_counter::<SocketErrorEconnreset>(),
        e if e == libc::ETIMEDOUT => inc_counter::<SocketErrorEtimedout>(),
        e if e == libc::EPIPE => inc_counter::<SocketErrorEpipe>(),
        e if e == libc::ENETDOWN => inc_counter::<SocketErrorEnetdown>(),
        _ => inc_counter::<SocketErrorOther>(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::Echo;

    #[test]
    fn readiness_read_interest_requires_running_and_rx_not_full() {
        let mut ch = Channel::<Echo>::with_state_for_test(4, 4, ChannelState::Running);
        assert_eq!(ch.desired_interest(), None);

        ch.rx.write_from(b"a");
        assert_eq!(ch.desired_interest(), Some(Interest::READABLE));

        ch.rx.write_from(b"bcd");
        assert!(ch.rx.is_full());
        assert_eq!(ch.desired_interest(), None);
    }

    #[test]
    fn readiness_write_interest_requires_running_or_draining_and_tx_nonempty() {
        let mut ch = Channel::<Echo>::with_state_for_test(4, 4, ChannelState::Running);
        ch.tx.write_from(b"x");
        assert_eq!(ch.desired_interest(), Some(Interest::WRITABLE));

        ch.state = ChannelState::Draining;
        assert_eq!(ch.desired_interest(), Some(Interest::WRITABLE));

        ch.state = ChannelState::Aborting;
        assert_eq!(ch.desired_interest(), None);
    }

    #[test]
    fn close_eligibility_aborting_is_always_eligible() {
        let ch = Channel::<Echo>::with_state_for_test(4, 4, ChannelState::Aborting);
        assert!(ch.should_close());
    }

    #[test]
    fn close_eligibility_draining_requires_empty_tx() {
        let mut ch = Channel::<Echo>::with_state_for_test(4, 4, ChannelState::Draining);
        ch.tx.write_from(b"pending");
        assert!(!ch.should_close());

        ch.tx.consume(ch.tx.used());
        assert!(ch.should_close());
    }

    #[test]
    fn close_eligibility_running_never_eligible() {
        let ch = Channel::<Echo>::with_state_for_test(4, 4, ChannelState::Running);
        assert!(!ch.should_close());
    }

    #[test]
    fn begin_shutdown_only_transitions_from_running() {
        let mut ch = Channel::<Echo>::with_state_for_test(4, 4, ChannelState::Running);
        ch.begin_shutdown();
        assert_eq!(ch.state(), ChannelState::Draining);

        let mut closed = Channel::<Echo>::with_state_for_test(4, 4, ChannelState::Closed);
        closed.begin_shutdown();
        assert_eq!(closed.state(), ChannelState::Closed);
    }
}
