//! The edge-triggered readiness reactor: the single-threaded loop that
//! multiplexes readiness and dispatches events to channels and control
//! descriptors (spec §4.6).

use crate::channel::ChannelState;
use crate::config::ReactorConfig;
use crate::error::{Error, Result};
use crate::metrics::{
    inc_counter, set_gauge, AcceptErrorEmfile, AcceptErrorEnfile, AcceptErrorEnobufs,
    AcceptErrorOther, PoolActiveChannels, ReactorLoopIterations,
};
use crate::pool::ChannelPool;
use crate::protocol::Protocol;
use mio::net::TcpListener;
use mio::{Events, Interest, Poll, Token, Waker};
use signal_hook::consts::{SIGINT, SIGTERM};
use signal_hook_mio::v0_8::Signals;
use std::io;
use std::net::TcpListener as StdTcpListener;
use std::os::unix::io::{AsRawFd, FromRawFd, RawFd};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

const WAKER_TOKEN: Token = Token(0);
const SIGNAL_TOKEN: Token = Token(1);
const LISTENER_TOKEN: Token = Token(2);
const FD_TOKEN_OFFSET: usize = 3;

fn fd_token(fd: RawFd) -> Token {
    Token(fd as usize + FD_TOKEN_OFFSET)
}

fn token_fd(token: Token) -> RawFd {
    (token.0 - FD_TOKEN_OFFSET) as RawFd
}

#[derive(Debug, Clone, Copy, Default)]
struct EventFlags {
    error: bool,
}

/// A cloneable, thread-safe way to ask a running [`Reactor`] to shut down.
///
/// The only sanctioned channel for off-thread influence on the reactor
/// (spec §4.6 concurrency model): it never touches reactor state directly,
/// it just sets a flag and wakes the readiness wait.
#[derive(Clone)]
pub struct ShutdownHandle {
    waker: Arc<Waker>,
    requested: Arc<AtomicBool>,
}

impl ShutdownHandle {
    /// Request shutdown. Idempotent; safe to call from any thread.
    pub fn request_shutdown(&self) -> Result<()> {
        self.requested.store(true, Ordering::SeqCst);
        self.waker.wake().map_err(Error::from)
    }
}

/// Retrieve and clear a socket's pending `SO_ERROR`.
fn take_socket_error(fd: RawFd) -> i32 {
    let mut errno: libc::c_int = 0;
    let mut len = std::mem::size_of::<libc::c_int>() as libc::socklen_t;
    let rc = unsafe {
        libc::getsockopt(
            fd,
            libc::SOL_SOCKET,
            libc::SO_ERROR,
            &mut errno as *mut _ as *mut libc::c_void,
            &mut len,
        )
    };
    if rc != 0 {
        0
    } else {
        errno
    }
}

/// The readiness loop: one listener, one wake-up descriptor, one signal
/// descriptor, and a pool of channels, all multiplexed on a single
/// [`mio::Poll`].
pub struct Reactor<P: Protocol> {
    poll: Poll,
    events: Events,
    pool: ChannelPool<P>,
    listener: Option<TcpListener>,
    waker: Arc<Waker>,
    shutdown_requested: Arc<AtomicBool>,
    shutdown_active: bool,
    signals: Signals,
    config: ReactorConfig,
}

impl<P: Protocol + Default> Reactor<P> {
    /// Build a reactor. Installs the signal-to-descriptor bridge for
    /// `SIGINT`/`SIGTERM` (spec §6) before returning.
    pub fn new(config: ReactorConfig) -> Result<Self> {
        let poll = Poll::new()?;
        let events = Events::with_capacity(config.max_events_per_poll);
        let waker = Arc::new(Waker::new(poll.registry(), WAKER_TOKEN)?);

        let mut signals = Signals::new([SIGINT, SIGTERM])
            .map_err(|e| Error::reactor(format!("failed to install signal bridge: {e}")))?;
        poll.registry().register(&mut signals, SIGNAL_TOKEN, Interest::READABLE)?;

        let pool =
            ChannelPool::new(config.pool_chunk_size, config.rx_buffer_capacity, config.tx_buffer_capacity);

        Ok(Self {
            poll,
            events,
            pool,
            listener: None,
            waker,
            shutdown_requested: Arc::new(AtomicBool::new(false)),
            shutdown_active: false,
            signals,
            config,
        })
    }

    /// A cloneable handle other threads can use to request shutdown.
    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle { waker: self.waker.clone(), requested: self.shutdown_requested.clone() }
    }

    /// Register `fd` — already bound, listening, and non-blocking — as the
    /// acceptor. Name resolution and socket options are the caller's
    /// responsibility (spec §6).
    pub fn add_listener(&mut self, fd: RawFd) -> Result<()> {
        let std_listener = unsafe { StdTcpListener::from_raw_fd(fd) };
        let mut listener = TcpListener::from_std(std_listener);
        self.poll.registry().register(&mut listener, LISTENER_TOKEN, Interest::READABLE)?;
        self.listener = Some(listener);
        Ok(())
    }

    /// Run until a shutdown request has been processed and every channel
    /// has closed.
    pub fn run(&mut self) -> Result<()> {
        loop {
            if self.shutdown_active && self.pool.is_empty() {
                info!("reactor shutdown complete, pool empty");
                return Ok(());
            }

            match self.poll.poll(&mut self.events, Some(self.config.poll_timeout)) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(Error::from(e)),
            }
            inc_counter::<ReactorLoopIterations>();
            crate::metrics::flush_thread(self.config.metrics_fold_interval);

            // Copy what we need out of `self.events` before calling back
            // into `&mut self` handlers — the iterator borrows `self.events`
            // and every handler needs the rest of `self`.
            let batch: Vec<(Token, EventFlags)> = self
                .events
                .iter()
                .map(|e| (e.token(), EventFlags { error: e.is_error() }))
                .collect();

            for (token, flags) in batch {
                match token {
                    WAKER_TOKEN => {
                        // mio's eventfd-backed waker drains itself; nothing
                        // to read here.
                        self.sweep_closable();
                        if self.shutdown_requested.load(Ordering::SeqCst) {
                            self.begin_shutdown()?;
                        }
                    }
                    SIGNAL_TOKEN => {
                        let received: Vec<i32> = self.signals.pending().collect();
                        if !received.is_empty() {
                            info!(signals = ?received, "shutdown signal received");
                            self.begin_shutdown()?;
                        }
                    }
                    LISTENER_TOKEN => self.on_listener_event()?,
                    other => self.on_channel_event(token_fd(other), flags)?,
                }
            }
        }
    }

    fn on_channel_event(&mut self, fd: RawFd, flags: EventFlags) -> Result<()> {
        if self.pool.lookup(fd).is_none() {
            // stale token from an already-closed channel
            return Ok(());
        }

        if flags.error {
            let errno = take_socket_error(fd);
            let ch = self.pool.lookup(fd).expect("checked above");
            ch.abort(errno);
        } else {
            let ch = self.pool.lookup(fd).expect("checked above");
            ch.drain();
        }

        let should_close = self.pool.lookup(fd).expect("checked above").should_close();
        if should_close {
            self.close_channel(fd)?;
        } else {
            self.sync_channel_registration(fd)?;
        }
        Ok(())
    }

    fn on_listener_event(&mut self) -> Result<()> {
        loop {
            let Some(listener) = self.listener.as_ref() else { return Ok(()) };
            match listener.accept() {
                Ok((stream, addr)) => {
                    let fd = stream.as_raw_fd();
                    debug!(fd, peer = %addr, "accepted connection");
                    let ch = self.pool.acquire(fd);
                    ch.attach(stream);
                    if let Err(e) = self.sync_channel_registration(fd) {
                        warn!(fd, error = %e, "failed to register accepted channel, closing");
                        self.close_channel(fd)?;
                    } else {
                        set_gauge::<PoolActiveChannels>(self.pool.len() as u64);
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(()),
                Err(e) => {
                    let errno = e.raw_os_error().unwrap_or(0);
                    match errno {
                        x if x == libc::EMFILE => inc_counter::<AcceptErrorEmfile>(),
                        x if x == libc::ENFILE => inc_counter::<AcceptErrorEnfile>(),
                        x if x == libc::ENOBUFS => inc_counter::<AcceptErrorEnobufs>(),
                        _ => inc_counter::<AcceptErrorOther>(),
                    }
                    warn!(errno, "accept failed, backing off until next readiness fire");
                    return Ok(());
                }
            }
        }
    }

    /// (Re)register `fd`'s channel with its freshly derived interest, doing
    /// the initial `register` on first attach and `reregister` thereafter.
    /// A derived interest of `None` leaves the previous registration as-is
    /// (mio has no "register with zero interest" — backpressure here just
    /// means no *new* events arrive until TX gets something to flush).
    fn sync_channel_registration(&mut self, fd: RawFd) -> Result<()> {
        let Some(ch) = self.pool.lookup(fd) else { return Ok(()) };
        let Some(interest) = ch.desired_interest() else { return Ok(()) };
        if ch.last_known_mask() == Some(interest) {
            return Ok(());
        }
        let first_time = ch.last_known_mask().is_none();
        let socket = ch.socket_mut().expect("attached channel has a socket");
        let token = fd_token(fd);
        if first_time {
            self.poll.registry().register(socket, token, interest)?;
        } else {
            self.poll.registry().reregister(socket, token, interest)?;
        }
        self.pool.lookup(fd).expect("just registered").set_last_known_mask(Some(interest));
        Ok(())
    }

    fn close_channel(&mut self, fd: RawFd) -> Result<()> {
        let Some(ch) = self.pool.lookup(fd) else { return Ok(()) };
        if let Some(socket) = ch.socket_mut() {
            let _ = self.poll.registry().deregister(socket);
        }
        ch.notify_close();
        let _ = ch.detach();
        self.pool.release(fd);
        set_gauge::<PoolActiveChannels>(self.pool.len() as u64);
        Ok(())
    }

    fn sweep_closable(&mut self) {
        let mut closable = Vec::new();
        self.pool.for_each(|fd, ch| {
            if ch.should_close() {
                closable.push(fd);
            }
        });
        for fd in closable {
            let _ = self.close_channel(fd);
        }
    }

    /// Idempotent shutdown orchestration (spec §4.6): stop accepting new
    /// work, drain every live channel toward Draining, wake the loop so it
    /// notices promptly, and sweep anything already closable.
    fn begin_shutdown(&mut self) -> Result<()> {
        if self.shutdown_active {
            return Ok(());
        }
        self.shutdown_active = true;
        info!("beginning reactor shutdown");

        if let Some(mut listener) = self.listener.take() {
            let _ = self.poll.registry().deregister(&mut listener);
        }

        let mut fds = Vec::new();
        self.pool.for_each(|fd, ch| {
            if ch.state() != ChannelState::Closed {
                fds.push(fd);
            }
        });
        for fd in fds {
            if let Some(ch) = self.pool.lookup(fd) {
                ch.begin_shutdown();
            }
        }

        let _ = self.waker.wake();
        self.sweep_closable();
        Ok(())
    }

    /// Request shutdown as if called from the reactor's own thread.
    /// Equivalent to `shutdown_handle().request_shutdown()` but skips the
    /// wake-up round trip.
    pub fn request_shutdown(&mut self) -> Result<()> {
        self.shutdown_requested.store(true, Ordering::SeqCst);
        self.begin_shutdown()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fd_token_roundtrips() {
        for fd in [0, 1, 3, 42, 65535] {
            assert_eq!(token_fd(fd_token(fd)), fd);
        }
    }

    #[test]
    fn reserved_tokens_never_collide_with_a_valid_fd_token() {
        for fd in 0..10 {
            let t = fd_token(fd);
            assert_ne!(t, WAKER_TOKEN);
            assert_ne!(t, SIGNAL_TOKEN);
            assert_ne!(t, LISTENER_TOKEN);
        }
    }
}
