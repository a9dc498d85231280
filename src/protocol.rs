//! Protocol plug-in capability contract.
//!
//! A protocol is a small tag-dispatched surface (spec §9 notes there is no
//! need for dynamic dispatch unless heterogeneous protocols share a
//! reactor): three hooks operating on an opaque I/O handle that exposes only
//! a readable RX view, `rx_consume`, and `tx_send`.

use crate::buffer::BoundedBuffer;

/// Outcome of [`ChannelIo::tx_send`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendResult {
    /// All bytes fit in the TX buffer.
    Full,
    /// Some bytes fit; the TX buffer is now full. The caller should back off.
    Partial,
    /// The channel is not accepting new bytes (Aborting or Closed); the TX
    /// buffer was not modified.
    Forbidden,
}

/// The channel-I/O surface a protocol hook is allowed to touch.
///
/// Deliberately narrow: a protocol cannot see channel state, fd, or
/// readiness directly, only the RX/TX buffering primitives it needs (spec
/// §4.4/§6).
pub trait ChannelIo {
    /// A readable view of up to `max` received bytes, at offset zero.
    fn rx_span(&self, max: usize) -> &[u8];

    /// Drop the first `k` bytes of the RX view (clamped to what's available).
    fn rx_consume(&mut self, k: usize);

    /// Stage `bytes` for transmission. See [`SendResult`] for the outcomes.
    fn tx_send(&mut self, bytes: &[u8]) -> (usize, SendResult);
}

/// Concrete [`ChannelIo`] backed by a channel's own RX/TX buffers, plus the
/// state gate that makes `tx_send` return `Forbidden`.
pub(crate) struct BufferIo<'a> {
    pub(crate) rx: &'a mut BoundedBuffer,
    pub(crate) tx: &'a mut BoundedBuffer,
    pub(crate) accepting_writes: bool,
}

impl ChannelIo for BufferIo<'_> {
    fn rx_span(&self, max: usize) -> &[u8] {
        self.rx.readable_span(max)
    }

    fn rx_consume(&mut self, k: usize) {
        self.rx.consume(k);
    }

    fn tx_send(&mut self, bytes: &[u8]) -> (usize, SendResult) {
        if !self.accepting_writes {
            return (0, SendResult::Forbidden);
        }
        let n = self.tx.write_from(bytes);
        let result = if n == bytes.len() { SendResult::Full } else { SendResult::Partial };
        (n, result)
    }
}

/// A protocol plug-in: the three hooks the channel drain loop invokes.
pub trait Protocol {
    /// Called once per drain iteration while RX is non-empty. May
    /// `rx_consume` and/or `tx_send` on `io`.
    fn on_read(&mut self, io: &mut dyn ChannelIo);

    /// Called when the channel transitions to Aborting due to a transport
    /// error, with the errno that triggered it.
    fn on_error(&mut self, io: &mut dyn ChannelIo, errno: i32);

    /// Called once at terminal disposal, before the channel is detached.
    fn on_close(&mut self, io: &mut dyn ChannelIo);
}

/// `on_read`: echo everything received straight back out, then consume
/// exactly what was queued. Used by the demo binary and the loopback
/// integration test (spec §8 scenario 4).
#[derive(Debug, Default, Clone, Copy)]
pub struct Echo;

impl Protocol for Echo {
    fn on_read(&mut self, io: &mut dyn ChannelIo) {
        let rx = io.rx_span(usize::MAX).to_vec();
        if rx.is_empty() {
            return;
        }
        let (n, _) = io.tx_send(&rx);
        io.rx_consume(n);
    }

    fn on_error(&mut self, _io: &mut dyn ChannelIo, _errno: i32) {}

    fn on_close(&mut self, _io: &mut dyn ChannelIo) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn echo_forwards_rx_to_tx_and_consumes_only_what_was_sent() {
        let mut rx = BoundedBuffer::with_capacity(16);
        let mut tx = BoundedBuffer::with_capacity(16);
        rx.write_from(b"ping");

        let mut io = BufferIo { rx: &mut rx, tx: &mut tx, accepting_writes: true };
        let mut echo = Echo;
        echo.on_read(&mut io);

        assert_eq!(rx.used(), 0);
        assert_eq!(tx.readable_span(16), b"ping");
    }

    #[test]
    fn echo_leaves_unsent_bytes_when_tx_is_tight() {
        let mut rx = BoundedBuffer::with_capacity(16);
        let mut tx = BoundedBuffer::with_capacity(2);
        rx.write_from(b"ping");

        let mut io = BufferIo { rx: &mut rx, tx: &mut tx, accepting_writes: true };
        let mut echo = Echo;
        echo.on_read(&mut io);

        // only the first 2 bytes fit in tx, so rx_consume only drops those 2
        assert_eq!(rx.used(), 2);
        assert_eq!(rx.readable_span(2), b"ng");
    }

    #[test]
    fn tx_send_forbidden_does_not_modify_buffer() {
        let mut rx = BoundedBuffer::with_capacity(16);
        let mut tx = BoundedBuffer::with_capacity(16);
        let mut io = BufferIo { rx: &mut rx, tx: &mut tx, accepting_writes: false };

        let (n, result) = io.tx_send(b"data");
        assert_eq!(n, 0);
        assert_eq!(result, SendResult::Forbidden);
        assert_eq!(tx.used(), 0);
    }
}
