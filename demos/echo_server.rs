//! Echo server demo: wires `Reactor<Echo>` up to a real listening socket.
//!
//! Use: `cargo run --example echo_server`, then `nc 127.0.0.1 8080`.
//! `Ctrl+C` triggers the reactor's own signal-to-descriptor shutdown path —
//! no separate signal handler needed.

use socket2::{Domain, Socket, Type};
use std::net::SocketAddr;
use std::os::unix::io::IntoRawFd;
use tskv_io::config::ReactorConfig;
use tskv_io::protocol::Echo;
use tskv_io::reactor::Reactor;

fn main() -> tskv_io::error::Result<()> {
    tskv_io::logging::init();

    let addr: SocketAddr = "127.0.0.1:8080".parse().expect("valid socket address");
    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, None)?;
    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(1024)?;

    println!("tskv-io echo server listening on {addr}");
    println!("try: nc {} {}", addr.ip(), addr.port());

    let mut reactor = Reactor::<Echo>::new(ReactorConfig::default())?;
    reactor.add_listener(socket.into_raw_fd())?;
    reactor.run()
}
