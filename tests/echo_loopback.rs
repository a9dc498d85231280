//! End-to-end loopback: a real client talks to a `Reactor<Echo>` running on
//! a background thread (spec §8 scenario 4).

use socket2::{Domain, Socket, Type};
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::os::unix::io::IntoRawFd;
use std::thread;
use std::time::Duration;
use tskv_io::config::ReactorConfig;
use tskv_io::metrics::{get_counter, BytesReceived, BytesSent};
use tskv_io::protocol::Echo;
use tskv_io::reactor::Reactor;

fn bind_ephemeral_listener() -> (Socket, SocketAddr) {
    let addr: SocketAddr = "127.0.0.1:0".parse().unwrap();
    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, None).unwrap();
    socket.set_nonblocking(true).unwrap();
    socket.bind(&addr.into()).unwrap();
    socket.listen(128).unwrap();
    let local_addr = socket.local_addr().unwrap().as_socket().unwrap();
    (socket, local_addr)
}

#[test]
fn client_ping_is_echoed_then_channel_closes_on_half_close() {
    let (listener, addr) = bind_ephemeral_listener();

    let mut reactor = Reactor::<Echo>::new(ReactorConfig::default()).expect("reactor construction");
    reactor.add_listener(listener.into_raw_fd()).expect("register listener");
    let shutdown = reactor.shutdown_handle();

    let server = thread::spawn(move || reactor.run());

    let mut client = TcpStream::connect(addr).expect("client connect");
    client.write_all(b"ping").expect("client write");
    client.shutdown(std::net::Shutdown::Write).expect("client half-close");

    let mut echoed = Vec::new();
    client.read_to_end(&mut echoed).expect("client read echo");
    assert_eq!(echoed, b"ping");

    // give the reactor thread a moment to fold its metrics shard and settle
    // the channel into Draining -> Closed before we ask for shutdown.
    thread::sleep(Duration::from_millis(50));

    shutdown.request_shutdown().expect("request shutdown");
    let result = server.join().expect("reactor thread panicked");
    assert!(result.is_ok(), "reactor run() returned an error: {result:?}");

    assert_eq!(get_counter::<BytesReceived>(), 4);
    assert_eq!(get_counter::<BytesSent>(), 4);
}
