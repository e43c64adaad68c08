//! TCP echo demo (spec §8 scenario 4): a client connects to
//! `127.0.0.1:8086`, sends `"hello"`, the server uppercases it byte by
//! byte and replies, and the client observes `"HELLO"`.

use rt_core::Completion;
use rt_core::{klog_error, klog_info};
use rt_io::net::{Endpoint, Ipv4Address, Tcp};
use rt_io::{BasicSocketAcceptor, BasicStreamSocket};
use rt_runtime::epoll_reactor::EpollReactor;

fn addr() -> Endpoint {
    Endpoint::new(Ipv4Address::loopback(), 8086)
}

fn main() {
    rt_core::log::init();
    let reactor = EpollReactor::default();
    let addr = addr();

    let acceptor = BasicSocketAcceptor::bind(reactor.clone(), Tcp, addr, 16)
        .expect("failed to bind 127.0.0.1:8086");

    let server_reactor = reactor.clone();
    reactor.spawn(async move {
        loop {
            match acceptor.accept().await {
                Completion::Value(client) => {
                    let r = server_reactor.clone();
                    r.clone().spawn(async move {
                        serve_one(client).await;
                    });
                }
                Completion::Error(e) => {
                    klog_error!("accept failed: {e}");
                    break;
                }
                Completion::Stopped => break,
            }
        }
    });

    let client_reactor = reactor.clone();
    reactor.spawn(async move {
        let client = BasicStreamSocket::open(client_reactor.clone(), Tcp, addr)
            .expect("failed to open client socket");
        match client.connect(addr).await {
            Completion::Value(()) => {}
            Completion::Error(e) => panic!("connect failed: {e}"),
            Completion::Stopped => panic!("connect unexpectedly stopped"),
        }

        match client.write(b"hello").await {
            Completion::Value(5) => {}
            other => panic!("unexpected write outcome: {other:?}"),
        }

        let mut buf = [0u8; 5];
        match client.read(&mut buf).await {
            Completion::Value(5) => {}
            other => panic!("unexpected read outcome: {other:?}"),
        }
        klog_info!("client observed {:?}", std::str::from_utf8(&buf).unwrap());
        assert_eq!(&buf, b"HELLO");

        client_reactor.request_stop();
    });

    reactor.run();
}

/// Uppercases each byte it reads and echoes it straight back, one byte at
/// a time (spec §8 scenario 4: "server side uppercasing byte-by-byte").
async fn serve_one<S>(socket: BasicStreamSocket<Tcp, S>)
where
    S: rt_core::IoScheduler<IoObject = rt_runtime::epoll_reactor::IoHandle> + Clone,
{
    let mut byte = [0u8; 1];
    loop {
        match socket.read_some(&mut byte).await {
            Completion::Value(_) => {
                byte[0] = byte[0].to_ascii_uppercase();
                if !matches!(socket.write_some(&byte).await, Completion::Value(1)) {
                    break;
                }
            }
            // A closed peer surfaces as an EOF error on a stream read, not
            // a zero-byte value (spec §4.6 EOF table).
            Completion::Error(_) | Completion::Stopped => break,
        }
    }
}
