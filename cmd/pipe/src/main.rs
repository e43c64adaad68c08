//! Pipe demo (spec §8 scenario 5): a writer sends `["Lorem ipsum.",
//! "\xff"]`; the reader reads byte by byte until it sees `0xff` and exits
//! without error.

use rt_core::{klog_info, Completion};
use rt_io::pipe;
use rt_runtime::epoll_reactor::EpollReactor;

fn main() {
    rt_core::log::init();
    let reactor = EpollReactor::default();
    let (reader, writer) = pipe(reactor.clone()).expect("failed to create pipe");

    let rc = reactor.clone();
    reactor.spawn(async move {
        match writer.write(b"Lorem ipsum.").await {
            Completion::Value(12) => {}
            other => panic!("unexpected write outcome: {other:?}"),
        }
        match writer.write(&[0xffu8]).await {
            Completion::Value(1) => {}
            other => panic!("unexpected terminator write outcome: {other:?}"),
        }

        let mut message = Vec::new();
        loop {
            let mut byte = [0u8; 1];
            match reader.read_some(&mut byte).await {
                Completion::Value(_) if byte[0] == 0xff => break,
                Completion::Value(_) => message.push(byte[0]),
                other => panic!("unexpected read outcome: {other:?}"),
            }
        }
        klog_info!("reader collected {:?}", String::from_utf8_lossy(&message));
        assert_eq!(message, b"Lorem ipsum.");

        rc.request_stop();
    });

    reactor.run();
}
