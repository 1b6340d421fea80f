//! In-process client sockets.
//!
//! `memory_socket()` returns the browser side of a channel plus the sink and
//! stream halves the core expects from an accepted socket. Used by the tests
//! and by hosts that want to drive the core without a browser.

use futures::channel::mpsc::{UnboundedReceiver, UnboundedSender, unbounded};
use futures::{FutureExt, StreamExt};
use std::convert::Infallible;
use std::time::Duration;

use crate::channel::Frame;

pub type MemorySink = UnboundedSender<Frame>;
pub type MemoryStream = UnboundedReceiver<Result<Frame, Infallible>>;

/// The client ("browser") end of an in-memory channel socket.
pub struct MemoryClient {
    to_server: UnboundedSender<Result<Frame, Infallible>>,
    from_server: UnboundedReceiver<Frame>,
}

pub fn memory_socket() -> (MemoryClient, MemorySink, MemoryStream) {
    let (to_server, server_stream) = unbounded();
    let (server_sink, from_server) = unbounded();
    (
        MemoryClient {
            to_server,
            from_server,
        },
        server_sink,
        server_stream,
    )
}

impl MemoryClient {
    /// Returns false once the server side has gone away.
    pub fn send(&self, frame: Frame) -> bool {
        self.to_server.unbounded_send(Ok(frame)).is_ok()
    }

    pub fn send_text(&self, text: impl Into<String>) -> bool {
        self.send(Frame::Text(text.into()))
    }

    pub fn send_binary(&self, bytes: impl Into<Vec<u8>>) -> bool {
        self.send(Frame::Binary(bytes.into()))
    }

    /// Next frame from the server; `None` once the server closed the socket.
    pub async fn recv(&mut self) -> Option<Frame> {
        self.from_server.next().await
    }

    pub fn try_recv(&mut self) -> Option<Frame> {
        self.from_server.next().now_or_never().flatten()
    }

    /// Blocking receive for synchronous callers; not for use inside a runtime.
    ///
    /// `None` when the server closed the socket or nothing arrived in time.
    pub fn recv_timeout(&mut self, timeout: Duration) -> Option<Frame> {
        let clock = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()
            .ok()?;
        clock.block_on(async {
            tokio::time::timeout(timeout, self.from_server.next())
                .await
                .ok()
                .flatten()
        })
    }

    /// Drop both directions, as a closing browser tab would.
    pub fn disconnect(self) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::SinkExt;

    #[test]
    fn frames_cross_both_ways() {
        let (mut client, mut sink, mut stream) = memory_socket();

        assert!(client.send_binary(vec![7, 7]));
        let inbound = futures::executor::block_on(stream.next());
        assert_eq!(inbound, Some(Ok(Frame::Binary(vec![7, 7]))));

        futures::executor::block_on(sink.send(Frame::Text("hi".into()))).unwrap();
        assert_eq!(
            client.recv_timeout(Duration::from_secs(1)),
            Some(Frame::Text("hi".into()))
        );
        assert_eq!(client.try_recv(), None);
        assert_eq!(client.recv_timeout(Duration::from_millis(20)), None);
    }

    #[test]
    fn recv_timeout_sees_server_close() {
        let (mut client, sink, _stream) = memory_socket();
        drop(sink);
        assert_eq!(client.recv_timeout(Duration::from_secs(5)), None);
    }

    #[test]
    fn disconnect_ends_server_stream() {
        let (client, _sink, mut stream) = memory_socket();
        client.disconnect();
        assert_eq!(futures::executor::block_on(stream.next()), None);
    }
}
