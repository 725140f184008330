use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;

use crate::api::message::Message;
use crate::error::Result;
use crate::net::codec::MessageCodec;

/// Receives every inbound message together with the connection it arrived on.
#[async_trait]
pub trait MessageHandler: Send + Sync + 'static {
    async fn handle(&self, message: Message, responder: Responder);
}

/// The open connection an inbound message arrived on. Dropping it closes the socket.
pub struct Responder {
    framed: Framed<TcpStream, MessageCodec>,
    peer: SocketAddr,
}

impl Responder {
    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// Writes the single reply of this connection, then closes it.
    pub async fn respond(mut self, message: Message) {
        let kind = message.kind();
        if let Err(e) = self.framed.send(message).await {
            log::debug!("Failed to reply {} to {}: {}", kind, self.peer, e);
        }
    }

    /// Next well-formed message on this connection, `None` once the peer hangs up.
    ///
    /// For peers that stream many one-way messages over a single connection.
    pub async fn next_message(&mut self) -> Option<Message> {
        match self.framed.next().await? {
            Ok(message) => Some(message),
            Err(e) => {
                log::debug!("Connection from {} failed: {}", self.peer, e);
                None
            }
        }
    }

    /// Closes the connection without replying.
    pub fn close(self) {}
}

/// Accept loop handing each connection's first well-formed message to a [`MessageHandler`].
pub struct MessageServer {
    listener: TcpListener,
    port: u16,
}

impl MessageServer {
    /// Binds on all interfaces; `None` picks a free port.
    pub async fn bind(port: Option<u16>) -> Result<Self> {
        let listener = TcpListener::bind(("0.0.0.0", port.unwrap_or(0))).await?;
        let port = listener.local_addr()?.port();
        log::debug!("Listening on port {}", port);
        Ok(MessageServer { listener, port })
    }

    pub fn local_port(&self) -> u16 {
        self.port
    }

    /// Runs until `shutdown` is cancelled. Every connection is served on its own task.
    pub async fn serve<H: MessageHandler>(self, handler: Arc<H>, shutdown: CancellationToken) {
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        let handler = handler.clone();
                        tokio::spawn(async move { Self::handle_connection(stream, peer, handler).await });
                    }
                    Err(e) => log::warn!("Failed to accept a connection on port {}: {}", self.port, e),
                },
            }
        }
        log::debug!("Server on port {} stopped", self.port);
    }

    async fn handle_connection<H: MessageHandler>(stream: TcpStream, peer: SocketAddr, handler: Arc<H>) {
        let mut framed = Framed::new(stream, MessageCodec::new());
        match framed.next().await {
            Some(Ok(message)) => handler.handle(message, Responder { framed, peer }).await,
            Some(Err(e)) => log::debug!("Connection from {} failed: {}", peer, e),
            None => log::debug!("Connection from {} closed without a message", peer),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::transport::Transport;
    use std::time::Duration;

    struct Echo;

    #[async_trait]
    impl MessageHandler for Echo {
        async fn handle(&self, message: Message, responder: Responder) {
            match message {
                Message::SpinUpNodes { node_count } => responder.respond(Message::ResponseMessage { text: format!("{}", node_count) }).await,
                _ => responder.close(),
            }
        }
    }

    #[tokio::test]
    async fn request_reply_and_fire_and_forget() {
        let server = MessageServer::bind(None).await.unwrap();
        let port = server.local_port();
        let shutdown = CancellationToken::new();
        tokio::spawn(server.serve(Arc::new(Echo), shutdown.clone()));
        let transport = Transport::new(Duration::from_secs(1), Duration::from_secs(1));

        let reply = transport.send(Message::SpinUpNodes { node_count: 4 }, "localhost", port).await;
        assert!(matches!(reply, Some(Message::ResponseMessage { ref text }) if text == "4"));

        let closed = transport.send(Message::KillNodes, "localhost", port).await;
        assert!(closed.is_none());

        assert!(transport.deliver(Message::KillNodes, "localhost", port).await);
        shutdown.cancel();
    }

    struct Counter(tokio::sync::mpsc::UnboundedSender<usize>);

    #[async_trait]
    impl MessageHandler for Counter {
        async fn handle(&self, _message: Message, mut responder: Responder) {
            let mut count = 1;
            while responder.next_message().await.is_some() {
                count += 1;
            }
            let _ = self.0.send(count);
        }
    }

    #[tokio::test]
    async fn one_connection_can_carry_a_stream_of_messages() {
        let server = MessageServer::bind(None).await.unwrap();
        let port = server.local_port();
        let shutdown = CancellationToken::new();
        let (counts, mut received) = tokio::sync::mpsc::unbounded_channel();
        tokio::spawn(server.serve(Arc::new(Counter(counts)), shutdown.clone()));

        let stream = TcpStream::connect(("localhost", port)).await.unwrap();
        let mut framed = Framed::new(stream, MessageCodec::new());
        for _ in 0..3 {
            framed.send(Message::KillNodes).await.unwrap();
        }
        drop(framed);

        let count = tokio::time::timeout(Duration::from_secs(2), received.recv()).await.unwrap();
        assert_eq!(count, Some(3));
        shutdown.cancel();
    }

    #[tokio::test]
    async fn unreachable_peer_yields_none() {
        let port = {
            let server = MessageServer::bind(None).await.unwrap();
            server.local_port()
        };
        let transport = Transport::new(Duration::from_millis(200), Duration::from_millis(200));

        assert!(transport.send(Message::KillNodes, "localhost", port).await.is_none());
        assert!(!transport.deliver(Message::KillNodes, "localhost", port).await);
    }
}
