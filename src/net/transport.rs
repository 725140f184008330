use futures::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_util::codec::Framed;

use crate::api::message::Message;
use crate::loader::config::BalancerConfig;
use crate::net::codec::MessageCodec;

/// Called with the reply of an asynchronous send, at most once.
pub type ReplyCallback = Box<dyn FnOnce(Message) + Send + 'static>;

/// Outbound side of the protocol: one fresh connection per message.
///
/// Failures are never retried. They surface as a missing reply and a debug log line.
#[derive(Debug, Clone, Copy)]
pub struct Transport {
    connect_timeout: Duration,
    response_timeout: Duration,
}

impl Transport {
    pub fn new(connect_timeout: Duration, response_timeout: Duration) -> Self {
        Transport { connect_timeout, response_timeout }
    }

    pub fn from_config(config: &BalancerConfig) -> Self {
        Self::new(config.connect_timeout, config.response_timeout)
    }

    async fn connect(&self, address: &str, port: u16) -> Option<Framed<TcpStream, MessageCodec>> {
        match timeout(self.connect_timeout, TcpStream::connect((address, port))).await {
            Ok(Ok(stream)) => Some(Framed::new(stream, MessageCodec::new())),
            Ok(Err(e)) => {
                log::debug!("Could not connect to {}:{}: {}", address, port, e);
                None
            }
            Err(_) => {
                log::debug!("Connecting to {}:{} timed out", address, port);
                None
            }
        }
    }

    /// Sends `message` and waits for a single reply line.
    ///
    /// `None` if the peer is unreachable, closes without replying, or stays silent past the
    /// response timeout.
    pub async fn send(&self, message: Message, address: &str, port: u16) -> Option<Message> {
        let kind = message.kind();
        let mut framed = self.connect(address, port).await?;

        if let Err(e) = framed.send(message).await {
            log::debug!("Failed to send {} to {}:{}: {}", kind, address, port, e);
            return None;
        }

        match timeout(self.response_timeout, framed.next()).await {
            Ok(Some(Ok(reply))) => Some(reply),
            Ok(Some(Err(e))) => {
                log::debug!("Broken reply to {} from {}:{}: {}", kind, address, port, e);
                None
            }
            Ok(None) => None,
            Err(_) => {
                log::warn!("No reply to {} from {}:{} within {:?}", kind, address, port, self.response_timeout);
                None
            }
        }
    }

    /// Writes `message` and closes the connection without waiting for anything.
    pub async fn deliver(&self, message: Message, address: &str, port: u16) -> bool {
        let kind = message.kind();
        let Some(mut framed) = self.connect(address, port).await else {
            return false;
        };

        match framed.send(message).await {
            Ok(()) => true,
            Err(e) => {
                log::debug!("Failed to deliver {} to {}:{}: {}", kind, address, port, e);
                false
            }
        }
    }

    /// Fire-and-forget on a separate task. With a callback, the reply (if any) is handed to it.
    pub fn send_async(&self, message: Message, address: &str, port: u16, callback: Option<ReplyCallback>) {
        let transport = *self;
        let address = address.to_string();

        tokio::spawn(async move {
            match callback {
                Some(callback) => {
                    if let Some(reply) = transport.send(message, &address, port).await {
                        callback(reply);
                    }
                }
                None => {
                    transport.deliver(message, &address, port).await;
                }
            }
        });
    }
}

impl Default for Transport {
    fn default() -> Self {
        Self::from_config(&BalancerConfig::default())
    }
}
