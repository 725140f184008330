use async_trait::async_trait;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::api::message::Message;
use crate::error::Result;
use crate::net::{MessageHandler, MessageServer, Responder};

/// Target under which forwarded node log lines are re-emitted.
pub const REMOTE_TARGET: &str = "remote";

/// Central log collector: prints every `LogMessage` the nodes forward through the local logger.
///
/// A connection may carry any number of messages; it is read until the node hangs up.
pub struct LogSink;

impl LogSink {
    /// Starts serving on `port` (a free one if `None`) and returns the bound port.
    pub async fn start(port: Option<u16>, shutdown: CancellationToken) -> Result<u16> {
        let server = MessageServer::bind(port).await?;
        let port = server.local_port();
        log::info!("Log sink listening on port {}", port);
        tokio::spawn(server.serve(Arc::new(LogSink), shutdown));
        Ok(port)
    }
}

#[async_trait]
impl MessageHandler for LogSink {
    async fn handle(&self, message: Message, mut responder: Responder) {
        // Nodes keep one connection open and stream their lines over it.
        print_line(message);
        while let Some(message) = responder.next_message().await {
            print_line(message);
        }
    }
}

fn print_line(message: Message) {
    match message {
        Message::LogMessage { node, level, text } => {
            let level = level.parse::<log::Level>().unwrap_or(log::Level::Info);
            log::log!(target: REMOTE_TARGET, level, "[node {}] {}", node, text);
        }
        other => log::warn!("Log sink ignores {} messages", other.kind()),
    }
}
