pub mod codec;
pub mod server;
pub mod transport;

pub use codec::MessageCodec;
pub use server::{MessageHandler, MessageServer, Responder};
pub use transport::Transport;
