//! # Chat Gateway
//!
//! Serves the chat page and carries its WebSocket protocol. Every
//! connection gets its own session loop; the page only renders what the
//! server tells it.

mod connection;
mod events;
mod server;
mod session;

pub use connection::{OpenPage, PageRegistry};
pub use events::{ClientMessage, ServerMessage};
pub use server::{router as gateway_router, run as run_gateway, GatewayServer, SharedGateway};
pub use session::{run_session, ChannelCallback};
