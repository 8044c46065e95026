//! Network-facing runtime: HTTP front end, gossip transport and the server
//! that wires them to a store.

pub mod gossip_manager;
pub mod http;
mod server;

pub use gossip_manager::{GossipManager, GossipRoundReport};
pub use server::{DirectoryServer, ServerError};
