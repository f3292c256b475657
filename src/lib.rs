pub mod channel;
pub mod config;
pub mod error;
pub mod events;
pub mod handlers;
pub mod server;
pub mod state;
pub mod sweeper;

pub type UserId = String;
pub type CallId = String;
/// Transport-assigned connection id, distinct from the user id.
pub type ConnId = String;
