pub mod events;
pub mod fanout;
pub mod handler;
pub mod liveness;
pub mod registry;
pub mod server;
pub mod session;
