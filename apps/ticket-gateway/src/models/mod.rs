pub mod content;
pub mod ticket;
pub mod user;
