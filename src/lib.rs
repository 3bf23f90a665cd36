pub mod client;
pub mod codec;
pub mod command;
pub mod commands;
pub mod connection;
pub mod encoding;
pub mod keyspace;
pub mod monitor;
pub mod pattern;
pub mod proxy;
pub mod pubsub;
pub mod reply;
pub mod server;
pub mod session;
pub mod store;
pub mod zset;

pub use command::Command;
pub use reply::Reply;

pub type Error = Box<dyn std::error::Error + Send + Sync>;
pub type Result<T> = std::result::Result<T, Error>;
