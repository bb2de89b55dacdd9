pub mod client;
pub mod config;
pub mod datagram;
pub mod dispatcher;
pub mod error;
pub mod server;
pub mod shared;
pub mod storage;
pub mod stream;
