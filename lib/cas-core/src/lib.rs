#![allow(clippy::len_without_is_empty)]
#![allow(clippy::new_without_default)]

pub mod async_io;
pub mod buffer;
pub mod channel;
pub mod client;
pub mod context;
pub mod dispatcher;
pub mod monitor;
pub mod pv;
pub mod registry;
pub mod server_tool;

pub use client::StreamClient;
