pub mod config;
pub mod connector;
pub mod server;
pub mod store;
