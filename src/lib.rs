pub mod config;
pub mod daemon;
pub mod domain;
pub mod error;
pub mod feed;
pub mod fetch;
pub mod mail;
pub mod reader;
pub mod server;
pub mod store;
