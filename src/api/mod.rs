pub mod handler;
pub mod schemas;
pub mod server;
