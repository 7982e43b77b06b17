pub mod admin;
pub mod config;
pub mod error;
pub mod leads;
pub mod notify;
pub mod path_guard;
pub mod server;
