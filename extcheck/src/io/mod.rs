//! I/O: subprocess execution, transports, configuration and storage views.

pub mod client;
pub mod config;
pub mod file_transport;
pub mod process;
pub mod snapshot;
pub mod store;
pub mod transport;
