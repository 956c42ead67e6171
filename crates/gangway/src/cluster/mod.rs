pub mod dialect;
pub mod remote;
pub mod server;
pub mod session;
pub mod ssh;
