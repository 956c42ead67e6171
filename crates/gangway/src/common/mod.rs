pub mod config;
pub mod error;
pub mod limiter;
pub mod retry;
pub mod strutils;
