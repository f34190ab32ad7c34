//! HTTP surface: webhook intake, status, and administrative reset.

pub mod server;

pub use server::{start_http_server, ApiState};
