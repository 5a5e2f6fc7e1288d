#![doc = include_str!("../README.md")]

pub mod server;

pub use server::http::{HttpServer, ListenAddr, ServerError, ServerOption};
pub use server::service::handler::TaskService;
