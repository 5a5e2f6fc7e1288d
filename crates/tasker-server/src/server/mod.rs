//! Server building blocks.
//!
//! ## Structure
//!
//! - [`http`] - `HttpServer`: listener, routes, middleware, graceful shutdown.
//! - [`rpc`] - JSON RPC conventions shared by every service.
//! - [`reflection`] - lists the services a server hosts.
//! - [`service`] - the task RPC service.
//! - [`config`] - command line and environment configuration.
//! - [`telemetry`] - logging setup and service metadata.

pub mod config;
pub mod http;
pub mod reflection;
pub mod rpc;
pub mod service;
pub mod telemetry;
