//! Task RPC service.
//!
//! - [`handler`] - `TaskService`, the `tasker.v1.TaskService` RPC handlers.

pub mod handler;
