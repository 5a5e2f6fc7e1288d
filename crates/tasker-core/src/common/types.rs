//! # Task Types
//!
//! This module defines the task record and the request and response messages
//! exchanged by the task service. Both client and server serialize them as
//! JSON, so field names here are the wire contract.
//!
//! ## Overview
//!
//! - [`Task`] - A single stored task
//! - [`ListTasksRequest`] / [`ListTasksResponse`] - Enumerate all tasks
//! - [`CreateTaskRequest`] / [`CreateTaskResponse`] - Insert a task
//! - [`GetTaskRequest`] / [`GetTaskResponse`] - Fetch a task by id
//!
//! Optional request fields default when absent, so `{}` is a valid
//! `ListTasksRequest` and a `CreateTaskRequest` may omit its description.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A stored task.
///
/// Ids are assigned by the store, start at `1` and increase by one for every
/// inserted task.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    pub id: u64,
    pub created: DateTime<Utc>,
    pub title: String,
    #[serde(default)]
    pub description: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListTasksRequest {}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListTasksResponse {
    #[serde(default)]
    pub tasks: Vec<Task>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateTaskRequest {
    pub title: String,
    #[serde(default)]
    pub description: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateTaskResponse {
    pub task: Task,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetTaskRequest {
    pub id: u64,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetTaskResponse {
    pub task: Task,
}
