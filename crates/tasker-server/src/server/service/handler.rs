//! RPC handlers for `tasker.v1.TaskService`.
//!
//! [`TaskService`] answers `ListTasks`, `CreateTask` and `GetTask` from the
//! SQLite-backed [`TaskStore`] through a shared [`StatementCache`], so every
//! statement is prepared once per process no matter how many requests race
//! for it.
//!
//! ## Responsibilities
//!
//! - Validate incoming requests.
//! - Run the matching prepared statement.
//! - Map domain errors to RPC error codes (see [`RpcError`]).
//! - Release every prepared statement on [`TaskService::close`].

use crate::server::http::Body;
use crate::server::rpc::{self, RpcError, RpcService, ServiceDescriptor};
use bytes::Bytes;
use chrono::Utc;
use http::Response;
use std::sync::Arc;
use tasker_core::{
    Error, Result,
    store::{GET_TASK, INSERT_TASK, LIST_TASKS, StatementCache, TaskStore},
    types::{
        CreateTaskRequest, CreateTaskResponse, GetTaskRequest, GetTaskResponse, ListTasksRequest,
        ListTasksResponse, Task,
    },
};

pub const SERVICE_NAME: &str = "tasker.v1.TaskService";

/// Task RPC service. Clones share one statement cache.
#[derive(Clone, Debug)]
pub struct TaskService {
    statements: Arc<StatementCache>,
}

impl TaskService {
    pub fn new(store: TaskStore) -> Self {
        Self {
            statements: Arc::new(StatementCache::new(store)),
        }
    }

    pub fn statements(&self) -> &StatementCache {
        &self.statements
    }

    pub async fn list_tasks(&self, _req: ListTasksRequest) -> Result<ListTasksResponse> {
        let tasks = self.statements.query(LIST_TASKS, &[]).await?;
        Ok(ListTasksResponse { tasks })
    }

    pub async fn create_task(&self, req: CreateTaskRequest) -> Result<CreateTaskResponse> {
        if req.title.trim().is_empty() {
            return Err(Error::InvalidRequest {
                reason: "title must not be empty".to_owned(),
            });
        }

        let created = Utc::now();
        let res = self
            .statements
            .execute(
                INSERT_TASK,
                &[
                    created.into(),
                    req.title.as_str().into(),
                    req.description.as_str().into(),
                ],
            )
            .await?;

        tracing::debug!(id = res.last_insert_id, "task created");
        Ok(CreateTaskResponse {
            task: Task {
                id: res.last_insert_id,
                created,
                title: req.title,
                description: req.description,
            },
        })
    }

    pub async fn get_task(&self, req: GetTaskRequest) -> Result<GetTaskResponse> {
        self.statements
            .query(GET_TASK, &[req.id.into()])
            .await?
            .into_iter()
            .next()
            .map(|task| GetTaskResponse { task })
            .ok_or(Error::NotFound { id: req.id })
    }

    /// Releases every prepared statement. Later requests fail with
    /// `unavailable`. The store itself stays open.
    pub fn close(&self) {
        self.statements.close();
    }
}

impl RpcService for TaskService {
    fn descriptor(&self) -> ServiceDescriptor {
        ServiceDescriptor::new(SERVICE_NAME, &["ListTasks", "CreateTask", "GetTask"])
    }

    async fn dispatch(&self, method: &str, body: Bytes) -> core::result::Result<Response<Body>, RpcError> {
        match method {
            "ListTasks" => rpc::encode(&self.list_tasks(rpc::decode(&body)?).await?),
            "CreateTask" => rpc::encode(&self.create_task(rpc::decode(&body)?).await?),
            "GetTask" => rpc::encode(&self.get_task(rpc::decode(&body)?).await?),
            other => Err(RpcError::bad_route(format!(
                "unknown method {other:?} for {SERVICE_NAME}"
            ))),
        }
    }
}
