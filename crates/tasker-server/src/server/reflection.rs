//! Service reflection.
//!
//! Every [`HttpServer`](crate::server::http::HttpServer) mounts a
//! [`ReflectionService`] at construction and tells it about each service added
//! through `register_service`, so clients can discover what a server hosts:
//!
//! - `ListServices` `{}` returns `{"services": ["<name>", ...]}` in
//!   registration order.
//! - `DescribeService` `{"service": "<name>"}` returns the service's
//!   descriptor, or `not_found`.

use crate::server::http::Body;
use crate::server::rpc::{self, RpcError, RpcService, ServiceDescriptor};
use bytes::Bytes;
use http::Response;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

pub const SERVICE_NAME: &str = "twirp.reflection.v1.ReflectionService";

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListServicesRequest {}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListServicesResponse {
    #[serde(default)]
    pub services: Vec<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DescribeServiceRequest {
    pub service: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DescribeServiceResponse {
    pub service: ServiceDescriptor,
}

/// Registry of the services mounted on one server. Clones share the registry.
#[derive(Clone, Debug, Default)]
pub struct ReflectionService {
    services: Arc<RwLock<Vec<ServiceDescriptor>>>,
}

impl ReflectionService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, descriptor: ServiceDescriptor) {
        tracing::debug!(service = %descriptor.name, prefix = %descriptor.path_prefix, "service registered");
        self.services.write().push(descriptor);
    }

    /// Snapshot of the registered services.
    pub fn services(&self) -> Vec<ServiceDescriptor> {
        self.services.read().clone()
    }

    pub fn list_services(&self, _req: ListServicesRequest) -> ListServicesResponse {
        ListServicesResponse {
            services: self
                .services
                .read()
                .iter()
                .map(|service| service.name.clone())
                .collect(),
        }
    }

    pub fn describe_service(
        &self,
        req: DescribeServiceRequest,
    ) -> Result<DescribeServiceResponse, RpcError> {
        self.services
            .read()
            .iter()
            .find(|service| service.name == req.service)
            .cloned()
            .map(|service| DescribeServiceResponse { service })
            .ok_or_else(|| RpcError::not_found(format!("service {:?} not found", req.service)))
    }
}

impl RpcService for ReflectionService {
    fn descriptor(&self) -> ServiceDescriptor {
        ServiceDescriptor::new(SERVICE_NAME, &["ListServices", "DescribeService"])
    }

    async fn dispatch(&self, method: &str, body: Bytes) -> Result<Response<Body>, RpcError> {
        match method {
            "ListServices" => rpc::encode(&self.list_services(rpc::decode(&body)?)),
            "DescribeService" => rpc::encode(&self.describe_service(rpc::decode(&body)?)?),
            other => Err(RpcError::bad_route(format!(
                "unknown method {other:?} for {SERVICE_NAME}"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::rpc::ErrorCode;

    #[test]
    fn lists_in_registration_order() {
        let reflection = ReflectionService::new();
        reflection.register(reflection.descriptor());
        reflection.register(ServiceDescriptor::new("tasker.v1.TaskService", &["GetTask"]));

        let res = reflection.list_services(ListServicesRequest {});
        assert_eq!(res.services, [SERVICE_NAME, "tasker.v1.TaskService"]);
    }

    #[test]
    fn describes_known_services_only() {
        let reflection = ReflectionService::new();
        let shared = reflection.clone();
        shared.register(ServiceDescriptor::new("tasker.v1.TaskService", &["GetTask"]));

        let res = reflection
            .describe_service(DescribeServiceRequest {
                service: "tasker.v1.TaskService".to_owned(),
            })
            .unwrap();
        assert_eq!(res.service.path_prefix, "/twirp/tasker.v1.TaskService/");
        assert_eq!(res.service.methods, ["GetTask"]);

        let err = reflection
            .describe_service(DescribeServiceRequest {
                service: "missing.v1.Nothing".to_owned(),
            })
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::NotFound);
    }
}
